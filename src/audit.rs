//! Optional audit log: every mutation is appended to a sink as one
//! JSON-line statement that can be replayed against a fresh database.

use std::io::{BufRead, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::entity::{Db, SeqRef, Value};
use crate::error::{Error, Result};
use crate::value::Node;

/// A value tree as it appears in the log: scalars and keys are hex so
/// the line stays valid JSON for arbitrary bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum AuditNode {
    Null,
    Scalar {
        hex: String,
    },
    Map {
        #[serde(skip_serializing_if = "Option::is_none")]
        class: Option<String>,
        entries: Vec<(String, AuditNode)>,
    },
    Seq {
        #[serde(skip_serializing_if = "Option::is_none")]
        class: Option<String>,
        items: Vec<AuditNode>,
    },
}

impl From<&Node> for AuditNode {
    fn from(node: &Node) -> Self {
        match node {
            Node::Null => AuditNode::Null,
            Node::Scalar(bytes) => AuditNode::Scalar {
                hex: hex::encode(bytes),
            },
            Node::Map { entries, class } => AuditNode::Map {
                class: class.as_ref().map(hex::encode),
                entries: entries
                    .iter()
                    .map(|(k, v)| (hex::encode(k), AuditNode::from(v)))
                    .collect(),
            },
            Node::Seq { items, class } => AuditNode::Seq {
                class: class.as_ref().map(hex::encode),
                items: items.iter().map(AuditNode::from).collect(),
            },
        }
    }
}

fn unhex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(Error::audit)
}

impl AuditNode {
    pub fn to_node(&self) -> Result<Node> {
        Ok(match self {
            AuditNode::Null => Node::Null,
            AuditNode::Scalar { hex } => Node::Scalar(unhex(hex)?),
            AuditNode::Map { class, entries } => Node::Map {
                entries: entries
                    .iter()
                    .map(|(k, v)| Ok((unhex(k)?, v.to_node()?)))
                    .collect::<Result<_>>()?,
                class: class.as_deref().map(unhex).transpose()?,
            },
            AuditNode::Seq { class, items } => Node::Seq {
                items: items.iter().map(AuditNode::to_node).collect::<Result<_>>()?,
                class: class.as_deref().map(unhex).transpose()?,
            },
        })
    }
}

/// One replayable mutation. `path` addresses the target collection from
/// the root, each element the hex of a map key or decimal index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AuditRecord {
    Put {
        path: Vec<String>,
        key: String,
        value: AuditNode,
    },
    PutRef {
        path: Vec<String>,
        key: String,
        source: Vec<String>,
    },
    Delete {
        path: Vec<String>,
        key: String,
    },
    Clear {
        path: Vec<String>,
    },
    SeqPut {
        path: Vec<String>,
        index: u64,
        value: AuditNode,
    },
    Push {
        path: Vec<String>,
        value: AuditNode,
    },
    Pop {
        path: Vec<String>,
    },
    Splice {
        path: Vec<String>,
        start: u64,
        remove: u64,
        values: Vec<AuditNode>,
    },
    SeqDelete {
        path: Vec<String>,
        index: u64,
    },
    Begin,
    Commit,
    Rollback,
}

fn hex_path(path: &[Vec<u8>]) -> Vec<String> {
    path.iter().map(hex::encode).collect()
}

impl AuditRecord {
    pub(crate) fn put(path: &[Vec<u8>], key: &[u8], node: &Node) -> Self {
        AuditRecord::Put {
            path: hex_path(path),
            key: hex::encode(key),
            value: node.into(),
        }
    }

    pub(crate) fn put_ref(path: &[Vec<u8>], key: &[u8], source: &[Vec<u8>]) -> Self {
        AuditRecord::PutRef {
            path: hex_path(path),
            key: hex::encode(key),
            source: hex_path(source),
        }
    }

    pub(crate) fn delete(path: &[Vec<u8>], key: &[u8]) -> Self {
        AuditRecord::Delete {
            path: hex_path(path),
            key: hex::encode(key),
        }
    }

    pub(crate) fn clear(path: &[Vec<u8>]) -> Self {
        AuditRecord::Clear {
            path: hex_path(path),
        }
    }

    pub(crate) fn seq_put(path: &[Vec<u8>], index: u64, node: &Node) -> Self {
        AuditRecord::SeqPut {
            path: hex_path(path),
            index,
            value: node.into(),
        }
    }

    pub(crate) fn push(path: &[Vec<u8>], node: &Node) -> Self {
        AuditRecord::Push {
            path: hex_path(path),
            value: node.into(),
        }
    }

    pub(crate) fn pop(path: &[Vec<u8>]) -> Self {
        AuditRecord::Pop {
            path: hex_path(path),
        }
    }

    pub(crate) fn splice(path: &[Vec<u8>], start: u64, remove: u64, values: &[Node]) -> Self {
        AuditRecord::Splice {
            path: hex_path(path),
            start,
            remove,
            values: values.iter().map(AuditNode::from).collect(),
        }
    }

    pub(crate) fn seq_delete(path: &[Vec<u8>], index: u64) -> Self {
        AuditRecord::SeqDelete {
            path: hex_path(path),
            index,
        }
    }
}

pub(crate) struct AuditLog {
    out: Box<dyn Write + Send>,
}

impl AuditLog {
    pub fn from_config(config: &mut Config) -> Result<Option<Self>> {
        if let Some(sink) = config.audit_sink.take() {
            return Ok(Some(Self { out: sink }));
        }
        if let Some(path) = &config.audit_file {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            return Ok(Some(Self {
                out: Box::new(file),
            }));
        }
        Ok(None)
    }

    pub fn append(&mut self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(Error::audit)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}

enum Target {
    Map(crate::entity::MapRef),
    Seq(SeqRef),
}

fn navigate(db: &Db, path: &[String]) -> Result<Target> {
    let mut current = db.root()?;
    for segment in path {
        let key = unhex(segment)?;
        current = match current {
            Value::Map(map) => map
                .get(&key)?
                .ok_or_else(|| Error::audit("replay path not found"))?,
            Value::Seq(seq) => {
                let index: i64 = std::str::from_utf8(&key)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::audit("replay path has a non-numeric index"))?;
                seq.get(index)?
                    .ok_or_else(|| Error::audit("replay path not found"))?
            }
            _ => return Err(Error::audit("replay path runs through a scalar")),
        };
    }
    match current {
        Value::Map(map) => Ok(Target::Map(map)),
        Value::Seq(seq) => Ok(Target::Seq(seq)),
        _ => Err(Error::audit("replay target is not a collection")),
    }
}

fn target_map(db: &Db, path: &[String]) -> Result<crate::entity::MapRef> {
    match navigate(db, path)? {
        Target::Map(map) => Ok(map),
        Target::Seq(_) => Err(Error::audit("replay target is not a map")),
    }
}

fn target_seq(db: &Db, path: &[String]) -> Result<SeqRef> {
    match navigate(db, path)? {
        Target::Seq(seq) => Ok(seq),
        Target::Map(_) => Err(Error::audit("replay target is not a sequence")),
    }
}

fn apply(db: &Db, record: &AuditRecord) -> Result<()> {
    match record {
        AuditRecord::Begin => db.begin_work(),
        AuditRecord::Commit => db.commit(),
        AuditRecord::Rollback => db.rollback(),
        AuditRecord::Put { path, key, value } => {
            target_map(db, path)?.put(unhex(key)?, value.to_node()?)
        }
        AuditRecord::PutRef { path, key, source } => {
            let value = match navigate(db, source)? {
                Target::Map(map) => Value::Map(map),
                Target::Seq(seq) => Value::Seq(seq),
            };
            target_map(db, path)?.put_ref(unhex(key)?, &value)
        }
        AuditRecord::Delete { path, key } => {
            target_map(db, path)?.delete(unhex(key)?).map(|_| ())
        }
        AuditRecord::Clear { path } => match navigate(db, path)? {
            Target::Map(map) => map.clear(),
            Target::Seq(seq) => seq.clear(),
        },
        AuditRecord::SeqPut { path, index, value } => {
            target_seq(db, path)?.put(*index as i64, value.to_node()?)
        }
        AuditRecord::Push { path, value } => {
            target_seq(db, path)?.push(value.to_node()?).map(|_| ())
        }
        AuditRecord::Pop { path } => target_seq(db, path)?.pop().map(|_| ()),
        AuditRecord::Splice {
            path,
            start,
            remove,
            values,
        } => {
            let nodes = values
                .iter()
                .map(AuditNode::to_node)
                .collect::<Result<Vec<_>>>()?;
            target_seq(db, path)?
                .splice(*start as i64, *remove as usize, nodes)
                .map(|_| ())
        }
        AuditRecord::SeqDelete { path, index } => {
            target_seq(db, path)?.delete(*index as i64).map(|_| ())
        }
    }
}

/// Replays a log against `db`, returning the number of statements
/// applied. Lines are applied in order; blank lines are skipped.
pub fn replay(reader: impl BufRead, db: &Db) -> Result<u64> {
    let mut applied = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(&line).map_err(Error::audit)?;
        apply(db, &record)?;
        applied += 1;
    }
    Ok(applied)
}

/// An in-memory audit sink for tests and programmatic capture.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<std::sync::Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().expect("audit sink lock poisoned").clone()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .expect("audit sink lock poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_lines_roundtrip() {
        let node = Node::map([("a", Node::seq(["1", "2"]))]);
        let record = AuditRecord::put(&[b"outer".to_vec()], b"k", &node);

        let line = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&line).unwrap();

        let AuditRecord::Put { path, key, value } = back else {
            panic!("wrong record kind");
        };
        assert_eq!(path, vec![hex::encode(b"outer")]);
        assert_eq!(key, hex::encode(b"k"));
        assert_eq!(value.to_node().unwrap(), node);
    }

    #[test]
    fn bad_hex_is_an_audit_error() {
        let node = AuditNode::Scalar {
            hex: "zz".to_string(),
        };
        assert!(matches!(node.to_node(), Err(Error::Audit(_))));
    }
}
