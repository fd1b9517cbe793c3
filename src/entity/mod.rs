use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::audit::AuditRecord;
use crate::config::Config;
use crate::engine::{CollHandle, Core, PutValue, Stored};
use crate::error::{Error, Result};
use crate::value::{CollKind, Node};

mod seq;

pub use seq::SeqRef;

/// Handle to an open database. Cheap to clone; all clones share one
/// engine instance and serialize through it. Open several `Db`s on the
/// same path to get independently locking instances.
#[derive(Clone)]
pub struct Db {
    core: Arc<Mutex<Core>>,
    ident: Arc<PathBuf>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Db> {
        let path = path.as_ref();
        let core = Core::open(path, config)?;
        let ident = std::fs::canonicalize(path)?;
        Ok(Db {
            core: Arc::new(Mutex::new(core)),
            ident: Arc::new(ident),
        })
    }

    pub(crate) fn with_core<T>(&self, op: impl FnOnce(&mut Core) -> T) -> T {
        let mut guard = self.core.lock().expect("dpdb engine lock poisoned");
        op(&mut guard)
    }

    pub fn path(&self) -> &Path {
        &self.ident
    }

    pub(crate) fn same_file(&self, other: &Db) -> bool {
        self.ident == other.ident
    }

    /// The root collection, map- or sequence-typed per the file.
    pub fn root(&self) -> Result<Value> {
        let info = self.with_core(|c| c.locked(false, |c| c.root_info()))?;
        Ok(wrap_stored(self, Arc::new(Vec::new()), Stored::Coll(info)))
    }

    pub fn root_map(&self) -> Result<MapRef> {
        match self.root()? {
            Value::Map(map) => Ok(map),
            _ => Err(Error::TypeMismatch {
                found: CollKind::Seq.label(),
                requested: CollKind::Map.label(),
            }),
        }
    }

    pub fn root_seq(&self) -> Result<SeqRef> {
        match self.root()? {
            Value::Seq(seq) => Ok(seq),
            _ => Err(Error::TypeMismatch {
                found: CollKind::Map.label(),
                requested: CollKind::Seq.label(),
            }),
        }
    }

    /// Starts a transaction on this instance. Reads and writes keep
    /// locking per operation; only commit and rollback hold the
    /// exclusive lock for their whole walk.
    pub fn begin_work(&self) -> Result<()> {
        self.with_core(|c| {
            c.begin_work()?;
            c.audit_record(&AuditRecord::Begin)
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.with_core(|c| {
            c.commit()?;
            c.audit_record(&AuditRecord::Commit)
        })
    }

    pub fn rollback(&self) -> Result<()> {
        self.with_core(|c| {
            c.rollback()?;
            c.audit_record(&AuditRecord::Rollback)
        })
    }

    pub fn in_transaction(&self) -> bool {
        self.with_core(|c| c.txn.is_some())
    }

    /// Explicit lock for read-modify-write atomicity across several
    /// operations. Nests with the per-operation locks; every
    /// `lock_shared`/`lock_exclusive` needs a matching `unlock`.
    pub fn lock_shared(&self) -> Result<()> {
        self.with_core(|c| c.lock_hold(false))
    }

    pub fn lock_exclusive(&self) -> Result<()> {
        self.with_core(|c| c.lock_hold(true))
    }

    pub fn unlock(&self) -> Result<()> {
        self.with_core(|c| c.unlock_hold())
    }
}

/// A value fetched from the file: a scalar you own, or a live handle
/// into the same database.
#[derive(Clone)]
pub enum Value {
    Null,
    Scalar(Vec<u8>),
    Map(MapRef),
    Seq(SeqRef),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&[u8]> {
        match self {
            Value::Scalar(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&SeqRef> {
        match self {
            Value::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Detaches the value into an owned tree. Recursive and, like any
    /// recursive export, not cycle-safe.
    pub fn export(&self) -> Result<Node> {
        match self {
            Value::Null => Ok(Node::Null),
            Value::Scalar(bytes) => Ok(Node::Scalar(bytes.clone())),
            Value::Map(map) => map.export(),
            Value::Seq(seq) => seq.export(),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Scalar(bytes) => f.debug_tuple("Scalar").field(bytes).finish(),
            Value::Map(_) => write!(f, "Map(..)"),
            Value::Seq(_) => write!(f, "Seq(..)"),
        }
    }
}

pub(crate) fn child_path(path: &Arc<Vec<Vec<u8>>>, key: &[u8]) -> Arc<Vec<Vec<u8>>> {
    let mut out = (**path).clone();
    out.push(key.to_vec());
    Arc::new(out)
}

pub(crate) fn wrap_stored(db: &Db, path: Arc<Vec<Vec<u8>>>, stored: Stored) -> Value {
    match stored {
        Stored::Null => Value::Null,
        Stored::Scalar(bytes) => Value::Scalar(bytes),
        Stored::Coll(info) => {
            let handle = info.handle();
            match info.kind {
                CollKind::Map => Value::Map(MapRef {
                    db: db.clone(),
                    handle,
                    path,
                }),
                CollKind::Seq => Value::Seq(SeqRef::new(db.clone(), handle, path)),
            }
        }
    }
}

pub(crate) fn stale_handle() -> Error {
    Error::Deleted("collection handle is stale".into())
}

/// A live map in the file. Operations on a handle whose collection has
/// been deleted or replaced behave as absent (reads) or fail with
/// [`Error::Deleted`] (writes).
#[derive(Clone)]
pub struct MapRef {
    pub(crate) db: Db,
    pub(crate) handle: CollHandle,
    pub(crate) path: Arc<Vec<Vec<u8>>>,
}

impl MapRef {
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        let key = key.as_ref();
        let stored = self
            .db
            .with_core(|c| c.locked(false, |c| c.fetch(&self.handle, key)))?;
        Ok(stored.map(|s| wrap_stored(&self.db, child_path(&self.path, key), s)))
    }

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl Into<Node>) -> Result<()> {
        let key = key.as_ref();
        let node = value.into();
        self.db.with_core(|c| {
            c.locked(true, |c| {
                c.store(&self.handle, key, PutValue::Node(&node))?;
                c.audit_record(&AuditRecord::put(&self.path, key, &node))
            })
        })
    }

    /// Stores a live value under `key`. A collection from the same
    /// file is stored by reference, preserving identity; one from
    /// another file is copied element-wise.
    pub fn put_ref(&self, key: impl AsRef<[u8]>, value: &Value) -> Result<()> {
        let key = key.as_ref();
        match value {
            Value::Null => self.put(key, Node::Null),
            Value::Scalar(bytes) => self.put(key, Node::Scalar(bytes.clone())),
            Value::Map(src) => self.put_coll_ref(key, &src.db, src.handle, &src.path, value),
            Value::Seq(src) => self.put_coll_ref(key, &src.db, src.handle, &src.path, value),
        }
    }

    fn put_coll_ref(
        &self,
        key: &[u8],
        src_db: &Db,
        src: CollHandle,
        src_path: &Arc<Vec<Vec<u8>>>,
        value: &Value,
    ) -> Result<()> {
        if self.db.same_file(src_db) {
            self.db.with_core(|c| {
                c.locked(true, |c| {
                    c.store(&self.handle, key, PutValue::Existing(src.data_off))?;
                    c.audit_record(&AuditRecord::put_ref(&self.path, key, src_path))
                })
            })
        } else {
            self.put(key, value.export()?)
        }
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<Option<Node>> {
        let key = key.as_ref();
        self.db.with_core(|c| {
            c.locked(true, |c| {
                let prior = c.remove(&self.handle, key, true)?;
                if prior.is_some() {
                    c.audit_record(&AuditRecord::delete(&self.path, key))?;
                }
                Ok(prior)
            })
        })
    }

    pub fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let key = key.as_ref();
        self.db
            .with_core(|c| c.locked(false, |c| c.contains(&self.handle, key)))
    }

    pub fn first_key(&self) -> Result<Option<Vec<u8>>> {
        self.db
            .with_core(|c| c.locked(false, |c| c.first_key(&self.handle)))
    }

    pub fn next_key(&self, prev: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let prev = prev.as_ref();
        self.db
            .with_core(|c| c.locked(false, |c| c.next_key(&self.handle, Some(prev))))
    }

    pub fn keys(&self) -> Keys {
        Keys {
            map: self.clone(),
            prev: None,
            done: false,
        }
    }

    pub fn count(&self) -> Result<u64> {
        self.db.with_core(|c| {
            c.locked(false, |c| match c.resolve(&self.handle)? {
                Some(info) => Ok(c.stored_entries(&info)?.len() as u64),
                None => Ok(0),
            })
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.db.with_core(|c| {
            c.locked(true, |c| {
                c.clear_coll(&self.handle)?;
                c.audit_record(&AuditRecord::clear(&self.path))
            })
        })
    }

    pub fn export(&self) -> Result<Node> {
        self.db.with_core(|c| {
            c.locked(false, |c| match c.resolve(&self.handle)? {
                Some(info) => c.export_coll(&info),
                None => Ok(Node::Map {
                    entries: Default::default(),
                    class: None,
                }),
            })
        })
    }

    /// Puts every entry of a map node into this map.
    pub fn import(&self, node: Node) -> Result<()> {
        let Node::Map { entries, .. } = node else {
            return Err(Error::unsupported("import into a map needs a map node"));
        };
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    pub fn class(&self) -> Result<Option<Vec<u8>>> {
        self.db.with_core(|c| {
            c.locked(false, |c| {
                if !c.autobless {
                    return Ok(None);
                }
                Ok(c.resolve(&self.handle)?.and_then(|info| info.class))
            })
        })
    }
}

/// Streaming key iterator over a map, driven by `first_key`/`next_key`.
/// Keys inserted concurrently may or may not appear; keys present and
/// untouched throughout the walk are never skipped.
pub struct Keys {
    map: MapRef,
    prev: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for Keys {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self.map.db.with_core(|c| {
            c.locked(false, |c| c.next_key(&self.map.handle, self.prev.as_deref()))
        });
        match step {
            Ok(Some(key)) => {
                self.prev = Some(key.clone());
                Some(Ok(key))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
