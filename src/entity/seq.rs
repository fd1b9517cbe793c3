use std::sync::Arc;

use crate::audit::AuditRecord;
use crate::engine::{dec_key, CollHandle, Core, PutValue};
use crate::error::{Error, Result};
use crate::value::Node;

use super::{child_path, stale_handle, wrap_stored, Db, Value};

/// A live sequence in the file. Indices are stored as their decimal
/// byte strings; a `length` pseudo-key is maintained transactionally
/// with every mutation. Negative indices resolve against the current
/// length. `shift`, `unshift` and `splice` rewrite every affected index
/// slot and are O(n).
#[derive(Clone)]
pub struct SeqRef {
    pub(crate) db: Db,
    pub(crate) handle: CollHandle,
    pub(crate) path: Arc<Vec<Vec<u8>>>,
}

fn resolve_index(index: i64, len: u64) -> Result<u64> {
    if index >= 0 {
        return Ok(index as u64);
    }
    let adjusted = len as i64 + index;
    if adjusted < 0 {
        return Err(Error::OutOfBounds(index));
    }
    Ok(adjusted as u64)
}

impl SeqRef {
    pub(crate) fn new(db: Db, handle: CollHandle, path: Arc<Vec<Vec<u8>>>) -> Self {
        Self { db, handle, path }
    }

    pub fn len(&self) -> Result<u64> {
        self.db
            .with_core(|c| c.locked(false, |c| c.seq_len(&self.handle)))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: i64) -> Result<Option<Value>> {
        let out = self.db.with_core(|c| {
            c.locked(false, |c| {
                let len = c.seq_len(&self.handle)?;
                let idx = resolve_index(index, len)?;
                if idx >= len {
                    return Ok(None);
                }
                Ok(c.fetch(&self.handle, &dec_key(idx))?.map(|s| (idx, s)))
            })
        })?;
        Ok(out.map(|(idx, stored)| {
            wrap_stored(&self.db, child_path(&self.path, &dec_key(idx)), stored)
        }))
    }

    pub fn exists(&self, index: i64) -> Result<bool> {
        self.db.with_core(|c| {
            c.locked(false, |c| {
                let len = c.seq_len(&self.handle)?;
                let idx = resolve_index(index, len)?;
                if idx >= len {
                    return Ok(false);
                }
                c.contains(&self.handle, &dec_key(idx))
            })
        })
    }

    pub fn put(&self, index: i64, value: impl Into<Node>) -> Result<()> {
        let node = value.into();
        self.db.with_core(|c| {
            c.locked(true, |c| {
                let len = c.seq_len(&self.handle)?;
                let idx = resolve_index(index, len)?;
                c.store(&self.handle, &dec_key(idx), PutValue::Node(&node))?;
                if idx >= len {
                    let info = c.resolve(&self.handle)?.ok_or_else(stale_handle)?;
                    c.seq_set_len(&info, idx + 1)?;
                }
                c.audit_record(&AuditRecord::seq_put(&self.path, idx, &node))
            })
        })
    }

    /// Appends and returns the new length.
    pub fn push(&self, value: impl Into<Node>) -> Result<u64> {
        let node = value.into();
        self.db.with_core(|c| {
            c.locked(true, |c| {
                let len = c.seq_len(&self.handle)?;
                c.store(&self.handle, &dec_key(len), PutValue::Node(&node))?;
                let info = c.resolve(&self.handle)?.ok_or_else(stale_handle)?;
                c.seq_set_len(&info, len + 1)?;
                c.audit_record(&AuditRecord::push(&self.path, &node))?;
                Ok(len + 1)
            })
        })
    }

    pub fn pop(&self) -> Result<Option<Node>> {
        self.db.with_core(|c| {
            c.locked(true, |c| {
                let len = c.seq_len(&self.handle)?;
                if len == 0 {
                    return Ok(None);
                }
                let prior = c.remove(&self.handle, &dec_key(len - 1), true)?;
                let info = c.resolve(&self.handle)?.ok_or_else(stale_handle)?;
                c.seq_set_len(&info, len - 1)?;
                c.audit_record(&AuditRecord::pop(&self.path))?;
                // popping a hole still shrinks the sequence
                Ok(prior.or(Some(Node::Null)))
            })
        })
    }

    pub fn shift(&self) -> Result<Option<Node>> {
        Ok(self.splice(0, 1, Vec::new())?.into_iter().next())
    }

    /// Prepends the values and returns the new length.
    pub fn unshift(&self, values: Vec<Node>) -> Result<u64> {
        self.splice(0, 0, values)?;
        self.len()
    }

    /// Removes `remove` elements starting at `offset` (clamped to the
    /// sequence), inserts `replacement` in their place, and returns the
    /// removed values.
    pub fn splice(&self, offset: i64, remove: usize, replacement: Vec<Node>) -> Result<Vec<Node>> {
        self.db.with_core(|c| {
            c.locked(true, |c| {
                splice_inner(c, &self.handle, &self.path, offset, remove as u64, &replacement)
            })
        })
    }

    /// Removes the entry at `index` without shifting its neighbours,
    /// leaving a hole; the length is unchanged.
    pub fn delete(&self, index: i64) -> Result<Option<Node>> {
        self.db.with_core(|c| {
            c.locked(true, |c| {
                let len = c.seq_len(&self.handle)?;
                let idx = resolve_index(index, len)?;
                if idx >= len {
                    return Ok(None);
                }
                let prior = c.remove(&self.handle, &dec_key(idx), true)?;
                if prior.is_some() {
                    c.audit_record(&AuditRecord::seq_delete(&self.path, idx))?;
                }
                Ok(prior)
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
                None => Ok(Node::Seq {
                    items: Vec::new(),
                    class: None,
                }),
            })
        })
    }

    /// Appends every item of a sequence node.
    pub fn import(&self, node: Node) -> Result<()> {
        let Node::Seq { items, .. } = node else {
            return Err(Error::unsupported("import into a sequence needs a sequence node"));
        };
        for item in items {
            self.push(item)?;
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

fn splice_inner(
    core: &mut Core,
    handle: &CollHandle,
    path: &Arc<Vec<Vec<u8>>>,
    offset: i64,
    remove: u64,
    replacement: &[Node],
) -> Result<Vec<Node>> {
    let len = core.seq_len(handle)?;
    let start = resolve_index(offset, len)?.min(len);
    let remove = remove.min(len - start);
    let info = core.resolve(handle)?.ok_or_else(stale_handle)?;

    let mut removed = Vec::with_capacity(remove as usize);
    for i in start..start + remove {
        removed.push(core.remove(handle, &dec_key(i), true)?.unwrap_or(Node::Null));
    }

    // shift the tail; iteration order keeps every destination slot
    // vacated before anything lands in it
    let delta = replacement.len() as i64 - remove as i64;
    if delta > 0 {
        for src in (start + remove..len).rev() {
            core.move_entry(&info, &dec_key(src), &dec_key((src as i64 + delta) as u64))?;
        }
    } else if delta < 0 {
        for src in start + remove..len {
            core.move_entry(&info, &dec_key(src), &dec_key((src as i64 + delta) as u64))?;
        }
    }

    for (i, node) in replacement.iter().enumerate() {
        core.store(handle, &dec_key(start + i as u64), PutValue::Node(node))?;
    }

    let new_len = len - remove + replacement.len() as u64;
    core.seq_set_len(&info, new_len)?;
    core.audit_record(&AuditRecord::splice(path, start, remove, replacement))?;
    Ok(removed)
}
