use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::config::{Config, Filters};
use crate::digest::DigestKind;
use crate::error::{Error, Result};
use crate::sector::header::{Geometry, Header, DATA_CHUNK_LEN};
use crate::sector::{
    kind_of, payload_of, CollChunk, SectorClass, Slot, PAYLOAD_NULL, PAYLOAD_SCALAR, SIG_DATA,
};
use crate::storage::{FileStore, StorageFile};
use crate::txn::TxnState;
use crate::value::{CollKind, Node};

/// What an in-memory handle knows about a collection: the offset of its
/// data sector and the staleness counter stamped when the handle was
/// taken. Operations re-validate both before touching any bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CollHandle {
    pub data_off: u64,
    pub stale: u32,
}

/// A freshly resolved collection: handle fields plus the root index and
/// class tag read from the data sector.
#[derive(Clone, Debug)]
pub(crate) struct CollInfo {
    pub kind: CollKind,
    pub data_off: u64,
    pub root_index: u64,
    pub stale: u32,
    pub class: Option<Vec<u8>>,
}

impl CollInfo {
    pub fn handle(&self) -> CollHandle {
        CollHandle {
            data_off: self.data_off,
            stale: self.stale,
        }
    }
}

/// A decoded value as it comes off the file.
pub(crate) enum Stored {
    Null,
    Scalar(Vec<u8>),
    Coll(CollInfo),
}

/// What a write brings to the slot table.
pub(crate) enum PutValue<'a> {
    /// A detached tree, materialized recursively.
    Node(&'a Node),
    /// Identity store of a live same-file collection.
    Existing(u64),
    /// A value sector already built by the caller, stored as-is.
    RawOff(u64),
}

/// Single-instance engine state: the file, the digest and filter hooks,
/// the optional audit sink and the one open transaction.
pub(crate) struct Core {
    pub store: FileStore,
    pub digest: DigestKind,
    pub autobless: bool,
    pub filters: Filters,
    pub audit: Option<AuditLog>,
    pub txn: Option<TxnState>,
}

pub(crate) fn dec_key(index: u64) -> Vec<u8> {
    index.to_string().into_bytes()
}

impl FileStore {
    fn boot(&mut self, config: &Config) -> Result<()> {
        let off = self.header.file_offset;
        let len = self.file.len()?;
        if len <= off {
            if self.file.read_only {
                return Err(Error::NotADb);
            }
            let bytes = self.header.encode()?;
            self.file.write_at(off, &bytes)?;
            self.init_root(config.root)?;
            debug!("database created");
            return Ok(());
        }
        if len < off + 9 {
            return Err(Error::NotADb);
        }

        let fixed = self.file.read_at(off, 9)?;
        let geo = Geometry::from_fixed(&fixed)?;
        let full = self.file.read_at(off, geo.header_len())?;
        self.header = Header::decode(&full, off)?;

        if geo.digest_len != config.digest.width() {
            return Err(Error::corrupt(format!(
                "file digest width {} does not match the configured width {}",
                geo.digest_len,
                config.digest.width()
            )));
        }
        Ok(())
    }

    /// Lays out the root: the base key locator right after the header,
    /// whose HEAD points at the root collection's data sector.
    fn init_root(&mut self, kind: CollKind) -> Result<()> {
        let gen = self.bump_gen()?;
        let mut root = self.alloc_locator(b"")?;
        debug_assert_eq!(root.off, self.header.root_locator_off());

        let index_off = self.alloc_index()?;
        let chunk = CollChunk {
            root_index: index_off,
            stale: gen,
            class: None,
        }
        .encode(&self.geo())?;
        let data_off = self.alloc_data(payload_of(kind), 0, &chunk)?;

        self.write_head(&mut root, data_off, false, 0)?;
        Ok(())
    }
}

impl Core {
    pub fn open(path: &Path, mut config: Config) -> Result<Core> {
        let read_only = config.read_only;
        let file = StorageFile::open(path, read_only, config.locking, config.effective_autoflush())?;

        let geo = Geometry::new(
            config.byte_size,
            config.digest.width(),
            config.max_buckets,
            config.fanout,
        )?;
        let mut store = FileStore {
            file,
            header: Header::new(geo, config.file_offset),
        };

        store.file.enter(!read_only)?;
        let booted = store.boot(&config);
        let exited = store.file.exit();
        booted?;
        exited?;

        let audit = AuditLog::from_config(&mut config)?;
        let filters = Filters::from_config(&mut config);
        let mut core = Core {
            store,
            digest: config.digest,
            autobless: config.autobless,
            filters,
            audit,
            txn: None,
        };

        let requested = config.root;
        let root = core.locked(false, |c| c.root_info())?;
        if root.kind != requested {
            return Err(Error::TypeMismatch {
                found: root.kind.label(),
                requested: requested.label(),
            });
        }

        debug!(path = %path.display(), "database opened");
        Ok(core)
    }

    /// Brackets `op` in the advisory lock, re-reading the header tail
    /// whenever the OS lock was actually (re)acquired.
    pub fn locked<T>(
        &mut self,
        exclusive: bool,
        op: impl FnOnce(&mut Core) -> Result<T>,
    ) -> Result<T> {
        let reload = self.store.file.enter(exclusive)?;
        if reload {
            if let Err(e) = self.store.reload_state() {
                let _ = self.store.file.exit();
                return Err(e);
            }
        }

        let out = op(self);
        let fin = self.store.file.exit();
        match (out, fin) {
            (Ok(v), Ok(())) => Ok(v),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Explicit user-held lock; pairs with `unlock_hold`.
    pub fn lock_hold(&mut self, exclusive: bool) -> Result<()> {
        let reload = self.store.file.enter(exclusive)?;
        if reload {
            if let Err(e) = self.store.reload_state() {
                let _ = self.store.file.exit();
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn unlock_hold(&mut self) -> Result<()> {
        self.store.file.exit()
    }

    pub fn tid(&self) -> u8 {
        self.txn.as_ref().map(|t| t.id).unwrap_or(0)
    }

    fn touch(&mut self, loc_off: u64) {
        if let Some(txn) = &mut self.txn {
            txn.touched.insert(loc_off);
        }
    }

    fn require_writable(&self) -> Result<()> {
        if self.store.file.read_only {
            return Err(Error::Readonly);
        }
        Ok(())
    }

    pub fn audit_record(&mut self, record: &crate::audit::AuditRecord) -> Result<()> {
        if let Some(log) = &mut self.audit {
            log.append(record)?;
        }
        Ok(())
    }

    // --- collection resolution ---

    pub fn root_info(&mut self) -> Result<CollInfo> {
        let root_off = self.store.header.root_locator_off();
        let loc = self.store.read_locator(root_off)?;
        let Some((off, false)) = self.store.slot_view(&loc, 0) else {
            return Err(Error::corrupt("missing root collection"));
        };
        if off <= 1 {
            return Err(Error::corrupt("missing root collection"));
        }

        let head = self.store.read_data(off)?;
        let kind =
            kind_of(head.payload).ok_or_else(|| Error::corrupt("root is not a collection"))?;
        let chunk = CollChunk::decode(&self.store.geo(), &head.chunk)?;
        Ok(CollInfo {
            kind,
            data_off: off,
            root_index: chunk.root_index,
            stale: chunk.stale,
            class: chunk.class,
        })
    }

    /// Validates a handle against the live file. `None` means the
    /// sector was freed, rewritten or recycled since the handle was
    /// taken; the caller treats the collection as absent.
    pub fn resolve(&mut self, handle: &CollHandle) -> Result<Option<CollInfo>> {
        let sig = match self.store.sig_at(handle.data_off) {
            Ok(sig) => sig,
            Err(Error::Corrupt(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if sig != SIG_DATA {
            return Ok(None);
        }

        let head = match self.store.read_data(handle.data_off) {
            Ok(head) => head,
            Err(Error::Corrupt(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(kind) = kind_of(head.payload) else {
            return Ok(None);
        };
        let Ok(chunk) = CollChunk::decode(&self.store.geo(), &head.chunk) else {
            return Ok(None);
        };
        if chunk.stale != handle.stale {
            return Ok(None);
        }

        Ok(Some(CollInfo {
            kind,
            data_off: handle.data_off,
            root_index: chunk.root_index,
            stale: chunk.stale,
            class: chunk.class,
        }))
    }

    fn stored_key(&self, info: &CollInfo, key: &[u8]) -> Vec<u8> {
        match info.kind {
            CollKind::Map => Filters::apply(&self.filters.store_key, key),
            CollKind::Seq => key.to_vec(),
        }
    }

    fn fetched_key(&self, kind: CollKind, raw: &[u8]) -> Vec<u8> {
        match kind {
            CollKind::Map => Filters::apply(&self.filters.fetch_key, raw),
            CollKind::Seq => raw.to_vec(),
        }
    }

    // --- reads ---

    pub fn fetch(&mut self, handle: &CollHandle, key: &[u8]) -> Result<Option<Stored>> {
        let Some(info) = self.resolve(handle)? else {
            return Ok(None);
        };
        let stored_key = self.stored_key(&info, key);
        self.read_entry(info.root_index, &stored_key, true)
    }

    pub fn contains(&mut self, handle: &CollHandle, key: &[u8]) -> Result<bool> {
        let Some(info) = self.resolve(handle)? else {
            return Ok(false);
        };
        let stored_key = self.stored_key(&info, key);
        let view = self.read_slot(info.root_index, &stored_key)?;
        Ok(matches!(view, Some((off, false)) if off > 1))
    }

    fn read_slot(&mut self, root_index: u64, stored_key: &[u8]) -> Result<Option<(u64, bool)>> {
        let digest = self.digest.digest(stored_key);
        let Some(loc_off) = self.store.cascade_find(root_index, &digest)? else {
            return Ok(None);
        };
        let loc = self.store.read_locator(loc_off)?;
        let tid = self.tid();
        Ok(self.store.slot_view(&loc, tid))
    }

    fn read_entry(
        &mut self,
        root_index: u64,
        stored_key: &[u8],
        filtered: bool,
    ) -> Result<Option<Stored>> {
        match self.read_slot(root_index, stored_key)? {
            Some((off, false)) if off > 1 => Ok(Some(self.decode_value(off, filtered)?)),
            _ => Ok(None),
        }
    }

    pub(crate) fn decode_value(&mut self, off: u64, filtered: bool) -> Result<Stored> {
        let head = self.store.read_data(off)?;
        match head.payload {
            PAYLOAD_NULL => Ok(Stored::Null),
            PAYLOAD_SCALAR => {
                let mut raw = head.chunk;
                let mut next = head.chain;
                let mut seen = HashSet::from([off]);
                while next != 0 {
                    if !seen.insert(next) {
                        return Err(Error::corrupt(format!("data chain cycle at {next:#x}")));
                    }
                    let link = self.store.read_data(next)?;
                    if link.payload != PAYLOAD_SCALAR {
                        return Err(Error::corrupt(format!("broken data chain at {next:#x}")));
                    }
                    raw.extend_from_slice(&link.chunk);
                    next = link.chain;
                }
                let out = if filtered {
                    Filters::apply(&self.filters.fetch_value, &raw)
                } else {
                    raw
                };
                Ok(Stored::Scalar(out))
            }
            payload => {
                let Some(kind) = kind_of(payload) else {
                    return Err(Error::corrupt(format!(
                        "unknown payload {payload:#x} at {off:#x}"
                    )));
                };
                let chunk = CollChunk::decode(&self.store.geo(), &head.chunk)?;
                Ok(Stored::Coll(CollInfo {
                    kind,
                    data_off: off,
                    root_index: chunk.root_index,
                    stale: chunk.stale,
                    class: chunk.class,
                }))
            }
        }
    }

    // --- writes ---

    pub fn store(&mut self, handle: &CollHandle, key: &[u8], value: PutValue) -> Result<()> {
        self.require_writable()?;
        let Some(info) = self.resolve(handle)? else {
            return Err(Error::Deleted("collection handle is stale".into()));
        };
        let stored_key = self.stored_key(&info, key);
        if stored_key.len() > u8::MAX as usize {
            return Err(Error::unsupported(format!(
                "key of {} bytes exceeds the 255 byte limit",
                stored_key.len()
            )));
        }
        let value_off = self.build_value(value)?;
        self.put_at(info.root_index, &stored_key, value_off)
    }

    /// Writes `value_off` under `stored_key`, creating the locator if
    /// needed. The value sectors are already on disk; the slot (and for
    /// new keys, the bucket entry) is the publishing write.
    pub(crate) fn put_at(&mut self, root_index: u64, stored_key: &[u8], value_off: u64) -> Result<()> {
        let digest = self.digest.digest(stored_key);
        let (mut loc, created) = self.store.cascade_ensure(root_index, &digest, stored_key)?;
        let tid = self.tid();

        if tid == 0 {
            let hw = self.store.write_head(&mut loc, value_off, false, 0)?;
            if let Some(old) = hw.replaced {
                if self.store.slot_refs(&loc, old) == 0 {
                    let mut released = HashSet::new();
                    self.store.release_value(old, &mut released)?;
                }
            }
        } else {
            if created || self.store.slot_for(&loc, 0).is_none() {
                // first write under a transaction: pin HEAD as
                // explicitly absent so observers keep seeing nothing
                self.store.write_head(&mut loc, 0, true, tid)?;
            }
            let prior = self.store.write_txn_slot(&mut loc, tid, value_off, false)?;
            if let Some(old) = prior {
                if self.store.slot_refs(&loc, old) == 0 {
                    let mut released = HashSet::new();
                    self.store.release_value(old, &mut released)?;
                }
            }
            self.touch(loc.off);
        }
        Ok(())
    }

    fn build_value(&mut self, value: PutValue) -> Result<u64> {
        match value {
            PutValue::Node(node) => self.build_node(node),
            PutValue::RawOff(off) => Ok(off),
            PutValue::Existing(off) => {
                let sig = match self.store.sig_at(off) {
                    Ok(sig) => sig,
                    Err(Error::Corrupt(_)) => {
                        return Err(Error::Deleted("source collection is gone".into()))
                    }
                    Err(e) => return Err(e),
                };
                if sig != SIG_DATA || kind_of(self.store.read_data(off)?.payload).is_none() {
                    return Err(Error::Deleted("source collection is gone".into()));
                }
                Ok(off)
            }
        }
    }

    fn build_node(&mut self, node: &Node) -> Result<u64> {
        match node {
            Node::Null => self.store.alloc_data(PAYLOAD_NULL, 0, &[]),
            Node::Scalar(bytes) => {
                let filtered = Filters::apply(&self.filters.store_value, bytes);
                self.store_scalar(&filtered)
            }
            Node::Map { entries, class } => {
                let info = self.create_collection(CollKind::Map, class.as_deref())?;
                for (key, value) in entries {
                    let stored_key = Filters::apply(&self.filters.store_key, key);
                    let value_off = self.build_node(value)?;
                    self.fill_fresh(info.root_index, &stored_key, value_off)?;
                }
                Ok(info.data_off)
            }
            Node::Seq { items, class } => {
                let info = self.create_collection(CollKind::Seq, class.as_deref())?;
                for (i, value) in items.iter().enumerate() {
                    let value_off = self.build_node(value)?;
                    self.fill_fresh(info.root_index, &dec_key(i as u64), value_off)?;
                }
                if !items.is_empty() {
                    let len_off = self.store_scalar(items.len().to_string().as_bytes())?;
                    self.fill_fresh(info.root_index, b"length", len_off)?;
                }
                Ok(info.data_off)
            }
        }
    }

    pub(crate) fn create_collection(
        &mut self,
        kind: CollKind,
        class: Option<&[u8]>,
    ) -> Result<CollInfo> {
        let gen = self.store.bump_gen()?;
        let root_index = self.store.alloc_index()?;
        let class = if self.autobless {
            class.map(|c| c.to_vec())
        } else {
            None
        };

        let chunk = CollChunk {
            root_index,
            stale: gen,
            class: class.clone(),
        }
        .encode(&self.store.geo())?;
        let data_off = self.store.alloc_data(payload_of(kind), 0, &chunk)?;

        Ok(CollInfo {
            kind,
            data_off,
            root_index,
            stale: gen,
            class,
        })
    }

    /// HEAD write into a collection not yet reachable from the root: no
    /// observers, nothing replaced, no protection needed.
    fn fill_fresh(&mut self, root_index: u64, stored_key: &[u8], value_off: u64) -> Result<()> {
        let digest = self.digest.digest(stored_key);
        let (mut loc, _) = self.store.cascade_ensure(root_index, &digest, stored_key)?;
        let idx = self.store.slot_for(&loc, 0).unwrap_or(0);
        self.store.set_slot(
            &mut loc,
            idx,
            Slot {
                value_off,
                tid: 0,
                deleted: false,
            },
            0,
        )
    }

    pub(crate) fn store_scalar(&mut self, bytes: &[u8]) -> Result<u64> {
        if bytes.is_empty() {
            return self.store.alloc_data(PAYLOAD_SCALAR, 0, &[]);
        }
        // build the chain back to front so every link is written before
        // anything points at it
        let mut next = 0u64;
        for chunk in bytes.chunks(DATA_CHUNK_LEN).rev() {
            next = self.store.alloc_data(PAYLOAD_SCALAR, next, chunk)?;
        }
        Ok(next)
    }

    // --- deletes ---

    pub fn remove(
        &mut self,
        handle: &CollHandle,
        key: &[u8],
        want_prior: bool,
    ) -> Result<Option<Node>> {
        self.require_writable()?;
        let Some(info) = self.resolve(handle)? else {
            return Ok(None);
        };
        let stored_key = self.stored_key(&info, key);
        self.delete_at(info.root_index, &stored_key, want_prior, true)
    }

    /// Deletion, shaped by who might still be looking: with no live
    /// transactions the bucket entry is tombstoned and the locator
    /// retired; with observers the HEAD slot is marked deleted after
    /// protecting their snapshots. `release` is false for moves, where
    /// the value chain lives on under another key.
    fn delete_at(
        &mut self,
        root_index: u64,
        stored_key: &[u8],
        want_prior: bool,
        release: bool,
    ) -> Result<Option<Node>> {
        let digest = self.digest.digest(stored_key);
        let Some(loc_off) = self.store.cascade_find(root_index, &digest)? else {
            return Ok(None);
        };
        let mut loc = self.store.read_locator(loc_off)?;
        let tid = self.tid();

        let Some((off, deleted)) = self.store.slot_view(&loc, tid) else {
            return Ok(None);
        };
        if deleted {
            return Ok(None);
        }
        let prior = if want_prior && off > 1 {
            Some(self.export_value(off)?)
        } else {
            None
        };

        if tid == 0 {
            if self.store.header.live_tids().is_empty() {
                self.store.cascade_tombstone(root_index, &digest)?;
                if release {
                    // only the HEAD chain is provably ours; a chain
                    // hanging off a stale slot may have been moved to
                    // another key, so it leaks until compaction
                    let mut released = HashSet::new();
                    self.store.release_value(off, &mut released)?;
                }
                self.store.release_space(loc_off, SectorClass::Locator)?;
            } else {
                let hw = self.store.write_head(&mut loc, 0, true, 0)?;
                if release {
                    if let Some(old) = hw.replaced {
                        if self.store.slot_refs(&loc, old) == 0 {
                            let mut released = HashSet::new();
                            self.store.release_value(old, &mut released)?;
                        }
                    }
                }
            }
        } else {
            let prior_off = self.store.write_txn_slot(&mut loc, tid, 0, true)?;
            if release {
                if let Some(old) = prior_off {
                    if self.store.slot_refs(&loc, old) == 0 {
                        let mut released = HashSet::new();
                        self.store.release_value(old, &mut released)?;
                    }
                }
            }
            self.touch(loc_off);
        }
        Ok(prior)
    }

    pub fn clear_coll(&mut self, handle: &CollHandle) -> Result<()> {
        self.require_writable()?;
        let Some(info) = self.resolve(handle)? else {
            return Err(Error::Deleted("collection handle is stale".into()));
        };

        let mut after: Option<Vec<u8>> = None;
        loop {
            let Some((digest, loc_off)) =
                self.store.cascade_next(info.root_index, after.as_deref())?
            else {
                return Ok(());
            };
            let loc = self.store.read_locator(loc_off)?;
            let tid = self.tid();
            if matches!(self.store.slot_view(&loc, tid), Some((off, false)) if off > 1) {
                let key = loc.key.clone();
                self.delete_at(info.root_index, &key, false, true)?;
            }
            after = Some(digest);
        }
    }

    /// Re-points a value from one key to another without copying its
    /// sectors. The source slot is detached rather than released; the
    /// chain now belongs to the destination.
    pub fn move_entry(&mut self, info: &CollInfo, from: &[u8], to: &[u8]) -> Result<()> {
        match self.read_slot(info.root_index, from)? {
            Some((off, false)) if off > 1 => {
                self.put_at(info.root_index, to, off)?;
                self.delete_at(info.root_index, from, false, false)?;
            }
            _ => {
                // a hole moves as a hole
                self.delete_at(info.root_index, to, false, true)?;
            }
        }
        Ok(())
    }

    // --- iteration ---

    pub fn first_key(&mut self, handle: &CollHandle) -> Result<Option<Vec<u8>>> {
        self.next_key(handle, None)
    }

    pub fn next_key(&mut self, handle: &CollHandle, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let Some(info) = self.resolve(handle)? else {
            return Ok(None);
        };
        let mut after = prev.map(|key| self.digest.digest(&self.stored_key(&info, key)));

        loop {
            let Some((digest, loc_off)) =
                self.store.cascade_next(info.root_index, after.as_deref())?
            else {
                return Ok(None);
            };
            let loc = self.store.read_locator(loc_off)?;
            let tid = self.tid();
            if matches!(self.store.slot_view(&loc, tid), Some((off, false)) if off > 1) {
                return Ok(Some(self.fetched_key(info.kind, &loc.key)));
            }
            after = Some(digest);
        }
    }

    /// Live `(stored key, value offset)` pairs under the current view.
    pub(crate) fn stored_entries(&mut self, info: &CollInfo) -> Result<Vec<(Vec<u8>, u64)>> {
        let tid = self.tid();
        let mut out = Vec::new();
        let mut after: Option<Vec<u8>> = None;
        loop {
            let Some((digest, loc_off)) =
                self.store.cascade_next(info.root_index, after.as_deref())?
            else {
                return Ok(out);
            };
            let loc = self.store.read_locator(loc_off)?;
            if let Some((off, false)) = self.store.slot_view(&loc, tid) {
                if off > 1 {
                    out.push((loc.key.clone(), off));
                }
            }
            after = Some(digest);
        }
    }

    // --- export ---

    fn export_value(&mut self, off: u64) -> Result<Node> {
        let stored = self.decode_value(off, true)?;
        self.export_stored(stored)
    }

    pub fn export_stored(&mut self, stored: Stored) -> Result<Node> {
        match stored {
            Stored::Null => Ok(Node::Null),
            Stored::Scalar(bytes) => Ok(Node::Scalar(bytes)),
            Stored::Coll(info) => self.export_coll(&info),
        }
    }

    /// Recursive export of a whole collection. Not cycle-safe: a value
    /// tree that references an ancestor will recurse until it exhausts
    /// the stack.
    pub fn export_coll(&mut self, info: &CollInfo) -> Result<Node> {
        let class = if self.autobless {
            info.class.clone()
        } else {
            None
        };

        match info.kind {
            CollKind::Map => {
                let mut entries = BTreeMap::new();
                for (raw_key, off) in self.stored_entries(info)? {
                    let node = self.export_value(off)?;
                    entries.insert(Filters::apply(&self.filters.fetch_key, &raw_key), node);
                }
                Ok(Node::Map { entries, class })
            }
            CollKind::Seq => {
                let len = self.seq_len_of(info)?;
                let mut items = Vec::with_capacity(len as usize);
                for i in 0..len {
                    let item = match self.read_entry(info.root_index, &dec_key(i), true)? {
                        Some(stored) => self.export_stored(stored)?,
                        None => Node::Null,
                    };
                    items.push(item);
                }
                Ok(Node::Seq { items, class })
            }
        }
    }

    // --- sequence bookkeeping ---

    pub fn seq_len(&mut self, handle: &CollHandle) -> Result<u64> {
        let Some(info) = self.resolve(handle)? else {
            return Ok(0);
        };
        self.seq_len_of(&info)
    }

    pub(crate) fn seq_len_of(&mut self, info: &CollInfo) -> Result<u64> {
        match self.read_entry(info.root_index, b"length", false)? {
            None => Ok(0),
            Some(Stored::Scalar(raw)) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| Error::corrupt("unreadable sequence length")),
            Some(_) => Err(Error::corrupt("sequence length is not a scalar")),
        }
    }

    pub fn seq_set_len(&mut self, info: &CollInfo, len: u64) -> Result<()> {
        let value_off = self.store_scalar(len.to_string().as_bytes())?;
        self.put_at(info.root_index, b"length", value_off)
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.txn.is_some() {
            warn!("transaction still open at drop, rolling back");
            if let Err(err) = self.rollback() {
                warn!(%err, "rollback at drop failed");
            }
        }
    }
}
