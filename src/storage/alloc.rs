use std::collections::HashSet;

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::sector::{
    CollChunk, SectorClass, PAYLOAD_ARRAY, PAYLOAD_HASH, PAYLOAD_NULL, PAYLOAD_SCALAR, SIG_BUCKET,
    SIG_DATA, SIG_FREE, SIG_INDEX,
};

use super::FileStore;

impl FileStore {
    /// Hands out an offset whose next `content_len` content bytes (plus
    /// the sector head) belong exclusively to the caller: either an
    /// exact-capacity entry popped off the class freelist, or fresh
    /// space at the end of the file.
    pub fn request_space(&mut self, class: SectorClass, content_len: usize) -> Result<u64> {
        let geo = self.geo();
        let head_len = geo.sector_head_len() as u64;

        let mut off = self.header.free_heads[class.slot()];
        while off != 0 {
            let (sig, capacity) = self.read_sector_head(off)?;
            if sig != SIG_FREE {
                return Err(Error::corrupt(format!(
                    "freelist entry at {off:#x} is not a freed sector"
                )));
            }

            let link = self.file.read_at(off + head_len, 1 + 2 * geo.long_len)?;
            if SectorClass::from_byte(link[0])? != class {
                return Err(Error::corrupt(format!(
                    "freelist entry at {off:#x} belongs to another class"
                )));
            }
            let next = geo.get_long(&link, 1);
            let prev = geo.get_long(&link, 1 + geo.long_len);

            if capacity == content_len {
                if prev == 0 {
                    self.header.free_heads[class.slot()] = next;
                    self.persist_state()?;
                } else {
                    self.write_long_at(prev + head_len + 1, next)?;
                }
                if next != 0 {
                    self.write_long_at(next + head_len + 1 + geo.long_len as u64, prev)?;
                }
                trace!(off, ?class, "reusing freed sector");
                return Ok(off);
            }
            off = next;
        }

        let end = self.end_off()?;
        let total = head_len + content_len as u64;
        if end.saturating_add(total) > geo.max_long() {
            return Err(Error::corrupt(format!(
                "file full: {end:#x} exceeds the {}-byte long range",
                geo.long_len
            )));
        }
        trace!(off = end, ?class, "extending file");
        Ok(end)
    }

    /// Retires a sector: its signature becomes the freelist sentinel and
    /// it is linked at the head of its class freelist. The size field is
    /// left in place, recording the capacity for reuse.
    pub fn release_space(&mut self, off: u64, class: SectorClass) -> Result<()> {
        let geo = self.geo();
        let head_len = geo.sector_head_len() as u64;
        let head = self.header.free_heads[class.slot()];

        self.file.write_at(off, &[SIG_FREE])?;

        let mut link = vec![class as u8];
        link.extend_from_slice(&geo.long_bytes(head)?);
        link.extend_from_slice(&geo.long_bytes(0)?);
        self.file.write_at(off + head_len, &link)?;

        if head != 0 {
            self.write_long_at(head + head_len + 1 + geo.long_len as u64, off)?;
        }
        self.header.free_heads[class.slot()] = off;
        self.persist_state()?;
        trace!(off, ?class, "sector freed");
        Ok(())
    }

    /// Releases the value rooted at `off`: a scalar/null chain, or a
    /// whole collection subtree. `released` dedupes shared offsets so a
    /// sector is never freed twice within one operation, which also
    /// bounds the walk on cyclic structures.
    pub fn release_value(&mut self, off: u64, released: &mut HashSet<u64>) -> Result<()> {
        if off <= 1 || released.contains(&off) {
            return Ok(());
        }
        if self.sig_at(off)? != SIG_DATA {
            warn!(off, "skipping release of non-data sector");
            return Ok(());
        }

        let head = self.read_data(off)?;
        match head.payload {
            PAYLOAD_SCALAR | PAYLOAD_NULL => self.release_chain(off, released),
            PAYLOAD_HASH | PAYLOAD_ARRAY => self.release_collection(off, released),
            other => Err(Error::corrupt(format!(
                "unknown payload {other:#x} at {off:#x}"
            ))),
        }
    }

    fn release_chain(&mut self, off: u64, released: &mut HashSet<u64>) -> Result<()> {
        let mut cur = off;
        while cur != 0 && !released.contains(&cur) {
            let head = self.read_data(cur)?;
            released.insert(cur);
            self.release_space(cur, SectorClass::Data)?;
            cur = head.chain;
        }
        Ok(())
    }

    fn release_collection(&mut self, data_off: u64, released: &mut HashSet<u64>) -> Result<()> {
        let head = self.read_data(data_off)?;
        let chunk = CollChunk::decode(&self.geo(), &head.chunk)?;

        released.insert(data_off);
        self.release_tree(chunk.root_index, released)?;
        self.release_space(data_off, SectorClass::Data)
    }

    fn release_tree(&mut self, index_off: u64, released: &mut HashSet<u64>) -> Result<()> {
        if index_off == 0 || released.contains(&index_off) {
            return Ok(());
        }
        released.insert(index_off);

        let children = self.read_index(index_off)?;
        for child in children.into_iter().filter(|c| *c != 0) {
            match self.sig_at(child)? {
                SIG_INDEX => self.release_tree(child, released)?,
                SIG_BUCKET => self.release_bucket(child, released)?,
                SIG_FREE => warn!(off = child, "dangling reference to freed sector"),
                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected {} sector below index at {child:#x}",
                        crate::sector::sig_name(other)
                    )))
                }
            }
        }
        self.release_space(index_off, SectorClass::Index)
    }

    fn release_bucket(&mut self, bucket_off: u64, released: &mut HashSet<u64>) -> Result<()> {
        if released.contains(&bucket_off) {
            return Ok(());
        }
        released.insert(bucket_off);

        let bucket = self.read_bucket(bucket_off)?;
        for entry in bucket.entries.iter().filter(|e| e.loc != 0) {
            if released.contains(&entry.loc) {
                continue;
            }
            let locator = self.read_locator(entry.loc)?;
            for slot in &locator.slots {
                self.release_value(slot.value_off, released)?;
            }
            released.insert(entry.loc);
            self.release_space(entry.loc, SectorClass::Locator)?;
        }
        self.release_space(bucket_off, SectorClass::Bucket)
    }
}
