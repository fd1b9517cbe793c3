use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::sector::{sig_name, Bucket, Locator, SectorClass, SIG_BUCKET, SIG_INDEX};
use crate::storage::FileStore;

mod iter;

impl FileStore {
    pub(crate) fn route(&self, digest: &[u8], level: usize) -> usize {
        digest[level] as usize % self.geo().fanout
    }

    /// Walks the cascade for `digest`, returning the key locator offset
    /// when the key is present.
    pub fn cascade_find(&mut self, root_index: u64, digest: &[u8]) -> Result<Option<u64>> {
        let levels = self.geo().digest_len;
        let mut index_off = root_index;

        for level in 0..levels {
            let child = self.read_index_slot(index_off, self.route(digest, level))?;
            if child == 0 {
                return Ok(None);
            }
            match self.sig_at(child)? {
                SIG_INDEX => index_off = child,
                SIG_BUCKET => {
                    let bucket = self.read_bucket(child)?;
                    return Ok(bucket
                        .entries
                        .iter()
                        .find(|e| e.loc != 0 && e.digest == digest)
                        .map(|e| e.loc));
                }
                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected {} sector below index at {child:#x}",
                        sig_name(other)
                    )))
                }
            }
        }
        Err(Error::corrupt("digest exhausted during lookup"))
    }

    /// Finds or creates the locator for `(digest, key)`, splitting full
    /// bucket lists along the way. New sectors are fully written before
    /// the reference that makes them reachable.
    pub fn cascade_ensure(
        &mut self,
        root_index: u64,
        digest: &[u8],
        key: &[u8],
    ) -> Result<(Locator, bool)> {
        let levels = self.geo().digest_len;

        'retry: loop {
            let mut index_off = root_index;
            for level in 0..levels {
                let slot = self.route(digest, level);
                let child = self.read_index_slot(index_off, slot)?;

                if child == 0 {
                    let locator = self.alloc_locator(key)?;
                    let bucket_off = self.alloc_bucket()?;
                    self.write_bucket_entry(bucket_off, 0, digest, locator.off)?;
                    self.write_index_slot(index_off, slot, bucket_off)?;
                    return Ok((locator, true));
                }

                match self.sig_at(child)? {
                    SIG_INDEX => index_off = child,
                    SIG_BUCKET => {
                        let bucket = self.read_bucket(child)?;

                        if let Some(e) =
                            bucket.entries.iter().find(|e| e.loc != 0 && e.digest == digest)
                        {
                            return Ok((self.read_locator(e.loc)?, false));
                        }

                        // empty slots and tombstones are both reusable
                        if let Some(i) = bucket.entries.iter().position(|e| e.loc == 0) {
                            let locator = self.alloc_locator(key)?;
                            self.write_bucket_entry(child, i, digest, locator.off)?;
                            return Ok((locator, true));
                        }

                        if level + 1 >= levels {
                            return Err(Error::corrupt("digest exhausted during split"));
                        }
                        self.split_bucket(index_off, slot, &bucket, level + 1)?;
                        continue 'retry;
                    }
                    other => {
                        return Err(Error::corrupt(format!(
                            "unexpected {} sector below index at {child:#x}",
                            sig_name(other)
                        )))
                    }
                }
            }
            return Err(Error::corrupt("digest exhausted during insert"));
        }
    }

    /// Replaces a full bucket list with an index one level deeper,
    /// redistributing the live entries by their next routing byte. The
    /// parent reference is flipped last.
    fn split_bucket(
        &mut self,
        parent_index: u64,
        parent_slot: usize,
        bucket: &Bucket,
        level: usize,
    ) -> Result<()> {
        let new_index = self.alloc_index()?;

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, entry) in bucket.entries.iter().enumerate() {
            if entry.loc != 0 {
                groups.entry(self.route(&entry.digest, level)).or_default().push(i);
            }
        }

        for (slot, members) in &groups {
            let child = self.alloc_bucket()?;
            for (pos, member) in members.iter().enumerate() {
                let entry = &bucket.entries[*member];
                self.write_bucket_entry(child, pos, &entry.digest, entry.loc)?;
            }
            self.write_index_slot(new_index, *slot, child)?;
        }

        self.write_index_slot(parent_index, parent_slot, new_index)?;
        self.release_space(bucket.off, SectorClass::Bucket)?;

        debug!(
            level,
            children = groups.len(),
            "bucket list split into index"
        );
        Ok(())
    }

    /// Removes the key's bucket entry, leaving a tombstone (zero offset)
    /// in place. Returns the locator offset the entry pointed at.
    pub fn cascade_tombstone(&mut self, root_index: u64, digest: &[u8]) -> Result<Option<u64>> {
        let levels = self.geo().digest_len;
        let mut index_off = root_index;

        for level in 0..levels {
            let child = self.read_index_slot(index_off, self.route(digest, level))?;
            if child == 0 {
                return Ok(None);
            }
            match self.sig_at(child)? {
                SIG_INDEX => index_off = child,
                SIG_BUCKET => {
                    let bucket = self.read_bucket(child)?;
                    let Some(i) = bucket
                        .entries
                        .iter()
                        .position(|e| e.loc != 0 && e.digest == digest)
                    else {
                        return Ok(None);
                    };
                    let loc = bucket.entries[i].loc;
                    self.write_bucket_entry(child, i, digest, 0)?;
                    return Ok(Some(loc));
                }
                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected {} sector below index at {child:#x}",
                        sig_name(other)
                    )))
                }
            }
        }
        Err(Error::corrupt("digest exhausted during delete"))
    }
}
