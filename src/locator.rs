use crate::error::{Error, Result};
use crate::sector::{Locator, Slot};
use crate::storage::FileStore;

/// Outcome of a protected HEAD write: the offset the HEAD used to carry
/// (when it changed), the pre-mutation HEAD, and how many protection
/// slots were handed to other live transactions.
pub(crate) struct HeadWrite {
    pub replaced: Option<u64>,
    pub old: (u64, bool),
    pub protected: usize,
}

impl FileStore {
    /// A HEAD slot is live when it holds an offset or an explicit
    /// deletion mark. A transaction slot is live only while its id is
    /// in use and its staleness word matches the header counter; slots
    /// abandoned by ended or crashed transactions fail that test and
    /// are treated as free space.
    pub fn slot_live(&self, slot: &Slot, stale: u32) -> bool {
        if slot.tid == 0 {
            slot.value_off != 0 || slot.deleted
        } else {
            self.header.txn_live(slot.tid) && stale == self.header.stale_of(slot.tid)
        }
    }

    pub fn slot_for(&self, loc: &Locator, tid: u8) -> Option<usize> {
        loc.slots
            .iter()
            .enumerate()
            .find(|(i, s)| s.tid == tid && self.slot_live(s, loc.stales[*i]))
            .map(|(i, _)| i)
    }

    fn free_slot(&self, loc: &Locator) -> Result<usize> {
        loc.slots
            .iter()
            .enumerate()
            .find(|(i, s)| !self.slot_live(s, loc.stales[*i]))
            .map(|(i, _)| i)
            .ok_or_else(|| Error::corrupt(format!("slot table full at {:#x}", loc.off)))
    }

    /// Read semantics: the transaction's own slot when it has one,
    /// falling through to HEAD otherwise.
    pub fn slot_view(&self, loc: &Locator, tid: u8) -> Option<(u64, bool)> {
        if tid != 0 {
            if let Some(i) = self.slot_for(loc, tid) {
                let s = &loc.slots[i];
                return Some((s.value_off, s.deleted));
            }
        }
        self.slot_for(loc, 0)
            .map(|i| (loc.slots[i].value_off, loc.slots[i].deleted))
    }

    /// Counts slots carrying `off`, live or stale. Deliberately
    /// conservative: a stale reference blocks a release (leaking until
    /// compaction) instead of risking a dangling live one.
    pub fn slot_refs(&self, loc: &Locator, off: u64) -> usize {
        loc.slots.iter().filter(|s| s.value_off == off).count()
    }

    pub fn set_slot(&mut self, loc: &mut Locator, idx: usize, slot: Slot, stale: u32) -> Result<()> {
        self.write_locator_slot(loc.off, idx, &slot, stale)?;
        loc.slots[idx] = slot;
        loc.stales[idx] = stale;
        Ok(())
    }

    pub fn clear_slot(&mut self, loc: &mut Locator, idx: usize) -> Result<()> {
        self.set_slot(loc, idx, Slot::default(), 0)
    }

    /// The isolation workhorse: before HEAD changes, every other live
    /// transaction without a slot for this key receives one carrying
    /// the pre-mutation HEAD. The mutating side pays for its observers.
    fn protect_others(&mut self, loc: &mut Locator, exclude: u8) -> Result<(usize, (u64, bool))> {
        let old = self
            .slot_for(loc, 0)
            .map(|i| (loc.slots[i].value_off, loc.slots[i].deleted))
            .unwrap_or((0, true));

        let mut protected = 0;
        for tid in self.header.live_tids() {
            if tid == exclude || self.slot_for(loc, tid).is_some() {
                continue;
            }
            let idx = self.free_slot(loc)?;
            let stale = self.header.stale_of(tid);
            self.set_slot(
                loc,
                idx,
                Slot {
                    value_off: old.0,
                    tid,
                    deleted: old.1,
                },
                stale,
            )?;
            protected += 1;
        }
        Ok((protected, old))
    }

    /// Protected HEAD write. `replaced` is the offset HEAD used to
    /// carry, handed back as a release candidate for the caller to
    /// weigh against remaining references.
    pub fn write_head(
        &mut self,
        loc: &mut Locator,
        value_off: u64,
        deleted: bool,
        exclude: u8,
    ) -> Result<HeadWrite> {
        let (protected, old) = self.protect_others(loc, exclude)?;

        let old_idx = self.slot_for(loc, 0);
        let idx = match old_idx {
            Some(i) => i,
            None => self.free_slot(loc)?,
        };
        self.set_slot(
            loc,
            idx,
            Slot {
                value_off,
                tid: 0,
                deleted,
            },
            0,
        )?;

        let replaced = old_idx
            .map(|_| old.0)
            .filter(|o| *o > 1 && *o != value_off);
        Ok(HeadWrite {
            replaced,
            old,
            protected,
        })
    }

    /// Writes or overwrites the transaction's own slot. Returns the
    /// offset the slot previously carried as a release candidate.
    pub fn write_txn_slot(
        &mut self,
        loc: &mut Locator,
        tid: u8,
        value_off: u64,
        deleted: bool,
    ) -> Result<Option<u64>> {
        let prior_idx = self.slot_for(loc, tid);
        let prior = prior_idx
            .map(|i| loc.slots[i].value_off)
            .filter(|o| *o > 1 && *o != value_off);

        let idx = match prior_idx {
            Some(i) => i,
            None => self.free_slot(loc)?,
        };
        let stale = self.header.stale_of(tid);
        self.set_slot(
            loc,
            idx,
            Slot {
                value_off,
                tid,
                deleted,
            },
            stale,
        )?;
        Ok(prior)
    }
}
