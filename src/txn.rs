use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::engine::Core;
use crate::error::{Error, Result};
use crate::sector::{Locator, SIG_LOCATOR};

/// Per-instance state of the one open transaction: its id and the
/// locators it has written, kept in memory for the commit and rollback
/// walks.
pub(crate) struct TxnState {
    pub id: u8,
    pub touched: HashSet<u64>,
}

impl Core {
    pub(crate) fn begin_work(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::AlreadyInTransaction);
        }
        self.locked(true, |core| {
            let tid = core
                .store
                .header
                .lowest_free_tid()
                .ok_or(Error::TooManyTransactions)?;
            core.store.header.set_txn_live(tid, true);
            // invalidate any slots left behind by an earlier use of this id
            core.store.header.bump_stale(tid);
            core.store.persist_state()?;

            core.txn = Some(TxnState {
                id: tid,
                touched: HashSet::new(),
            });
            debug!(tid, "transaction started");
            Ok(())
        })
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        if self.txn.is_none() {
            return Err(Error::NotInTransaction);
        }
        self.locked(true, |core| {
            let state = core.txn.take().expect("transaction state");
            let tid = state.id;

            let locators = core.load_touched(&state)?;
            let mut refs = reference_counts(&locators);
            let mut released = HashSet::new();

            for mut loc in locators {
                let Some(idx) = core.store.slot_for(&loc, tid) else {
                    continue;
                };
                let slot = loc.slots[idx];

                // fold the slot into HEAD; the fold is itself a HEAD
                // mutation, so other live transactions get protected
                let hw = core.store.write_head(&mut loc, slot.value_off, slot.deleted, tid)?;
                if hw.protected > 0 && hw.old.0 > 1 {
                    *refs.entry(hw.old.0).or_default() += hw.protected as i64;
                }
                core.store.clear_slot(&mut loc, idx)?;

                if let Some(old) = hw.replaced {
                    let count = refs.entry(old).or_default();
                    *count -= 1;
                    if *count <= 0 {
                        core.store.release_value(old, &mut released)?;
                    }
                }
            }

            core.end_txn(tid)?;
            debug!(tid, "transaction committed");
            Ok(())
        })
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        if self.txn.is_none() {
            return Err(Error::NotInTransaction);
        }
        self.locked(true, |core| {
            let state = core.txn.take().expect("transaction state");
            let tid = state.id;

            let locators = core.load_touched(&state)?;
            let mut refs = reference_counts(&locators);
            let mut released = HashSet::new();

            for mut loc in locators {
                let Some(idx) = core.store.slot_for(&loc, tid) else {
                    continue;
                };
                let off = loc.slots[idx].value_off;
                core.store.clear_slot(&mut loc, idx)?;

                if off > 1 {
                    let count = refs.entry(off).or_default();
                    *count -= 1;
                    if *count <= 0 {
                        core.store.release_value(off, &mut released)?;
                    }
                }
            }

            core.end_txn(tid)?;
            debug!(tid, "transaction rolled back");
            Ok(())
        })
    }

    fn load_touched(&mut self, state: &TxnState) -> Result<Vec<Locator>> {
        let mut out = Vec::with_capacity(state.touched.len());
        for off in &state.touched {
            if self.store.sig_at(*off)? == SIG_LOCATOR {
                out.push(self.store.read_locator(*off)?);
            } else {
                warn!(off = *off, "touched locator disappeared");
            }
        }
        Ok(out)
    }

    fn end_txn(&mut self, tid: u8) -> Result<()> {
        self.store.header.set_txn_live(tid, false);
        // any slot still carrying this id anywhere in the file is now stale
        self.store.header.bump_stale(tid);
        self.store.persist_state()
    }
}

/// Counts every offset carried by any slot across the touched locators,
/// live or stale. Commit and rollback release a value chain only when
/// its count drops to zero, so a chain moved between keys inside one
/// transaction survives the fold of the key it left.
fn reference_counts(locators: &[Locator]) -> HashMap<u64, i64> {
    let mut refs: HashMap<u64, i64> = HashMap::new();
    for loc in locators {
        for slot in &loc.slots {
            if slot.value_off > 1 {
                *refs.entry(slot.value_off).or_default() += 1;
            }
        }
    }
    refs
}
