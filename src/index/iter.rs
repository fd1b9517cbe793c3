use std::cmp::Ordering;

use itertools::Itertools;
use tracing::warn;

use crate::error::{Error, Result};
use crate::sector::{sig_name, SIG_BUCKET, SIG_FREE, SIG_INDEX};
use crate::storage::FileStore;

impl FileStore {
    /// Traversal order of the cascade: routing byte at each level, raw
    /// digest as the tiebreak within a leaf. With the default fanout of
    /// 256 this collapses to plain lexicographic digest order.
    fn route_order(&self, a: &[u8], b: &[u8]) -> Ordering {
        let fanout = self.geo().fanout;
        for (x, y) in a.iter().zip(b.iter()) {
            match (*x as usize % fanout).cmp(&(*y as usize % fanout)) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        a.cmp(b)
    }

    /// Depth-first step: the first (digest, locator) strictly after
    /// `after` in traversal order, or the very first leaf when `after`
    /// is `None`. Liveness of the locator is the caller's concern.
    pub fn cascade_next(
        &mut self,
        root_index: u64,
        after: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        self.next_below(root_index, 0, after)
    }

    fn next_below(
        &mut self,
        index_off: u64,
        level: usize,
        after: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        let geo = self.geo();
        if level >= geo.digest_len {
            return Err(Error::corrupt("digest exhausted during traversal"));
        }

        let start = after.map(|d| self.route(d, level)).unwrap_or(0);
        for slot in start..geo.fanout {
            let child = self.read_index_slot(index_off, slot)?;
            if child == 0 {
                continue;
            }
            let bound = after.filter(|_| slot == start);

            let hit = match self.sig_at(child)? {
                SIG_INDEX => self.next_below(child, level + 1, bound)?,
                SIG_BUCKET => {
                    let bucket = self.read_bucket(child)?;
                    bucket
                        .entries
                        .iter()
                        .filter(|e| e.loc != 0)
                        .filter(|e| {
                            bound.map_or(true, |a| {
                                self.route_order(&e.digest, a) == Ordering::Greater
                            })
                        })
                        .sorted_by(|x, y| self.route_order(&x.digest, &y.digest))
                        .next()
                        .map(|e| (e.digest.clone(), e.loc))
                }
                SIG_FREE => {
                    warn!(off = child, "dangling reference to freed sector");
                    None
                }
                other => {
                    return Err(Error::corrupt(format!(
                        "unexpected {} sector below index at {child:#x}",
                        sig_name(other)
                    )))
                }
            };

            if hit.is_some() {
                return Ok(hit);
            }
        }
        Ok(None)
    }
}
