use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::config::{ByteSize, Config};
use crate::engine::{CollInfo, Core, Stored};
use crate::entity::Db;
use crate::error::Result;
use crate::sector::PAYLOAD_NULL;

impl Db {
    /// Copies the live data of this database into a freshly created
    /// file at `path`, using the same header parameters, and returns a
    /// handle to it. Space held by freed sectors, stale slots and
    /// abandoned transactions is left behind.
    ///
    /// Unlike recursive export this walk is cycle-safe: a collection
    /// reached a second time is stored by reference to its first copy.
    pub fn compact_into(&self, path: impl AsRef<Path>) -> Result<Db> {
        let path = path.as_ref();
        if let Ok(target) = std::fs::canonicalize(path) {
            if target == *self.path() {
                return Err(crate::Error::unsupported(
                    "compacting a database into its own file",
                ));
            }
        }

        let config = self.with_core(|c| {
            let geo = c.store.geo();
            let root = c.locked(false, |c| c.root_info())?;
            let config = Config {
                byte_size: ByteSize::from_width(geo.long_len as u8)
                    .expect("geometry was validated at open"),
                digest: c.digest,
                max_buckets: geo.max_buckets as u8,
                fanout: geo.fanout as u16,
                // always carry class tags over; dropping data is not
                // compaction's call
                autobless: true,
                root: root.kind,
                ..Config::default()
            };
            Ok::<_, crate::Error>(config)
        })?;

        let dst = Db::open(path, config)?;

        self.with_core(|src| {
            src.locked(false, |src| {
                dst.with_core(|out| {
                    out.locked(true, |out| {
                        let src_root = src.root_info()?;
                        let dst_root = out.root_info()?;
                        let mut memo = HashMap::new();
                        copy_coll(src, &src_root, out, &dst_root, &mut memo)
                    })
                })
            })
        })?;

        info!(path = %path.display(), "compaction finished");
        Ok(dst)
    }
}

/// Copies one collection, entry by entry, raw: stored keys and scalar
/// bytes move unfiltered so the destination file is byte-equivalent in
/// content. `memo` maps source data sectors to their copies.
fn copy_coll(
    src: &mut Core,
    src_info: &CollInfo,
    dst: &mut Core,
    dst_info: &CollInfo,
    memo: &mut HashMap<u64, u64>,
) -> Result<()> {
    memo.insert(src_info.data_off, dst_info.data_off);

    for (raw_key, value_off) in src.stored_entries(src_info)? {
        match src.decode_value(value_off, false)? {
            Stored::Null => {
                let off = dst.store.alloc_data(PAYLOAD_NULL, 0, &[])?;
                dst.put_at(dst_info.root_index, &raw_key, off)?;
            }
            Stored::Scalar(raw) => {
                let off = dst.store_scalar(&raw)?;
                dst.put_at(dst_info.root_index, &raw_key, off)?;
            }
            Stored::Coll(child) => {
                if let Some(copied) = memo.get(&child.data_off) {
                    dst.put_at(dst_info.root_index, &raw_key, *copied)?;
                } else {
                    let created = dst.create_collection(child.kind, child.class.as_deref())?;
                    dst.put_at(dst_info.root_index, &raw_key, created.data_off)?;
                    copy_coll(src, &child, dst, &created, memo)?;
                }
            }
        }
    }
    Ok(())
}
