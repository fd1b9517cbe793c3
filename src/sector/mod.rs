use crate::error::{Error, Result};
use crate::storage::FileStore;
use crate::value::CollKind;

pub mod header;

use header::DATA_CHUNK_LEN;

// one-byte type signatures, first byte of every sector
pub const SIG_INDEX: u8 = b'I';
pub const SIG_BUCKET: u8 = b'B';
pub const SIG_LOCATOR: u8 = b'K';
pub const SIG_DATA: u8 = b'D';
pub const SIG_FREE: u8 = b'F';

// payload kinds inside a data sector
pub const PAYLOAD_SCALAR: u8 = b'S';
pub const PAYLOAD_NULL: u8 = b'N';
pub const PAYLOAD_HASH: u8 = b'H';
pub const PAYLOAD_ARRAY: u8 = b'A';

pub(crate) fn sig_name(sig: u8) -> &'static str {
    match sig {
        SIG_INDEX => "index",
        SIG_BUCKET => "bucket list",
        SIG_LOCATOR => "key locator",
        SIG_DATA => "data",
        SIG_FREE => "freed",
        _ => "unknown",
    }
}

pub(crate) fn payload_of(kind: CollKind) -> u8 {
    match kind {
        CollKind::Map => PAYLOAD_HASH,
        CollKind::Seq => PAYLOAD_ARRAY,
    }
}

pub(crate) fn kind_of(payload: u8) -> Option<CollKind> {
    match payload {
        PAYLOAD_HASH => Some(CollKind::Map),
        PAYLOAD_ARRAY => Some(CollKind::Seq),
        _ => None,
    }
}

/// Freelist classes; every sector belongs to exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectorClass {
    Index = 0,
    Bucket = 1,
    Locator = 2,
    Data = 3,
}

impl SectorClass {
    pub fn slot(&self) -> usize {
        *self as usize
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(SectorClass::Index),
            1 => Ok(SectorClass::Bucket),
            2 => Ok(SectorClass::Locator),
            3 => Ok(SectorClass::Data),
            other => Err(Error::corrupt(format!("bad freelist class {other}"))),
        }
    }
}

/// One MVCC slot inside a key locator: `value_off | tid | deleted`.
/// Offset 0 means absent; transaction id 0 is the HEAD slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    pub value_off: u64,
    pub tid: u8,
    pub deleted: bool,
}

/// Decoded key locator sector: the slot table, the per-slot staleness
/// words and the plaintext key.
#[derive(Clone, Debug)]
pub struct Locator {
    pub off: u64,
    pub slots: Vec<Slot>,
    pub stales: Vec<u32>,
    pub key: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct BucketEntry {
    pub digest: Vec<u8>,
    pub loc: u64,
}

/// Decoded trie leaf: up to `max_buckets` (digest, locator) pairs.
/// An entry with `loc == 0` is empty or a tombstone.
#[derive(Clone, Debug)]
pub struct Bucket {
    pub off: u64,
    pub entries: Vec<BucketEntry>,
}

/// Decoded data sector head: payload kind, chain link and the chunk with
/// its padding stripped.
#[derive(Clone, Debug)]
pub struct DataHead {
    pub off: u64,
    pub payload: u8,
    pub chain: u64,
    pub chunk: Vec<u8>,
}

/// The collection-flavored chunk of a Hash/Array data sector: offset of
/// the child root index, the staleness counter stamped at creation, and
/// the optional class tag.
pub(crate) struct CollChunk {
    pub root_index: u64,
    pub stale: u32,
    pub class: Option<Vec<u8>>,
}

impl CollChunk {
    pub fn encode(&self, geo: &header::Geometry) -> Result<Vec<u8>> {
        let class = self.class.as_deref().unwrap_or_default();
        if geo.long_len + 4 + 1 + class.len() > DATA_CHUNK_LEN {
            return Err(Error::unsupported(format!(
                "class tag of {} bytes does not fit a data sector",
                class.len()
            )));
        }

        let mut buf = geo.long_bytes(self.root_index)?;
        buf.extend_from_slice(&self.stale.to_le_bytes());
        buf.push(class.len() as u8);
        buf.extend_from_slice(class);
        Ok(buf)
    }

    pub fn decode(geo: &header::Geometry, chunk: &[u8]) -> Result<Self> {
        let min = geo.long_len + 4 + 1;
        if chunk.len() < min {
            return Err(Error::corrupt("truncated collection chunk"));
        }

        let root_index = geo.get_long(chunk, 0);
        let stale = u32::from_le_bytes([
            chunk[geo.long_len],
            chunk[geo.long_len + 1],
            chunk[geo.long_len + 2],
            chunk[geo.long_len + 3],
        ]);
        let class_len = chunk[geo.long_len + 4] as usize;
        if chunk.len() < min + class_len {
            return Err(Error::corrupt("truncated class tag"));
        }
        let class = if class_len == 0 {
            None
        } else {
            Some(chunk[min..min + class_len].to_vec())
        };

        Ok(Self {
            root_index,
            stale,
            class,
        })
    }
}

impl FileStore {
    pub fn sig_at(&mut self, off: u64) -> Result<u8> {
        Ok(self.file.read_at(off, 1)?[0])
    }

    /// Reads and sanity-checks a sector head, returning (signature,
    /// content length).
    pub fn read_sector_head(&mut self, off: u64) -> Result<(u8, usize)> {
        let geo = self.geo();
        let buf = self.file.read_at(off, geo.sector_head_len())?;
        let sig = buf[0];
        let len = geo.get_long(&buf, 1) as usize;

        let plausible = geo
            .index_content_len()
            .max(geo.locator_content_len(u8::MAX as usize))
            .max(geo.bucket_content_len())
            .max(geo.data_content_len());
        if len == 0 || len > plausible {
            return Err(Error::corrupt(format!(
                "implausible sector size {len} at {off:#x}"
            )));
        }
        Ok((sig, len))
    }

    pub fn expect_sector(&mut self, off: u64, want: u8) -> Result<usize> {
        let (sig, len) = self.read_sector_head(off)?;
        if sig != want {
            return Err(Error::corrupt(format!(
                "expected {} sector at {off:#x}, found {}",
                sig_name(want),
                sig_name(sig)
            )));
        }
        Ok(len)
    }

    pub fn write_sector(&mut self, off: u64, sig: u8, content: &[u8]) -> Result<()> {
        let geo = self.geo();
        let mut buf = Vec::with_capacity(geo.sector_head_len() + content.len());
        buf.push(sig);
        buf.extend_from_slice(&geo.long_bytes(content.len() as u64)?);
        buf.extend_from_slice(content);
        self.file.write_at(off, &buf)
    }

    // --- index sectors ---

    pub fn alloc_index(&mut self) -> Result<u64> {
        let len = self.geo().index_content_len();
        let off = self.request_space(SectorClass::Index, len)?;
        self.write_sector(off, SIG_INDEX, &vec![0u8; len])?;
        Ok(off)
    }

    pub fn read_index(&mut self, off: u64) -> Result<Vec<u64>> {
        let geo = self.geo();
        let len = self.expect_sector(off, SIG_INDEX)?;
        if len != geo.index_content_len() {
            return Err(Error::corrupt(format!("bad index sector size at {off:#x}")));
        }
        let content = self
            .file
            .read_at(off + geo.sector_head_len() as u64, len)?;
        Ok((0..geo.fanout)
            .map(|i| geo.get_long(&content, i * geo.long_len))
            .collect())
    }

    pub fn read_index_slot(&mut self, index_off: u64, slot: usize) -> Result<u64> {
        let geo = self.geo();
        let pos = index_off + (geo.sector_head_len() + slot * geo.long_len) as u64;
        self.read_long_at(pos)
    }

    pub fn write_index_slot(&mut self, index_off: u64, slot: usize, child: u64) -> Result<()> {
        let geo = self.geo();
        let pos = index_off + (geo.sector_head_len() + slot * geo.long_len) as u64;
        self.write_long_at(pos, child)
    }

    // --- bucket lists ---

    pub fn alloc_bucket(&mut self) -> Result<u64> {
        let len = self.geo().bucket_content_len();
        let off = self.request_space(SectorClass::Bucket, len)?;
        self.write_sector(off, SIG_BUCKET, &vec![0u8; len])?;
        Ok(off)
    }

    pub fn read_bucket(&mut self, off: u64) -> Result<Bucket> {
        let geo = self.geo();
        let len = self.expect_sector(off, SIG_BUCKET)?;
        if len != geo.bucket_content_len() {
            return Err(Error::corrupt(format!("bad bucket sector size at {off:#x}")));
        }
        let content = self
            .file
            .read_at(off + geo.sector_head_len() as u64, len)?;

        let entries = (0..geo.max_buckets)
            .map(|i| {
                let pos = i * geo.bucket_entry_len();
                BucketEntry {
                    digest: content[pos..pos + geo.digest_len].to_vec(),
                    loc: geo.get_long(&content, pos + geo.digest_len),
                }
            })
            .collect();

        Ok(Bucket { off, entries })
    }

    pub fn write_bucket_entry(
        &mut self,
        bucket_off: u64,
        idx: usize,
        digest: &[u8],
        loc: u64,
    ) -> Result<()> {
        let geo = self.geo();
        debug_assert_eq!(digest.len(), geo.digest_len);

        let mut buf = digest.to_vec();
        buf.extend_from_slice(&geo.long_bytes(loc)?);
        let pos = bucket_off + (geo.sector_head_len() + idx * geo.bucket_entry_len()) as u64;
        self.file.write_at(pos, &buf)
    }

    // --- key locators ---

    pub fn alloc_locator(&mut self, key: &[u8]) -> Result<Locator> {
        let geo = self.geo();
        if key.len() > u8::MAX as usize {
            return Err(Error::unsupported(format!(
                "key of {} bytes exceeds the 255 byte limit",
                key.len()
            )));
        }

        let len = geo.locator_content_len(key.len());
        let off = self.request_space(SectorClass::Locator, len)?;

        let mut content = vec![0u8; len];
        let key_pos = geo.max_buckets * geo.slot_len() + geo.max_buckets * 4;
        content[key_pos] = key.len() as u8;
        content[key_pos + 1..].copy_from_slice(key);
        self.write_sector(off, SIG_LOCATOR, &content)?;

        Ok(Locator {
            off,
            slots: vec![Slot::default(); geo.max_buckets],
            stales: vec![0; geo.max_buckets],
            key: key.to_vec(),
        })
    }

    pub fn read_locator(&mut self, off: u64) -> Result<Locator> {
        let geo = self.geo();
        let len = self.expect_sector(off, SIG_LOCATOR)?;
        let content = self
            .file
            .read_at(off + geo.sector_head_len() as u64, len)?;

        let slots = (0..geo.max_buckets)
            .map(|i| {
                let pos = i * geo.slot_len();
                Slot {
                    value_off: geo.get_long(&content, pos),
                    tid: content[pos + geo.long_len],
                    deleted: content[pos + geo.long_len + 1] != 0,
                }
            })
            .collect();

        let stale_pos = geo.max_buckets * geo.slot_len();
        let stales = (0..geo.max_buckets)
            .map(|i| {
                let pos = stale_pos + i * 4;
                u32::from_le_bytes([
                    content[pos],
                    content[pos + 1],
                    content[pos + 2],
                    content[pos + 3],
                ])
            })
            .collect();

        let key_pos = stale_pos + geo.max_buckets * 4;
        let key_len = content[key_pos] as usize;
        if content.len() < key_pos + 1 + key_len {
            return Err(Error::corrupt(format!("truncated key at {off:#x}")));
        }
        let key = content[key_pos + 1..key_pos + 1 + key_len].to_vec();

        Ok(Locator {
            off,
            slots,
            stales,
            key,
        })
    }

    pub fn write_locator_slot(
        &mut self,
        loc_off: u64,
        idx: usize,
        slot: &Slot,
        stale: u32,
    ) -> Result<()> {
        let geo = self.geo();

        let mut buf = geo.long_bytes(slot.value_off)?;
        buf.push(slot.tid);
        buf.push(slot.deleted as u8);
        let slot_pos = loc_off + (geo.sector_head_len() + idx * geo.slot_len()) as u64;
        self.file.write_at(slot_pos, &buf)?;

        let stale_pos = loc_off
            + (geo.sector_head_len() + geo.max_buckets * geo.slot_len() + idx * 4) as u64;
        self.file.write_at(stale_pos, &stale.to_le_bytes())
    }

    // --- data sectors ---

    pub fn alloc_data(&mut self, payload: u8, chain: u64, chunk: &[u8]) -> Result<u64> {
        let geo = self.geo();
        debug_assert!(chunk.len() <= DATA_CHUNK_LEN);

        let len = geo.data_content_len();
        let off = self.request_space(SectorClass::Data, len)?;

        let mut content = vec![0u8; len];
        content[0] = payload;
        geo.put_long(&mut content, 1, chain)?;
        content[1 + geo.long_len] = chunk.len() as u8;
        content[2 + geo.long_len..2 + geo.long_len + chunk.len()].copy_from_slice(chunk);
        self.write_sector(off, SIG_DATA, &content)?;
        Ok(off)
    }

    pub fn read_data(&mut self, off: u64) -> Result<DataHead> {
        let geo = self.geo();
        let len = self.expect_sector(off, SIG_DATA)?;
        if len != geo.data_content_len() {
            return Err(Error::corrupt(format!("bad data sector size at {off:#x}")));
        }
        let content = self
            .file
            .read_at(off + geo.sector_head_len() as u64, len)?;

        let payload = content[0];
        let chain = geo.get_long(&content, 1);
        let chunk_len = content[1 + geo.long_len] as usize;
        let chunk = content[2 + geo.long_len..2 + geo.long_len + chunk_len].to_vec();

        Ok(DataHead {
            off,
            payload,
            chain,
            chunk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ByteSize;
    use crate::sector::header::Geometry;

    #[test]
    fn coll_chunk_roundtrip() {
        let geo = Geometry::new(ByteSize::Medium, 16, 16, 256).unwrap();
        let chunk = CollChunk {
            root_index: 0xBEEF,
            stale: 42,
            class: Some(b"Acme::Widget".to_vec()),
        };

        let bytes = chunk.encode(&geo).unwrap();
        let back = CollChunk::decode(&geo, &bytes).unwrap();

        assert_eq!(back.root_index, 0xBEEF);
        assert_eq!(back.stale, 42);
        assert_eq!(back.class.as_deref(), Some(&b"Acme::Widget"[..]));
    }

    #[test]
    fn coll_chunk_without_class() {
        let geo = Geometry::new(ByteSize::Large, 16, 16, 256).unwrap();
        let bytes = CollChunk {
            root_index: 1,
            stale: 0,
            class: None,
        }
        .encode(&geo)
        .unwrap();

        assert!(CollChunk::decode(&geo, &bytes).unwrap().class.is_none());
    }

    #[test]
    fn oversized_class_is_rejected() {
        let geo = Geometry::new(ByteSize::Medium, 16, 16, 256).unwrap();
        let chunk = CollChunk {
            root_index: 1,
            stale: 0,
            class: Some(vec![b'x'; 300]),
        };
        assert!(chunk.encode(&geo).is_err());
    }
}
