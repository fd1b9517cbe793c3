use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use crate::digest::DigestKind;
use crate::value::CollKind;

/// Scalar-in/scalar-out transform applied to byte-string map keys or
/// scalar values on their way in and out of the file. Filters never see
/// structural values or sequence indices.
pub type ScalarFilter = Box<dyn Fn(&[u8]) -> Vec<u8> + Send>;

/// Width of the "long" fields (offsets and sizes) inside a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ByteSize {
    pub fn width(&self) -> usize {
        match self {
            ByteSize::Small => 2,
            ByteSize::Medium => 4,
            ByteSize::Large => 8,
        }
    }

    pub(crate) fn from_width(width: u8) -> Option<Self> {
        match width {
            2 => Some(ByteSize::Small),
            4 => Some(ByteSize::Medium),
            8 => Some(ByteSize::Large),
            _ => None,
        }
    }
}

/// Options recognized by [`crate::Db::open`].
///
/// Sizing options (`byte_size`, `max_buckets`, `fanout`, `digest`) only
/// take effect when the file is created; on an existing file they are
/// validated against the header. `locking` implies `autoflush`.
pub struct Config {
    pub byte_size: ByteSize,
    pub file_offset: u64,
    pub digest: DigestKind,
    pub locking: bool,
    pub autoflush: bool,
    pub autobless: bool,
    pub read_only: bool,
    pub root: CollKind,
    pub max_buckets: u8,
    pub fanout: u16,
    pub audit_file: Option<PathBuf>,
    pub audit_sink: Option<Box<dyn Write + Send>>,
    pub filter_store_key: Option<ScalarFilter>,
    pub filter_store_value: Option<ScalarFilter>,
    pub filter_fetch_key: Option<ScalarFilter>,
    pub filter_fetch_value: Option<ScalarFilter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            byte_size: ByteSize::default(),
            file_offset: 0,
            digest: DigestKind::default(),
            locking: true,
            autoflush: true,
            autobless: false,
            read_only: false,
            root: CollKind::Map,
            max_buckets: 16,
            fanout: 256,
            audit_file: None,
            audit_sink: None,
            filter_store_key: None,
            filter_store_value: None,
            filter_fetch_key: None,
            filter_fetch_value: None,
        }
    }
}

impl Config {
    pub(crate) fn effective_autoflush(&self) -> bool {
        self.autoflush || self.locking
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("byte_size", &self.byte_size)
            .field("file_offset", &self.file_offset)
            .field("digest", &self.digest)
            .field("locking", &self.locking)
            .field("autoflush", &self.autoflush)
            .field("autobless", &self.autobless)
            .field("read_only", &self.read_only)
            .field("root", &self.root)
            .field("max_buckets", &self.max_buckets)
            .field("fanout", &self.fanout)
            .field("audit_file", &self.audit_file)
            .finish_non_exhaustive()
    }
}

/// The four filter hooks, detached from the rest of the config so the
/// engine can carry them around.
#[derive(Default)]
pub(crate) struct Filters {
    pub store_key: Option<ScalarFilter>,
    pub store_value: Option<ScalarFilter>,
    pub fetch_key: Option<ScalarFilter>,
    pub fetch_value: Option<ScalarFilter>,
}

impl Filters {
    pub(crate) fn from_config(config: &mut Config) -> Self {
        Self {
            store_key: config.filter_store_key.take(),
            store_value: config.filter_store_value.take(),
            fetch_key: config.filter_fetch_key.take(),
            fetch_value: config.filter_fetch_value.take(),
        }
    }

    pub(crate) fn apply(filter: &Option<ScalarFilter>, bytes: &[u8]) -> Vec<u8> {
        match filter {
            Some(f) => f(bytes),
            None => bytes.to_vec(),
        }
    }
}
