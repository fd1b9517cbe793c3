use md5::{Digest as _, Md5};
use xxhash_rust::xxh3::xxh3_128;

/// Width in bytes of every supported key digest.
pub const DIGEST_LEN: usize = 16;

/// Fixed-width digest used to route keys through the index cascade.
///
/// The digest is chosen at file creation time and must be supplied again on
/// every open; only its width is recorded in the file header. The engine
/// assumes the digest is injective over the set of live keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DigestKind {
    #[default]
    Md5,
    Xxh3,
}

impl DigestKind {
    pub fn width(&self) -> usize {
        DIGEST_LEN
    }

    pub(crate) fn digest(&self, key: &[u8]) -> Vec<u8> {
        match self {
            DigestKind::Md5 => Md5::digest(key).to_vec(),
            DigestKind::Xxh3 => xxh3_128(key).to_be_bytes().to_vec(),
        }
    }
}
