use std::fmt::Display;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dpdb: io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dpdb: file is not a dpdb database")]
    NotADb,

    #[error("dpdb: file holds a {found} at its root, requested a {requested}")]
    TypeMismatch {
        found: &'static str,
        requested: &'static str,
    },

    #[error("dpdb: corrupt file: {0}")]
    Corrupt(String),

    #[error("dpdb: database opened read-only")]
    Readonly,

    #[error("dpdb: unsupported value: {0}")]
    UnsupportedType(String),

    #[error("dpdb: collection is gone: {0}")]
    Deleted(String),

    #[error("dpdb: transaction id space exhausted")]
    TooManyTransactions,

    #[error("dpdb: already inside a transaction")]
    AlreadyInTransaction,

    #[error("dpdb: not inside a transaction")]
    NotInTransaction,

    #[error("dpdb: sequence index {0} out of bounds")]
    OutOfBounds(i64),

    #[error("dpdb: audit log error: {0}")]
    Audit(String),
}

impl Error {
    pub(crate) fn corrupt(text: impl Display) -> Self {
        Error::Corrupt(text.to_string())
    }

    pub(crate) fn unsupported(text: impl Display) -> Self {
        Error::UnsupportedType(text.to_string())
    }

    pub(crate) fn audit(text: impl Display) -> Self {
        Error::Audit(text.to_string())
    }
}
