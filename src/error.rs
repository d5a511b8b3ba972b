use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the index core. Store errors pass the backend's
/// message through verbatim; everything except an absent doclist (treated
/// as empty) unwinds to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory")]
    NoMemory,

    #[error("bad pattern: {0}")]
    BadPattern(String),

    #[error("no trigram filter could be derived and full match scans are forbidden")]
    NoPrefilter,

    #[error("corrupt doclist: {0}")]
    CorruptDoclist(&'static str),

    #[error("store error: {0}")]
    Store(String),

    #[error("type error: {0}")]
    TypeError(&'static str),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::NoMemory
    }
}
