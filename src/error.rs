use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for the engine. Every fallible operation surfaces one of
/// these rather than aborting; the underlying `std::io::Error` already
/// carries `errno` via `raw_os_error()`.
#[derive(Debug, Error)]
pub enum TdbError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("exhausted: {0}")]
    Exhausted(String),

    #[error("corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl TdbError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TdbError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TdbError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TdbError>;
