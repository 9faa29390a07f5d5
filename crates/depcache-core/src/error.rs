//! The single failure kind of the dependency cache.

use thiserror::Error;

/// Any I/O fault, malformed record or broken graph invariant.
///
/// There is no partial recovery: a caller that sees this error is expected to
/// wipe the persisted state and rebuild from scratch.
#[derive(Error, Debug)]
pub enum CacheCorrupted {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("cache manifest error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache format version mismatch in {file}: expected {expected}, found {found}")]
    VersionMismatch {
        file: String,
        expected: u32,
        found: u32,
    },

    #[error("cache invariant violated: {0}")]
    Invariant(String),
}

impl CacheCorrupted {
    pub fn invariant(message: impl Into<String>) -> Self {
        CacheCorrupted::Invariant(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CacheCorrupted>;
