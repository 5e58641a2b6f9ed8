//! Error types for the QuiverDB core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuiverError>;

#[derive(Error, Debug)]
pub enum QuiverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A broken internal invariant: acquiring an already-acquired vertex,
    /// releasing a free vertex, a GC snapshot behind the resolved prefix.
    /// Not recoverable by the caller.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// An MVCC commit observed a later snapshot on one of its records.
    /// The caller may retry the transaction.
    #[error("Write conflict: transaction snapshot {snapshot_id} is behind record max {max_seen}")]
    WriteConflict { snapshot_id: u64, max_seen: u64 },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Index error: {0}")]
    Index(String),
}
