//! QuiverDB Core
//!
//! Embedded database core pairing a disk-resident approximate-nearest-
//! neighbour vector index with an MVCC operation log.
//!
//! ## Architecture
//! - Index layer: Vamana graph built by parallel greedy-search + RobustPrune
//!   over per-vertex sequence locks, flushed to a page-packed read-only file
//! - Quantization: per-subspace codebooks trained by mini-batch k-means;
//!   queries run on lookup-table distance estimates with lazy precise
//!   re-ranking against the memory-mapped vectors
//! - Transaction layer: snapshot-isolated MVCC over a hash-indexed operation
//!   log, with write-conflict rollback and prefix-based garbage collection

pub mod distance;
pub mod index;
pub mod progress;
pub mod source;
pub mod txn;

mod error;

pub use error::{QuiverError, Result};

pub use distance::DistanceKind;
pub use index::vamana::{build_index, build_index_with_tracker, IndexConfig, IndexReader};
pub use index::ProductQuantizer;
pub use progress::{LoggingProgressTracker, NoopProgressTracker, ProgressTracker};
pub use source::{SliceVectorSource, VectorSource};
pub use txn::{MvccGarbageCollector, MvccStore, Transaction};
