//! Index implementations

pub mod pq;
pub mod vamana;

pub use pq::ProductQuantizer;
pub use vamana::{build_index, IndexConfig, IndexReader};
