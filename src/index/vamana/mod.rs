//! Disk-resident Vamana vector index
//!
//! Build once with [`build_index`], then serve approximate nearest-neighbour
//! queries through [`IndexReader`]. Construction runs greedy search plus
//! RobustPrune in parallel over an in-memory graph; the reader works off the
//! page-packed on-disk layout with product-quantized distance estimates and
//! lazy precise re-ranking.

pub mod builder;
pub mod config;
pub mod disk;
pub mod graph;
pub mod queue;

pub use builder::{build_index, build_index_with_tracker};
pub use config::IndexConfig;
pub use disk::{IndexReader, SearchScratch};
pub use graph::{BuildScratch, InMemoryGraph};
pub use queue::CandidateQueue;
