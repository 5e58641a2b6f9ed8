//! Vamana index configuration parameters

use crate::distance::DistanceKind;
use crate::{QuiverError, Result};
use serde::{Deserialize, Serialize};

/// Vamana index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum outgoing edges per vertex (M). Stored on disk as a single
    /// byte, so 255 is the hard ceiling.
    pub max_degree: usize,

    /// Candidate list size during search and construction (L).
    pub search_list_size: usize,

    /// Pruning distance multiplier (alpha). Rounds run at 1.0, 1.2, 1.44, ...
    /// up to this value.
    pub alpha: f32,

    /// Compressed bytes per product-quantized subvector, as a multiple of the
    /// float width. Determines the codebook count `Q = D / (pq_compression/4)`.
    pub pq_compression: usize,

    /// Distance metric used for construction and search.
    pub distance: DistanceKind,

    /// Fixed seed for edge seeding and codebook training. `None` seeds from
    /// the system.
    pub rng_seed: Option<u64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_degree: 64,
            search_list_size: 128,
            alpha: 1.2,
            pq_compression: 32,
            distance: DistanceKind::L2,
            rng_seed: None,
        }
    }
}

impl IndexConfig {
    /// Create a configuration with the given graph parameters, keeping the
    /// default quantization settings.
    pub fn new(max_degree: usize, search_list_size: usize, alpha: f32) -> Self {
        Self {
            max_degree,
            search_list_size,
            alpha,
            ..Self::default()
        }
    }

    pub fn with_distance(mut self, distance: DistanceKind) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_pq_compression(mut self, pq_compression: usize) -> Self {
        self.pq_compression = pq_compression;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate parameters that would otherwise fail deep inside the build.
    pub fn validate(&self, dimensions: usize) -> Result<()> {
        if self.max_degree == 0 || self.max_degree > u8::MAX as usize {
            return Err(QuiverError::Config(format!(
                "max_degree {} must be in 1..=255",
                self.max_degree
            )));
        }
        if self.search_list_size == 0 {
            return Err(QuiverError::Config(
                "search_list_size must be positive".to_string(),
            ));
        }
        if self.alpha < 1.0 {
            return Err(QuiverError::Config(format!(
                "alpha {} must be at least 1.0",
                self.alpha
            )));
        }
        // Surfaces the subvector divisibility errors at construction time.
        crate::index::pq::ProductQuantizer::new(dimensions, self.pq_compression, self.distance)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexConfig::default();
        assert_eq!(config.max_degree, 64);
        assert_eq!(config.search_list_size, 128);
        assert!((config.alpha - 1.2).abs() < 0.001);
        assert_eq!(config.pq_compression, 32);
        assert!(config.validate(128).is_ok());
    }

    #[test]
    fn test_degree_bounds() {
        let mut config = IndexConfig::default();
        config.max_degree = 0;
        assert!(config.validate(128).is_err());
        config.max_degree = 256;
        assert!(config.validate(128).is_err());
        config.max_degree = 255;
        assert!(config.validate(128).is_ok());
    }

    #[test]
    fn test_alpha_below_one_rejected() {
        let mut config = IndexConfig::default();
        config.alpha = 0.9;
        assert!(config.validate(128).is_err());
    }

    #[test]
    fn test_pq_compression_must_divide_dimension() {
        let config = IndexConfig::default();
        // 32-byte compression means 8-wide subvectors; 12 dims do not divide.
        assert!(config.validate(12).is_err());
        assert!(config.validate(64).is_ok());
    }
}
