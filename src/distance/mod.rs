//! Distance metrics for vector similarity computation
//!
//! Both metrics return values where smaller means closer: L2 stays squared and
//! the dot product is negated. The four-way batched variants compute one query
//! against four candidate rows at once; the graph search path groups
//! neighbours in quartets to hide memory latency.

pub mod dot;
pub mod l2;

pub use dot::{dot_distance, dot_distance_batch4};
pub use l2::{l2_distance, l2_distance_batch4};

use crate::{QuiverError, Result};
use serde::{Deserialize, Serialize};

/// Supported distance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Squared Euclidean distance.
    L2,
    /// Negated dot product.
    Dot,
}

impl DistanceKind {
    /// Compute distance between two vectors.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceKind::L2 => l2_distance(a, b),
            DistanceKind::Dot => dot_distance(a, b),
        }
    }

    /// Compute distances from one origin vector to four candidates at once.
    #[inline]
    pub fn distance_batch4(
        self,
        origin: &[f32],
        c1: &[f32],
        c2: &[f32],
        c3: &[f32],
        c4: &[f32],
        result: &mut [f32; 4],
    ) {
        match self {
            DistanceKind::L2 => l2_distance_batch4(origin, c1, c2, c3, c4, result),
            DistanceKind::Dot => dot_distance_batch4(origin, c1, c2, c3, c4, result),
        }
    }

    /// Single-byte code used in the on-disk index header.
    pub fn code(self) -> u8 {
        match self {
            DistanceKind::L2 => 0,
            DistanceKind::Dot => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DistanceKind::L2),
            1 => Ok(DistanceKind::Dot),
            other => Err(QuiverError::Corruption(format!(
                "unknown distance function code {other}"
            ))),
        }
    }
}

/// L2 norm of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for &item in v {
        sum += item * item;
    }
    sum.sqrt()
}

/// Scale `v` by `1 / norm` into `out`. A zero norm leaves `out` zeroed.
#[inline]
pub fn normalize(v: &[f32], norm: f32, out: &mut [f32]) {
    assert_eq!(v.len(), out.len(), "Vector dimensions must match");
    if norm == 0.0 {
        out.fill(0.0);
        return;
    }
    let inv = 1.0 / norm;
    for (o, &item) in out.iter_mut().zip(v.iter()) {
        *o = item * inv;
    }
}
