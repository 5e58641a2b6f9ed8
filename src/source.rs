//! Vector input abstraction
//!
//! The index builder and the PQ trainer consume vectors through this trait.
//! Implementations may stream from disk; `read` returns a borrowed view that
//! is only valid until the next call, so callers copy when they need to keep
//! the data.

/// Read-only source of fixed-dimension `f32` vectors, addressed by a dense
/// index in `0..size()`.
pub trait VectorSource: Send + Sync {
    /// Number of vectors available.
    fn size(&self) -> usize;

    /// Dimension of every vector.
    fn dimensions(&self) -> usize;

    /// Borrow the vector at `index`. Panics if out of range.
    fn vector(&self, index: usize) -> &[f32];

    /// External identifier bytes for the vector at `index`. Stored in the
    /// on-disk sidecar so readers can map internal ids back to caller ids.
    fn id(&self, index: usize) -> &[u8];
}

/// In-memory vector source over a flat row-major buffer.
pub struct SliceVectorSource {
    vectors: Vec<f32>,
    ids: Vec<Vec<u8>>,
    dimensions: usize,
}

impl SliceVectorSource {
    /// Wrap a flat buffer of `count * dimensions` floats. External ids default
    /// to the little-endian bytes of the dense index.
    pub fn new(vectors: Vec<f32>, dimensions: usize) -> Self {
        assert!(dimensions > 0, "dimensions must be positive");
        assert_eq!(vectors.len() % dimensions, 0, "buffer is not a whole number of vectors");
        let count = vectors.len() / dimensions;
        let ids = (0..count as u32).map(|i| i.to_le_bytes().to_vec()).collect();
        Self { vectors, ids, dimensions }
    }

    /// Wrap a flat buffer with caller-provided external ids.
    pub fn with_ids(vectors: Vec<f32>, dimensions: usize, ids: Vec<Vec<u8>>) -> Self {
        let mut source = Self::new(vectors, dimensions);
        assert_eq!(ids.len(), source.size(), "one id per vector required");
        source.ids = ids;
        source
    }

    /// Build from a list of equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        assert!(!rows.is_empty(), "at least one vector required");
        let dimensions = rows[0].len();
        let mut flat = Vec::with_capacity(rows.len() * dimensions);
        for row in rows {
            assert_eq!(row.len(), dimensions, "all vectors must share one dimension");
            flat.extend_from_slice(row);
        }
        Self::new(flat, dimensions)
    }
}

impl VectorSource for SliceVectorSource {
    fn size(&self) -> usize {
        self.vectors.len() / self.dimensions
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vector(&self, index: usize) -> &[f32] {
        let start = index * self.dimensions;
        &self.vectors[start..start + self.dimensions]
    }

    fn id(&self, index: usize) -> &[u8] {
        &self.ids[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_source_basic() {
        let source = SliceVectorSource::new(vec![1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(source.size(), 2);
        assert_eq!(source.dimensions(), 2);
        assert_eq!(source.vector(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_default_ids_are_dense_indexes(){
        let source = SliceVectorSource::new(vec![0.0; 6], 3);
        assert_eq!(source.id(1), &1u32.to_le_bytes());
    }

    #[test]
    #[should_panic(expected = "whole number of vectors")]
    fn test_ragged_buffer_rejected() {
        SliceVectorSource::new(vec![1.0, 2.0, 3.0], 2);
    }
}
