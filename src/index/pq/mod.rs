//! Product quantization
//!
//! Vectors are split into `Q` equal subspaces; each subspace gets its own
//! codebook of up to 256 centroids trained by mini-batch k-means, and every
//! vector is encoded as one byte per subspace. At query time a `Q x 256`
//! lookup table of query-to-centroid distances turns an approximate distance
//! into `Q` table lookups and additions.

pub mod kmeans;

pub use kmeans::KMeansMiniBatch;

use crate::distance::DistanceKind;
use crate::source::VectorSource;
use crate::{QuiverError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

/// Centroids per codebook. Codes are single bytes, so this is the ceiling;
/// tiny data sets train fewer.
pub const CODEBOOK_SIZE: usize = 256;

/// Upper bound on k-means passes per codebook.
pub const MAX_TRAIN_ITERATIONS: usize = 1000;

/// Default mini-batch size for codebook training.
pub const DEFAULT_TRAIN_BATCH: usize = 16;

pub struct ProductQuantizer {
    dimensions: usize,
    quantizer_count: usize,
    sub_dim: usize,
    k: usize,
    kind: DistanceKind,

    /// Flat `(quantizer, centroid, dim)` matrix: `Q * k * sub_dim` floats.
    centroids: Vec<f32>,
    /// One byte per quantizer per vector, contiguous per vector: `N * Q`.
    codes: Vec<u8>,
}

impl ProductQuantizer {
    /// Configure a quantizer. `pq_compression` is the compressed bytes per
    /// vector times `size_of::<f32>()`, i.e. the subvector byte width; it must
    /// split the vector into whole subspaces.
    pub fn new(dimensions: usize, pq_compression: usize, kind: DistanceKind) -> Result<Self> {
        if pq_compression == 0 || pq_compression % std::mem::size_of::<f32>() != 0 {
            return Err(QuiverError::Config(format!(
                "pq compression {pq_compression} must be a positive multiple of {}",
                std::mem::size_of::<f32>()
            )));
        }

        let sub_dim = pq_compression / std::mem::size_of::<f32>();
        if dimensions % sub_dim != 0 {
            return Err(QuiverError::Config(format!(
                "vector dimension {dimensions} is not divisible into {sub_dim}-wide subvectors"
            )));
        }

        let quantizer_count = dimensions / sub_dim;
        if quantizer_count < 1 {
            return Err(QuiverError::Config(
                "at least one quantizer is required".to_string(),
            ));
        }

        Ok(Self {
            dimensions,
            quantizer_count,
            sub_dim,
            k: 0,
            kind,
            centroids: Vec::new(),
            codes: Vec::new(),
        })
    }

    /// Rebuild a quantizer from persisted parts.
    pub fn from_parts(
        dimensions: usize,
        quantizer_count: usize,
        k: usize,
        kind: DistanceKind,
        centroids: Vec<f32>,
        codes: Vec<u8>,
    ) -> Result<Self> {
        if quantizer_count == 0 || dimensions % quantizer_count != 0 {
            return Err(QuiverError::Corruption(format!(
                "quantizer count {quantizer_count} does not divide dimension {dimensions}"
            )));
        }
        let sub_dim = dimensions / quantizer_count;
        if centroids.len() != quantizer_count * k * sub_dim {
            return Err(QuiverError::Corruption(format!(
                "centroid matrix has {} floats, expected {}",
                centroids.len(),
                quantizer_count * k * sub_dim
            )));
        }
        if codes.len() % quantizer_count != 0 {
            return Err(QuiverError::Corruption(format!(
                "code segment of {} bytes is not a multiple of {quantizer_count}",
                codes.len()
            )));
        }

        Ok(Self {
            dimensions,
            quantizer_count,
            sub_dim,
            k,
            kind,
            centroids,
            codes,
        })
    }

    /// Train every codebook and encode every vector of `source`. Codebooks
    /// train independently, one rayon task per subspace.
    pub fn build(&mut self, source: &dyn VectorSource, batch_size: usize, seed: u64) -> Result<()> {
        if source.dimensions() != self.dimensions {
            return Err(QuiverError::InvalidData(format!(
                "source dimension {} does not match quantizer dimension {}",
                source.dimensions(),
                self.dimensions
            )));
        }

        let sub_dim = self.sub_dim;
        let kind = self.kind;

        let trained: Result<Vec<KMeansMiniBatch>> = (0..self.quantizer_count)
            .into_par_iter()
            .map(|q| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(q as u64));
                let mut km =
                    KMeansMiniBatch::new(CODEBOOK_SIZE, q * sub_dim, sub_dim, source, &mut rng);
                let iterations =
                    km.train(source, kind, batch_size, MAX_TRAIN_ITERATIONS, &mut rng)?;
                debug!(quantizer = q, iterations, "codebook trained");
                Ok(km)
            })
            .collect();
        let trained = trained?;

        self.k = trained.iter().map(|km| km.k).max().unwrap_or(0);
        self.centroids = vec![0.0; self.quantizer_count * self.k * sub_dim];
        for (q, km) in trained.iter().enumerate() {
            let offset = q * self.k * sub_dim;
            self.centroids[offset..offset + km.k * sub_dim].copy_from_slice(&km.centroids);
        }

        self.encode(source);
        Ok(())
    }

    /// Encode every vector of `source` into the contiguous code segment.
    fn encode(&mut self, source: &dyn VectorSource) {
        let n = source.size();
        let mut codes = vec![0u8; n * self.quantizer_count];

        codes
            .par_chunks_mut(self.quantizer_count)
            .enumerate()
            .for_each(|(row, row_codes)| {
                let vector = source.vector(row);
                for q in 0..self.quantizer_count {
                    row_codes[q] = self.closest_centroid(q, vector) as u8;
                }
            });

        self.codes = codes;
    }

    /// Index of the centroid of quantizer `q` nearest to the matching
    /// subspace of `vector`.
    fn closest_centroid(&self, q: usize, vector: &[f32]) -> usize {
        let sub = &vector[q * self.sub_dim..(q + 1) * self.sub_dim];

        let mut min_distance = f32::MAX;
        let mut min_index = 0;
        for c in 0..self.k {
            let distance = self.kind.distance(self.centroid(q, c), sub);
            if distance < min_distance {
                min_distance = distance;
                min_index = c;
            }
        }
        min_index
    }

    /// Number of floats a query lookup table requires.
    #[inline]
    pub fn lookup_table_len(&self) -> usize {
        self.quantizer_count * CODEBOOK_SIZE
    }

    /// Fill `table` with the distance from every query subspace to every
    /// centroid. Rows are strided by [`CODEBOOK_SIZE`] regardless of the
    /// trained `k`, so code bytes index directly.
    pub fn build_lookup_table(&self, query: &[f32], table: &mut [f32]) {
        assert_eq!(table.len(), self.lookup_table_len());
        assert_eq!(query.len(), self.dimensions);

        for q in 0..self.quantizer_count {
            let query_sub = &query[q * self.sub_dim..(q + 1) * self.sub_dim];
            let row = q * CODEBOOK_SIZE;
            for c in 0..self.k {
                table[row + c] = self.kind.distance(self.centroid(q, c), query_sub);
            }
        }
    }

    /// Approximate distance of the encoded vector `index` to the query the
    /// table was built for.
    #[inline]
    pub fn pq_distance(&self, table: &[f32], index: u32) -> f32 {
        let base = index as usize * self.quantizer_count;
        let mut distance = 0.0f32;
        for q in 0..self.quantizer_count {
            let code = self.codes[base + q] as usize;
            distance += table[q * CODEBOOK_SIZE + code];
        }
        distance
    }

    /// Approximate distances of four encoded vectors at once, amortizing the
    /// table address arithmetic.
    pub fn pq_distance_batch4(
        &self,
        table: &[f32],
        indexes: [u32; 4],
        result: &mut [f32; 4],
    ) {
        let base: [usize; 4] = [
            indexes[0] as usize * self.quantizer_count,
            indexes[1] as usize * self.quantizer_count,
            indexes[2] as usize * self.quantizer_count,
            indexes[3] as usize * self.quantizer_count,
        ];

        let mut acc = [0.0f32; 4];
        for q in 0..self.quantizer_count {
            let row = q * CODEBOOK_SIZE;
            acc[0] += table[row + self.codes[base[0] + q] as usize];
            acc[1] += table[row + self.codes[base[1] + q] as usize];
            acc[2] += table[row + self.codes[base[2] + q] as usize];
            acc[3] += table[row + self.codes[base[3] + q] as usize];
        }
        *result = acc;
    }

    /// Reconstruct the encoded vector `index` from its centroids.
    pub fn decode_into(&self, index: u32, out: &mut [f32]) {
        assert_eq!(out.len(), self.dimensions);
        let base = index as usize * self.quantizer_count;
        for q in 0..self.quantizer_count {
            let code = self.codes[base + q] as usize;
            out[q * self.sub_dim..(q + 1) * self.sub_dim].copy_from_slice(self.centroid(q, code));
        }
    }

    #[inline]
    fn centroid(&self, q: usize, c: usize) -> &[f32] {
        let offset = (q * self.k + c) * self.sub_dim;
        &self.centroids[offset..offset + self.sub_dim]
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn quantizer_count(&self) -> usize {
        self.quantizer_count
    }

    #[inline]
    pub fn sub_dim(&self) -> usize {
        self.sub_dim
    }

    /// Trained centroids per codebook.
    #[inline]
    pub fn codebook_len(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn centroids_raw(&self) -> &[f32] {
        &self.centroids
    }

    #[inline]
    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    /// Encoded vector count.
    #[inline]
    pub fn encoded_count(&self) -> usize {
        if self.quantizer_count == 0 {
            0
        } else {
            self.codes.len() / self.quantizer_count
        }
    }
}
