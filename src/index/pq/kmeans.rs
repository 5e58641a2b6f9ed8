//! Mini-batch SGD k-means over one subspace
//!
//! Each product-quantization codebook is trained independently on the slice
//! `[sub_offset, sub_offset + sub_dim)` of every input vector. Cluster
//! centroids move by stochastic gradient steps with a per-cluster learning
//! rate of `1 / samples_seen(cluster)`, so early samples move a centroid far
//! and later ones refine it.

use crate::distance::DistanceKind;
use crate::source::VectorSource;
use crate::{QuiverError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Fraction of per-iteration reassignments below which training stops.
const CONVERGENCE_FRACTION: f64 = 0.001;

pub struct KMeansMiniBatch {
    /// Flat `k * sub_dim` centroid matrix.
    pub centroids: Vec<f32>,
    /// Effective cluster count; smaller than the requested `k` when the
    /// data set has fewer vectors.
    pub k: usize,

    sub_offset: usize,
    sub_dim: usize,

    /// Samples attributed to each cluster so far; drives the learning rate.
    counts: Vec<u32>,
    /// Last cluster assignment per vector, -1 before the first pass.
    assignments: Vec<i32>,
}

impl KMeansMiniBatch {
    /// Initialize centroids from the source according to its size:
    /// every vector when `n <= k`, a shuffled sample of `k` unique indexes
    /// when `n < 4k`, and uniform rejection sampling of `k` distinct indexes
    /// otherwise.
    pub fn new(
        k: usize,
        sub_offset: usize,
        sub_dim: usize,
        source: &dyn VectorSource,
        rng: &mut StdRng,
    ) -> Self {
        let n = source.size();

        let sub = |index: usize| -> &[f32] {
            &source.vector(index)[sub_offset..sub_offset + sub_dim]
        };

        let (k, centroids) = if n <= k {
            let mut centroids = Vec::with_capacity(n * sub_dim);
            for i in 0..n {
                centroids.extend_from_slice(sub(i));
            }
            (n, centroids)
        } else if n < 4 * k {
            let mut indexes: Vec<usize> = (0..n).collect();
            indexes.shuffle(rng);

            let mut centroids = Vec::with_capacity(k * sub_dim);
            for &index in indexes.iter().take(k) {
                centroids.extend_from_slice(sub(index));
            }
            (k, centroids)
        } else {
            let mut taken = vec![false; n];
            let mut centroids = Vec::with_capacity(k * sub_dim);
            for _ in 0..k {
                let mut index = rng.gen_range(0..n);
                while taken[index] {
                    index = rng.gen_range(0..n);
                }
                taken[index] = true;
                centroids.extend_from_slice(sub(index));
            }
            (k, centroids)
        };

        Self {
            centroids,
            k,
            sub_offset,
            sub_dim,
            counts: vec![0; k],
            assignments: vec![-1; n],
        }
    }

    /// Run up to `max_iterations` full passes in shuffled mini-batches of
    /// `batch_size`, stopping early once reassignments drop to 0.1% of the
    /// data set. Returns the number of iterations executed.
    ///
    /// `batch_size` must be a multiple of 4 so whole batches go through the
    /// four-way distance path; the trailing partial batch falls back to the
    /// scalar path.
    pub fn train(
        &mut self,
        source: &dyn VectorSource,
        kind: DistanceKind,
        batch_size: usize,
        max_iterations: usize,
        rng: &mut StdRng,
    ) -> Result<usize> {
        if batch_size == 0 || batch_size % 4 != 0 {
            return Err(QuiverError::Config(format!(
                "k-means batch size must be a positive multiple of 4, got {batch_size}"
            )));
        }

        let n = source.size();
        if n == 0 || self.k == 0 {
            return Ok(0);
        }

        let batches = (n + batch_size - 1) / batch_size;
        let mut batch_order: Vec<usize> = (0..batches).collect();

        let changed_limit = (n as f64 * CONVERGENCE_FRACTION) as usize;

        let mut cluster_indexes = vec![0usize; batch_size];
        let mut iterations_run = 0;

        for _ in 0..max_iterations {
            iterations_run += 1;
            batch_order.shuffle(rng);

            let mut changed = 0usize;
            for &batch in &batch_order {
                let from = batch * batch_size;
                let to = (from + batch_size).min(n);
                let actual = to - from;

                if actual % 4 == 0 {
                    self.assign_batch4(source, kind, from, actual, &mut cluster_indexes);
                } else {
                    for i in 0..actual {
                        let vector = source.vector(from + i);
                        cluster_indexes[i] = self.closest_centroid(kind, vector);
                    }
                }

                for i in 0..actual {
                    let cluster = cluster_indexes[i];
                    let prev = self.assignments[from + i];
                    self.assignments[from + i] = cluster as i32;
                    self.counts[cluster] += 1;

                    if prev != cluster as i32 {
                        changed += 1;
                        if prev >= 0 {
                            self.counts[prev as usize] -= 1;
                        }
                    }

                    let learning_rate = 1.0 / self.counts[cluster] as f32;
                    self.gradient_step(cluster, source.vector(from + i), learning_rate);
                }
            }

            if changed <= changed_limit {
                break;
            }
        }

        Ok(iterations_run)
    }

    /// Index of the centroid nearest to the subspace slice of `vector`.
    pub fn closest_centroid(&self, kind: DistanceKind, vector: &[f32]) -> usize {
        let sub = &vector[self.sub_offset..self.sub_offset + self.sub_dim];

        let mut min_distance = f32::MAX;
        let mut min_index = 0;
        for c in 0..self.k {
            let centroid = self.centroid(c);
            let distance = kind.distance(centroid, sub);
            if distance < min_distance {
                min_distance = distance;
                min_index = c;
            }
        }
        min_index
    }

    /// Assign `actual` vectors starting at `from` to their nearest centroids,
    /// four vectors per step through the batched distance path.
    fn assign_batch4(
        &self,
        source: &dyn VectorSource,
        kind: DistanceKind,
        from: usize,
        actual: usize,
        cluster_indexes: &mut [usize],
    ) {
        let mut distances = [0.0f32; 4];

        for i in (0..actual).step_by(4) {
            let subs: [&[f32]; 4] = [
                &source.vector(from + i)[self.sub_offset..self.sub_offset + self.sub_dim],
                &source.vector(from + i + 1)[self.sub_offset..self.sub_offset + self.sub_dim],
                &source.vector(from + i + 2)[self.sub_offset..self.sub_offset + self.sub_dim],
                &source.vector(from + i + 3)[self.sub_offset..self.sub_offset + self.sub_dim],
            ];

            let mut min_distances = [f32::MAX; 4];
            let mut min_indexes = [0usize; 4];

            for c in 0..self.k {
                let centroid = self.centroid(c);
                kind.distance_batch4(centroid, subs[0], subs[1], subs[2], subs[3], &mut distances);

                for lane in 0..4 {
                    if distances[lane] < min_distances[lane] {
                        min_distances[lane] = distances[lane];
                        min_indexes[lane] = c;
                    }
                }
            }

            cluster_indexes[i..i + 4].copy_from_slice(&min_indexes);
        }
    }

    fn gradient_step(&mut self, cluster: usize, vector: &[f32], learning_rate: f32) {
        let centroid = &mut self.centroids[cluster * self.sub_dim..(cluster + 1) * self.sub_dim];
        let sub = &vector[self.sub_offset..self.sub_offset + self.sub_dim];
        for (c, &x) in centroid.iter_mut().zip(sub.iter()) {
            *c += learning_rate * (x - *c);
        }
    }

    #[inline]
    pub fn centroid(&self, index: usize) -> &[f32] {
        &self.centroids[index * self.sub_dim..(index + 1) * self.sub_dim]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceVectorSource;
    use rand::SeedableRng;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    /// Two well separated blobs on the first two dimensions.
    fn two_blob_source(per_blob: usize) -> SliceVectorSource {
        let mut r = rng(7);
        let mut rows = Vec::new();
        for _ in 0..per_blob {
            rows.push(vec![r.gen_range(-0.1..0.1), r.gen_range(-0.1..0.1f32)]);
        }
        for _ in 0..per_blob {
            rows.push(vec![10.0 + r.gen_range(-0.1..0.1), 10.0 + r.gen_range(-0.1..0.1f32)]);
        }
        SliceVectorSource::from_rows(&rows)
    }

    #[test]
    fn test_init_uses_every_vector_when_small() {
        let source = SliceVectorSource::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        let km = KMeansMiniBatch::new(256, 0, 2, &source, &mut rng(1));
        assert_eq!(km.k, 2);
        assert_eq!(km.centroids, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_init_samples_distinct_centroids() {
        let rows: Vec<Vec<f32>> = (0..64).map(|i| vec![i as f32]).collect();
        let source = SliceVectorSource::from_rows(&rows);

        // 64 >= 4 * 8 exercises the rejection-sampling branch.
        let km = KMeansMiniBatch::new(8, 0, 1, &source, &mut rng(2));
        assert_eq!(km.k, 8);

        let mut seen: Vec<i64> = km.centroids.iter().map(|&c| c as i64).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 8, "sampled centroids must be distinct");
    }

    #[test]
    fn test_separated_clusters_converge() {
        let source = two_blob_source(100);
        let mut km = KMeansMiniBatch::new(2, 0, 2, &source, &mut rng(3));
        let iterations = km
            .train(&source, DistanceKind::L2, 16, 1000, &mut rng(4))
            .unwrap();
        assert!(iterations < 1000, "separated blobs must converge early");

        // One centroid lands near each blob.
        let c0 = km.centroid(0).to_vec();
        let c1 = km.centroid(1).to_vec();
        let near = |c: &[f32], x: f32| (c[0] - x).abs() < 1.0 && (c[1] - x).abs() < 1.0;
        assert!(
            (near(&c0, 0.0) && near(&c1, 10.0)) || (near(&c0, 10.0) && near(&c1, 0.0)),
            "centroids {:?} / {:?} did not split the blobs",
            c0,
            c1
        );
    }

    #[test]
    fn test_training_is_deterministic_under_fixed_seed() {
        let source = two_blob_source(50);

        let mut a = KMeansMiniBatch::new(4, 0, 2, &source, &mut rng(11));
        a.train(&source, DistanceKind::L2, 16, 100, &mut rng(12)).unwrap();

        let mut b = KMeansMiniBatch::new(4, 0, 2, &source, &mut rng(11));
        b.train(&source, DistanceKind::L2, 16, 100, &mut rng(12)).unwrap();

        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.assignments, b.assignments);
    }

    #[test]
    fn test_batch_size_must_be_multiple_of_four() {
        let source = two_blob_source(8);
        let mut km = KMeansMiniBatch::new(2, 0, 2, &source, &mut rng(5));
        let err = km.train(&source, DistanceKind::L2, 6, 10, &mut rng(6));
        assert!(matches!(err, Err(QuiverError::Config(_))));
    }

    #[test]
    fn test_subspace_offset_respected() {
        // Clusters only differ on the second dimension; train on that subspace.
        let rows: Vec<Vec<f32>> = (0..40)
            .map(|i| vec![0.5, if i % 2 == 0 { 0.0 } else { 100.0 }])
            .collect();
        let source = SliceVectorSource::from_rows(&rows);

        let mut km = KMeansMiniBatch::new(2, 1, 1, &source, &mut rng(8));
        km.train(&source, DistanceKind::L2, 16, 200, &mut rng(9)).unwrap();

        let mut centroids = km.centroids.clone();
        centroids.sort_by(|a, b| a.total_cmp(b));
        assert!(centroids[0] < 10.0);
        assert!(centroids[1] > 90.0);
    }
}
