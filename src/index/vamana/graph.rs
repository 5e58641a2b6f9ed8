//! Mutable in-memory graph used during index construction
//!
//! Storage is two flat segments: a `capacity * dimensions` float buffer for
//! vector payloads and a `capacity * (max_degree + 1)` atomic-u32 buffer for
//! edges, where slot 0 of every vertex row holds the edge count.
//!
//! Each vertex is guarded by a 64-bit edge version: even means quiescent, odd
//! means exclusively owned. Writers bump the version to odd before mutating
//! and back to even after, so lock-free readers retry until two consecutive
//! reads observe the same even version.

use crate::distance::DistanceKind;
use crate::index::vamana::queue::CandidateQueue;
use crate::{QuiverError, Result};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

/// Candidate ordered by distance, ties by vertex index. `distance` is finite
/// by the time a candidate enters the ordered set.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PruneCandidate {
    index: u32,
    distance: f32,
}

impl Eq for PruneCandidate {}

impl PartialOrd for PruneCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PruneCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

/// Per-worker scratch state for greedy search during construction. Explicit
/// rather than thread-local so ownership is visible at the call sites.
pub struct BuildScratch {
    pub(crate) visited: HashSet<u32>,
    pub(crate) queue: CandidateQueue,
    neighbours: Vec<u32>,
    quartet: Vec<u32>,
}

impl BuildScratch {
    pub fn new(search_list_size: usize) -> Self {
        Self {
            visited: HashSet::with_capacity(8 * 1024),
            queue: CandidateQueue::new(search_list_size),
            neighbours: Vec::new(),
            quartet: Vec::with_capacity(4),
        }
    }
}

pub struct InMemoryGraph {
    dimensions: usize,
    max_degree: usize,
    kind: DistanceKind,
    capacity: usize,
    size: usize,

    /// Flat vector payloads, `capacity * dimensions`.
    vectors: Vec<f32>,
    /// Flat edge rows, `capacity * (max_degree + 1)`; slot 0 is the count.
    edges: Vec<AtomicU32>,
    edge_versions: Vec<AtomicU64>,

    medoid: RwLock<Option<u32>>,
}

impl InMemoryGraph {
    pub fn new(capacity: usize, dimensions: usize, max_degree: usize, kind: DistanceKind) -> Self {
        let edge_row = max_degree + 1;
        Self {
            dimensions,
            max_degree,
            kind,
            capacity,
            size: 0,
            vectors: vec![0.0; capacity * dimensions],
            edges: (0..capacity * edge_row).map(|_| AtomicU32::new(0)).collect(),
            edge_versions: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            medoid: RwLock::new(None),
        }
    }

    pub fn add_vector(&mut self, vector: &[f32]) {
        assert_eq!(vector.len(), self.dimensions, "vector dimension mismatch");
        assert!(self.size < self.capacity, "graph capacity exceeded");

        let offset = self.size * self.dimensions;
        self.vectors[offset..offset + self.dimensions].copy_from_slice(vector);
        self.size += 1;
        *self.medoid.write() = None;
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    #[inline]
    pub fn distance_kind(&self) -> DistanceKind {
        self.kind
    }

    #[inline]
    pub fn vector(&self, vertex: u32) -> &[f32] {
        let offset = vertex as usize * self.dimensions;
        &self.vectors[offset..offset + self.dimensions]
    }

    #[inline]
    fn edge_row(&self, vertex: u32) -> usize {
        vertex as usize * (self.max_degree + 1)
    }

    // --- per-vertex sequence lock -----------------------------------------

    /// Take exclusive ownership of a vertex's edge row. Vertices are owned by
    /// exactly one builder worker, so observing an odd version means a nested
    /// acquire, which is a programming error.
    pub fn acquire_vertex(&self, vertex: u32) -> Result<()> {
        let version_slot = &self.edge_versions[vertex as usize];
        loop {
            let version = version_slot.load(Ordering::Acquire);
            if version & 1 != 0 {
                return Err(QuiverError::Invariant(format!(
                    "vertex {vertex} is already acquired"
                )));
            }
            if version_slot
                .compare_exchange(version, version + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn release_vertex(&self, vertex: u32) -> Result<()> {
        let version_slot = &self.edge_versions[vertex as usize];
        loop {
            let version = version_slot.load(Ordering::Acquire);
            if version & 1 != 1 {
                return Err(QuiverError::Invariant(format!(
                    "vertex {vertex} is not acquired"
                )));
            }
            if version_slot
                .compare_exchange(version, version + 1, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn validate_locked(&self, vertex: u32) -> Result<()> {
        if self.edge_versions[vertex as usize].load(Ordering::Acquire) & 1 != 1 {
            return Err(QuiverError::Invariant(format!(
                "vertex {vertex} is not acquired"
            )));
        }
        Ok(())
    }

    // --- edge access -------------------------------------------------------

    /// Lock-free read of a vertex's edge count.
    pub fn neighbours_len(&self, vertex: u32) -> usize {
        let version_slot = &self.edge_versions[vertex as usize];
        let row = self.edge_row(vertex);
        loop {
            let version = version_slot.load(Ordering::Acquire);
            if version & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }

            let len = self.edges[row].load(Ordering::Relaxed) as usize;
            fence(Ordering::Acquire);

            if version_slot.load(Ordering::Relaxed) == version {
                debug_assert!(len <= self.max_degree);
                return len;
            }
        }
    }

    /// Lock-free snapshot of a vertex's edge list into `out`.
    pub fn fetch_neighbours(&self, vertex: u32, out: &mut Vec<u32>) {
        let version_slot = &self.edge_versions[vertex as usize];
        let row = self.edge_row(vertex);
        loop {
            let version = version_slot.load(Ordering::Acquire);
            if version & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }

            let len = self.edges[row].load(Ordering::Relaxed) as usize;
            out.clear();
            if len <= self.max_degree {
                for slot in 0..len {
                    out.push(self.edges[row + 1 + slot].load(Ordering::Relaxed));
                }
            }
            fence(Ordering::Acquire);

            if version_slot.load(Ordering::Relaxed) == version && len <= self.max_degree {
                return;
            }
        }
    }

    fn neighbours_len_locked(&self, vertex: u32) -> usize {
        self.edges[self.edge_row(vertex)].load(Ordering::Relaxed) as usize
    }

    fn read_neighbours_locked(&self, vertex: u32, out: &mut Vec<u32>) {
        let row = self.edge_row(vertex);
        let len = self.edges[row].load(Ordering::Relaxed) as usize;
        out.clear();
        for slot in 0..len {
            out.push(self.edges[row + 1 + slot].load(Ordering::Relaxed));
        }
    }

    /// Replace a vertex's edge list. Caller must hold the vertex.
    pub fn set_neighbours(&self, vertex: u32, neighbours: &[u32]) -> Result<()> {
        self.validate_locked(vertex)?;
        if neighbours.len() > self.max_degree {
            return Err(QuiverError::Invariant(format!(
                "vertex {vertex}: {} edges exceed the degree bound {}",
                neighbours.len(),
                self.max_degree
            )));
        }

        let row = self.edge_row(vertex);
        self.edges[row].store(neighbours.len() as u32, Ordering::Relaxed);
        for (slot, &neighbour) in neighbours.iter().enumerate() {
            self.edges[row + 1 + slot].store(neighbour, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Append one edge. Caller must hold the vertex and stay within the
    /// degree bound.
    pub fn append_neighbour(&self, vertex: u32, neighbour: u32) -> Result<()> {
        self.validate_locked(vertex)?;

        let row = self.edge_row(vertex);
        let len = self.edges[row].load(Ordering::Relaxed) as usize;
        if len + 1 > self.max_degree {
            return Err(QuiverError::Invariant(format!(
                "vertex {vertex} is full, cannot append an edge"
            )));
        }

        self.edges[row + 1 + len].store(neighbour, Ordering::Relaxed);
        self.edges[row].store(len as u32 + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Read and clear a vertex's edge list. Caller must hold the vertex.
    fn take_neighbours(&self, vertex: u32, out: &mut Vec<u32>) -> Result<()> {
        self.validate_locked(vertex)?;
        self.read_neighbours_locked(vertex, out);
        self.edges[self.edge_row(vertex)].store(0, Ordering::Relaxed);
        Ok(())
    }

    // --- seeding and medoid ------------------------------------------------

    /// Give every vertex `min(size - 1, max_degree)` distinct random
    /// neighbours, never itself. The first edge of every vertex comes from a
    /// fixed-point-free permutation, so every vertex is referenced by at
    /// least one edge list; the remaining slots are drawn from a reshuffled
    /// permutation walk.
    pub fn generate_random_edges(&mut self, rng: &mut StdRng) {
        let n = self.size;
        if n <= 1 {
            return;
        }

        let max_edges = (n - 1).min(self.max_degree);

        // A permutation with fixed points swapped away: position i never
        // holds i, and every index appears exactly once.
        let mut first_edges: Vec<u32> = (0..n as u32).collect();
        first_edges.shuffle(rng);
        for i in 0..n {
            if first_edges[i] == i as u32 {
                let j = (i + 1) % n;
                first_edges.swap(i, j);
            }
        }

        let mut shuffled: Vec<u32> = (0..n as u32).collect();
        shuffled.shuffle(rng);
        let mut shuffle_index = 0usize;

        let mut row_edges: Vec<u32> = Vec::with_capacity(max_edges);
        for vertex in 0..n as u32 {
            row_edges.clear();
            row_edges.push(first_edges[vertex as usize]);

            while row_edges.len() < max_edges {
                if shuffle_index == n {
                    shuffled.shuffle(rng);
                    shuffle_index = 0;
                }
                let candidate = shuffled[shuffle_index];
                shuffle_index += 1;

                if candidate == vertex || row_edges.contains(&candidate) {
                    continue;
                }
                row_edges.push(candidate);
            }

            let row = self.edge_row(vertex);
            self.edges[row].store(max_edges as u32, Ordering::Relaxed);
            for (slot, &neighbour) in row_edges.iter().enumerate() {
                self.edges[row + 1 + slot].store(neighbour, Ordering::Relaxed);
            }
        }
    }

    /// Vertex nearest to the component-wise mean of the data set. Cached
    /// after the first call.
    pub fn medoid(&self) -> u32 {
        if let Some(medoid) = *self.medoid.read() {
            return medoid;
        }

        let medoid = self.calculate_medoid();
        *self.medoid.write() = Some(medoid);
        medoid
    }

    fn calculate_medoid(&self) -> u32 {
        assert!(self.size > 0, "medoid of an empty graph");
        if self.size == 1 {
            return 0;
        }

        let mut mean = vec![0.0f32; self.dimensions];
        for vertex in 0..self.size as u32 {
            for (m, &item) in mean.iter_mut().zip(self.vector(vertex).iter()) {
                *m += item;
            }
        }
        for m in mean.iter_mut() {
            *m /= self.size as f32;
        }

        let mut min_distance = f32::MAX;
        let mut medoid = 0;
        for vertex in 0..self.size as u32 {
            let distance = self.kind.distance(self.vector(vertex), &mean);
            if distance < min_distance {
                min_distance = distance;
                medoid = vertex;
            }
        }
        medoid
    }

    // --- pruning -----------------------------------------------------------

    /// Re-select the edges of `vertex` from `candidates` (`NaN` distance
    /// means not yet computed). Existing edges join the candidate set, then
    /// the nearest candidate is taken repeatedly and candidates it dominates
    /// are dropped; rounds re-run with a growing distance multiplier up to
    /// `alpha` until the degree bound fills. The final list is written
    /// nearest-last, the order on-disk search expects.
    pub fn robust_prune(
        &self,
        vertex: u32,
        candidates: &mut HashMap<u32, f32>,
        alpha: f32,
    ) -> Result<()> {
        self.acquire_vertex(vertex)?;
        let result = self.robust_prune_locked(vertex, candidates, alpha);
        self.release_vertex(vertex)?;
        result
    }

    fn robust_prune_locked(
        &self,
        vertex: u32,
        candidates: &mut HashMap<u32, f32>,
        alpha: f32,
    ) -> Result<()> {
        candidates.remove(&vertex);

        if self.neighbours_len_locked(vertex) > 0 {
            let mut existing = Vec::new();
            self.take_neighbours(vertex, &mut existing)?;
            for neighbour in existing {
                if neighbour != vertex {
                    candidates.entry(neighbour).or_insert(f32::NAN);
                }
            }
        }

        let origin = self.vector(vertex);
        let mut cached: BTreeSet<PruneCandidate> = BTreeSet::new();

        // Fill in unknown distances, four at a time where possible.
        let mut to_calculate: Vec<u32> = Vec::with_capacity(4);
        let mut distances = [0.0f32; 4];
        for (&index, &distance) in candidates.iter() {
            if distance.is_nan() {
                to_calculate.push(index);
                if to_calculate.len() == 4 {
                    self.kind.distance_batch4(
                        origin,
                        self.vector(to_calculate[0]),
                        self.vector(to_calculate[1]),
                        self.vector(to_calculate[2]),
                        self.vector(to_calculate[3]),
                        &mut distances,
                    );
                    for lane in 0..4 {
                        cached.insert(PruneCandidate {
                            index: to_calculate[lane],
                            distance: distances[lane],
                        });
                    }
                    to_calculate.clear();
                }
            } else {
                cached.insert(PruneCandidate { index, distance });
            }
        }
        for &index in &to_calculate {
            cached.insert(PruneCandidate {
                index,
                distance: self.kind.distance(origin, self.vector(index)),
            });
        }

        let mut neighbours: Vec<u32> = Vec::with_capacity(self.max_degree);
        let mut compare_batch: Vec<PruneCandidate> = Vec::with_capacity(4);
        let mut dominated: Vec<PruneCandidate> = Vec::new();
        let mut removed: Vec<PruneCandidate> = Vec::new();

        let mut multiplier = 1.0f64;
        'rounds: while multiplier <= alpha as f64 {
            if !removed.is_empty() {
                cached.extend(removed.drain(..));
            }

            while let Some(nearest) = cached.pop_first() {
                neighbours.push(nearest.index);
                if neighbours.len() == self.max_degree {
                    break 'rounds;
                }

                let pivot = self.vector(nearest.index);
                for candidate in cached.iter() {
                    compare_batch.push(*candidate);
                    if compare_batch.len() == 4 {
                        self.kind.distance_batch4(
                            pivot,
                            self.vector(compare_batch[0].index),
                            self.vector(compare_batch[1].index),
                            self.vector(compare_batch[2].index),
                            self.vector(compare_batch[3].index),
                            &mut distances,
                        );
                        for lane in 0..4 {
                            if distances[lane] as f64 * multiplier
                                <= compare_batch[lane].distance as f64
                            {
                                dominated.push(compare_batch[lane]);
                            }
                        }
                        compare_batch.clear();
                    }
                }

                for candidate in compare_batch.drain(..) {
                    let distance = self.kind.distance(pivot, self.vector(candidate.index));
                    if distance as f64 * multiplier <= candidate.distance as f64 {
                        dominated.push(candidate);
                    }
                }

                for candidate in dominated.drain(..) {
                    cached.remove(&candidate);
                    removed.push(candidate);
                }
            }

            multiplier *= 1.2;
        }

        neighbours.reverse();
        self.set_neighbours(vertex, &neighbours)
    }

    /// Best-first search from `start` toward the vector of `target`,
    /// expanding at most the scratch queue's capacity, then prune `target`
    /// with every expanded vertex as a candidate.
    pub fn greedy_search_prune(
        &self,
        start: u32,
        target: u32,
        alpha: f32,
        scratch: &mut BuildScratch,
    ) -> Result<()> {
        scratch.visited.clear();
        scratch.queue.clear();
        scratch.quartet.clear();

        let mut checked: HashMap<u32, f32> =
            HashMap::with_capacity(2 * scratch.queue.capacity());

        let query = self.vector(target);
        scratch
            .queue
            .add(start, self.kind.distance(self.vector(start), query), false);
        scratch.visited.insert(start);

        let mut distances = [0.0f32; 4];

        while let Some(pos) = scratch.queue.next_not_checked() {
            let current = scratch.queue.vertex_index(pos);
            checked.insert(current, scratch.queue.vertex_distance(pos));

            self.fetch_neighbours(current, &mut scratch.neighbours);
            for slot in 0..scratch.neighbours.len() {
                let neighbour = scratch.neighbours[slot];
                if scratch.visited.insert(neighbour) {
                    scratch.quartet.push(neighbour);
                    if scratch.quartet.len() == 4 {
                        self.kind.distance_batch4(
                            query,
                            self.vector(scratch.quartet[0]),
                            self.vector(scratch.quartet[1]),
                            self.vector(scratch.quartet[2]),
                            self.vector(scratch.quartet[3]),
                            &mut distances,
                        );
                        for lane in 0..4 {
                            scratch.queue.add(scratch.quartet[lane], distances[lane], false);
                        }
                        scratch.quartet.clear();
                    }
                }
            }

            for slot in 0..scratch.quartet.len() {
                let neighbour = scratch.quartet[slot];
                scratch
                    .queue
                    .add(neighbour, self.kind.distance(query, self.vector(neighbour)), false);
            }
            scratch.quartet.clear();
        }

        self.robust_prune(target, &mut checked, alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn grid_graph(points: &[[f32; 2]], max_degree: usize) -> InMemoryGraph {
        let mut graph = InMemoryGraph::new(points.len(), 2, max_degree, DistanceKind::L2);
        for p in points {
            graph.add_vector(p);
        }
        graph
    }

    #[test]
    fn test_set_and_fetch_neighbours() {
        let graph = grid_graph(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]], 4);

        graph.acquire_vertex(0).unwrap();
        graph.set_neighbours(0, &[1, 2]).unwrap();
        graph.append_neighbour(0, 1).unwrap();
        graph.release_vertex(0).unwrap();

        let mut out = Vec::new();
        graph.fetch_neighbours(0, &mut out);
        assert_eq!(out, vec![1, 2, 1]);
        assert_eq!(graph.neighbours_len(0), 3);
    }

    #[test]
    fn test_mutation_requires_lock() {
        let graph = grid_graph(&[[0.0, 0.0], [1.0, 0.0]], 4);
        assert!(matches!(
            graph.set_neighbours(0, &[1]),
            Err(QuiverError::Invariant(_))
        ));
        assert!(matches!(
            graph.append_neighbour(0, 1),
            Err(QuiverError::Invariant(_))
        ));
    }

    #[test]
    fn test_nested_acquire_is_an_error() {
        let graph = grid_graph(&[[0.0, 0.0]], 4);
        graph.acquire_vertex(0).unwrap();
        assert!(matches!(
            graph.acquire_vertex(0),
            Err(QuiverError::Invariant(_))
        ));
        graph.release_vertex(0).unwrap();
        assert!(matches!(
            graph.release_vertex(0),
            Err(QuiverError::Invariant(_))
        ));
    }

    #[test]
    fn test_concurrent_readers_see_consistent_lists() {
        let graph = Arc::new(grid_graph(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]], 4));

        let writer = {
            let graph = Arc::clone(&graph);
            std::thread::spawn(move || {
                for round in 0..2000u32 {
                    graph.acquire_vertex(0).unwrap();
                    if round % 2 == 0 {
                        graph.set_neighbours(0, &[1, 2, 3]).unwrap();
                    } else {
                        graph.set_neighbours(0, &[3, 3]).unwrap();
                    }
                    graph.release_vertex(0).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let graph = Arc::clone(&graph);
                std::thread::spawn(move || {
                    let mut out = Vec::new();
                    for _ in 0..2000 {
                        graph.fetch_neighbours(0, &mut out);
                        assert!(
                            out.is_empty() || out == vec![1, 2, 3] || out == vec![3, 3],
                            "torn read: {:?}",
                            out
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_random_edges_degree_and_coverage() {
        let points: Vec<[f32; 2]> = (0..50).map(|i| [i as f32, 0.0]).collect();
        let mut graph = grid_graph(&points, 8);
        graph.generate_random_edges(&mut StdRng::seed_from_u64(3));

        let mut referenced = vec![false; 50];
        let mut out = Vec::new();
        for vertex in 0..50u32 {
            graph.fetch_neighbours(vertex, &mut out);
            assert_eq!(out.len(), 8);
            let mut distinct: Vec<u32> = out.clone();
            distinct.sort_unstable();
            distinct.dedup();
            assert_eq!(distinct.len(), out.len(), "duplicate edge on {vertex}");
            assert!(!out.contains(&vertex), "self edge on {vertex}");
            for &n in &out {
                referenced[n as usize] = true;
            }
        }
        assert!(referenced.iter().all(|&r| r), "unreferenced vertex after seeding");
    }

    #[test]
    fn test_random_edges_small_set() {
        let mut graph = grid_graph(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]], 8);
        graph.generate_random_edges(&mut StdRng::seed_from_u64(4));
        // Degree is capped by size - 1.
        for vertex in 0..3u32 {
            assert_eq!(graph.neighbours_len(vertex), 2);
        }
    }

    #[test]
    fn test_medoid_of_single_vertex() {
        let graph = grid_graph(&[[5.0, 5.0]], 4);
        assert_eq!(graph.medoid(), 0);
    }

    #[test]
    fn test_medoid_nearest_to_mean() {
        // Mean of the square corners is the centre; vertex 4 sits on it.
        let graph = grid_graph(
            &[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0], [5.0, 5.0]],
            4,
        );
        assert_eq!(graph.medoid(), 4);
    }

    #[test]
    fn test_robust_prune_respects_degree_bound_and_self_loops() {
        let points: Vec<[f32; 2]> = (0..20).map(|i| [i as f32, (i % 3) as f32]).collect();
        let graph = grid_graph(&points, 3);

        let mut candidates: HashMap<u32, f32> = (1..20).map(|i| (i as u32, f32::NAN)).collect();
        candidates.insert(0, f32::NAN); // self, must be ignored
        graph.robust_prune(0, &mut candidates, 1.2).unwrap();

        let mut out = Vec::new();
        graph.fetch_neighbours(0, &mut out);
        assert!(!out.is_empty());
        assert!(out.len() <= 3);
        assert!(!out.contains(&0));
    }

    #[test]
    fn test_robust_prune_drops_dominated_candidates() {
        // Colinear points: 1 is close to 0, and 2 sits right behind 1, so the
        // path through 1 dominates the direct edge to 2. Alpha 1.0 keeps the
        // pruning to a single round with no restore.
        let graph = grid_graph(&[[0.0, 0.0], [1.0, 0.0], [1.5, 0.0], [10.0, 0.0]], 2);

        let mut candidates: HashMap<u32, f32> =
            [(1, f32::NAN), (2, f32::NAN), (3, f32::NAN)].into_iter().map(|(k, v)| (k as u32, v)).collect();
        graph.robust_prune(0, &mut candidates, 1.0).unwrap();

        let mut out = Vec::new();
        graph.fetch_neighbours(0, &mut out);
        assert_eq!(out, vec![1], "only the pivot survives one round: {:?}", out);
    }

    #[test]
    fn test_robust_prune_stores_nearest_last() {
        let graph = grid_graph(&[[0.0, 0.0], [1.0, 0.0], [0.0, 2.0], [3.0, 3.0]], 4);

        let mut candidates: HashMap<u32, f32> =
            [(1u32, f32::NAN), (2, f32::NAN), (3, f32::NAN)].into_iter().collect();
        graph.robust_prune(0, &mut candidates, 1.0).unwrap();

        let mut out = Vec::new();
        graph.fetch_neighbours(0, &mut out);
        let last = *out.last().unwrap();
        assert_eq!(last, 1, "nearest neighbour must be stored last: {:?}", out);
    }

    #[test]
    fn test_robust_prune_unions_existing_edges() {
        let graph = grid_graph(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [50.0, 0.0]], 2);

        graph.acquire_vertex(0).unwrap();
        graph.set_neighbours(0, &[1]).unwrap();
        graph.release_vertex(0).unwrap();

        // Candidate set only names vertex 3; the existing edge to 1 must
        // still compete and win a slot.
        let mut candidates: HashMap<u32, f32> = [(3u32, f32::NAN)].into_iter().collect();
        graph.robust_prune(0, &mut candidates, 1.2).unwrap();

        let mut out = Vec::new();
        graph.fetch_neighbours(0, &mut out);
        assert!(out.contains(&1), "existing edge lost: {:?}", out);
    }

    #[test]
    fn test_greedy_search_prune_connects_target() {
        let points: Vec<[f32; 2]> = (0..30).map(|i| [(i % 6) as f32, (i / 6) as f32]).collect();
        let mut graph = grid_graph(&points, 6);
        graph.generate_random_edges(&mut StdRng::seed_from_u64(9));

        let medoid = graph.medoid();
        let mut scratch = BuildScratch::new(16);
        graph.greedy_search_prune(medoid, 17, 1.2, &mut scratch).unwrap();

        let mut out = Vec::new();
        graph.fetch_neighbours(17, &mut out);
        assert!(!out.is_empty());
        assert!(out.len() <= 6);
        assert!(!out.contains(&17));
    }
}
