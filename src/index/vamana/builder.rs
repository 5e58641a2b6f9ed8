//! Parallel Vamana graph construction
//!
//! The vertex id space is partitioned across one worker per core by
//! `vertex % workers`; a worker is the only mutator of the vertices it owns.
//! Workers walk their shard of a shuffled permutation, run a greedy search
//! plus prune for each owned vertex, and hand the resulting reverse edges
//! `(neighbour, vertex)` to the owner of `neighbour` through that worker's
//! inbox queue. A worker that has exhausted its shard declares itself done on
//! a shared counter but keeps draining its inbox; the build finishes when
//! every worker has declared done and every inbox has been observed empty
//! afterwards, which is what makes a late enqueue impossible.

use crate::index::pq::{ProductQuantizer, DEFAULT_TRAIN_BATCH};
use crate::index::vamana::config::IndexConfig;
use crate::index::vamana::disk::write_index;
use crate::index::vamana::graph::{BuildScratch, InMemoryGraph};
use crate::progress::{NoopProgressTracker, ProgressTracker};
use crate::source::VectorSource;
use crate::{QuiverError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::info;

/// Build a disk-resident index from `source` into `output_dir`.
///
/// The directory receives the page-packed graph file and its sidecars; open
/// it afterwards with [`crate::index::vamana::IndexReader`]. The graph is
/// immutable once written.
pub fn build_index(
    source: &dyn VectorSource,
    config: &IndexConfig,
    output_dir: &Path,
) -> Result<()> {
    build_index_with_tracker(source, config, output_dir, &NoopProgressTracker)
}

pub fn build_index_with_tracker(
    source: &dyn VectorSource,
    config: &IndexConfig,
    output_dir: &Path,
    tracker: &dyn ProgressTracker,
) -> Result<()> {
    let dimensions = source.dimensions();
    config.validate(dimensions)?;

    let size = source.size();
    if size == 0 {
        return Err(QuiverError::InvalidData(
            "cannot build an index over zero vectors".to_string(),
        ));
    }

    let mut rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    tracker.push_phase("pq-codes");
    let start = Instant::now();
    let mut quantizer = ProductQuantizer::new(dimensions, config.pq_compression, config.distance)?;
    quantizer.build(source, DEFAULT_TRAIN_BATCH, rng.gen())?;
    info!(elapsed = ?start.elapsed(), quantizers = quantizer.quantizer_count(), "PQ codes generated");
    tracker.pull_phase();

    tracker.push_phase("graph");
    let mut graph = InMemoryGraph::new(size, dimensions, config.max_degree, config.distance);
    for i in 0..size {
        graph.add_vector(source.vector(i));
    }
    graph.generate_random_edges(&mut rng);
    let medoid = graph.medoid();
    tracker.pull_phase();

    tracker.push_phase("prune");
    let start = Instant::now();
    prune_graph(&graph, medoid, config, &mut rng)?;
    info!(elapsed = ?start.elapsed(), vertices = size, "graph pruned");
    tracker.pull_phase();

    tracker.push_phase("flush");
    let start = Instant::now();
    write_index(output_dir, &graph, &quantizer, medoid, source)?;
    info!(elapsed = ?start.elapsed(), "index flushed");
    tracker.pull_phase();

    Ok(())
}

/// Reverse-edge work item: the owner of `.0` considers adding an edge to `.1`.
type NeighbourPair = (u32, u32);

fn prune_graph(
    graph: &InMemoryGraph,
    medoid: u32,
    config: &IndexConfig,
    rng: &mut StdRng,
) -> Result<()> {
    let size = graph.size();
    let workers = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .min(size);

    let mut permutation: Vec<u32> = (0..size as u32).collect();
    permutation.shuffle(rng);

    let mut shards: Vec<Vec<u32>> = (0..workers)
        .map(|_| Vec::with_capacity(size / workers + 1))
        .collect();
    for vertex in permutation {
        shards[vertex as usize % workers].push(vertex);
    }

    let inboxes: Vec<Mutex<VecDeque<NeighbourPair>>> =
        (0..workers).map(|_| Mutex::new(VecDeque::new())).collect();
    let completed = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for (worker, shard) in shards.into_iter().enumerate() {
            let inboxes = &inboxes;
            let completed = &completed;
            let failed = &failed;
            handles.push(scope.spawn(move || {
                let result = prune_worker(
                    graph, medoid, config, worker, workers, shard, inboxes, completed, failed,
                );
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                result
            }));
        }

        let mut outcome = Ok(());
        for handle in handles {
            let result = handle
                .join()
                .map_err(|_| QuiverError::Index("pruning worker panicked".to_string()))?;
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    })
}

#[allow(clippy::too_many_arguments)]
fn prune_worker(
    graph: &InMemoryGraph,
    medoid: u32,
    config: &IndexConfig,
    worker: usize,
    workers: usize,
    shard: Vec<u32>,
    inboxes: &[Mutex<VecDeque<NeighbourPair>>],
    completed: &AtomicUsize,
    failed: &AtomicBool,
) -> Result<()> {
    let mut scratch = BuildScratch::new(config.search_list_size);
    let mut neighbours = Vec::with_capacity(config.max_degree);
    let mut singleton: HashMap<u32, f32> = HashMap::with_capacity(1);

    let mut index = 0usize;
    let mut declared_done = false;

    loop {
        if failed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut pair = inboxes[worker].lock().pop_front();
        if pair.is_some() {
            while let Some((vertex, incoming)) = pair {
                debug_assert_eq!(vertex as usize % workers, worker);
                graph.fetch_neighbours(vertex, &mut neighbours);

                if !neighbours.contains(&incoming) {
                    if graph.neighbours_len(vertex) + 1 <= config.max_degree {
                        graph.acquire_vertex(vertex)?;
                        let appended = graph.append_neighbour(vertex, incoming);
                        graph.release_vertex(vertex)?;
                        appended?;
                    } else {
                        singleton.clear();
                        singleton.insert(incoming, f32::NAN);
                        graph.robust_prune(vertex, &mut singleton, config.alpha)?;
                    }
                }

                pair = inboxes[worker].lock().pop_front();
            }
        } else if completed.load(Ordering::SeqCst) == workers {
            break;
        }

        if index < shard.len() {
            let vertex = shard[index];
            graph.greedy_search_prune(medoid, vertex, config.alpha, &mut scratch)?;

            graph.fetch_neighbours(vertex, &mut neighbours);
            for &neighbour in &neighbours {
                inboxes[neighbour as usize % workers]
                    .lock()
                    .push_back((neighbour, vertex));
            }
            index += 1;
        } else if !declared_done {
            declared_done = true;
            completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    Ok(())
}
