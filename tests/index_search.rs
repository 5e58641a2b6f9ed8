//! End-to-end build and search: recall against brute force for both metrics.

use quiverdb::{build_index, DistanceKind, IndexConfig, IndexReader, SliceVectorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn unique_uniform_vectors(count: usize, dimensions: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut data = Vec::with_capacity(count * dimensions);
    for _ in 0..count * dimensions {
        data.push(10.0 * rng.gen::<f32>());
    }
    data
}

fn brute_force_top1(
    base: &SliceVectorSource,
    query: &[f32],
    kind: DistanceKind,
) -> u32 {
    use quiverdb::VectorSource;
    let mut best = 0u32;
    let mut best_distance = f32::MAX;
    for i in 0..base.size() {
        let distance = kind.distance(base.vector(i), query);
        if distance < best_distance {
            best_distance = distance;
            best = i as u32;
        }
    }
    best
}

#[test]
fn test_l2_recall_on_indexed_vectors() {
    let mut rng = StdRng::seed_from_u64(0x51F7);
    let count = 2_000;
    let dimensions = 32;

    let source = SliceVectorSource::new(
        unique_uniform_vectors(count, dimensions, &mut rng),
        dimensions,
    );

    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::new(32, 64, 1.2)
        .with_pq_compression(16)
        .with_seed(41);
    build_index(&source, &config, dir.path()).unwrap();

    let reader = IndexReader::open(dir.path(), 64).unwrap();
    assert_eq!(reader.vertex_count(), count);

    use quiverdb::VectorSource;
    let mut errors = 0usize;
    for i in 0..count {
        let result = reader.nearest(source.vector(i), 1).unwrap();
        assert_eq!(result.len(), 1, "query {i}");
        if result[0] != i as u32 {
            errors += 1;
        }
    }

    let error_percentage = errors as f64 * 100.0 / count as f64;
    assert!(
        error_percentage <= 5.0,
        "error percentage is too high: {error_percentage}"
    );

    let pq_error = reader.pq_error_avg();
    assert!(pq_error <= 15.0, "pq error is too high: {pq_error}");
}

#[test]
fn test_dot_recall_against_ground_truth() {
    let mut rng = StdRng::seed_from_u64(0xD07);
    let count = 1_000;
    let queries = 200;
    let dimensions = 32;

    let source = SliceVectorSource::new(
        unique_uniform_vectors(count, dimensions, &mut rng),
        dimensions,
    );
    let query_data = unique_uniform_vectors(queries, dimensions, &mut rng);

    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::new(32, 64, 1.2)
        .with_pq_compression(16)
        .with_distance(DistanceKind::Dot)
        .with_seed(43);
    build_index(&source, &config, dir.path()).unwrap();

    let reader = IndexReader::open(dir.path(), 64).unwrap();
    assert_eq!(reader.distance_kind(), DistanceKind::Dot);

    let mut errors = 0usize;
    for q in 0..queries {
        let query = &query_data[q * dimensions..(q + 1) * dimensions];
        let expected = brute_force_top1(&source, query, DistanceKind::Dot);
        let result = reader.nearest(query, 1).unwrap();
        if result[0] != expected {
            errors += 1;
        }
    }

    let error_percentage = errors as f64 * 100.0 / queries as f64;
    assert!(
        error_percentage <= 10.0,
        "error percentage is too high: {error_percentage}"
    );
}

#[test]
fn test_external_ids_survive_the_round_trip() {
    let mut rng = StdRng::seed_from_u64(7);
    let count = 100;
    let dimensions = 16;

    let ids: Vec<Vec<u8>> = (0..count)
        .map(|i| format!("doc-{i:04}").into_bytes())
        .collect();
    let source = SliceVectorSource::with_ids(
        unique_uniform_vectors(count, dimensions, &mut rng),
        dimensions,
        ids.clone(),
    );

    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::new(16, 32, 1.2)
        .with_pq_compression(16)
        .with_seed(3);
    build_index(&source, &config, dir.path()).unwrap();

    let reader = IndexReader::open(dir.path(), 32).unwrap();
    for i in 0..count as u32 {
        assert_eq!(reader.external_id(i), ids[i as usize].as_slice());
    }

    // A search result maps back to its external identifier.
    use quiverdb::VectorSource;
    let hit = reader.nearest(source.vector(42), 1).unwrap()[0];
    assert_eq!(reader.external_id(hit), b"doc-0042");
}
