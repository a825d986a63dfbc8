//! Tests for the dynamic Vamana index.

use crate::distance::DistanceMetric;
use crate::index::vamana::{
    DynamicVamanaParameters, DynamicVamanaIndex, VamanaBuildParameters, VamanaSearchParameters,
};
use crate::pool::ThreadPool;

fn corpus(n: usize, dim: usize) -> (Vec<Vec<f32>>, Vec<u64>) {
    let vectors = (0..n)
        .map(|i| {
            (0..dim)
                .map(|j| (((i * 41 + j * 13) % 127) as f32 / 127.0 - 0.5) * 10.0)
                .collect()
        })
        .collect();
    let ids = (0..n as u64).map(|i| i + 1000).collect();
    (vectors, ids)
}

fn small_params() -> DynamicVamanaParameters {
    DynamicVamanaParameters::new(VamanaBuildParameters::new(1.2, 16, 48))
}

fn build_index(n: usize) -> DynamicVamanaIndex {
    let (vectors, ids) = corpus(n, 8);
    let mut index = DynamicVamanaIndex::build(
        small_params(),
        &vectors,
        &ids,
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();
    index.set_search_parameters(VamanaSearchParameters::new(64));
    index
}

#[test]
fn test_build_and_search_by_external_id() {
    let index = build_index(120);
    let (vectors, ids) = corpus(120, 8);
    for probe in [0usize, 17, 63, 119] {
        let results = index.search(&vectors[probe], 1).unwrap();
        assert_eq!(results[0].0, ids[probe], "rank-1 miss for point {probe}");
    }
}

#[test]
fn test_delete_then_search_excludes_tombstones() {
    let mut index = build_index(100);
    let (vectors, _ids) = corpus(100, 8);
    let pool = ThreadPool::sequential();

    let removed = index.delete_points(&[1000, 1001, 1002], &pool).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(index.size(), 97);
    assert_eq!(index.tombstone_count(), 3);

    // The deleted points must never surface.
    for probe in 0..3 {
        let results = index.search(&vectors[probe], 5).unwrap();
        for (id, _) in results {
            assert!(!(1000..1003).contains(&id), "tombstoned id {id} returned");
        }
    }
}

#[test]
fn test_delete_unknown_ids_is_noop() {
    let mut index = build_index(50);
    let pool = ThreadPool::sequential();
    let removed = index.delete_points(&[999_999, 888_888], &pool).unwrap();
    assert_eq!(removed, 0);
    assert_eq!(index.size(), 50);
    let removed = index.delete_points(&[], &pool).unwrap();
    assert_eq!(removed, 0);
}

#[test]
fn test_consolidate_is_idempotent() {
    let mut index = build_index(150);
    let pool = ThreadPool::sequential();
    let doomed: Vec<u64> = (1000..1030).collect();
    index.delete_points(&doomed, &pool).unwrap();

    index.consolidate(&pool).unwrap();
    let snapshot = index.to_state().graph.adjacency;

    index.consolidate(&pool).unwrap();
    let again = index.to_state().graph.adjacency;
    assert_eq!(snapshot, again);
}

#[test]
fn test_compact_renumbers_and_clears_tombstones() {
    let mut index = build_index(100);
    let pool = ThreadPool::sequential();
    let doomed: Vec<u64> = (1000..1020).collect();
    index.delete_points(&doomed, &pool).unwrap();
    index.consolidate(&pool).unwrap();
    index.compact(64).unwrap();

    assert_eq!(index.size(), 80);
    assert_eq!(index.capacity(), 80);
    assert_eq!(index.tombstone_count(), 0);
    let ids = index.all_ids();
    assert_eq!(ids.len(), 80);
    assert!(ids.iter().all(|&id| id >= 1020));

    // Compacting again with no tombstones changes nothing.
    let before = index.to_state().graph.adjacency;
    index.compact(64).unwrap();
    assert_eq!(index.to_state().graph.adjacency, before);
}

#[test]
fn test_delete_readd_cycle_restores_index() {
    let mut index = build_index(1000);
    let (vectors, ids) = corpus(1000, 8);
    let pool = ThreadPool::sequential();

    let doomed: Vec<u64> = ids[..100].to_vec();
    let removed = index.delete_points(&doomed, &pool).unwrap();
    assert_eq!(removed, 100);
    let live = index.all_ids();
    assert_eq!(live.len(), 900);
    assert!(live.iter().all(|id| !doomed.contains(id)));

    index
        .add_points(&vectors[..100], &ids[..100], true)
        .unwrap();
    assert_eq!(index.all_ids().len(), 1000);

    for probe in [0usize, 13, 50, 99] {
        let results = index.search(&vectors[probe], 1).unwrap();
        assert_eq!(results[0].0, ids[probe], "re-added point {probe} not found");
    }

    index.consolidate(&pool).unwrap();
    index.compact(256).unwrap();
    assert_eq!(index.size(), 1000);
    assert_eq!(index.capacity(), 1000);
}

#[test]
fn test_add_duplicate_id_fails_but_keeps_prior_inserts() {
    let mut index = build_index(20);
    let fresh = vec![vec![50.0f32; 8], vec![51.0f32; 8]];
    // Second id collides with an existing point.
    let result = index.add_points(&fresh, &[7777, 1000], false);
    assert!(result.is_err());
    // The first vector was inserted before the failure.
    assert!(index.contains(7777));
    assert_eq!(index.size(), 21);
}

#[test]
fn test_auto_cleanup_after_heavy_deletion() {
    let mut index = build_index(200);
    let pool = ThreadPool::sequential();
    // Delete 60% of the corpus; the 0.5 threshold must trigger cleanup.
    let doomed: Vec<u64> = (1000..1120).collect();
    index.delete_points(&doomed, &pool).unwrap();
    assert_eq!(index.tombstone_count(), 0, "auto compaction did not run");
    assert_eq!(index.capacity(), 80);
    assert_eq!(index.size(), 80);
}

#[test]
fn test_state_round_trip() {
    let index = build_index(60);
    let state = index.to_state();
    let encoded = bincode::serialize(&state).unwrap();
    let decoded: crate::index::vamana::DynamicVamanaState =
        bincode::deserialize(&encoded).unwrap();
    let restored = DynamicVamanaIndex::from_state(decoded).unwrap();
    assert_eq!(restored.size(), 60);

    let (vectors, ids) = corpus(60, 8);
    let results = restored.search(&vectors[10], 1).unwrap();
    assert_eq!(results[0].0, ids[10]);
}

#[test]
fn test_search_on_empty_index_errors() {
    let mut index = build_index(5);
    let pool = ThreadPool::sequential();
    let all: Vec<u64> = (1000..1005).collect();
    index.delete_points(&all, &pool).unwrap();
    let query = vec![0.0f32; 8];
    assert!(index.search(&query, 1).is_err());
}
