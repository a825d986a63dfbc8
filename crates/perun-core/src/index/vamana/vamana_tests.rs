//! Tests for the static Vamana index.

use proptest::prelude::*;

use crate::distance::DistanceMetric;
use crate::index::vamana::{VamanaBuildParameters, VamanaIndex, VamanaSearchParameters};
use crate::pool::ThreadPool;
use crate::store::{DenseStore, VectorData};

/// Seven 4-dimensional points: point `i` is `[i, i, i, i]`.
fn ramp_store() -> DenseStore<f32> {
    let vectors: Vec<Vec<f32>> = (0..7).map(|i| vec![i as f32; 4]).collect();
    DenseStore::from_vectors(&vectors).unwrap()
}

fn ramp_index() -> VamanaIndex<DenseStore<f32>> {
    let params = VamanaBuildParameters::new(1.2, 16, 32);
    let mut index = VamanaIndex::build(
        params,
        ramp_store(),
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();
    index.set_search_parameters(VamanaSearchParameters::new(32));
    index
}

#[test]
fn test_knn_on_ramp_data() {
    let index = ramp_index();
    let results = index.search(&[3.25; 4], 3).unwrap();
    let ids: Vec<u32> = results.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![3, 4, 2]);
}

#[test]
fn test_second_ramp_query() {
    let index = ramp_index();
    let results = index.search(&[2.25; 4], 5).unwrap();
    let ids: Vec<u32> = results.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![2, 3, 1, 4, 0]);
}

#[test]
fn test_batch_iterator_growing_batches() {
    let index = ramp_index();
    let mut iterator = index.batch_iterator(&[3.25; 4]).unwrap();
    assert_eq!(iterator.size(), 0);
    assert_eq!(iterator.batch_number(), 0);

    iterator.next(3).unwrap();
    assert_eq!(iterator.batch_number(), 1);
    assert!(!iterator.done());
    let ids: Vec<u32> = iterator.results().iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![3, 4, 2]);

    iterator.next(2).unwrap();
    assert_eq!(iterator.batch_number(), 2);
    assert!(!iterator.done());
    let ids: Vec<u32> = iterator.results().iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![5, 1]);

    iterator.next(3).unwrap();
    assert_eq!(iterator.batch_number(), 3);
    assert!(iterator.done());
    let ids: Vec<u32> = iterator.results().iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![6, 0]);

    iterator.next(3).unwrap();
    assert!(iterator.done());
    assert_eq!(iterator.size(), 0);
}

#[test]
fn test_range_search_on_ramp() {
    let index = ramp_index();
    // Squared L2 radius of 2.0 around [3.25]: points 3 (0.25 -> 0.25) and
    // 4 (0.75^2 * 4 = 2.25 is outside); check the cut is respected.
    let results = index.range_search(&[3.25; 4], 2.0).unwrap();
    assert!(!results.is_empty());
    for n in &results {
        assert!(n.distance <= 2.0);
    }
    assert_eq!(results[0].id, 3);
}

#[test]
fn test_range_search_rejects_bad_radius() {
    let index = ramp_index();
    assert!(index.range_search(&[1.0; 4], 0.0).is_err());
    assert!(index.range_search(&[1.0; 4], -3.0).is_err());
}

#[test]
fn test_self_recall() {
    let vectors: Vec<Vec<f32>> = (0..200)
        .map(|i| {
            (0..8)
                .map(|j| (((i * 37 + j * 11) % 101) as f32).mul_add(0.13, (i % 7) as f32))
                .collect()
        })
        .collect();
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let index = VamanaIndex::build(
        VamanaBuildParameters::new(1.2, 24, 64),
        store,
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();
    for (i, v) in vectors.iter().enumerate() {
        let results = index.search(v, 1).unwrap();
        assert_eq!(results[0].id as usize, i, "self-recall failed for {i}");
    }
}

#[test]
fn test_degree_bound_and_no_self_loops() {
    let index = ramp_index();
    let graph = index.graph();
    for v in 0..graph.len() as u32 {
        let neighbors = graph.neighbors(v);
        assert!(neighbors.len() <= graph.max_degree());
        assert!(neighbors.iter().all(|&w| w != v));
        assert!(neighbors.iter().all(|&w| (w as usize) < graph.len()));
    }
}

#[test]
fn test_k_validation() {
    let index = ramp_index();
    assert!(index.search(&[1.0; 4], 0).is_err());
    let over = index.search_parameters().total_capacity() + 1;
    assert!(index.search(&[1.0; 4], over).is_err());
}

#[test]
fn test_dimension_mismatch() {
    let index = ramp_index();
    assert!(index.search(&[1.0; 3], 1).is_err());
    assert!(index.batch_iterator(&[1.0; 5]).is_err());
}

#[test]
fn test_sentinel_padding_when_k_exceeds_corpus() {
    let index = ramp_index();
    let results = index.search(&[0.0; 4], 10).unwrap();
    assert_eq!(results.len(), 10);
    assert_eq!(results.iter().filter(|n| n.is_sentinel()).count(), 3);
}

#[test]
fn test_recall_grows_with_window() {
    let vectors: Vec<Vec<f32>> = (0..500)
        .map(|i| {
            (0..16)
                .map(|j| (((i * 53 + j * 29) % 257) as f32 / 257.0 - 0.5) * 8.0)
                .collect()
        })
        .collect();
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let index = VamanaIndex::build(
        VamanaBuildParameters::new(1.2, 16, 48),
        store,
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();

    let queries: Vec<Vec<f32>> = (0..20)
        .map(|q| (0..16).map(|j| ((q * 17 + j * 3) % 31) as f32 * 0.2 - 3.0).collect())
        .collect();

    let exact = crate::index::flat::FlatIndex::new(
        DenseStore::<f32>::from_vectors(&vectors).unwrap(),
        DistanceMetric::L2,
    );

    let mut recalls = Vec::new();
    for window in [10usize, 40, 160] {
        let params = VamanaSearchParameters::new(window);
        let mut hits = 0usize;
        for query in &queries {
            let truth: Vec<u32> = exact
                .search(query, 10, &ThreadPool::sequential())
                .unwrap()
                .iter()
                .map(|n| n.id)
                .collect();
            let got: Vec<u32> = index
                .search_with(query, 10, params)
                .unwrap()
                .iter()
                .map(|n| n.id)
                .collect();
            hits += got.iter().filter(|id| truth.contains(id)).count();
        }
        recalls.push(hits);
    }
    assert!(
        recalls[0] <= recalls[2],
        "recall must not degrade with a larger window: {recalls:?}"
    );
    assert!(recalls[2] >= 190, "recall@10 too low: {}/200", recalls[2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// RobustPrune invariant, checked through a built graph: for every
    /// vertex, no kept neighbor is dominated by an earlier kept neighbor
    /// under the alpha-relaxed triangle test at the time of the final
    /// prune. A weaker but testable corollary: adjacency lists never
    /// contain duplicates or self-loops and respect the degree bound.
    #[test]
    fn prop_built_graph_is_well_formed(seed in 0u64..1000) {
        let vectors: Vec<Vec<f32>> = (0..60)
            .map(|i| {
                (0..6)
                    .map(|j| (((i as u64 * 31 + j as u64 * 17 + seed) % 97) as f32) * 0.1)
                    .collect()
            })
            .collect();
        let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
        let index = VamanaIndex::build(
            VamanaBuildParameters::new(1.2, 8, 24),
            store,
            DistanceMetric::L2,
            &ThreadPool::sequential(),
        )
        .unwrap();
        let graph = index.graph();
        for v in 0..graph.len() as u32 {
            let neighbors = graph.neighbors(v);
            prop_assert!(neighbors.len() <= graph.max_degree());
            prop_assert!(neighbors.iter().all(|&w| w != v));
            let mut dedup = neighbors.clone();
            dedup.sort_unstable();
            dedup.dedup();
            prop_assert_eq!(dedup.len(), neighbors.len());
        }
    }
}
