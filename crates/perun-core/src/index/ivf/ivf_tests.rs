//! Tests for k-means clustering and the IVF indexes.

use crate::distance::DistanceMetric;
use crate::index::flat::FlatIndex;
use crate::index::ivf::{
    kmeans_clustering, DynamicIvfIndex, IvfBuildParameters, IvfIndex, IvfSearchParameters,
};
use crate::pool::ThreadPool;
use crate::store::{DenseStore, VectorData};

/// Four well-separated blobs of points in 6 dimensions.
fn blobs(per_blob: usize) -> Vec<Vec<f32>> {
    let centers = [
        [0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        [20.0, 20.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 20.0, 20.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 20.0, 20.0],
    ];
    let mut vectors = Vec::new();
    for (b, center) in centers.iter().enumerate() {
        for i in 0..per_blob {
            let jitter = |j: usize| (((b * 131 + i * 17 + j * 7) % 13) as f32 - 6.0) * 0.1;
            vectors.push((0..6).map(|j| center[j] + jitter(j)).collect());
        }
    }
    vectors
}

#[test]
fn test_kmeans_partitions_blobs() {
    let vectors = blobs(50);
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(4)
    };
    let clustering = kmeans_clustering(&params, &store, &ThreadPool::sequential(), false).unwrap();
    assert_eq!(clustering.num_centroids(), 4);

    // Every vector lands in exactly one posting list.
    let mut seen = vec![0usize; 200];
    for list in &clustering.clusters {
        for &i in list {
            seen[i as usize] += 1;
        }
    }
    assert!(seen.iter().all(|&c| c == 1));

    // All mass is assigned and the partition is not degenerate.
    let sizes: Vec<usize> = clustering.clusters.iter().map(Vec::len).collect();
    assert_eq!(sizes.iter().sum::<usize>(), 200);
    assert!(sizes.iter().filter(|&&s| s > 0).count() >= 2, "{sizes:?}");
}

#[test]
fn test_train_only_leaves_empty_postings() {
    let vectors = blobs(30);
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(4)
    };
    let clustering = kmeans_clustering(&params, &store, &ThreadPool::sequential(), true).unwrap();
    assert_eq!(clustering.clusters.len(), 4);
    assert!(clustering.clusters.iter().all(Vec::is_empty));
}

#[test]
fn test_too_few_points_rejected() {
    let vectors = blobs(1);
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let params = IvfBuildParameters::new(16);
    assert!(kmeans_clustering(&params, &store, &ThreadPool::sequential(), false).is_err());
}

fn build_static(vectors: &[Vec<f32>]) -> IvfIndex<DenseStore<f32>> {
    let store = DenseStore::from_vectors(vectors).unwrap();
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(4)
    };
    IvfIndex::build(&params, store, DistanceMetric::L2, &ThreadPool::sequential()).unwrap()
}

#[test]
fn test_probe_search_matches_flat_on_blobs() {
    let vectors = blobs(50);
    let index = build_static(&vectors);
    let flat = FlatIndex::new(
        DenseStore::<f32>::from_vectors(&vectors).unwrap(),
        DistanceMetric::L2,
    );
    let pool = ThreadPool::sequential();
    let params = IvfSearchParameters::new(2);
    for probe in [0usize, 60, 120, 180] {
        let truth = flat.search(&vectors[probe], 5, &pool).unwrap();
        let got = index.search_with(&vectors[probe], 5, params).unwrap();
        assert_eq!(got[0].id, truth[0].id, "rank-1 miss for {probe}");
    }
}

#[test]
fn test_search_requires_parameters() {
    let vectors = blobs(30);
    let index = build_static(&vectors);
    // No stored defaults: search() must refuse.
    assert!(index.search(&vectors[0], 3).is_err());
    let mut index = index;
    index.set_search_parameters(IvfSearchParameters::new(4));
    assert!(index.search(&vectors[0], 3).is_ok());
}

#[test]
fn test_more_probes_never_hurt_recall() {
    let vectors = blobs(50);
    let index = build_static(&vectors);
    let flat = FlatIndex::new(
        DenseStore::<f32>::from_vectors(&vectors).unwrap(),
        DistanceMetric::L2,
    );
    let pool = ThreadPool::sequential();
    let queries: Vec<Vec<f32>> = (0..20).map(|q| vectors[q * 9].clone()).collect();

    let mut recalls = Vec::new();
    for n_probes in [1usize, 2, 4] {
        let params = IvfSearchParameters::new(n_probes);
        let mut hits = 0usize;
        for query in &queries {
            let truth: Vec<u32> = flat
                .search(query, 10, &pool)
                .unwrap()
                .iter()
                .map(|n| n.id)
                .collect();
            let got = index.search_with(query, 10, params).unwrap();
            hits += got.iter().filter(|n| truth.contains(&n.id)).count();
        }
        recalls.push(hits);
    }
    assert!(recalls[0] <= recalls[1] && recalls[1] <= recalls[2], "{recalls:?}");
    assert_eq!(recalls[2], 200, "4 probes over 4 clusters must be exact");
}

#[test]
fn test_dynamic_ivf_lifecycle() {
    let vectors = blobs(40);
    let ids: Vec<u64> = (0..vectors.len() as u64).map(|i| i + 500).collect();
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(4)
    };
    let mut index = DynamicIvfIndex::build(
        &params,
        &vectors,
        &ids,
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();
    index.set_search_parameters(IvfSearchParameters::new(2));
    assert_eq!(index.size(), 160);

    // Lookup by content returns the matching external id.
    let results = index.search(&vectors[10], 1).unwrap();
    assert_eq!(results[0].0, ids[10]);

    // Delete and verify exclusion.
    let removed = index.delete_points(&ids[..10]);
    assert_eq!(removed, 10);
    assert_eq!(index.size(), 150);
    let results = index.search(&vectors[5], 3).unwrap();
    assert!(results.iter().all(|&(id, _)| !ids[..10].contains(&id)));

    // Re-add with slot reuse after compaction.
    index.compact_postings();
    assert_eq!(index.tombstone_count(), 0);
    index.add_points(&vectors[..10], &ids[..10], true).unwrap();
    assert_eq!(index.size(), 160);
    let results = index.search(&vectors[3], 1).unwrap();
    assert_eq!(results[0].0, ids[3]);
}

#[test]
fn test_dynamic_ivf_unknown_delete_is_noop() {
    let vectors = blobs(10);
    let ids: Vec<u64> = (0..vectors.len() as u64).collect();
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(2)
    };
    let mut index = DynamicIvfIndex::build(
        &params,
        &vectors,
        &ids,
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();
    assert_eq!(index.delete_points(&[99_999]), 0);
    assert_eq!(index.size(), 40);
}

#[test]
fn test_dynamic_state_round_trip() {
    let vectors = blobs(20);
    let ids: Vec<u64> = (0..vectors.len() as u64).collect();
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(4)
    };
    let mut index = DynamicIvfIndex::build(
        &params,
        &vectors,
        &ids,
        DistanceMetric::L2,
        &ThreadPool::sequential(),
    )
    .unwrap();
    index.set_search_parameters(IvfSearchParameters::new(2));

    let encoded = bincode::serialize(&index.to_state()).unwrap();
    let state: crate::index::ivf::DynamicIvfState = bincode::deserialize(&encoded).unwrap();
    let restored = DynamicIvfIndex::from_state(state).unwrap();
    assert_eq!(restored.size(), 80);
    let results = restored.search(&vectors[7], 1).unwrap();
    assert_eq!(results[0].0, ids[7]);
}
