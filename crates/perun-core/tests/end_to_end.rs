//! End-to-end scenarios through the manager façade.

use perun_core::index::ivf::{IvfBuildParameters, IvfSearchParameters};
use perun_core::index::vamana::{
    DynamicVamanaParameters, VamanaBuildParameters, VamanaSearchParameters,
};
use perun_core::manager::SENTINEL_EXTERNAL_ID;
use perun_core::recall::recall_k_at_k;
use perun_core::{
    BuildSpec, DistanceMetric, IndexManager, SearchParameters, StorageKind,
};

fn ramp_vectors() -> Vec<Vec<f32>> {
    (0..7).map(|i| vec![i as f32; 4]).collect()
}

fn clustered_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| {
            (0..dim)
                .map(|j| {
                    let blob = (i % 5) as f32 * 12.0;
                    blob + (((i * 31 + j * 11) % 23) as f32 / 23.0 - 0.5) * 2.0
                })
                .collect()
        })
        .collect()
}

fn vamana_manager(vectors: &[Vec<f32>]) -> IndexManager {
    let params = VamanaBuildParameters::new(1.2, 16, 32);
    let mut manager = IndexManager::build(
        &BuildSpec::Vamana(params, StorageKind::F32),
        vectors,
        None,
        DistanceMetric::L2,
        1,
    )
    .unwrap();
    manager
        .set_search_parameters(SearchParameters::Vamana(VamanaSearchParameters::new(32)))
        .unwrap();
    manager
}

#[test]
fn test_tiny_l2_build_and_search() {
    let manager = vamana_manager(&ramp_vectors());
    let results = manager.search(&[vec![3.25; 4]], 3).unwrap();
    assert_eq!(results.ids[0], vec![3, 4, 2]);

    let results = manager.search(&[vec![2.25; 4]], 5).unwrap();
    assert_eq!(results.ids[0], vec![2, 3, 1, 4, 0]);
}

#[test]
fn test_search_pads_with_sentinels() {
    let manager = vamana_manager(&ramp_vectors());
    let results = manager.search(&[vec![0.0; 4]], 9).unwrap();
    assert_eq!(results.ids[0].len(), 9);
    assert_eq!(
        results.ids[0]
            .iter()
            .filter(|&&id| id == SENTINEL_EXTERNAL_ID)
            .count(),
        2
    );
}

#[test]
fn test_persistence_round_trip_uncompressed() {
    let vectors = clustered_vectors(300, 12);
    let manager = vamana_manager(&vectors);
    let queries: Vec<Vec<f32>> = (0..100).map(|q| vectors[(q * 3) % 300].clone()).collect();
    let before = manager.search(&queries, 5).unwrap();

    let dir = tempfile::tempdir().unwrap();
    manager.save(dir.path()).unwrap();
    let restored = IndexManager::assemble(dir.path(), 1).unwrap();
    assert_eq!(restored.size(), 300);
    assert_eq!(restored.dimensions(), 12);

    let after = restored.search(&queries, 5).unwrap();
    // Identical (id, distance) tuples for uncompressed storage.
    assert_eq!(before, after);
}

#[test]
fn test_persistence_round_trip_compressed_keeps_recall() {
    let vectors = clustered_vectors(400, 16);
    let params = VamanaBuildParameters::new(1.2, 24, 64);
    let lvq = perun_core::store::LvqParameters::default();
    let mut manager = IndexManager::build(
        &BuildSpec::Vamana(params, StorageKind::Lvq(lvq)),
        &vectors,
        None,
        DistanceMetric::L2,
        1,
    )
    .unwrap();
    manager
        .set_search_parameters(SearchParameters::Vamana(VamanaSearchParameters::new(64)))
        .unwrap();

    let flat = IndexManager::build(&BuildSpec::Flat, &vectors, None, DistanceMetric::L2, 1)
        .unwrap();

    let queries: Vec<Vec<f32>> = (0..50).map(|q| vectors[q * 7].clone()).collect();
    let truth: Vec<Vec<u32>> = flat
        .search(&queries, 5)
        .unwrap()
        .ids
        .iter()
        .map(|row| row.iter().map(|&id| id as u32).collect())
        .collect();

    let recall_of = |manager: &IndexManager| {
        let got: Vec<Vec<u32>> = manager
            .search(&queries, 5)
            .unwrap()
            .ids
            .iter()
            .map(|row| row.iter().map(|&id| id as u32).collect())
            .collect();
        recall_k_at_k(&truth, &got, 5)
    };

    let before = recall_of(&manager);
    let dir = tempfile::tempdir().unwrap();
    manager.save(dir.path()).unwrap();
    let restored = IndexManager::assemble(dir.path(), 1).unwrap();
    let after = recall_of(&restored);

    assert!(before > 0.8, "compressed recall too low: {before}");
    assert!(after >= before - 0.001, "recall regressed: {before} -> {after}");
}

#[test]
fn test_stream_round_trip() {
    let manager = vamana_manager(&ramp_vectors());
    let mut stream = Vec::new();
    manager.save_stream(&mut stream).unwrap();

    let restored = IndexManager::load_stream(&mut stream.as_slice(), 1).unwrap();
    let results = restored.search(&[vec![3.25; 4]], 3).unwrap();
    assert_eq!(results.ids[0], vec![3, 4, 2]);
}

#[test]
fn test_dynamic_delete_consolidate_cycle() {
    let vectors = clustered_vectors(1000, 8);
    let ids: Vec<u64> = (0..1000u64).collect();
    let params = DynamicVamanaParameters::new(VamanaBuildParameters::new(1.2, 16, 48));
    let mut manager = IndexManager::build(
        &BuildSpec::DynamicVamana(params),
        &vectors,
        Some(&ids),
        DistanceMetric::L2,
        1,
    )
    .unwrap();
    manager
        .set_search_parameters(SearchParameters::Vamana(VamanaSearchParameters::new(64)))
        .unwrap();

    let doomed: Vec<u64> = (0..100u64).collect();
    let removed = manager.delete_points(&doomed).unwrap();
    assert_eq!(removed, 100);
    let live = manager.all_ids().unwrap();
    assert_eq!(live.len(), 900);
    assert!(live.iter().all(|&id| id >= 100));

    manager
        .add_points(&vectors[..100], &ids[..100], true)
        .unwrap();
    assert_eq!(manager.all_ids().unwrap().len(), 1000);

    // Every re-added vector is found at rank 1 by its own content.
    for probe in [0usize, 42, 99] {
        let results = manager.search(&[vectors[probe].clone()], 1).unwrap();
        assert_eq!(results.ids[0][0], ids[probe]);
    }

    manager.consolidate().unwrap();
    manager.compact(256).unwrap();
    assert_eq!(manager.size(), 1000);
}

#[test]
fn test_dynamic_persistence_round_trip() {
    let vectors = clustered_vectors(200, 8);
    let ids: Vec<u64> = (0..200u64).map(|i| i * 3 + 7).collect();
    let params = DynamicVamanaParameters::new(VamanaBuildParameters::new(1.2, 16, 48));
    let mut manager = IndexManager::build(
        &BuildSpec::DynamicVamana(params),
        &vectors,
        Some(&ids),
        DistanceMetric::L2,
        1,
    )
    .unwrap();
    manager.delete_points(&[7, 10]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    manager.save(dir.path()).unwrap();
    let restored = IndexManager::assemble(dir.path(), 1).unwrap();
    assert_eq!(restored.size(), 198);
    let results = restored.search(&[vectors[5].clone()], 1).unwrap();
    assert_eq!(results.ids[0][0], ids[5]);
}

#[test]
fn test_ivf_manager_flow() {
    let vectors = clustered_vectors(500, 10);
    let params = IvfBuildParameters {
        training_fraction: 1.0,
        ..IvfBuildParameters::new(5)
    };
    let mut manager = IndexManager::build(
        &BuildSpec::Ivf(params),
        &vectors,
        None,
        DistanceMetric::L2,
        2,
    )
    .unwrap();

    // n_probes has no default: searching before setting it must fail.
    assert!(manager.search(&[vectors[0].clone()], 3).is_err());
    manager
        .set_search_parameters(SearchParameters::Ivf(IvfSearchParameters::new(3)))
        .unwrap();

    let results = manager.search(&[vectors[123].clone()], 1).unwrap();
    assert_eq!(results.ids[0][0], 123);

    let dir = tempfile::tempdir().unwrap();
    manager.save(dir.path()).unwrap();
    let restored = IndexManager::assemble(dir.path(), 1).unwrap();
    let results = restored.search(&[vectors[123].clone()], 1).unwrap();
    assert_eq!(results.ids[0][0], 123);
}

#[test]
fn test_parameter_family_mismatch_rejected() {
    let manager = vamana_manager(&ramp_vectors());
    let mut manager = manager;
    let err = manager.set_search_parameters(SearchParameters::Ivf(IvfSearchParameters::new(2)));
    assert!(err.is_err());
}

#[test]
fn test_mutation_on_static_index_not_implemented() {
    let mut manager = vamana_manager(&ramp_vectors());
    assert!(manager.add_points(&[vec![0.0; 4]], &[1], false).is_err());
    assert!(manager.delete_points(&[1]).is_err());
    assert!(manager.consolidate().is_err());
    assert!(manager.compact(8).is_err());
}

#[test]
fn test_range_search_through_manager() {
    let manager = vamana_manager(&ramp_vectors());
    let rows = manager.range_search(&[vec![3.25; 4]], 3.0).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].iter().all(|n| n.distance <= 3.0));
    assert_eq!(rows[0][0].id, 3);
}

#[test]
fn test_recall_on_random_queries() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(7);
    let vectors: Vec<Vec<f32>> = (0..600)
        .map(|_| (0..12).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();
    let queries: Vec<Vec<f32>> = (0..30)
        .map(|_| (0..12).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();

    let flat = IndexManager::build(&BuildSpec::Flat, &vectors, None, DistanceMetric::L2, 2)
        .unwrap();
    let params = VamanaBuildParameters::new(1.2, 32, 96);
    let mut vamana = IndexManager::build(
        &BuildSpec::Vamana(params, StorageKind::F32),
        &vectors,
        None,
        DistanceMetric::L2,
        2,
    )
    .unwrap();
    vamana
        .set_search_parameters(SearchParameters::Vamana(VamanaSearchParameters::new(96)))
        .unwrap();

    let truth: Vec<Vec<u32>> = flat
        .search(&queries, 10)
        .unwrap()
        .ids
        .iter()
        .map(|row| row.iter().map(|&id| id as u32).collect())
        .collect();
    let got: Vec<Vec<u32>> = vamana
        .search(&queries, 10)
        .unwrap()
        .ids
        .iter()
        .map(|row| row.iter().map(|&id| id as u32).collect())
        .collect();
    let recall = recall_k_at_k(&truth, &got, 10);
    assert!(recall >= 0.9, "recall@10 on random data too low: {recall}");
}

#[test]
fn test_inner_product_ordering_through_manager() {
    // Under IP, larger natural distances are better and must come first.
    let vectors = vec![
        vec![1.0f32, 0.0],
        vec![2.0, 0.0],
        vec![3.0, 0.0],
        vec![0.5, 0.5],
    ];
    let params = VamanaBuildParameters::new(0.95, 8, 16);
    let mut manager = IndexManager::build(
        &BuildSpec::Vamana(params, StorageKind::F32),
        &vectors,
        None,
        DistanceMetric::InnerProduct,
        1,
    )
    .unwrap();
    manager
        .set_search_parameters(SearchParameters::Vamana(VamanaSearchParameters::new(8)))
        .unwrap();
    let results = manager.search(&[vec![1.0, 0.0]], 3).unwrap();
    assert_eq!(results.ids[0][0], 2);
    assert!(results.distances[0][0] >= results.distances[0][1]);
}
