//! Tests for the dense and blocked stores.

use crate::distance::DistanceMetric;
use crate::store::{BlockedStore, DenseStore, GrowableData, VectorData};

fn sample_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| (0..dim).map(|j| (i * dim + j) as f32 * 0.25).collect())
        .collect()
}

#[test]
fn test_get_returns_logical_dimension() {
    let store = DenseStore::<f32>::from_vectors(&sample_vectors(5, 7)).unwrap();
    assert_eq!(store.size(), 5);
    assert_eq!(store.dimensions(), 7);
    for i in 0..5 {
        assert_eq!(store.get(i).len(), 7);
    }
}

#[test]
fn test_round_trip_f32() {
    let vectors = sample_vectors(4, 9);
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    for (i, v) in vectors.iter().enumerate() {
        assert_eq!(store.reconstruct_to_vec(i), *v);
    }
}

#[test]
fn test_f16_narrowing_is_close() {
    let vectors = sample_vectors(3, 11);
    let store = DenseStore::<half::f16>::from_vectors(&vectors).unwrap();
    for (i, v) in vectors.iter().enumerate() {
        let back = store.reconstruct_to_vec(i);
        for (a, b) in back.iter().zip(v) {
            assert!((a - b).abs() <= b.abs() * 1e-2 + 1e-2);
        }
    }
}

#[test]
fn test_query_distance_matches_metric() {
    let vectors = sample_vectors(6, 13);
    let store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let query = vec![0.5f32; 13];
    for metric in [
        DistanceMetric::L2,
        DistanceMetric::InnerProduct,
        DistanceMetric::Cosine,
    ] {
        let q = store.make_query(metric, &query);
        for (i, v) in vectors.iter().enumerate() {
            let expected = metric.ordered(&query, v);
            assert!(
                (store.query_distance(&q, i) - expected).abs() < 1e-4,
                "metric {metric:?} vector {i}"
            );
        }
    }
}

#[test]
fn test_set_rejects_wrong_dimension() {
    let mut store = DenseStore::<f32>::from_vectors(&sample_vectors(2, 4)).unwrap();
    assert!(store.set(0, &[1.0, 2.0]).is_err());
    assert!(store.set(9, &[0.0; 4]).is_err());
}

#[test]
fn test_resize_then_set() {
    let mut store = DenseStore::<f32>::new(4).unwrap();
    store.resize(3);
    store.set(2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(store.size(), 3);
    assert_eq!(store.get(2), &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_compact_keeps_selected_rows() {
    let vectors = sample_vectors(6, 3);
    let mut store = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    store.compact(&[1, 3, 5]);
    assert_eq!(store.size(), 3);
    assert_eq!(store.reconstruct_to_vec(0), vectors[1]);
    assert_eq!(store.reconstruct_to_vec(1), vectors[3]);
    assert_eq!(store.reconstruct_to_vec(2), vectors[5]);
}

#[test]
fn test_blocked_store_matches_dense() {
    let vectors = sample_vectors(10, 5);
    let dense = DenseStore::<f32>::from_vectors(&vectors).unwrap();
    let blocked = BlockedStore::<f32>::from_vectors(&vectors).unwrap();
    assert_eq!(blocked.size(), dense.size());
    for i in 0..vectors.len() {
        assert_eq!(blocked.reconstruct_to_vec(i), dense.reconstruct_to_vec(i));
    }
}

#[test]
fn test_blocked_store_growth_across_blocks() {
    let mut store = BlockedStore::<f32>::new(2).unwrap();
    let n = crate::store::blocked::BLOCK_SLOTS + 10;
    store.resize(n);
    assert_eq!(store.block_count(), 2);
    store.set(n - 1, &[7.0, 8.0]).unwrap();
    assert_eq!(store.get(n - 1), &[7.0, 8.0]);
}

#[test]
fn test_blocked_compact_across_blocks() {
    let mut store = BlockedStore::<f32>::new(2).unwrap();
    let n = crate::store::blocked::BLOCK_SLOTS + 4;
    store.resize(n);
    store.set(0, &[0.5, 0.5]).unwrap();
    store.set(n - 1, &[9.0, 9.5]).unwrap();
    #[allow(clippy::cast_possible_truncation)]
    store.compact(&[0, (n - 1) as u32]);
    assert_eq!(store.size(), 2);
    assert_eq!(store.block_count(), 1);
    assert_eq!(store.get(0), &[0.5, 0.5]);
    assert_eq!(store.get(1), &[9.0, 9.5]);
}

#[test]
fn test_empty_batch_rejected() {
    let empty: Vec<Vec<f32>> = Vec::new();
    assert!(DenseStore::<f32>::from_vectors(&empty).is_err());
    assert!(BlockedStore::<f32>::from_vectors(&empty).is_err());
}
