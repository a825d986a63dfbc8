//! Tests for the LVQ store.

use crate::distance::DistanceMetric;
use crate::pool::ThreadPool;
use crate::store::{DenseStore, LvqParameters, LvqStore, PackingStrategy, VectorData};

fn source(n: usize, dim: usize) -> DenseStore<f32> {
    let vectors: Vec<Vec<f32>> = (0..n)
        .map(|i| {
            (0..dim)
                .map(|j| ((i * 13 + j * 5) % 89) as f32 / 89.0 * 6.0 - 3.0 + i as f32 * 0.01)
                .collect()
        })
        .collect();
    DenseStore::from_vectors(&vectors).unwrap()
}

fn compress(src: &DenseStore<f32>, params: LvqParameters) -> LvqStore {
    LvqStore::compress(src, &ThreadPool::sequential(), params, None).unwrap()
}

#[test]
fn test_one_level_8bit_reconstruction() {
    let src = source(40, 20);
    let lvq = compress(&src, LvqParameters::default());
    assert_eq!(lvq.size(), 40);
    assert_eq!(lvq.dimensions(), 20);
    assert!(!lvq.two_phase());
    // Per-vector range here is about 6, so one 8-bit step is ~6/255.
    for i in 0..40 {
        let original = src.reconstruct_to_vec(i);
        let decoded = lvq.reconstruct_to_vec(i);
        for (o, d) in original.iter().zip(&decoded) {
            assert!((o - d).abs() < 0.03);
        }
    }
}

#[test]
fn test_4bit_is_coarser_but_bounded() {
    let src = source(25, 16);
    let lvq = compress(
        &src,
        LvqParameters {
            primary_bits: 4,
            residual_bits: 0,
            strategy: PackingStrategy::Sequential,
        },
    );
    for i in 0..25 {
        let original = src.reconstruct_to_vec(i);
        let decoded = lvq.reconstruct_to_vec(i);
        for (o, d) in original.iter().zip(&decoded) {
            assert!((o - d).abs() < 0.5);
        }
    }
}

#[test]
fn test_two_level_refines_primary() {
    let src = source(30, 16);
    let lvq = compress(
        &src,
        LvqParameters {
            primary_bits: 4,
            residual_bits: 8,
            strategy: PackingStrategy::Sequential,
        },
    );
    assert!(lvq.two_phase());
    let query: Vec<f32> = (0..16).map(|j| (j as f32 * 0.3).cos()).collect();
    let exact_q = src.make_query(DistanceMetric::L2, &query);
    let q = lvq.make_query(DistanceMetric::L2, &query);
    let mut primary_err = 0.0f64;
    let mut refined_err = 0.0f64;
    for i in 0..30 {
        let exact = f64::from(src.query_distance(&exact_q, i));
        primary_err += (f64::from(lvq.query_distance(&q, i)) - exact).abs();
        refined_err += (f64::from(lvq.refine_distance(&q, i)) - exact).abs();
    }
    assert!(
        refined_err < primary_err,
        "refined {refined_err} should beat primary {primary_err}"
    );
}

#[test]
fn test_turbo_layout_round_trips() {
    let src = source(12, 130);
    let turbo = LvqStore::compress(
        &src,
        &ThreadPool::sequential(),
        LvqParameters {
            primary_bits: 8,
            residual_bits: 0,
            strategy: PackingStrategy::Turbo,
        },
        None,
    )
    .unwrap();
    let sequential = compress(&src, LvqParameters::default());
    // Same codes, different layout: reconstructions must agree closely.
    for i in 0..12 {
        let a = turbo.reconstruct_to_vec(i);
        let b = sequential.reconstruct_to_vec(i);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}

#[test]
fn test_shared_centroids_and_selectors() {
    let src = source(40, 8);
    let centroids = vec![vec![-2.0f32; 8], vec![2.0f32; 8]];
    let lvq = LvqStore::compress(
        &src,
        &ThreadPool::sequential(),
        LvqParameters::default(),
        Some(&centroids),
    )
    .unwrap();
    assert_eq!(lvq.centroid_count(), 2);
    for i in 0..40 {
        let original = src.reconstruct_to_vec(i);
        let decoded = lvq.reconstruct_to_vec(i);
        for (o, d) in original.iter().zip(&decoded) {
            assert!((o - d).abs() < 0.05);
        }
    }
}

#[test]
fn test_query_distance_tracks_exact() {
    let src = source(50, 36);
    let lvq = compress(&src, LvqParameters::default());
    let query: Vec<f32> = (0..36).map(|j| (j as f32 * 0.17).sin() * 2.0).collect();
    for metric in [
        DistanceMetric::L2,
        DistanceMetric::InnerProduct,
        DistanceMetric::Cosine,
    ] {
        let exact_q = src.make_query(metric, &query);
        let approx_q = lvq.make_query(metric, &query);
        for i in 0..50 {
            let exact = src.query_distance(&exact_q, i);
            let approx = lvq.query_distance(&approx_q, i);
            assert!(
                (exact - approx).abs() < 0.5,
                "metric {metric:?}: exact {exact} vs approx {approx}"
            );
        }
    }
}

#[test]
fn test_invalid_bit_widths_rejected() {
    let src = source(5, 8);
    for (p, r) in [(3u8, 0u8), (8, 2), (16, 0)] {
        let result = LvqStore::compress(
            &src,
            &ThreadPool::sequential(),
            LvqParameters {
                primary_bits: p,
                residual_bits: r,
                strategy: PackingStrategy::Sequential,
            },
            None,
        );
        assert!(result.is_err(), "({p}, {r}) must be rejected");
    }
}

#[test]
fn test_parallel_compression_matches_sequential() {
    let src = source(300, 10);
    let params = LvqParameters {
        primary_bits: 4,
        residual_bits: 4,
        strategy: PackingStrategy::Sequential,
    };
    let seq = compress(&src, params);
    let par = LvqStore::compress(&src, &ThreadPool::new(4).unwrap(), params, None).unwrap();
    for i in 0..300 {
        assert_eq!(seq.reconstruct_to_vec(i), par.reconstruct_to_vec(i));
    }
}
