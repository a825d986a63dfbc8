//! Minibatch k-means clustering for the inverted-file index.

use serde::{Deserialize, Serialize};

use crate::distance::kernels;
use crate::error::{Error, Result};
use crate::pool::ThreadPool;
use crate::rng::XorShift64;
use crate::store::VectorData;

/// A training set smaller than `num_centroids * MULTIPLIER` is topped up to
/// that size (capped by the corpus) regardless of `training_fraction`.
pub const MIN_TRAINING_SAMPLE_MULTIPLIER: usize = 50;

/// K-means build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvfBuildParameters {
    /// Number of clusters `C`.
    pub num_centroids: usize,
    /// Lloyd iterations over the training set.
    pub num_iterations: usize,
    /// Fraction of the corpus sampled for training.
    pub training_fraction: f64,
    /// Seed for sampling and centroid initialization.
    pub seed: u64,
    /// Rows per assignment minibatch.
    pub minibatch_size: usize,
}

impl IvfBuildParameters {
    /// Defaults tuned for corpora in the 10^5..10^7 range.
    #[must_use]
    pub const fn new(num_centroids: usize) -> Self {
        Self {
            num_centroids,
            num_iterations: 10,
            training_fraction: 0.1,
            seed: 0xC1A5_7E12,
            minibatch_size: 10_000,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.num_centroids == 0 {
            return Err(Error::InvalidArgument("num_centroids must be positive".into()));
        }
        if self.num_iterations == 0 {
            return Err(Error::InvalidArgument("num_iterations must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.training_fraction) {
            return Err(Error::InvalidArgument(format!(
                "training_fraction {} outside [0, 1]",
                self.training_fraction
            )));
        }
        if self.minibatch_size == 0 {
            return Err(Error::InvalidArgument("minibatch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Result of clustering: a centroid matrix and one posting list per
/// centroid (empty when trained with `train_only`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clustering {
    /// Logical dimension of each centroid.
    pub dim: usize,
    /// Row-major `C x dim` centroid matrix.
    pub centroids: Vec<f32>,
    /// Internal indices grouped by nearest centroid.
    pub clusters: Vec<Vec<u32>>,
}

impl Clustering {
    /// Number of centroids.
    #[must_use]
    pub fn num_centroids(&self) -> usize {
        self.centroids.len() / self.dim.max(1)
    }

    /// Row view of centroid `c`.
    #[must_use]
    pub fn centroid(&self, c: usize) -> &[f32] {
        &self.centroids[c * self.dim..(c + 1) * self.dim]
    }
}

/// Index of the nearest centroid under squared L2 with cached norms.
///
/// `d(x, c) = |x|^2 - 2 x . c + |c|^2`; the `|x|^2` term is constant per
/// row, so the argmin needs only the cross term and the centroid norms.
#[inline]
fn nearest_centroid(row: &[f32], centroids: &[f32], centroid_norms: &[f32], dim: usize) -> usize {
    let mut best = 0usize;
    let mut best_score = f32::INFINITY;
    for (c, &norm) in centroid_norms.iter().enumerate() {
        let cross = kernels::dot(row, &centroids[c * dim..(c + 1) * dim]);
        let score = (-2.0f32).mul_add(cross, norm);
        if score < best_score {
            best = c;
            best_score = score;
        }
    }
    best
}

/// Runs k-means over the source corpus.
///
/// With `train_only`, posting lists are left empty (the dynamic index fills
/// them itself as points arrive).
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for bad parameters or a corpus
/// smaller than the centroid count.
pub fn kmeans_clustering<D: VectorData>(
    params: &IvfBuildParameters,
    data: &D,
    pool: &ThreadPool,
    train_only: bool,
) -> Result<Clustering> {
    params.validate()?;
    let n = data.size();
    let dim = data.dimensions();
    let num_centroids = params.num_centroids;

    // Training-set size: at least `C * multiplier` (capped by the corpus),
    // or the requested fraction, whichever is larger.
    let min_training = (num_centroids * MIN_TRAINING_SAMPLE_MULTIPLIER).min(n);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let fraction_training = (n as f64 * params.training_fraction).ceil() as usize;
    let num_training = fraction_training.max(min_training).min(n);
    if num_training < num_centroids {
        return Err(Error::InvalidArgument(format!(
            "insufficient data for clustering: {n} datapoints, {num_centroids} centroids \
             required"
        )));
    }

    let mut rng = XorShift64::new(params.seed);
    let sample = rng.sample_indices(n, num_training);

    // Materialize the training rows once.
    let training = {
        let parts = pool.parallel_map(sample.len(), |range, _tid| {
            let mut scratch = vec![0.0f32; dim];
            let mut rows = Vec::with_capacity(range.len() * dim);
            for k in range {
                data.reconstruct(sample[k], &mut scratch);
                rows.extend_from_slice(&scratch);
            }
            rows
        });
        let mut training = Vec::with_capacity(sample.len() * dim);
        for part in parts {
            training.extend_from_slice(&part);
        }
        training
    };

    // Seeded init: random distinct training rows.
    let mut centroids = Vec::with_capacity(num_centroids * dim);
    for &row in rng.sample_indices(num_training, num_centroids).iter() {
        centroids.extend_from_slice(&training[row * dim..(row + 1) * dim]);
    }

    let mut assignments = vec![0usize; num_training];
    for iteration in 0..params.num_iterations {
        let centroid_norms: Vec<f32> = (0..num_centroids)
            .map(|c| kernels::sqnorm(&centroids[c * dim..(c + 1) * dim]))
            .collect();

        // Assignment in minibatches, each partitioned across the pool.
        let mut batch_start = 0usize;
        while batch_start < num_training {
            let batch_end = (batch_start + params.minibatch_size).min(num_training);
            let batch_assignments =
                pool.parallel_map(batch_end - batch_start, |range, _tid| {
                    range
                        .map(|offset| {
                            let row_idx = batch_start + offset;
                            let row = &training[row_idx * dim..(row_idx + 1) * dim];
                            nearest_centroid(row, &centroids, &centroid_norms, dim)
                        })
                        .collect::<Vec<usize>>()
                });
            let mut cursor = batch_start;
            for part in batch_assignments {
                for a in part {
                    assignments[cursor] = a;
                    cursor += 1;
                }
            }
            batch_start = batch_end;
        }

        // Recompute means.
        let mut sums = vec![0.0f64; num_centroids * dim];
        let mut counts = vec![0usize; num_centroids];
        for (row_idx, &c) in assignments.iter().enumerate() {
            counts[c] += 1;
            let row = &training[row_idx * dim..(row_idx + 1) * dim];
            let target = &mut sums[c * dim..(c + 1) * dim];
            for (t, &x) in target.iter_mut().zip(row) {
                *t += f64::from(x);
            }
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        for c in 0..num_centroids {
            if counts[c] == 0 {
                continue;
            }
            let target = &mut centroids[c * dim..(c + 1) * dim];
            let source = &sums[c * dim..(c + 1) * dim];
            for (t, &s) in target.iter_mut().zip(source) {
                *t = (s / counts[c] as f64) as f32;
            }
        }

        // Reseed empty clusters from the farthest assigned rows.
        let empty: Vec<usize> = (0..num_centroids).filter(|&c| counts[c] == 0).collect();
        if !empty.is_empty() {
            tracing::debug!(iteration, empty = empty.len(), "reseeding empty clusters");
            let mut by_distance: Vec<(usize, f32)> = assignments
                .iter()
                .enumerate()
                .map(|(row_idx, &c)| {
                    let row = &training[row_idx * dim..(row_idx + 1) * dim];
                    (
                        row_idx,
                        kernels::l2_squared(row, &centroids[c * dim..(c + 1) * dim]),
                    )
                })
                .collect();
            by_distance.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (slot, &c) in empty.iter().enumerate() {
                let (row_idx, _) = by_distance[slot.min(by_distance.len() - 1)];
                let row = training[row_idx * dim..(row_idx + 1) * dim].to_vec();
                centroids[c * dim..(c + 1) * dim].copy_from_slice(&row);
            }
        }
    }

    let mut clusters = vec![Vec::new(); num_centroids];
    if !train_only {
        let centroid_norms: Vec<f32> = (0..num_centroids)
            .map(|c| kernels::sqnorm(&centroids[c * dim..(c + 1) * dim]))
            .collect();
        let mut batch_start = 0usize;
        while batch_start < n {
            let batch_end = (batch_start + params.minibatch_size).min(n);
            let parts = pool.parallel_map(batch_end - batch_start, |range, _tid| {
                let mut scratch = vec![0.0f32; dim];
                range
                    .map(|offset| {
                        let i = batch_start + offset;
                        data.reconstruct(i, &mut scratch);
                        nearest_centroid(&scratch, &centroids, &centroid_norms, dim)
                    })
                    .collect::<Vec<usize>>()
            });
            let mut i = batch_start;
            for part in parts {
                for c in part {
                    #[allow(clippy::cast_possible_truncation)]
                    clusters[c].push(i as u32);
                    i += 1;
                }
            }
            batch_start = batch_end;
        }
    }

    Ok(Clustering {
        dim,
        centroids,
        clusters,
    })
}
