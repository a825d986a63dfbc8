//! LeanVec: dimensionality-reducing front-end over an inner payload store.
//!
//! A `D x L` projection (learned by PCA on the medioid-centered data, or
//! supplied by the caller) maps vectors into an `L`-dimensional subspace
//! before they are handed to the inner representation (raw f32 or LVQ).
//! Queries are transformed once per search through the query projection,
//! which may differ from the data projection for out-of-distribution query
//! sets. Reranking against the full-dimensional vectors is optional and
//! carried by a retained full-precision payload.

use serde::{Deserialize, Serialize};

use crate::distance::{kernels, DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::pool::ThreadPool;
use crate::rng::XorShift64;
use crate::store::{DenseStore, GrowableData, LvqParameters, LvqStore, VectorData};

/// Caller-supplied projection matrices (`D` rows of `L` columns each).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanVecMatrices {
    /// Projection applied to stored vectors.
    pub data: Vec<Vec<f32>>,
    /// Projection applied to queries; defaults to the data projection.
    pub query: Option<Vec<Vec<f32>>>,
}

/// Parameters for [`LeanVecStore`] construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeanVecParameters {
    /// Reduced dimension `L` (must satisfy `0 < L <= D`).
    pub target_dim: usize,
    /// Subspace-iteration rounds for the PCA training pass.
    pub training_iterations: usize,
    /// Seed for sampling and subspace initialization.
    pub seed: u64,
    /// Retain a full-precision copy for post-search reranking.
    pub keep_full_precision: bool,
}

impl LeanVecParameters {
    /// Reasonable defaults for a given reduced dimension.
    #[must_use]
    pub const fn new(target_dim: usize) -> Self {
        Self {
            target_dim,
            training_iterations: 24,
            seed: 0xC0FF_EE11,
            keep_full_precision: true,
        }
    }
}

/// Upper bound on rows fed to the covariance accumulation.
const TRAINING_SAMPLE_CAP: usize = 16_384;

/// Dimensionality-reduced vector storage.
///
/// `Inner` stores the projected `L`-dimensional payload and supplies the
/// distance loops; this wrapper owns the projections and the optional
/// full-precision rerank payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanVecStore<Inner> {
    dim: usize,
    reduced_dim: usize,
    center: Vec<f32>,
    // Column-major `D x L`: column `l` occupies `[l * dim, (l + 1) * dim)`.
    data_projection: Vec<f32>,
    query_projection: Vec<f32>,
    inner: Inner,
    full: Option<DenseStore<f32>>,
}

/// Per-query state: the projected inner query plus the optional full-D
/// kernel for reranking.
pub struct LeanVecQuery<Q> {
    inner: Q,
    full: Option<QueryKernel>,
}

struct Trained {
    center: Vec<f32>,
    data_projection: Vec<f32>,
    query_projection: Vec<f32>,
    projected: DenseStore<f32>,
    full: Option<DenseStore<f32>>,
}

impl LeanVecStore<DenseStore<f32>> {
    /// Reduces a source store onto an f32 payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty source or a target
    /// dimension outside `(0, D]`, and [`Error::DimensionMismatch`] for
    /// ragged caller-supplied matrices.
    pub fn reduce<S: VectorData>(
        source: &S,
        params: LeanVecParameters,
        matrices: Option<&LeanVecMatrices>,
        pool: &ThreadPool,
    ) -> Result<Self> {
        let trained = train_and_project(source, params, matrices, pool)?;
        Ok(Self {
            dim: source.dimensions(),
            reduced_dim: params.target_dim,
            center: trained.center,
            data_projection: trained.data_projection,
            query_projection: trained.query_projection,
            inner: trained.projected,
            full: trained.full,
        })
    }
}

impl LeanVecStore<LvqStore> {
    /// Reduces a source store onto an LVQ-compressed payload.
    ///
    /// # Errors
    ///
    /// As [`LeanVecStore::reduce`], plus the LVQ compression errors.
    pub fn reduce_lvq<S: VectorData>(
        source: &S,
        params: LeanVecParameters,
        lvq: LvqParameters,
        matrices: Option<&LeanVecMatrices>,
        pool: &ThreadPool,
    ) -> Result<Self> {
        let trained = train_and_project(source, params, matrices, pool)?;
        let inner = LvqStore::compress(&trained.projected, pool, lvq, None)?;
        Ok(Self {
            dim: source.dimensions(),
            reduced_dim: params.target_dim,
            center: trained.center,
            data_projection: trained.data_projection,
            query_projection: trained.query_projection,
            inner,
            full: trained.full,
        })
    }
}

impl<Inner> LeanVecStore<Inner> {
    /// Reduced dimension `L`.
    #[must_use]
    pub const fn reduced_dimensions(&self) -> usize {
        self.reduced_dim
    }

    /// The inner payload store.
    #[must_use]
    pub const fn inner(&self) -> &Inner {
        &self.inner
    }

    /// Projects a full-dimensional vector through the given projection.
    fn project(&self, projection: &[f32], x: &[f32], out: &mut [f32]) {
        let mut centered = vec![0.0f32; self.dim];
        for (c, (&xv, &m)) in centered.iter_mut().zip(x.iter().zip(&self.center)) {
            *c = xv - m;
        }
        for (l, o) in out.iter_mut().enumerate() {
            *o = kernels::dot(&projection[l * self.dim..(l + 1) * self.dim], &centered);
        }
    }
}

impl<Inner: VectorData> VectorData for LeanVecStore<Inner> {
    type Query = LeanVecQuery<Inner::Query>;

    #[inline]
    fn size(&self) -> usize {
        self.inner.size()
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dim
    }

    #[inline]
    fn prefetch(&self, i: usize) {
        self.inner.prefetch(i);
    }

    fn reconstruct(&self, i: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dim);
        if let Some(full) = &self.full {
            full.reconstruct(i, out);
            return;
        }
        // Back-project: the projection is orthonormal, so `P y + center`
        // is the least-squares preimage.
        let mut reduced = vec![0.0f32; self.reduced_dim];
        self.inner.reconstruct(i, &mut reduced);
        out.copy_from_slice(&self.center);
        for (l, &y) in reduced.iter().enumerate() {
            let column = &self.data_projection[l * self.dim..(l + 1) * self.dim];
            for (o, &p) in out.iter_mut().zip(column) {
                *o += p * y;
            }
        }
    }

    fn make_query(&self, metric: DistanceMetric, query: &[f32]) -> Self::Query {
        let mut projected = vec![0.0f32; self.reduced_dim];
        self.project(&self.query_projection, query, &mut projected);
        LeanVecQuery {
            inner: self.inner.make_query(metric, &projected),
            full: self
                .full
                .as_ref()
                .map(|_| QueryKernel::fix(metric, query)),
        }
    }

    #[inline]
    fn query_distance(&self, query: &Self::Query, i: usize) -> f32 {
        self.inner.query_distance(&query.inner, i)
    }

    #[inline]
    fn two_phase(&self) -> bool {
        self.full.is_some() || self.inner.two_phase()
    }

    fn refine_distance(&self, query: &Self::Query, i: usize) -> f32 {
        match (&self.full, &query.full) {
            (Some(full), Some(kernel)) => full.query_distance(kernel, i),
            _ => self.inner.refine_distance(&query.inner, i),
        }
    }
}

/// Learns (or adopts) the projections and projects the source in parallel.
fn train_and_project<S: VectorData>(
    source: &S,
    params: LeanVecParameters,
    matrices: Option<&LeanVecMatrices>,
    pool: &ThreadPool,
) -> Result<Trained> {
    let n = source.size();
    let dim = source.dimensions();
    let reduced = params.target_dim;
    if n == 0 {
        return Err(Error::InvalidArgument("cannot reduce an empty store".into()));
    }
    if reduced == 0 || reduced > dim {
        return Err(Error::InvalidArgument(format!(
            "target dimension {reduced} must be in (0, {dim}]"
        )));
    }

    let center = find_center(source, pool);

    let (data_projection, query_projection) = match matrices {
        Some(m) => {
            let data = flatten_columns(&m.data, dim, reduced)?;
            let query = match &m.query {
                Some(q) => flatten_columns(q, dim, reduced)?,
                None => data.clone(),
            };
            (data, query)
        }
        None => {
            let projection = train_pca(source, &center, params, pool)?;
            (projection.clone(), projection)
        }
    };

    // Project the corpus in parallel, one contiguous range per worker.
    let parts = pool.parallel_map(n, |range, _tid| {
        let mut scratch = vec![0.0f32; dim];
        let mut centered = vec![0.0f32; dim];
        let mut rows = Vec::with_capacity(range.len() * reduced);
        for i in range {
            source.reconstruct(i, &mut scratch);
            for (c, (&x, &m)) in centered.iter_mut().zip(scratch.iter().zip(&center)) {
                *c = x - m;
            }
            for l in 0..reduced {
                rows.push(kernels::dot(
                    &data_projection[l * dim..(l + 1) * dim],
                    &centered,
                ));
            }
        }
        rows
    });

    let mut projected = DenseStore::<f32>::new(reduced)?;
    projected.resize(n);
    let mut next = 0usize;
    for part in parts {
        for row in part.chunks_exact(reduced) {
            projected.set(next, row)?;
            next += 1;
        }
    }

    let full = if params.keep_full_precision {
        let mut full = DenseStore::<f32>::new(dim)?;
        full.resize(n);
        let mut scratch = vec![0.0f32; dim];
        for i in 0..n {
            source.reconstruct(i, &mut scratch);
            full.set(i, &scratch)?;
        }
        Some(full)
    } else {
        None
    };

    Ok(Trained {
        center,
        data_projection,
        query_projection,
        projected,
        full,
    })
}

/// The medioid-style center: the stored vector nearest the dataset mean.
fn find_center<S: VectorData>(source: &S, pool: &ThreadPool) -> Vec<f32> {
    let n = source.size();
    let dim = source.dimensions();
    let partials = pool.parallel_map(n, |range, _tid| {
        let mut scratch = vec![0.0f32; dim];
        let mut sum = vec![0.0f64; dim];
        for i in range {
            source.reconstruct(i, &mut scratch);
            for (s, &x) in sum.iter_mut().zip(&scratch) {
                *s += f64::from(x);
            }
        }
        sum
    });
    let mut mean = vec![0.0f64; dim];
    for part in partials {
        for (m, p) in mean.iter_mut().zip(part) {
            *m += p;
        }
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let mean: Vec<f32> = mean.iter().map(|&m| (m / n as f64) as f32).collect();

    let candidates = pool.parallel_map(n, |range, _tid| {
        let mut scratch = vec![0.0f32; dim];
        let mut best = (0usize, f32::INFINITY);
        for i in range {
            source.reconstruct(i, &mut scratch);
            let d = kernels::l2_squared(&scratch, &mean);
            if d < best.1 {
                best = (i, d);
            }
        }
        best
    });
    let medioid = candidates
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i);
    source.reconstruct_to_vec(medioid)
}

/// Row-major `D x L` caller matrix to column-major flat storage.
fn flatten_columns(rows: &[Vec<f32>], dim: usize, reduced: usize) -> Result<Vec<f32>> {
    if rows.len() != dim {
        return Err(Error::dimensions(dim, rows.len()));
    }
    let mut flat = vec![0.0f32; dim * reduced];
    for (j, row) in rows.iter().enumerate() {
        if row.len() != reduced {
            return Err(Error::dimensions(reduced, row.len()));
        }
        for (l, &v) in row.iter().enumerate() {
            flat[l * dim + j] = v;
        }
    }
    Ok(flat)
}

/// Top-`L` principal directions by subspace iteration on the sample
/// covariance of the centered data.
fn train_pca<S: VectorData>(
    source: &S,
    center: &[f32],
    params: LeanVecParameters,
    pool: &ThreadPool,
) -> Result<Vec<f32>> {
    let n = source.size();
    let dim = source.dimensions();
    let reduced = params.target_dim;

    let mut rng = XorShift64::new(params.seed);
    let sample: Vec<usize> = if n > TRAINING_SAMPLE_CAP {
        rng.sample_indices(n, TRAINING_SAMPLE_CAP)
    } else {
        (0..n).collect()
    };

    // Sample covariance, accumulated per worker over sample slices.
    let parts = pool.parallel_map(sample.len(), |range, _tid| {
        let mut scratch = vec![0.0f32; dim];
        let mut cov = vec![0.0f64; dim * dim];
        for k in range {
            source.reconstruct(sample[k], &mut scratch);
            for (c, &m) in scratch.iter_mut().zip(center) {
                *c -= m;
            }
            for j in 0..dim {
                let xj = f64::from(scratch[j]);
                let row = &mut cov[j * dim..(j + 1) * dim];
                for (r, &x) in row.iter_mut().zip(&scratch) {
                    *r += xj * f64::from(x);
                }
            }
        }
        cov
    });
    let mut cov = vec![0.0f64; dim * dim];
    for part in parts {
        for (c, p) in cov.iter_mut().zip(part) {
            *c += p;
        }
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let cov: Vec<f32> = cov
        .iter()
        .map(|&c| (c / sample.len() as f64) as f32)
        .collect();

    // Orthogonal iteration: V <- orthonormalize(C V).
    let mut basis = vec![0.0f32; dim * reduced];
    for v in &mut basis {
        *v = rng.next_f32() - 0.5;
    }
    orthonormalize(&mut basis, dim, reduced, &mut rng);

    let mut next = vec![0.0f32; dim * reduced];
    for _ in 0..params.training_iterations.max(1) {
        for l in 0..reduced {
            let column = &basis[l * dim..(l + 1) * dim];
            let target = &mut next[l * dim..(l + 1) * dim];
            for (j, t) in target.iter_mut().enumerate() {
                *t = kernels::dot(&cov[j * dim..(j + 1) * dim], column);
            }
        }
        std::mem::swap(&mut basis, &mut next);
        orthonormalize(&mut basis, dim, reduced, &mut rng);
    }
    Ok(basis)
}

/// Modified Gram-Schmidt over column-major columns; degenerate columns are
/// re-randomized so the basis always has full rank.
fn orthonormalize(columns: &mut [f32], dim: usize, count: usize, rng: &mut XorShift64) {
    for l in 0..count {
        loop {
            for prev in 0..l {
                let (head, tail) = columns.split_at_mut(l * dim);
                let prev_col = &head[prev * dim..(prev + 1) * dim];
                let col = &mut tail[..dim];
                let proj = kernels::dot(prev_col, col);
                for (c, &p) in col.iter_mut().zip(prev_col) {
                    *c -= proj * p;
                }
            }
            let col = &mut columns[l * dim..(l + 1) * dim];
            let norm = kernels::sqnorm(col).sqrt();
            if norm > 1e-6 {
                for c in col.iter_mut() {
                    *c /= norm;
                }
                break;
            }
            for c in col.iter_mut() {
                *c = rng.next_f32() - 0.5;
            }
        }
    }
}
