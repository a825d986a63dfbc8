//! Locally-adaptive Vector Quantization (LVQ).
//!
//! Each vector stores a per-vector scale and bias, a selector into a shared
//! centroid matrix, and a packed block of low-bit codes. Element `j`
//! reconstructs as:
//!
//! ```text
//! value[j] = centroid[sel][j] + bias + scale * code[j]
//! ```
//!
//! A two-level dataset adds a residual code block sharing the primary's
//! centroid assignment and bias: graph traversal uses the cheap primary-only
//! distance, reranking refines with primary + residual.
//!
//! Codes are packed either `Sequential` (row order) or `Turbo` (permuted
//! into 16 lanes of 8 elements so lane-parallel loads decode several codes
//! per instruction). The packing is fixed when the dataset is compressed and
//! cannot change without rebuilding.

use serde::{Deserialize, Serialize};

use crate::distance::{kernels, DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::fallback::{check_simd_requirement, SimdClass};
use crate::pool::ThreadPool;
use crate::store::{fix_query, prefetch_slice, VectorData};

/// Code layout within a packed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackingStrategy {
    /// Codes tightly packed in row order.
    #[default]
    Sequential,
    /// Codes permuted into 16 lanes of 8 elements per 128-code block.
    Turbo,
}

const TURBO_LANES: usize = 16;
const TURBO_ELEMENTS_PER_LANE: usize = 8;
const TURBO_BLOCK: usize = TURBO_LANES * TURBO_ELEMENTS_PER_LANE;

/// Compression parameters for [`LvqStore::compress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvqParameters {
    /// Bits per primary code: 4 or 8.
    pub primary_bits: u8,
    /// Bits per residual code: 0 (one-level), 4 or 8.
    pub residual_bits: u8,
    /// Code packing layout.
    pub strategy: PackingStrategy,
}

impl Default for LvqParameters {
    fn default() -> Self {
        Self {
            primary_bits: 8,
            residual_bits: 0,
            strategy: PackingStrategy::Sequential,
        }
    }
}

impl LvqParameters {
    fn validate(&self) -> Result<()> {
        if !matches!(self.primary_bits, 4 | 8) {
            return Err(Error::InvalidArgument(format!(
                "primary_bits must be 4 or 8, got {}",
                self.primary_bits
            )));
        }
        if !matches!(self.residual_bits, 0 | 4 | 8) {
            return Err(Error::InvalidArgument(format!(
                "residual_bits must be 0, 4 or 8, got {}",
                self.residual_bits
            )));
        }
        Ok(())
    }
}

/// Position of logical code `j` within a packed code row.
#[inline]
const fn code_position(strategy: PackingStrategy, j: usize) -> usize {
    match strategy {
        PackingStrategy::Sequential => j,
        PackingStrategy::Turbo => {
            let block = j / TURBO_BLOCK;
            let r = j % TURBO_BLOCK;
            block * TURBO_BLOCK + (r % TURBO_LANES) * TURBO_ELEMENTS_PER_LANE + r / TURBO_LANES
        }
    }
}

/// Codes per row after layout padding.
#[inline]
const fn code_stride(strategy: PackingStrategy, dim: usize) -> usize {
    match strategy {
        PackingStrategy::Sequential => dim,
        PackingStrategy::Turbo => dim.next_multiple_of(TURBO_BLOCK),
    }
}

#[inline]
fn read_code(row: &[u8], pos: usize, bits: u8) -> u32 {
    if bits == 8 {
        u32::from(row[pos])
    } else {
        let byte = row[pos / 2];
        if pos % 2 == 0 {
            u32::from(byte & 0x0F)
        } else {
            u32::from(byte >> 4)
        }
    }
}

#[inline]
fn write_code(row: &mut [u8], pos: usize, bits: u8, code: u32) {
    if bits == 8 {
        row[pos] = code as u8;
    } else if pos % 2 == 0 {
        row[pos / 2] = (row[pos / 2] & 0xF0) | (code as u8 & 0x0F);
    } else {
        row[pos / 2] = (row[pos / 2] & 0x0F) | ((code as u8 & 0x0F) << 4);
    }
}

/// LVQ-compressed vector storage (one- or two-level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LvqStore {
    dim: usize,
    len: usize,
    primary_bits: u8,
    residual_bits: u8,
    strategy: PackingStrategy,
    ncentroids: usize,
    centroids: Vec<f32>,
    selectors: Vec<u16>,
    scales: Vec<f32>,
    biases: Vec<f32>,
    primary: Vec<u8>,
    residual: Vec<u8>,
    primary_row_bytes: usize,
    residual_row_bytes: usize,
}

struct EncodedRange {
    selectors: Vec<u16>,
    scales: Vec<f32>,
    biases: Vec<f32>,
    primary: Vec<u8>,
    residual: Vec<u8>,
}

impl LvqStore {
    /// Compresses a source store.
    ///
    /// `centroids` supplies a shared centroid matrix (e.g. from an outer
    /// clustering); when absent, the dataset mean is the single centroid.
    /// Compression scans per-dataset statistics, then encodes all vectors in
    /// parallel over the pool's partition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty source, bad bit
    /// widths or ragged centroids, and [`Error::UnsupportedHardware`] when
    /// the turbo layout is requested, the CPU lacks 256-bit lanes and the
    /// process-wide fallback mode is `Error`.
    pub fn compress<S: VectorData>(
        source: &S,
        pool: &ThreadPool,
        params: LvqParameters,
        centroids: Option<&[Vec<f32>]>,
    ) -> Result<Self> {
        params.validate()?;
        let n = source.size();
        let dim = source.dimensions();
        if n == 0 {
            return Err(Error::InvalidArgument(
                "cannot compress an empty store".into(),
            ));
        }

        let mut strategy = params.strategy;
        if strategy == PackingStrategy::Turbo
            && !check_simd_requirement("lvq_turbo_packing", SimdClass::V256)?
        {
            strategy = PackingStrategy::Sequential;
        }

        // Shared centroid matrix: supplied, or the dataset mean.
        let (ncentroids, centroid_data) = match centroids {
            Some(rows) => {
                if rows.is_empty() || rows.len() > usize::from(u16::MAX) {
                    return Err(Error::InvalidArgument(format!(
                        "centroid count {} out of range",
                        rows.len()
                    )));
                }
                let mut flat = Vec::with_capacity(rows.len() * dim);
                for row in rows {
                    if row.len() != dim {
                        return Err(Error::dimensions(dim, row.len()));
                    }
                    flat.extend_from_slice(row);
                }
                (rows.len(), flat)
            }
            None => {
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
                (1, mean)
            }
        };

        let stride = code_stride(strategy, dim);
        let primary_row_bytes = row_bytes(stride, params.primary_bits);
        let residual_row_bytes = if params.residual_bits == 0 {
            0
        } else {
            row_bytes(stride, params.residual_bits)
        };

        let parts = pool.parallel_map(n, |range, _tid| {
            let mut scratch = vec![0.0f32; dim];
            let mut residuals = vec![0.0f32; dim];
            let mut out = EncodedRange {
                selectors: Vec::with_capacity(range.len()),
                scales: Vec::with_capacity(range.len()),
                biases: Vec::with_capacity(range.len()),
                primary: vec![0u8; range.len() * primary_row_bytes],
                residual: vec![0u8; range.len() * residual_row_bytes],
            };
            for (k, i) in range.enumerate() {
                source.reconstruct(i, &mut scratch);
                let sel = nearest_centroid(&scratch, &centroid_data, ncentroids, dim);
                let centroid = &centroid_data[sel * dim..sel * dim + dim];
                for (r, (&x, &c)) in residuals.iter_mut().zip(scratch.iter().zip(centroid)) {
                    *r = x - c;
                }
                let residual_slice = if residual_row_bytes > 0 {
                    Some(&mut out.residual[k * residual_row_bytes..(k + 1) * residual_row_bytes])
                } else {
                    None
                };
                let (scale, bias) = encode_row(
                    &residuals,
                    params,
                    strategy,
                    &mut out.primary[k * primary_row_bytes..(k + 1) * primary_row_bytes],
                    residual_slice,
                );
                #[allow(clippy::cast_possible_truncation)]
                out.selectors.push(sel as u16);
                out.scales.push(scale);
                out.biases.push(bias);
            }
            out
        });

        let mut store = Self {
            dim,
            len: n,
            primary_bits: params.primary_bits,
            residual_bits: params.residual_bits,
            strategy,
            ncentroids,
            centroids: centroid_data,
            selectors: Vec::with_capacity(n),
            scales: Vec::with_capacity(n),
            biases: Vec::with_capacity(n),
            primary: Vec::with_capacity(n * primary_row_bytes),
            residual: Vec::with_capacity(n * residual_row_bytes),
            primary_row_bytes,
            residual_row_bytes,
        };
        for part in parts {
            store.selectors.extend_from_slice(&part.selectors);
            store.scales.extend_from_slice(&part.scales);
            store.biases.extend_from_slice(&part.biases);
            store.primary.extend_from_slice(&part.primary);
            store.residual.extend_from_slice(&part.residual);
        }
        Ok(store)
    }

    /// Bits per primary code.
    #[must_use]
    pub const fn primary_bits(&self) -> u8 {
        self.primary_bits
    }

    /// Bits per residual code (0 for one-level datasets).
    #[must_use]
    pub const fn residual_bits(&self) -> u8 {
        self.residual_bits
    }

    /// The packing layout fixed at compression time.
    #[must_use]
    pub const fn strategy(&self) -> PackingStrategy {
        self.strategy
    }

    /// Number of rows in the shared centroid matrix.
    #[must_use]
    pub const fn centroid_count(&self) -> usize {
        self.ncentroids
    }

    #[inline]
    fn primary_row(&self, i: usize) -> &[u8] {
        &self.primary[i * self.primary_row_bytes..(i + 1) * self.primary_row_bytes]
    }

    #[inline]
    fn residual_row(&self, i: usize) -> &[u8] {
        &self.residual[i * self.residual_row_bytes..(i + 1) * self.residual_row_bytes]
    }

    #[inline]
    fn centroid_row(&self, sel: usize) -> &[f32] {
        &self.centroids[sel * self.dim..sel * self.dim + self.dim]
    }

    /// Ordered distance against vector `i`, optionally refined with the
    /// residual level.
    fn accumulate(&self, query: &QueryKernel, i: usize, refined: bool) -> f32 {
        let sel = usize::from(self.selectors[i]);
        let centroid = self.centroid_row(sel);
        let scale = self.scales[i];
        let bias = self.biases[i];
        let prow = self.primary_row(i);
        let pbits = self.primary_bits;
        let strategy = self.strategy;
        let use_residual = refined && self.residual_bits > 0;
        let rbits = self.residual_bits;
        let rrow = if use_residual {
            self.residual_row(i)
        } else {
            &[]
        };
        let rstep = residual_step(scale, rbits);
        let rhalf = residual_half(rbits);

        #[allow(clippy::cast_precision_loss)]
        let decode = |j: usize| -> f32 {
            let pos = code_position(strategy, j);
            let mut v = scale.mul_add(read_code(prow, pos, pbits) as f32, bias) + centroid[j];
            if use_residual {
                v += (read_code(rrow, pos, rbits) as f32 - rhalf) * rstep;
            }
            v
        };

        let q = query.prepared();
        match query.metric() {
            DistanceMetric::L2 => {
                let mut acc = [0.0f32; 4];
                for j in 0..self.dim {
                    let diff = q[j] - decode(j);
                    acc[j & 3] += diff * diff;
                }
                acc[0] + acc[1] + acc[2] + acc[3]
            }
            DistanceMetric::InnerProduct => {
                let mut acc = [0.0f32; 4];
                for j in 0..self.dim {
                    acc[j & 3] += q[j] * decode(j);
                }
                -(acc[0] + acc[1] + acc[2] + acc[3])
            }
            DistanceMetric::Cosine => {
                let mut dot = 0.0f32;
                let mut sqnorm = 0.0f32;
                for j in 0..self.dim {
                    let v = decode(j);
                    dot += q[j] * v;
                    sqnorm += v * v;
                }
                if sqnorm <= 0.0 {
                    return 0.0;
                }
                -(dot / sqnorm.sqrt())
            }
        }
    }
}

#[inline]
const fn row_bytes(stride: usize, bits: u8) -> usize {
    if bits == 8 {
        stride
    } else {
        stride.div_ceil(2)
    }
}

#[inline]
fn residual_step(scale: f32, rbits: u8) -> f32 {
    if rbits == 0 {
        0.0
    } else {
        scale / (1u32 << rbits) as f32
    }
}

#[inline]
fn residual_half(rbits: u8) -> f32 {
    if rbits == 0 {
        0.0
    } else {
        (1u32 << (rbits - 1)) as f32
    }
}

fn nearest_centroid(x: &[f32], centroids: &[f32], ncentroids: usize, dim: usize) -> usize {
    if ncentroids == 1 {
        return 0;
    }
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for c in 0..ncentroids {
        let d = kernels::l2_squared(x, &centroids[c * dim..c * dim + dim]);
        if d < best_dist {
            best = c;
            best_dist = d;
        }
    }
    best
}

/// Encodes one centered residual row; returns `(scale, bias)`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_row(
    residuals: &[f32],
    params: LvqParameters,
    strategy: PackingStrategy,
    primary_out: &mut [u8],
    residual_out: Option<&mut [u8]>,
) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &r in residuals {
        lo = lo.min(r);
        hi = hi.max(r);
    }
    let max_code = ((1u32 << params.primary_bits) - 1) as f32;
    let bias = lo;
    let spread = hi - lo;
    let scale = if spread > 0.0 { spread / max_code } else { 1.0 };
    let inv_scale = 1.0 / scale;

    for (j, &r) in residuals.iter().enumerate() {
        let code = ((r - bias) * inv_scale).round().clamp(0.0, max_code) as u32;
        write_code(primary_out, code_position(strategy, j), params.primary_bits, code);
    }

    if let Some(res_out) = residual_out {
        let rbits = params.residual_bits;
        let rstep = residual_step(scale, rbits);
        let rhalf = residual_half(rbits);
        let rmax = ((1u32 << rbits) - 1) as f32;
        for (j, &r) in residuals.iter().enumerate() {
            let pos = code_position(strategy, j);
            let primary = scale.mul_add(read_code(primary_out, pos, params.primary_bits) as f32, bias);
            let err = r - primary;
            let code = ((err / rstep).round() + rhalf).clamp(0.0, rmax) as u32;
            write_code(res_out, pos, rbits, code);
        }
    }
    (scale, bias)
}

impl VectorData for LvqStore {
    type Query = QueryKernel;

    #[inline]
    fn size(&self) -> usize {
        self.len
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dim
    }

    #[inline]
    fn prefetch(&self, i: usize) {
        prefetch_slice(&self.primary, i * self.primary_row_bytes);
    }

    fn reconstruct(&self, i: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dim);
        let sel = usize::from(self.selectors[i]);
        let centroid = self.centroid_row(sel);
        let scale = self.scales[i];
        let bias = self.biases[i];
        let prow = self.primary_row(i);
        let two_level = self.residual_bits > 0;
        let rstep = residual_step(scale, self.residual_bits);
        let rhalf = residual_half(self.residual_bits);
        #[allow(clippy::cast_precision_loss)]
        for (j, o) in out.iter_mut().enumerate() {
            let pos = code_position(self.strategy, j);
            let mut v =
                scale.mul_add(read_code(prow, pos, self.primary_bits) as f32, bias) + centroid[j];
            if two_level {
                v += (read_code(self.residual_row(i), pos, self.residual_bits) as f32 - rhalf)
                    * rstep;
            }
            *o = v;
        }
    }

    fn make_query(&self, metric: DistanceMetric, query: &[f32]) -> QueryKernel {
        fix_query(metric, query)
    }

    #[inline]
    fn query_distance(&self, query: &QueryKernel, i: usize) -> f32 {
        self.accumulate(query, i, false)
    }

    #[inline]
    fn two_phase(&self) -> bool {
        self.residual_bits > 0
    }

    #[inline]
    fn refine_distance(&self, query: &QueryKernel, i: usize) -> f32 {
        self.accumulate(query, i, true)
    }
}
