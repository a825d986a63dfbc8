//! Scalar quantization (SQ8): one global scale/bias, int8 codes.
//!
//! Reconstruction of element `j` of any vector is `bias + scale * code[j]`.
//! Distances are computed asymmetrically: the query stays in f32 and each
//! candidate code is dequantized inside the accumulation loop, so the
//! decompressed vector is never materialized.

use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::pool::ThreadPool;
use crate::store::{fix_query, prefetch_slice, Element, VectorData};

/// Int8 scalar-quantized vector storage with dataset-level constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqStore {
    dim: usize,
    len: usize,
    scale: f32,
    bias: f32,
    codes: Vec<i8>,
}

impl SqStore {
    /// Compresses a source store into int8 codes.
    ///
    /// Pass (i) scans the source for the global min/max, pass (ii) encodes
    /// all vectors in parallel over the pool's partition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the source is empty.
    pub fn compress<S: VectorData>(source: &S, pool: &ThreadPool) -> Result<Self> {
        let n = source.size();
        let dim = source.dimensions();
        if n == 0 {
            return Err(Error::InvalidArgument(
                "cannot compress an empty store".into(),
            ));
        }

        // Pass 1: dataset-level statistics.
        let extrema = pool.parallel_map(n, |range, _tid| {
            let mut scratch = vec![0.0f32; dim];
            let mut lo = f32::INFINITY;
            let mut hi = f32::NEG_INFINITY;
            for i in range {
                source.reconstruct(i, &mut scratch);
                for &x in &scratch {
                    lo = lo.min(x);
                    hi = hi.max(x);
                }
            }
            (lo, hi)
        });
        let lo = extrema.iter().fold(f32::INFINITY, |a, e| a.min(e.0));
        let hi = extrema.iter().fold(f32::NEG_INFINITY, |a, e| a.max(e.1));

        // Signed codes span [-127, 127] around the midpoint of the range.
        let bias = 0.5 * (lo + hi);
        let spread = hi - lo;
        let scale = if spread > 0.0 { spread / 254.0 } else { 1.0 };
        let inv_scale = 1.0 / scale;

        // Pass 2: encode in parallel, one contiguous range per worker.
        let mut parts = pool.parallel_map(n, |range, _tid| {
            let mut scratch = vec![0.0f32; dim];
            let mut out = Vec::with_capacity(range.len() * dim);
            for i in range {
                source.reconstruct(i, &mut scratch);
                for &x in &scratch {
                    out.push(i8::from_f32((x - bias) * inv_scale));
                }
            }
            out
        });
        let mut codes = parts.remove(0);
        for part in parts {
            codes.extend_from_slice(&part);
        }

        Ok(Self {
            dim,
            len: n,
            scale,
            bias,
            codes,
        })
    }

    /// Dataset scale constant.
    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.scale
    }

    /// Dataset bias constant.
    #[must_use]
    pub const fn bias(&self) -> f32 {
        self.bias
    }

    /// Raw codes of vector `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[inline]
    #[must_use]
    pub fn codes(&self, i: usize) -> &[i8] {
        let offset = i * self.dim;
        &self.codes[offset..offset + self.dim]
    }
}

/// Ordered L2 distance between an f32 query and int8 codes.
#[inline]
fn l2_asymmetric(query: &[f32], codes: &[i8], scale: f32, bias: f32) -> f32 {
    let mut acc = [0.0f32; 4];
    for (j, &c) in codes.iter().enumerate() {
        let diff = query[j] - scale.mul_add(f32::from(c), bias);
        acc[j & 3] += diff * diff;
    }
    acc[0] + acc[1] + acc[2] + acc[3]
}

/// Dot product and candidate squared norm in one dequantizing pass.
#[inline]
fn dot_asymmetric(query: &[f32], codes: &[i8], scale: f32, bias: f32) -> (f32, f32) {
    let mut dot = 0.0f32;
    let mut sqnorm = 0.0f32;
    for (j, &c) in codes.iter().enumerate() {
        let v = scale.mul_add(f32::from(c), bias);
        dot += query[j] * v;
        sqnorm += v * v;
    }
    (dot, sqnorm)
}

impl VectorData for SqStore {
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
        prefetch_slice(&self.codes, i * self.dim);
    }

    fn reconstruct(&self, i: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dim);
        for (o, &c) in out.iter_mut().zip(self.codes(i)) {
            *o = self.scale.mul_add(f32::from(c), self.bias);
        }
    }

    fn make_query(&self, metric: DistanceMetric, query: &[f32]) -> QueryKernel {
        fix_query(metric, query)
    }

    fn query_distance(&self, query: &QueryKernel, i: usize) -> f32 {
        let codes = self.codes(i);
        match query.metric() {
            DistanceMetric::L2 => l2_asymmetric(query.prepared(), codes, self.scale, self.bias),
            DistanceMetric::InnerProduct => {
                let (dot, _) = dot_asymmetric(query.prepared(), codes, self.scale, self.bias);
                -dot
            }
            DistanceMetric::Cosine => {
                let (dot, sqnorm) =
                    dot_asymmetric(query.prepared(), codes, self.scale, self.bias);
                if sqnorm <= 0.0 {
                    return 0.0;
                }
                -(dot / sqnorm.sqrt())
            }
        }
    }
}
