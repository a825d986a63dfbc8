//! Vector storage: raw element stores and compressed representations.
//!
//! Every store exposes the same read abstraction, [`VectorData`]: a count, a
//! logical dimension, a prefetch hint, on-the-fly reconstruction into f32,
//! and a two-phase distance interface (a per-query "fix" step producing a
//! query object, then an amortized per-candidate computation). The graph and
//! IVF indexes consume stores exclusively through this trait, so a raw f32
//! store, an int8 scalar-quantized store, an LVQ store and a LeanVec
//! projection all plug into the same search loops.
//!
//! # Memory Layout
//!
//! Raw stores keep vectors in one contiguous buffer with rows padded to a
//! lane multiple so every row starts aligned for SIMD loads:
//!
//! ```text
//! Buffer: [v0_d0, ..., v0_dD, pad, v1_d0, ..., v1_dD, pad, ...]
//! ```

pub mod blocked;
pub mod dense;
pub mod leanvec;
pub mod lvq;
pub mod scalar;

#[cfg(test)]
mod dense_tests;
#[cfg(test)]
mod lvq_tests;

use serde::{Deserialize, Serialize};

use crate::distance::{kernels, DistanceMetric, QueryKernel};
use crate::error::{Error, Result};

pub use blocked::BlockedStore;
pub use dense::DenseStore;
pub use leanvec::{LeanVecMatrices, LeanVecParameters, LeanVecStore};
pub use lvq::{LvqParameters, LvqStore, PackingStrategy};
pub use scalar::SqStore;

/// Rows are padded so each one starts on a 32-byte-friendly lane boundary.
pub(crate) const ROW_ALIGN_ELEMENTS: usize = 8;

/// Rounds a logical dimension up to the padded physical row length.
#[must_use]
pub(crate) const fn padded_dimension(dim: usize) -> usize {
    dim.next_multiple_of(ROW_ALIGN_ELEMENTS)
}

/// Manifest tag identifying the element type of a raw store at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// 32-bit IEEE 754.
    F32,
    /// 16-bit IEEE 754 (via the `half` crate).
    F16,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
}

impl ElementType {
    /// Canonical on-disk name of the element type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F16 => "float16",
            Self::I8 => "int8",
            Self::U8 => "uint8",
        }
    }
}

/// A raw storable scalar.
///
/// The default distance path converts elements to f32 inside a four-way
/// unrolled loop; `f32` overrides it with the wide-lane kernels.
pub trait Element:
    Copy + Send + Sync + Serialize + for<'a> Deserialize<'a> + 'static
{
    /// Manifest tag for this element type.
    const KIND: ElementType;
    /// Additive identity, used for padding.
    const ZERO: Self;

    /// Widens to f32.
    fn to_f32(self) -> f32;
    /// Narrows from f32 (saturating for integer elements).
    fn from_f32(v: f32) -> Self;

    /// Ordered distance from a prepared f32 query to a stored row.
    #[inline]
    fn ordered_query_distance(metric: DistanceMetric, query: &[f32], row: &[Self]) -> f32 {
        debug_assert_eq!(query.len(), row.len());
        match metric {
            DistanceMetric::L2 => {
                let mut acc = [0.0f32; 4];
                for (j, &c) in row.iter().enumerate() {
                    let diff = query[j] - c.to_f32();
                    acc[j & 3] += diff * diff;
                }
                acc[0] + acc[1] + acc[2] + acc[3]
            }
            DistanceMetric::InnerProduct => {
                let mut acc = [0.0f32; 4];
                for (j, &c) in row.iter().enumerate() {
                    acc[j & 3] += query[j] * c.to_f32();
                }
                -(acc[0] + acc[1] + acc[2] + acc[3])
            }
            DistanceMetric::Cosine => {
                let mut dot = 0.0f32;
                let mut sqnorm = 0.0f32;
                for (j, &c) in row.iter().enumerate() {
                    let v = c.to_f32();
                    dot += query[j] * v;
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

impl Element for f32 {
    const KIND: ElementType = ElementType::F32;
    const ZERO: Self = 0.0;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn ordered_query_distance(metric: DistanceMetric, query: &[f32], row: &[Self]) -> f32 {
        match metric {
            DistanceMetric::L2 => kernels::l2_squared(query, row),
            DistanceMetric::InnerProduct => -kernels::dot(query, row),
            DistanceMetric::Cosine => {
                let (dot, sqnorm) = kernels::dot_and_sqnorm(query, row);
                if sqnorm <= 0.0 {
                    return 0.0;
                }
                -(dot / sqnorm.sqrt())
            }
        }
    }
}

impl Element for half::f16 {
    const KIND: ElementType = ElementType::F16;
    const ZERO: Self = half::f16::ZERO;

    #[inline]
    fn to_f32(self) -> f32 {
        self.to_f32()
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        half::f16::from_f32(v)
    }
}

impl Element for i8 {
    const KIND: ElementType = ElementType::I8;
    const ZERO: Self = 0;

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(-128.0, 127.0) as i8
    }
}

impl Element for u8 {
    const KIND: ElementType = ElementType::U8;
    const ZERO: Self = 0;

    #[inline]
    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_f32(v: f32) -> Self {
        v.round().clamp(0.0, 255.0) as u8
    }
}

/// Read-only access to a collection of N vectors of equal logical dimension.
///
/// `Query` is the per-query state produced by the fix phase; search loops
/// create it once and call [`VectorData::query_distance`] per candidate.
pub trait VectorData: Send + Sync {
    /// Per-query state for the amortized distance loop.
    type Query: Send + Sync;

    /// Number of vectors.
    fn size(&self) -> usize;

    /// Logical dimension D.
    fn dimensions(&self) -> usize;

    /// Advisory cache hint for an upcoming access to vector `i`.
    #[inline]
    fn prefetch(&self, _i: usize) {}

    /// Decompresses vector `i` into `out` (`out.len() == dimensions()`).
    fn reconstruct(&self, i: usize, out: &mut [f32]);

    /// Fix phase: prepares a raw f32 query for repeated evaluation.
    fn make_query(&self, metric: DistanceMetric, query: &[f32]) -> Self::Query;

    /// Ordered distance from a prepared query to vector `i`.
    fn query_distance(&self, query: &Self::Query, i: usize) -> f32;

    /// Whether [`VectorData::refine_distance`] is sharper than
    /// [`VectorData::query_distance`] (two-level layouts).
    #[inline]
    fn two_phase(&self) -> bool {
        false
    }

    /// Refined ordered distance, used by post-search reranking.
    #[inline]
    fn refine_distance(&self, query: &Self::Query, i: usize) -> f32 {
        self.query_distance(query, i)
    }

    /// Decompresses vector `i` into a freshly allocated buffer.
    #[must_use]
    fn reconstruct_to_vec(&self, i: usize) -> Vec<f32> {
        let mut out = vec![0.0; self.dimensions()];
        self.reconstruct(i, &mut out);
        out
    }
}

/// Mutation surface of growable stores.
///
/// Callers must exclude concurrent reads for the duration of any of these
/// operations; the store does not serialize mutation against search.
pub trait GrowableData: VectorData {
    /// Overwrites vector `i`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `v` has the wrong length and
    /// [`Error::InvalidArgument`] if `i` is out of range.
    fn set(&mut self, i: usize, v: &[f32]) -> Result<()>;

    /// Grows or shrinks to `n` vectors; new slots have unspecified contents.
    fn resize(&mut self, n: usize);

    /// Permutes/truncates in place: new slot `k` receives old slot
    /// `new_to_old[k]`.
    fn compact(&mut self, new_to_old: &[u32]);
}

/// Validates a batch of equal-dimension input vectors.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] on the first row of the wrong length.
pub(crate) fn check_dimensions<V: AsRef<[f32]>>(dim: usize, vectors: &[V]) -> Result<()> {
    for v in vectors {
        let got = v.as_ref().len();
        if got != dim {
            return Err(Error::dimensions(dim, got));
        }
    }
    Ok(())
}

/// Shared prefetch helper for contiguous element buffers.
#[inline]
pub(crate) fn prefetch_slice<T>(data: &[T], offset: usize) {
    if offset < data.len() {
        #[cfg(target_arch = "x86_64")]
        // Prefetch is a hint; an address past the row end cannot fault.
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            let ptr = data.as_ptr().add(offset);
            _mm_prefetch(ptr.cast::<i8>(), _MM_HINT_T0);
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            // aarch64 prefetch intrinsics are unstable; rely on the
            // hardware prefetcher there.
            let _ = data;
        }
    }
}

/// Convenience: the `QueryKernel` fix step shared by the raw stores.
pub(crate) fn fix_query(metric: DistanceMetric, query: &[f32]) -> QueryKernel {
    QueryKernel::fix(metric, query)
}
