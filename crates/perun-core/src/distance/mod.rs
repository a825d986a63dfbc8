//! Distance metrics and the query/candidate computation split.
//!
//! Every kernel in this crate returns an *ordered* value: a number where
//! smaller always means "closer" under the active metric. Squared Euclidean
//! distance is its own ordered value; inner product and cosine similarity are
//! negated. The metric converts between ordered values and the natural values
//! reported at the API surface, so all internal containers can rank with a
//! single total order (`f32::total_cmp`) and a single `+inf` sentinel.

pub mod kernels;

use serde::{Deserialize, Serialize};

/// Distance metric for vector similarity calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance. Lower is more similar.
    L2,
    /// Inner product (MIPS). Higher is more similar.
    InnerProduct,
    /// Cosine similarity. Higher is more similar.
    Cosine,
}

/// Ordered sentinel: worse than any finite ordered distance.
pub const WORST_ORDERED: f32 = f32::INFINITY;

/// Sentinel identifier used to pad short result lists.
pub const SENTINEL_ID: u32 = u32::MAX;

impl DistanceMetric {
    /// Returns whether higher *natural* values indicate more similarity.
    #[must_use]
    pub const fn higher_is_better(&self) -> bool {
        match self {
            Self::L2 => false,
            Self::InnerProduct | Self::Cosine => true,
        }
    }

    /// Converts an ordered value to the natural value reported to callers.
    #[must_use]
    pub fn to_natural(&self, ordered: f32) -> f32 {
        match self {
            Self::L2 => ordered,
            Self::InnerProduct | Self::Cosine => -ordered,
        }
    }

    /// Converts a natural value (e.g. a caller-supplied radius) to ordered.
    #[must_use]
    pub fn from_natural(&self, natural: f32) -> f32 {
        match self {
            Self::L2 => natural,
            Self::InnerProduct | Self::Cosine => -natural,
        }
    }

    /// Computes the ordered distance between two raw f32 vectors.
    ///
    /// # Panics
    ///
    /// Panics if the slices have different lengths.
    #[must_use]
    pub fn ordered(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "vector dimensions must match");
        match self {
            Self::L2 => kernels::l2_squared(a, b),
            Self::InnerProduct => -kernels::dot(a, b),
            Self::Cosine => {
                let (dot, na, nb) = kernels::dot_and_norms(a, b);
                if na <= 0.0 || nb <= 0.0 {
                    return 0.0;
                }
                -(dot / (na.sqrt() * nb.sqrt()))
            }
        }
    }

    /// Scales an ordered distance by the pruning relaxation `alpha`.
    ///
    /// Multiplication by a positive factor preserves the ordered sign
    /// convention for every metric, so the relaxed triangle test in graph
    /// pruning is a single comparison in ordered space.
    #[must_use]
    pub fn relax(&self, ordered: f32, alpha: f32) -> f32 {
        debug_assert!(alpha > 0.0);
        ordered * alpha
    }
}

/// A query with its per-metric setup applied once ("fix" phase).
///
/// Construction normalizes the query for cosine and caches nothing else;
/// [`QueryKernel::compute`] is the amortized per-candidate inner loop.
#[derive(Debug, Clone)]
pub struct QueryKernel {
    metric: DistanceMetric,
    prepared: Vec<f32>,
}

impl QueryKernel {
    /// Prepares a query for repeated distance evaluation.
    #[must_use]
    pub fn fix(metric: DistanceMetric, query: &[f32]) -> Self {
        let prepared = match metric {
            DistanceMetric::Cosine => {
                let norm = kernels::dot(query, query).sqrt();
                if norm > 0.0 {
                    query.iter().map(|x| x / norm).collect()
                } else {
                    query.to_vec()
                }
            }
            DistanceMetric::L2 | DistanceMetric::InnerProduct => query.to_vec(),
        };
        Self { metric, prepared }
    }

    /// Computes the ordered distance from the prepared query to `v`.
    #[inline]
    #[must_use]
    pub fn compute(&self, v: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::L2 => kernels::l2_squared(&self.prepared, v),
            DistanceMetric::InnerProduct => -kernels::dot(&self.prepared, v),
            DistanceMetric::Cosine => {
                let (dot, sqnorm) = kernels::dot_and_sqnorm(&self.prepared, v);
                if sqnorm <= 0.0 {
                    return 0.0;
                }
                -(dot / sqnorm.sqrt())
            }
        }
    }

    /// The prepared (possibly normalized) query vector.
    #[must_use]
    pub fn prepared(&self) -> &[f32] {
        &self.prepared
    }

    /// The metric this kernel was fixed for.
    #[must_use]
    pub const fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_ordered_is_squared() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        let d = DistanceMetric::L2.ordered(&a, &b);
        assert!((d - 25.0).abs() < 1e-6);
        assert!((DistanceMetric::L2.to_natural(d) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_negated() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let d = DistanceMetric::InnerProduct.ordered(&a, &b);
        assert!((d + 32.0).abs() < 1e-6);
        assert!((DistanceMetric::InnerProduct.to_natural(d) - 32.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let a = [0.5, 0.5, 0.0];
        let d = DistanceMetric::Cosine.ordered(&a, &a);
        assert!((DistanceMetric::Cosine.to_natural(d) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_guard() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        assert_eq!(DistanceMetric::Cosine.ordered(&a, &b), 0.0);
    }

    #[test]
    fn test_query_kernel_matches_pairwise() {
        let q = [0.3, -1.2, 2.0, 0.0, 5.5];
        let v = [1.0, 1.0, -1.0, 0.25, 2.0];
        for metric in [
            DistanceMetric::L2,
            DistanceMetric::InnerProduct,
            DistanceMetric::Cosine,
        ] {
            let kernel = QueryKernel::fix(metric, &q);
            let direct = metric.ordered(&q, &v);
            assert!(
                (kernel.compute(&v) - direct).abs() < 1e-5,
                "metric {metric:?} mismatch"
            );
        }
    }

    #[test]
    fn test_relax_preserves_order_direction() {
        // L2: relaxing grows the threshold; IP: shrinks the (negative) value
        // toward zero when alpha < 1.
        assert!(DistanceMetric::L2.relax(4.0, 1.2) > 4.0);
        assert!(DistanceMetric::InnerProduct.relax(-10.0, 0.95) > -10.0);
    }
}
