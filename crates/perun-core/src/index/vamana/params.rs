//! Vamana build and search parameter records.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default candidate pool bound applied by [`VamanaBuildParameters::new`].
pub const DEFAULT_MAX_CANDIDATE_POOL: usize = 750;

/// Graph construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VamanaBuildParameters {
    /// Pruning relaxation. Values above 1.0 sparsify toward longer-range
    /// edges (L2); values slightly below 1.0 suit inner-product corpora.
    pub alpha: f32,
    /// Bounded out-degree of every vertex.
    pub graph_max_degree: usize,
    /// Search window used by the per-vertex greedy search during build.
    pub construction_window_size: usize,
    /// Upper bound on the candidate pool fed to pruning.
    pub max_candidate_pool: usize,
    /// Target list length when pruning (at most `graph_max_degree`).
    pub prune_to: usize,
    /// Feed the entire visited set (not only the frontier) into pruning.
    pub use_full_search_history: bool,
}

impl VamanaBuildParameters {
    /// Canonical construction: `prune_to` tracks the degree bound and the
    /// candidate pool takes its documented default.
    #[must_use]
    pub const fn new(alpha: f32, graph_max_degree: usize, construction_window_size: usize) -> Self {
        Self {
            alpha,
            graph_max_degree,
            construction_window_size,
            max_candidate_pool: DEFAULT_MAX_CANDIDATE_POOL,
            prune_to: graph_max_degree,
            use_full_search_history: true,
        }
    }

    /// Validates internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for non-positive alpha, a zero
    /// degree bound or window, or `prune_to` above the degree bound.
    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "alpha must be positive, got {}",
                self.alpha
            )));
        }
        if self.graph_max_degree == 0 {
            return Err(Error::InvalidArgument("graph_max_degree must be positive".into()));
        }
        if self.construction_window_size == 0 {
            return Err(Error::InvalidArgument(
                "construction_window_size must be positive".into(),
            ));
        }
        if self.prune_to == 0 || self.prune_to > self.graph_max_degree {
            return Err(Error::InvalidArgument(format!(
                "prune_to {} must be in [1, {}]",
                self.prune_to, self.graph_max_degree
            )));
        }
        if self.max_candidate_pool < self.graph_max_degree {
            return Err(Error::InvalidArgument(format!(
                "max_candidate_pool {} below graph_max_degree {}",
                self.max_candidate_pool, self.graph_max_degree
            )));
        }
        Ok(())
    }
}

impl Default for VamanaBuildParameters {
    fn default() -> Self {
        Self::new(1.2, 64, 200)
    }
}

/// Per-query search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VamanaSearchParameters {
    /// Search window size `W`: the best-first frontier width.
    pub search_window_size: usize,
    /// Extra buffer capacity `X` reserved for reranking and iteration.
    pub extra_capacity: usize,
}

impl VamanaSearchParameters {
    /// Creates search parameters with no extra capacity.
    #[must_use]
    pub const fn new(search_window_size: usize) -> Self {
        Self {
            search_window_size,
            extra_capacity: 0,
        }
    }

    /// Total buffer capacity `W + X`.
    #[must_use]
    pub const fn total_capacity(&self) -> usize {
        self.search_window_size + self.extra_capacity
    }
}

impl Default for VamanaSearchParameters {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Parameters of the dynamic index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicVamanaParameters {
    /// Construction parameters, also applied to single-vertex insertion.
    pub build: VamanaBuildParameters,
    /// Tombstone-to-live ratio above which a delete batch triggers
    /// automatic consolidation and compaction.
    pub cleanup_threshold: f32,
}

impl DynamicVamanaParameters {
    /// Wraps build parameters with the documented 0.5 cleanup threshold.
    #[must_use]
    pub const fn new(build: VamanaBuildParameters) -> Self {
        Self {
            build,
            cleanup_threshold: 0.5,
        }
    }
}

impl Default for DynamicVamanaParameters {
    fn default() -> Self {
        Self::new(VamanaBuildParameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ties_prune_to_degree() {
        let params = VamanaBuildParameters::new(1.2, 32, 100);
        assert_eq!(params.prune_to, 32);
        assert_eq!(params.max_candidate_pool, DEFAULT_MAX_CANDIDATE_POOL);
        params.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_records() {
        let good = VamanaBuildParameters::default();
        assert!(VamanaBuildParameters { alpha: 0.0, ..good }.validate().is_err());
        assert!(VamanaBuildParameters {
            graph_max_degree: 0,
            ..good
        }
        .validate()
        .is_err());
        assert!(VamanaBuildParameters {
            prune_to: good.graph_max_degree + 1,
            ..good
        }
        .validate()
        .is_err());
        assert!(VamanaBuildParameters {
            max_candidate_pool: 1,
            ..good
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_search_capacity() {
        let params = VamanaSearchParameters {
            search_window_size: 32,
            extra_capacity: 10,
        };
        assert_eq!(params.total_capacity(), 42);
    }
}
