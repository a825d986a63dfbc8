//! Static inverted-file index: cluster probing over k-means posting lists.

use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::index::{sort_neighbors, Neighbor, OrderedFloat};
use crate::pool::ThreadPool;
use crate::store::VectorData;

use super::kmeans::{kmeans_clustering, Clustering, IvfBuildParameters};

/// Per-query IVF search parameters.
///
/// `n_probes` carries no default on purpose: probing every cluster is the
/// only "neutral" choice and it is pathological, so the caller must decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfSearchParameters {
    /// Number of nearest clusters scanned per query.
    pub n_probes: usize,
    /// Candidates reranked against the refined distance (0 disables).
    pub k_reorder: usize,
}

impl IvfSearchParameters {
    /// Creates parameters with reranking disabled.
    #[must_use]
    pub const fn new(n_probes: usize) -> Self {
        Self {
            n_probes,
            k_reorder: 0,
        }
    }
}

/// Inverted-file index over an owned store.
pub struct IvfIndex<D> {
    data: D,
    metric: DistanceMetric,
    clustering: Clustering,
    search_params: Option<IvfSearchParameters>,
}

impl<D: VectorData> IvfIndex<D> {
    /// Clusters the corpus and builds posting lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for bad parameters or a corpus
    /// smaller than the centroid count.
    pub fn build(
        params: &IvfBuildParameters,
        data: D,
        metric: DistanceMetric,
        pool: &ThreadPool,
    ) -> Result<Self> {
        let clustering = kmeans_clustering(params, &data, pool, false)?;
        Ok(Self {
            data,
            metric,
            clustering,
            search_params: None,
        })
    }

    /// Reassembles an index from persisted parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the clustering shape does
    /// not match the store.
    pub fn from_parts(
        data: D,
        metric: DistanceMetric,
        clustering: Clustering,
        search_params: Option<IvfSearchParameters>,
    ) -> Result<Self> {
        if clustering.dim != data.dimensions() {
            return Err(Error::dimensions(data.dimensions(), clustering.dim));
        }
        let assigned: usize = clustering.clusters.iter().map(Vec::len).sum();
        if assigned != data.size() {
            return Err(Error::InvalidArgument(format!(
                "posting lists cover {assigned} of {} vectors",
                data.size()
            )));
        }
        Ok(Self {
            data,
            metric,
            clustering,
            search_params,
        })
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Logical vector dimension.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.data.dimensions()
    }

    /// The metric this index ranks by.
    #[must_use]
    pub const fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Borrowed underlying store.
    #[must_use]
    pub const fn data(&self) -> &D {
        &self.data
    }

    /// Borrowed clustering (centroids + posting lists).
    #[must_use]
    pub const fn clustering(&self) -> &Clustering {
        &self.clustering
    }

    /// Stored default search parameters, if set.
    #[must_use]
    pub const fn search_parameters(&self) -> Option<IvfSearchParameters> {
        self.search_params
    }

    /// Sets the default search parameters.
    pub fn set_search_parameters(&mut self, params: IvfSearchParameters) {
        self.search_params = Some(params);
    }

    /// k-NN with the stored default parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when no defaults were set.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let params = self.search_params.ok_or_else(|| {
            Error::InvalidArgument("IVF search parameters (n_probes) not set".into())
        })?;
        self.search_with(query, k, params)
    }

    /// k-NN probing the top `n_probes` clusters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for `k == 0`, zero probes, or a
    /// ragged query.
    pub fn search_with(
        &self,
        query: &[f32],
        k: usize,
        params: IvfSearchParameters,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        if params.n_probes == 0 {
            return Err(Error::InvalidArgument("n_probes must be positive".into()));
        }
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }

        let probes = self.rank_clusters(query, params.n_probes);
        let fixed = self.data.make_query(self.metric, query);
        let keep = k.max(if self.data.two_phase() { params.k_reorder } else { 0 });

        let mut heap: BinaryHeap<(OrderedFloat, u32)> = BinaryHeap::with_capacity(keep + 1);
        for cluster in probes {
            for &i in &self.clustering.clusters[cluster] {
                self.data.prefetch(i as usize);
                let d = self.data.query_distance(&fixed, i as usize);
                if heap.len() < keep {
                    heap.push((OrderedFloat(d), i));
                } else if let Some(&(worst, _)) = heap.peek() {
                    if OrderedFloat(d) < worst {
                        heap.pop();
                        heap.push((OrderedFloat(d), i));
                    }
                }
            }
        }

        let mut candidates: Vec<Neighbor> = heap
            .into_vec()
            .into_iter()
            .map(|(d, id)| Neighbor::new(id, d.0))
            .collect();
        if self.data.two_phase() && params.k_reorder > 0 {
            for cand in &mut candidates {
                cand.distance = self.data.refine_distance(&fixed, cand.id as usize);
            }
        }
        sort_neighbors(&mut candidates);
        candidates.truncate(k);
        while candidates.len() < k {
            candidates.push(Neighbor::sentinel());
        }
        for neighbor in &mut candidates {
            neighbor.distance = self.metric.to_natural(neighbor.distance);
        }
        Ok(candidates)
    }

    /// Batched search through the pool.
    ///
    /// # Errors
    ///
    /// As [`IvfIndex::search`]; the first failing query aborts the batch.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        params: IvfSearchParameters,
        pool: &ThreadPool,
    ) -> Result<Vec<Vec<Neighbor>>> {
        let results = pool.parallel_map(queries.len(), |range, _tid| {
            range
                .map(|qi| self.search_with(&queries[qi], k, params))
                .collect::<Result<Vec<_>>>()
        });
        let mut out = Vec::with_capacity(queries.len());
        for part in results {
            out.extend(part?);
        }
        Ok(out)
    }

    /// Indices of the `n_probes` best-scoring clusters for `query`.
    fn rank_clusters(&self, query: &[f32], n_probes: usize) -> Vec<usize> {
        let kernel = QueryKernel::fix(self.metric, query);
        let mut scored: Vec<(OrderedFloat, usize)> = (0..self.clustering.num_centroids())
            .map(|c| (OrderedFloat(kernel.compute(self.clustering.centroid(c))), c))
            .collect();
        scored.sort();
        scored
            .into_iter()
            .take(n_probes)
            .map(|(_, c)| c)
            .collect()
    }
}
