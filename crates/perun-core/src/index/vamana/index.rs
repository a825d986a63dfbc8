//! Static Vamana index: build once, search many.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::graph::SimpleGraph;
use crate::index::search_buffer::SearchBuffer;
use crate::index::Neighbor;
use crate::pool::ThreadPool;
use crate::store::VectorData;

use super::build::{build_graph, find_medioid};
use super::iterator::BatchIterator;
use super::params::{VamanaBuildParameters, VamanaSearchParameters};
use super::search::{greedy_search, rerank_buffer};

/// Seed for the build-order shuffle; fixed so sequential builds reproduce.
const BUILD_ORDER_SEED: u64 = 0x5EED_0B5E_55ED_0123;

/// A proximity-graph index over an owned vector store.
pub struct VamanaIndex<D> {
    data: D,
    graph: SimpleGraph,
    metric: DistanceMetric,
    entry_point: u32,
    build_params: VamanaBuildParameters,
    search_params: VamanaSearchParameters,
}

impl<D: VectorData> VamanaIndex<D> {
    /// Builds the graph over `data` and returns the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for inconsistent parameters or an
    /// empty store.
    pub fn build(
        params: VamanaBuildParameters,
        data: D,
        metric: DistanceMetric,
        pool: &ThreadPool,
    ) -> Result<Self> {
        params.validate()?;
        if data.size() == 0 {
            return Err(Error::InvalidArgument(
                "cannot build an index over an empty store".into(),
            ));
        }
        let graph = SimpleGraph::new(data.size(), params.graph_max_degree);
        let entry_point = find_medioid(&data, pool);
        build_graph(&data, &graph, metric, &params, pool, entry_point, BUILD_ORDER_SEED)?;
        Ok(Self {
            data,
            graph,
            metric,
            entry_point,
            build_params: params,
            search_params: VamanaSearchParameters::default(),
        })
    }

    /// Reassembles an index from persisted parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when graph and store disagree on
    /// the vertex count or the entry point is out of range.
    pub fn from_parts(
        data: D,
        graph: SimpleGraph,
        metric: DistanceMetric,
        entry_point: u32,
        build_params: VamanaBuildParameters,
        search_params: VamanaSearchParameters,
    ) -> Result<Self> {
        if graph.len() != data.size() {
            return Err(Error::InvalidArgument(format!(
                "graph has {} vertices but the store holds {} vectors",
                graph.len(),
                data.size()
            )));
        }
        if (entry_point as usize) >= data.size() {
            return Err(Error::InvalidArgument(format!(
                "entry point {entry_point} out of range"
            )));
        }
        Ok(Self {
            data,
            graph,
            metric,
            entry_point,
            build_params,
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

    /// The graph entry point (approximate medioid).
    #[must_use]
    pub const fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// Borrowed underlying store.
    #[must_use]
    pub const fn data(&self) -> &D {
        &self.data
    }

    /// Borrowed graph.
    #[must_use]
    pub(crate) const fn graph(&self) -> &SimpleGraph {
        &self.graph
    }

    /// Construction parameters the index was built with.
    #[must_use]
    pub const fn build_parameters(&self) -> &VamanaBuildParameters {
        &self.build_params
    }

    /// Current default search parameters.
    #[must_use]
    pub const fn search_parameters(&self) -> VamanaSearchParameters {
        self.search_params
    }

    /// Replaces the default search parameters.
    pub fn set_search_parameters(&mut self, params: VamanaSearchParameters) {
        self.search_params = params;
    }

    /// k-nearest-neighbor search with the index's default parameters.
    ///
    /// Returned distances are natural (metric-facing) values; short result
    /// lists are padded with sentinel entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `k == 0` or `k` exceeds the
    /// buffer capacity `W + X`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_with(query, k, self.search_params)
    }

    /// k-nearest-neighbor search with explicit parameters.
    ///
    /// # Errors
    ///
    /// As [`VamanaIndex::search`], plus dimension mismatches.
    pub fn search_with(
        &self,
        query: &[f32],
        k: usize,
        params: VamanaSearchParameters,
    ) -> Result<Vec<Neighbor>> {
        self.check_query(query, k, &params)?;
        let mut buffer = SearchBuffer::new(params.search_window_size, params.extra_capacity);
        let fixed = self.data.make_query(self.metric, query);
        greedy_search(
            &self.data,
            &self.graph,
            &fixed,
            &[self.entry_point],
            &mut buffer,
            |_| true,
            None,
        );
        rerank_buffer(&self.data, &fixed, &mut buffer);
        Ok(self.naturalize(buffer.top_k(k)))
    }

    /// Radius search: all reachable neighbors not worse than `radius`
    /// under the metric's comparator, sorted best-first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a non-positive L2 radius.
    pub fn range_search(&self, query: &[f32], radius: f32) -> Result<Vec<Neighbor>> {
        if self.metric == DistanceMetric::L2 && radius <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "radius must be positive under L2, got {radius}"
            )));
        }
        let ordered_radius = self.metric.from_natural(radius);
        let mut iterator = self.batch_iterator(query)?;
        let batch = self.search_params.search_window_size.max(1);
        let mut out = Vec::new();
        'grow: loop {
            iterator.next(batch)?;
            for neighbor in iterator.results() {
                let ordered = self.metric.from_natural(neighbor.distance);
                if ordered > ordered_radius {
                    break 'grow;
                }
                out.push(*neighbor);
            }
            if iterator.done() {
                break;
            }
        }
        Ok(out)
    }

    /// Creates a batch iterator holding an internal copy of `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] for a query of the wrong
    /// length.
    pub fn batch_iterator(&self, query: &[f32]) -> Result<BatchIterator<'_, D>> {
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }
        Ok(BatchIterator::new(self, query))
    }

    /// Runs greedy search into `buffer` for iterator/range callers.
    pub(crate) fn search_into_buffer(&self, query: &[f32], buffer: &mut SearchBuffer) {
        let fixed = self.data.make_query(self.metric, query);
        greedy_search(
            &self.data,
            &self.graph,
            &fixed,
            &[self.entry_point],
            buffer,
            |_| true,
            None,
        );
        rerank_buffer(&self.data, &fixed, buffer);
    }

    /// Converts ordered buffer output to natural metric values.
    pub(crate) fn naturalize(&self, mut neighbors: Vec<Neighbor>) -> Vec<Neighbor> {
        for n in &mut neighbors {
            n.distance = self.metric.to_natural(n.distance);
        }
        neighbors
    }

    fn check_query(
        &self,
        query: &[f32],
        k: usize,
        params: &VamanaSearchParameters,
    ) -> Result<()> {
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        if k > params.total_capacity() {
            return Err(Error::InvalidArgument(format!(
                "k = {k} exceeds the search buffer capacity {}",
                params.total_capacity()
            )));
        }
        Ok(())
    }
}
