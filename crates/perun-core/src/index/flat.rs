//! Brute-force exact search.
//!
//! The flat index scans the whole store under the chosen metric. It is the
//! groundtruth producer for recall measurements and the fallback when no
//! approximate structure exists. Scans are chunked for cache friendliness
//! and partitioned across the pool; each worker keeps a bounded top-k heap
//! that is merged on the calling thread.

use std::collections::BinaryHeap;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::{sort_neighbors, Neighbor, OrderedFloat};
use crate::pool::ThreadPool;
use crate::store::VectorData;

/// Default number of vectors scanned per cache-friendly chunk.
pub const DEFAULT_DATA_BATCH: usize = 4096;

/// Default number of queries grouped per dispatched task.
pub const DEFAULT_QUERY_BATCH: usize = 16;

/// Exact-scan index over an owned store.
pub struct FlatIndex<D> {
    data: D,
    metric: DistanceMetric,
    data_batch_size: usize,
    query_batch_size: usize,
}

impl<D: VectorData> FlatIndex<D> {
    /// Wraps a store for exact scanning.
    #[must_use]
    pub fn new(data: D, metric: DistanceMetric) -> Self {
        Self {
            data,
            metric,
            data_batch_size: DEFAULT_DATA_BATCH,
            query_batch_size: DEFAULT_QUERY_BATCH,
        }
    }

    /// Overrides the scan chunk sizes.
    #[must_use]
    pub fn with_batch_sizes(mut self, data_batch_size: usize, query_batch_size: usize) -> Self {
        self.data_batch_size = data_batch_size.max(1);
        self.query_batch_size = query_batch_size.max(1);
        self
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

    /// Query batch granularity for [`FlatIndex::search_batch`].
    #[must_use]
    pub const fn query_batch_size(&self) -> usize {
        self.query_batch_size
    }

    /// Exact k-nearest neighbors, padded with sentinels past the corpus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `k == 0` or the query has the
    /// wrong dimension.
    pub fn search(&self, query: &[f32], k: usize, pool: &ThreadPool) -> Result<Vec<Neighbor>> {
        self.search_filtered(query, k, pool, |_| true)
    }

    /// Exact k-NN restricted to ids accepted by `predicate`.
    ///
    /// # Errors
    ///
    /// As [`FlatIndex::search`].
    pub fn search_filtered<F>(
        &self,
        query: &[f32],
        k: usize,
        pool: &ThreadPool,
        predicate: F,
    ) -> Result<Vec<Neighbor>>
    where
        F: Fn(u32) -> bool + Sync,
    {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }

        let fixed = self.data.make_query(self.metric, query);
        let n = self.data.size();
        let batch = self.data_batch_size;
        let data = &self.data;
        let predicate = &predicate;

        let partials = pool.parallel_map(n, |range, _tid| {
            // Max-heap of the worst kept candidate first.
            let mut heap: BinaryHeap<(OrderedFloat, u32)> = BinaryHeap::with_capacity(k + 1);
            let mut chunk_start = range.start;
            while chunk_start < range.end {
                let chunk_end = (chunk_start + batch).min(range.end);
                for i in chunk_start..chunk_end {
                    data.prefetch(i + 1);
                    #[allow(clippy::cast_possible_truncation)]
                    let id = i as u32;
                    if !predicate(id) {
                        continue;
                    }
                    let d = if data.two_phase() {
                        data.refine_distance(&fixed, i)
                    } else {
                        data.query_distance(&fixed, i)
                    };
                    if heap.len() < k {
                        heap.push((OrderedFloat(d), id));
                    } else if let Some(&(worst, _)) = heap.peek() {
                        if OrderedFloat(d) < worst {
                            heap.pop();
                            heap.push((OrderedFloat(d), id));
                        }
                    }
                }
                chunk_start = chunk_end;
            }
            heap.into_vec()
        });

        let mut merged: Vec<Neighbor> = partials
            .into_iter()
            .flatten()
            .map(|(d, id)| Neighbor::new(id, d.0))
            .collect();
        sort_neighbors(&mut merged);
        merged.truncate(k);
        while merged.len() < k {
            merged.push(Neighbor::sentinel());
        }
        for neighbor in &mut merged {
            neighbor.distance = self.metric.to_natural(neighbor.distance);
        }
        Ok(merged)
    }

    /// Exact search for a batch of queries, parallelized over query groups.
    ///
    /// # Errors
    ///
    /// As [`FlatIndex::search`]; the first failing query aborts the batch.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        pool: &ThreadPool,
    ) -> Result<Vec<Vec<Neighbor>>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        for q in queries {
            if q.len() != self.data.dimensions() {
                return Err(Error::dimensions(self.data.dimensions(), q.len()));
            }
        }
        // Queries are grouped so each worker amortizes its scan setup; the
        // per-query path stays sequential inside the group.
        let results = pool.parallel_map(queries.len(), |range, _tid| {
            let sequential = ThreadPool::sequential();
            range
                .map(|qi| self.search(&queries[qi], k, &sequential))
                .collect::<Result<Vec<_>>>()
        });
        let mut out = Vec::with_capacity(queries.len());
        for part in results {
            out.extend(part?);
        }
        Ok(out)
    }

    /// All vectors not worse than `radius` under the metric's comparator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a non-positive L2 radius or a
    /// ragged query.
    pub fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        pool: &ThreadPool,
    ) -> Result<Vec<Neighbor>> {
        if self.metric == DistanceMetric::L2 && radius <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "radius must be positive under L2, got {radius}"
            )));
        }
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }
        let ordered_radius = self.metric.from_natural(radius);
        let fixed = self.data.make_query(self.metric, query);
        let data = &self.data;

        let partials = pool.parallel_map(self.data.size(), |range, _tid| {
            let mut hits = Vec::new();
            for i in range {
                let d = if data.two_phase() {
                    data.refine_distance(&fixed, i)
                } else {
                    data.query_distance(&fixed, i)
                };
                if d <= ordered_radius {
                    #[allow(clippy::cast_possible_truncation)]
                    hits.push(Neighbor::new(i as u32, d));
                }
            }
            hits
        });
        let mut merged: Vec<Neighbor> = partials.into_iter().flatten().collect();
        sort_neighbors(&mut merged);
        for neighbor in &mut merged {
            neighbor.distance = self.metric.to_natural(neighbor.distance);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DenseStore;

    fn index(n: usize, dim: usize) -> FlatIndex<DenseStore<f32>> {
        let vectors: Vec<Vec<f32>> = (0..n)
            .map(|i| (0..dim).map(|j| ((i * 7 + j * 3) % 50) as f32 * 0.1).collect())
            .collect();
        FlatIndex::new(DenseStore::<f32>::from_vectors(&vectors).unwrap(), DistanceMetric::L2)
    }

    #[test]
    fn test_exact_ordering() {
        let vectors: Vec<Vec<f32>> = (0..7).map(|i| vec![i as f32; 4]).collect();
        let flat = FlatIndex::new(
            DenseStore::<f32>::from_vectors(&vectors).unwrap(),
            DistanceMetric::L2,
        );
        let pool = ThreadPool::sequential();
        let results = flat.search(&[3.25; 4], 3, &pool).unwrap();
        let ids: Vec<u32> = results.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 4, 2]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let flat = index(500, 12);
        let query = vec![1.5f32; 12];
        let seq = flat.search(&query, 10, &ThreadPool::sequential()).unwrap();
        let par = flat.search(&query, 10, &ThreadPool::new(4).unwrap()).unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_predicate_filter() {
        let flat = index(100, 6);
        let pool = ThreadPool::sequential();
        let results = flat
            .search_filtered(&vec![0.0; 6], 5, &pool, |id| id % 2 == 0)
            .unwrap();
        assert!(results.iter().all(|n| n.is_sentinel() || n.id % 2 == 0));
    }

    #[test]
    fn test_k_larger_than_corpus_pads() {
        let flat = index(3, 4);
        let pool = ThreadPool::sequential();
        let results = flat.search(&vec![0.0; 4], 5, &pool).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|n| n.is_sentinel()).count(), 2);
    }

    #[test]
    fn test_range_search_cut() {
        let vectors: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, 0.0]).collect();
        let flat = FlatIndex::new(
            DenseStore::<f32>::from_vectors(&vectors).unwrap(),
            DistanceMetric::L2,
        );
        let pool = ThreadPool::sequential();
        // Squared distance <= 4.5 around x=3 keeps {1, 2, 3, 4, 5}.
        let results = flat.range_search(&[3.0, 0.0], 4.5, &pool).unwrap();
        let mut ids: Vec<u32> = results.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_batch_search() {
        let flat = index(200, 8);
        let queries: Vec<Vec<f32>> = (0..5).map(|q| vec![q as f32 * 0.3; 8]).collect();
        let pool = ThreadPool::new(2).unwrap();
        let batched = flat.search_batch(&queries, 4, &pool).unwrap();
        assert_eq!(batched.len(), 5);
        for (qi, query) in queries.iter().enumerate() {
            let single = flat.search(query, 4, &pool).unwrap();
            assert_eq!(batched[qi], single);
        }
    }

    #[test]
    fn test_zero_k_rejected() {
        let flat = index(10, 4);
        assert!(flat.search(&vec![0.0; 4], 0, &ThreadPool::sequential()).is_err());
    }
}
