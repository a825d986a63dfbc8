//! Dynamic inverted-file index: per-point assignment, soft deletion and
//! posting-list compaction.

use std::collections::BinaryHeap;

use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, QueryKernel};
use crate::error::{Error, Result};
use crate::index::{sort_neighbors, Neighbor, OrderedFloat};
use crate::pool::ThreadPool;
use crate::store::{BlockedStore, GrowableData, VectorData};

use super::index::IvfSearchParameters;
use super::kmeans::{kmeans_clustering, Clustering, IvfBuildParameters};

/// Slot marker for "no external id".
const VACANT: u64 = u64::MAX;

/// Mutable IVF index with external-id addressing.
pub struct DynamicIvfIndex {
    data: BlockedStore<f32>,
    metric: DistanceMetric,
    clustering: Clustering,
    tombstones: RoaringBitmap,
    free_slots: Vec<u32>,
    id_to_slot: FxHashMap<u64, u32>,
    slot_to_id: Vec<u64>,
    search_params: Option<IvfSearchParameters>,
    /// Tombstone-to-live ratio that triggers automatic compaction.
    cleanup_threshold: f32,
}

/// Serializable payload of the dynamic IVF index.
#[derive(Serialize, Deserialize)]
pub struct DynamicIvfState {
    /// Vector payload.
    pub data: BlockedStore<f32>,
    /// Metric.
    pub metric: DistanceMetric,
    /// Centroids and posting lists.
    pub clustering: Clustering,
    /// Tombstoned slots.
    pub tombstones: RoaringBitmap,
    /// Reusable slots.
    pub free_slots: Vec<u32>,
    /// Slot-indexed external ids.
    pub slot_to_id: Vec<u64>,
    /// Default search parameters.
    pub search_params: Option<IvfSearchParameters>,
    /// Cleanup threshold.
    pub cleanup_threshold: f32,
}

impl DynamicIvfIndex {
    /// Builds a dynamic IVF index over an initial corpus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] on shape mismatches, duplicate
    /// ids or clustering failures.
    pub fn build<V: AsRef<[f32]>>(
        params: &IvfBuildParameters,
        vectors: &[V],
        external_ids: &[u64],
        metric: DistanceMetric,
        pool: &ThreadPool,
    ) -> Result<Self> {
        if vectors.len() != external_ids.len() {
            return Err(Error::InvalidArgument(format!(
                "{} vectors but {} external ids",
                vectors.len(),
                external_ids.len()
            )));
        }
        let data = BlockedStore::from_vectors(vectors)?;
        let clustering = kmeans_clustering(params, &data, pool, false)?;

        let mut id_to_slot = FxHashMap::default();
        let mut slot_to_id = Vec::with_capacity(external_ids.len());
        #[allow(clippy::cast_possible_truncation)]
        for (slot, &id) in external_ids.iter().enumerate() {
            if id == VACANT {
                return Err(Error::InvalidArgument("u64::MAX is a reserved id".into()));
            }
            if id_to_slot.insert(id, slot as u32).is_some() {
                return Err(Error::InvalidArgument(format!("duplicate external id {id}")));
            }
            slot_to_id.push(id);
        }

        Ok(Self {
            data,
            metric,
            clustering,
            tombstones: RoaringBitmap::new(),
            free_slots: Vec::new(),
            id_to_slot,
            slot_to_id,
            search_params: None,
            cleanup_threshold: 0.5,
        })
    }

    /// Reassembles the index from its persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] on inconsistent payload shapes.
    pub fn from_state(state: DynamicIvfState) -> Result<Self> {
        if state.slot_to_id.len() != state.data.size() {
            return Err(Error::InvalidArgument(
                "dynamic IVF payloads disagree on slot count".into(),
            ));
        }
        let mut id_to_slot = FxHashMap::default();
        #[allow(clippy::cast_possible_truncation)]
        for (slot, &id) in state.slot_to_id.iter().enumerate() {
            if id != VACANT && id_to_slot.insert(id, slot as u32).is_some() {
                return Err(Error::InvalidArgument(format!("duplicate external id {id}")));
            }
        }
        Ok(Self {
            data: state.data,
            metric: state.metric,
            clustering: state.clustering,
            tombstones: state.tombstones,
            free_slots: state.free_slots,
            id_to_slot,
            slot_to_id: state.slot_to_id,
            search_params: state.search_params,
            cleanup_threshold: state.cleanup_threshold,
        })
    }

    /// Extracts the serializable state.
    #[must_use]
    pub fn to_state(&self) -> DynamicIvfState {
        DynamicIvfState {
            data: self.data.clone(),
            metric: self.metric,
            clustering: self.clustering.clone(),
            tombstones: self.tombstones.clone(),
            free_slots: self.free_slots.clone(),
            slot_to_id: self.slot_to_id.clone(),
            search_params: self.search_params,
            cleanup_threshold: self.cleanup_threshold,
        }
    }

    /// Number of live points.
    #[must_use]
    pub fn size(&self) -> usize {
        self.id_to_slot.len()
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

    /// Number of tombstoned slots awaiting compaction.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len() as usize
    }

    /// Every live external id.
    #[must_use]
    pub fn all_ids(&self) -> Vec<u64> {
        self.slot_to_id
            .iter()
            .copied()
            .filter(|&id| id != VACANT)
            .collect()
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

    /// k-NN over live points; returns `(external_id, natural_distance)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when defaults are unset or the
    /// query is malformed, [`Error::NotInitialized`] with no live points.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        let params = self.search_params.ok_or_else(|| {
            Error::InvalidArgument("IVF search parameters (n_probes) not set".into())
        })?;
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }
        if self.size() == 0 {
            return Err(Error::NotInitialized("index holds no live points".into()));
        }

        let kernel = QueryKernel::fix(self.metric, query);
        let mut scored: Vec<(OrderedFloat, usize)> = (0..self.clustering.num_centroids())
            .map(|c| (OrderedFloat(kernel.compute(self.clustering.centroid(c))), c))
            .collect();
        scored.sort();

        let fixed = self.data.make_query(self.metric, query);
        let mut heap: BinaryHeap<(OrderedFloat, u32)> = BinaryHeap::with_capacity(k + 1);
        for &(_, cluster) in scored.iter().take(params.n_probes) {
            for &slot in &self.clustering.clusters[cluster] {
                if self.tombstones.contains(slot) {
                    continue;
                }
                let d = self.data.query_distance(&fixed, slot as usize);
                if heap.len() < k {
                    heap.push((OrderedFloat(d), slot));
                } else if let Some(&(worst, _)) = heap.peek() {
                    if OrderedFloat(d) < worst {
                        heap.pop();
                        heap.push((OrderedFloat(d), slot));
                    }
                }
            }
        }

        let mut candidates: Vec<Neighbor> = heap
            .into_vec()
            .into_iter()
            .map(|(d, slot)| Neighbor::new(slot, d.0))
            .collect();
        sort_neighbors(&mut candidates);
        candidates.truncate(k);

        let mut out: Vec<(u64, f32)> = candidates
            .into_iter()
            .map(|n| (self.slot_to_id[n.id as usize], self.metric.to_natural(n.distance)))
            .collect();
        while out.len() < k {
            out.push((VACANT, self.metric.to_natural(crate::distance::WORST_ORDERED)));
        }
        Ok(out)
    }

    /// Inserts a batch of points, assigning each to its nearest centroid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for reserved/duplicate ids or
    /// ragged vectors; already-inserted points remain on failure.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_points<V: AsRef<[f32]>>(
        &mut self,
        vectors: &[V],
        external_ids: &[u64],
        reuse_empty: bool,
    ) -> Result<()> {
        if vectors.len() != external_ids.len() {
            return Err(Error::InvalidArgument(format!(
                "{} vectors but {} external ids",
                vectors.len(),
                external_ids.len()
            )));
        }
        for (v, &id) in vectors.iter().zip(external_ids) {
            let v = v.as_ref();
            if id == VACANT {
                return Err(Error::InvalidArgument("u64::MAX is a reserved id".into()));
            }
            if self.id_to_slot.contains_key(&id) {
                return Err(Error::InvalidArgument(format!(
                    "external id {id} already present"
                )));
            }
            let slot = if reuse_empty {
                self.free_slots.pop()
            } else {
                None
            };
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    let slot = self.data.size() as u32;
                    self.data.resize(slot as usize + 1);
                    self.slot_to_id.push(VACANT);
                    slot
                }
            };
            self.data.set(slot as usize, v)?;
            self.tombstones.remove(slot);
            self.id_to_slot.insert(id, slot);
            self.slot_to_id[slot as usize] = id;

            let cluster = self.nearest_cluster(v);
            self.clustering.clusters[cluster].push(slot);
        }
        Ok(())
    }

    /// Tombstones the given ids; unknown ids are ignored.
    ///
    /// Returns the number of slots newly tombstoned; crossing the cleanup
    /// threshold triggers posting-list compaction.
    pub fn delete_points(&mut self, external_ids: &[u64]) -> usize {
        let mut removed = 0usize;
        for &id in external_ids {
            let Some(slot) = self.id_to_slot.remove(&id) else {
                continue;
            };
            self.slot_to_id[slot as usize] = VACANT;
            self.tombstones.insert(slot);
            removed += 1;
        }
        let live = self.size();
        #[allow(clippy::cast_precision_loss)]
        if removed > 0
            && live > 0
            && self.tombstone_count() as f32 / live as f32 > self.cleanup_threshold
        {
            tracing::warn!(
                tombstones = self.tombstone_count(),
                live,
                "tombstone ratio above threshold, compacting posting lists"
            );
            self.compact_postings();
        }
        removed
    }

    /// Drops tombstoned entries from every posting list and recycles their
    /// slots. Idempotent.
    pub fn compact_postings(&mut self) {
        if self.tombstones.is_empty() {
            return;
        }
        for list in &mut self.clustering.clusters {
            list.retain(|&slot| !self.tombstones.contains(slot));
        }
        for slot in &self.tombstones {
            if !self.free_slots.contains(&slot) {
                self.free_slots.push(slot);
            }
        }
        self.tombstones.clear();
    }

    fn nearest_cluster(&self, v: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.clustering.num_centroids() {
            let d = crate::distance::kernels::l2_squared(v, self.clustering.centroid(c));
            if d < best_dist {
                best = c;
                best_dist = d;
            }
        }
        best
    }
}
