//! Dynamic Vamana: insertion, soft deletion, consolidation and compaction.
//!
//! Vertices live in internal *slots* (u32); callers address points by
//! external u64 ids through a bijective map. Deletion only tombstones a
//! slot: its vector and edges remain until [`DynamicVamanaIndex::consolidate`]
//! rewrites adjacency around the tombstones and
//! [`DynamicVamanaIndex::compact`] renumbers the survivors densely.
//!
//! Mutations require the caller to exclude concurrent searches; the index
//! does not serialize one against the other.

use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::graph::{BlockedGraph, GraphPayload};
use crate::index::search_buffer::SearchBuffer;
use crate::index::Neighbor;
use crate::pool::ThreadPool;
use crate::store::{BlockedStore, GrowableData, VectorData};

use super::build::{build_graph, find_medioid, insert_point, robust_prune, BuildScratch};
use super::params::{DynamicVamanaParameters, VamanaSearchParameters};
use super::search::greedy_search;

/// Slot marker for "no external id".
const VACANT: u64 = u64::MAX;

/// Mutable proximity-graph index with external-id addressing.
pub struct DynamicVamanaIndex {
    data: BlockedStore<f32>,
    graph: BlockedGraph,
    metric: DistanceMetric,
    params: DynamicVamanaParameters,
    search_params: VamanaSearchParameters,
    entry_point: u32,
    tombstones: RoaringBitmap,
    /// Slots whose inbound edges were removed by consolidation; first
    /// choice for reuse.
    reclaimed: Vec<u32>,
    id_to_slot: FxHashMap<u64, u32>,
    slot_to_id: Vec<u64>,
}

/// Serializable payload of the dynamic index.
#[derive(Serialize, Deserialize)]
pub struct DynamicVamanaState {
    /// Vector payload.
    pub data: BlockedStore<f32>,
    /// Adjacency payload.
    pub graph: GraphPayload,
    /// Metric.
    pub metric: DistanceMetric,
    /// Build/maintenance parameters.
    pub params: DynamicVamanaParameters,
    /// Default search parameters.
    pub search_params: VamanaSearchParameters,
    /// Entry point slot.
    pub entry_point: u32,
    /// Tombstoned slots.
    pub tombstones: RoaringBitmap,
    /// Reusable slots.
    pub reclaimed: Vec<u32>,
    /// Slot-indexed external ids (`u64::MAX` = vacant).
    pub slot_to_id: Vec<u64>,
}

impl DynamicVamanaIndex {
    /// Builds a dynamic index over an initial corpus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty corpus, ragged
    /// vectors, duplicate ids, or an id count differing from the vector
    /// count.
    pub fn build<V: AsRef<[f32]>>(
        params: DynamicVamanaParameters,
        vectors: &[V],
        external_ids: &[u64],
        metric: DistanceMetric,
        pool: &ThreadPool,
    ) -> Result<Self> {
        params.build.validate()?;
        if vectors.len() != external_ids.len() {
            return Err(Error::InvalidArgument(format!(
                "{} vectors but {} external ids",
                vectors.len(),
                external_ids.len()
            )));
        }
        let data = BlockedStore::from_vectors(vectors)?;
        let n = data.size();

        let mut id_to_slot = FxHashMap::default();
        let mut slot_to_id = Vec::with_capacity(n);
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

        let graph = BlockedGraph::new(n, params.build.graph_max_degree);
        let entry_point = find_medioid(&data, pool);
        build_graph(&data, &graph, metric, &params.build, pool, entry_point, 0x0D1E_5EED)?;

        Ok(Self {
            data,
            graph,
            metric,
            params,
            search_params: VamanaSearchParameters::default(),
            entry_point,
            tombstones: RoaringBitmap::new(),
            reclaimed: Vec::new(),
            id_to_slot,
            slot_to_id,
        })
    }

    /// Reassembles a dynamic index from its persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] on inconsistent payload shapes.
    pub fn from_state(state: DynamicVamanaState) -> Result<Self> {
        if state.graph.adjacency.len() != state.data.size()
            || state.slot_to_id.len() != state.data.size()
        {
            return Err(Error::InvalidArgument(
                "dynamic index payloads disagree on slot count".into(),
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
            graph: BlockedGraph::from_payload(state.graph),
            metric: state.metric,
            params: state.params,
            search_params: state.search_params,
            entry_point: state.entry_point,
            tombstones: state.tombstones,
            reclaimed: state.reclaimed,
            id_to_slot,
            slot_to_id: state.slot_to_id,
        })
    }

    /// Extracts the serializable state (single-threaded).
    #[must_use]
    pub fn to_state(&self) -> DynamicVamanaState {
        DynamicVamanaState {
            data: self.data.clone(),
            graph: self.graph.to_payload(),
            metric: self.metric,
            params: self.params,
            search_params: self.search_params,
            entry_point: self.entry_point,
            tombstones: self.tombstones.clone(),
            reclaimed: self.reclaimed.clone(),
            slot_to_id: self.slot_to_id.clone(),
        }
    }

    /// Number of live (addressable) points.
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

    /// Total slot capacity, live or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.size()
    }

    /// Number of tombstoned slots awaiting cleanup.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len() as usize
    }

    /// Every live external id, in ascending slot order.
    #[must_use]
    pub fn all_ids(&self) -> Vec<u64> {
        self.slot_to_id
            .iter()
            .copied()
            .filter(|&id| id != VACANT)
            .collect()
    }

    /// True if `id` addresses a live point.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.id_to_slot.contains_key(&id)
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

    /// k-nearest-neighbor search over live points.
    ///
    /// Returns `(external_id, natural_distance)` pairs padded with
    /// sentinels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] on an index with no live points
    /// and [`Error::InvalidArgument`] for bad `k` or query shape.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.data.dimensions() {
            return Err(Error::dimensions(self.data.dimensions(), query.len()));
        }
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }
        let params = self.search_params;
        if k > params.total_capacity() {
            return Err(Error::InvalidArgument(format!(
                "k = {k} exceeds the search buffer capacity {}",
                params.total_capacity()
            )));
        }
        if self.size() == 0 {
            return Err(Error::NotInitialized("index holds no live points".into()));
        }

        let seeds = [self.live_entry_point()?];
        let mut buffer = SearchBuffer::new(params.search_window_size, params.extra_capacity);
        let fixed = self.data.make_query(self.metric, query);
        greedy_search(
            &self.data,
            &self.graph,
            &fixed,
            &seeds,
            &mut buffer,
            |v| !self.tombstones.contains(v),
            None,
        );

        Ok(buffer
            .top_k(k)
            .into_iter()
            .map(|n| {
                if n.is_sentinel() {
                    (VACANT, self.metric.to_natural(n.distance))
                } else {
                    (
                        self.slot_to_id[n.id as usize],
                        self.metric.to_natural(n.distance),
                    )
                }
            })
            .collect())
    }

    /// Inserts a batch of points.
    ///
    /// Each point is inserted independently (slot choice, store write, id
    /// registration, graph linkage); on the first failure already-inserted
    /// points remain. With `reuse_empty`, consolidated and tombstoned slots
    /// are recycled before the capacity grows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for ragged input, reserved or
    /// duplicate ids.
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
            self.add_one(v.as_ref(), id, reuse_empty)?;
        }
        Ok(())
    }

    fn add_one(&mut self, vector: &[f32], id: u64, reuse_empty: bool) -> Result<()> {
        if id == VACANT {
            return Err(Error::InvalidArgument("u64::MAX is a reserved id".into()));
        }
        if self.id_to_slot.contains_key(&id) {
            return Err(Error::InvalidArgument(format!(
                "external id {id} already present"
            )));
        }

        let slot = self.acquire_slot(reuse_empty);
        self.data.set(slot as usize, vector)?;
        self.graph.clear_node(slot);
        self.tombstones.remove(slot);
        self.id_to_slot.insert(id, slot);
        self.slot_to_id[slot as usize] = id;

        if self.size() == 1 {
            // First live point: it becomes the entry point, no edges yet.
            self.entry_point = slot;
            return Ok(());
        }

        let entry = self.live_entry_point()?;
        let mut scratch = BuildScratch::new(
            self.params.build.construction_window_size,
            self.data.dimensions(),
        );
        let tombstones = &self.tombstones;
        insert_point(
            &self.data,
            &self.graph,
            self.metric,
            &[entry],
            slot,
            self.params.build.alpha,
            &self.params.build,
            &mut scratch,
            |v| !tombstones.contains(v),
        );
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn acquire_slot(&mut self, reuse_empty: bool) -> u32 {
        if reuse_empty {
            if let Some(slot) = self.reclaimed.pop() {
                return slot;
            }
            // Fall back to a raw tombstone; stale inbound edges will point
            // at the new occupant until the next consolidate.
            if let Some(slot) = self.tombstones.iter().next() {
                return slot;
            }
        }
        let slot = self.data.size() as u32;
        self.data.resize(slot as usize + 1);
        self.graph.resize(slot as usize + 1);
        self.slot_to_id.push(VACANT);
        slot
    }

    /// Tombstones the slots of the given ids; unknown ids are ignored.
    ///
    /// Returns the number of slots newly tombstoned. When the tombstone
    /// ratio crosses the configured threshold, consolidation and compaction
    /// run automatically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] only if automatic cleanup fails.
    pub fn delete_points(&mut self, external_ids: &[u64], pool: &ThreadPool) -> Result<usize> {
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
            && self.tombstone_count() as f32 / live as f32 > self.params.cleanup_threshold
        {
            tracing::warn!(
                tombstones = self.tombstone_count(),
                live,
                "tombstone ratio above threshold, running consolidate + compact"
            );
            self.consolidate(pool)?;
            self.compact(crate::store::blocked::BLOCK_SLOTS)?;
        }
        Ok(removed)
    }

    /// Rewrites adjacency so no live vertex points at a tombstone, bridging
    /// through the tombstones' own neighborhoods to preserve connectivity.
    ///
    /// Idempotent: a second run with no new deletions changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if no live vertex remains to serve
    /// as an entry point.
    pub fn consolidate(&mut self, pool: &ThreadPool) -> Result<()> {
        if self.tombstones.is_empty() {
            return Ok(());
        }
        let capacity = self.capacity();
        let tombstones = &self.tombstones;
        let slot_to_id = &self.slot_to_id;
        let data = &self.data;
        let graph = &self.graph;
        let metric = self.metric;
        let alpha = self.params.build.alpha;
        let prune_to = self.params.build.graph_max_degree;
        let dim = data.dimensions();

        pool.parallel_for(capacity, |range, _tid| {
            let mut adjacency = Vec::new();
            let mut bridged = Vec::new();
            let mut pool_candidates: Vec<Neighbor> = Vec::new();
            let mut vec_a = vec![0.0f32; dim];
            let mut vec_b = vec![0.0f32; dim];
            for v in range {
                #[allow(clippy::cast_possible_truncation)]
                let v = v as u32;
                if tombstones.contains(v) || slot_to_id[v as usize] == VACANT {
                    continue;
                }
                graph.neighbors_into(v, &mut adjacency);
                if !adjacency.iter().any(|&w| tombstones.contains(w)) {
                    continue;
                }
                // Live survivors plus the live neighbors of each tombstone.
                bridged.clear();
                for &w in &adjacency {
                    if tombstones.contains(w) {
                        for t in graph.neighbors(w) {
                            if !tombstones.contains(t) && t != v {
                                bridged.push(t);
                            }
                        }
                    } else {
                        bridged.push(w);
                    }
                }
                bridged.sort_unstable();
                bridged.dedup();

                data.reconstruct(v as usize, &mut vec_a);
                let query = data.make_query(metric, &vec_a);
                pool_candidates.clear();
                for &w in &bridged {
                    let d = if data.two_phase() {
                        data.refine_distance(&query, w as usize)
                    } else {
                        data.query_distance(&query, w as usize)
                    };
                    pool_candidates.push(Neighbor::new(w, d));
                }
                let selected = robust_prune(
                    data,
                    metric,
                    v,
                    &mut pool_candidates,
                    alpha,
                    prune_to,
                    &mut vec_a,
                    &mut vec_b,
                );
                graph.replace_node(v, &selected);
            }
        });

        // Tombstoned vertices are now unreferenced: drop their edges and
        // make the slots reusable.
        for t in self.tombstones.iter().collect::<Vec<u32>>() {
            self.graph.clear_node(t);
            if !self.reclaimed.contains(&t) {
                self.reclaimed.push(t);
            }
        }

        if self.tombstones.contains(self.entry_point) {
            self.entry_point = self.live_entry_point()?;
        }
        Ok(())
    }

    /// Renumbers live slots densely from zero, permuting the store, the
    /// graph and the id map, and clearing every tombstone.
    ///
    /// `batch_size` bounds the row-move working set per pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `batch_size == 0`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn compact(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".into()));
        }
        let capacity = self.capacity();
        let new_to_old: Vec<u32> = (0..capacity as u32)
            .filter(|&slot| self.slot_to_id[slot as usize] != VACANT)
            .collect();
        if new_to_old.len() == capacity && self.tombstones.is_empty() {
            return Ok(());
        }

        self.graph.compact(&new_to_old);
        // Rows move front-to-back, so applying the ascending mapping in
        // batches is equivalent to one pass over the whole permutation.
        let mut next_slot = 0usize;
        let mut scratch = vec![0.0f32; self.data.dimensions()];
        for chunk in new_to_old.chunks(batch_size) {
            for &old_slot in chunk {
                if old_slot as usize != next_slot {
                    self.data.reconstruct(old_slot as usize, &mut scratch);
                    self.data.set(next_slot, &scratch)?;
                }
                next_slot += 1;
            }
        }
        self.data.resize(new_to_old.len());

        let mut slot_to_id = vec![VACANT; new_to_old.len()];
        let mut id_to_slot = FxHashMap::default();
        let mut old_to_new = vec![u32::MAX; capacity];
        for (new_slot, &old_slot) in new_to_old.iter().enumerate() {
            let id = self.slot_to_id[old_slot as usize];
            slot_to_id[new_slot] = id;
            id_to_slot.insert(id, new_slot as u32);
            old_to_new[old_slot as usize] = new_slot as u32;
        }
        self.slot_to_id = slot_to_id;
        self.id_to_slot = id_to_slot;
        self.tombstones.clear();
        self.reclaimed.clear();

        let remapped_entry = old_to_new[self.entry_point as usize];
        self.entry_point = if remapped_entry == u32::MAX {
            self.live_entry_point()?
        } else {
            remapped_entry
        };
        Ok(())
    }

    /// The entry point, falling back to the first live slot when the
    /// medioid has been tombstoned.
    fn live_entry_point(&self) -> Result<u32> {
        if !self.tombstones.contains(self.entry_point)
            && self.slot_to_id.get(self.entry_point as usize).copied() != Some(VACANT)
            && (self.entry_point as usize) < self.capacity()
        {
            return Ok(self.entry_point);
        }
        #[allow(clippy::cast_possible_truncation)]
        self.slot_to_id
            .iter()
            .position(|&id| id != VACANT)
            .map(|slot| slot as u32)
            .ok_or_else(|| Error::NotInitialized("index holds no live points".into()))
    }
}
