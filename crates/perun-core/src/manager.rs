//! Type-erased index manager: one façade over every index/storage tuple.
//!
//! The supported `(index kind, storage)` combinations form a closed
//! enumeration; dispatch happens once per public entry point with an enum
//! match, and each concrete combination runs monomorphized underneath.
//! Hot loops never see a trait object.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::fallback::{check_simd_requirement, SimdClass};
use crate::graph::SimpleGraph;
use crate::index::flat::FlatIndex;
use crate::index::ivf::{
    Clustering, DynamicIvfIndex, DynamicIvfState, IvfBuildParameters, IvfIndex,
    IvfSearchParameters,
};
use crate::index::vamana::{
    DynamicVamanaIndex, DynamicVamanaParameters, DynamicVamanaState, VamanaBuildParameters,
    VamanaIndex, VamanaSearchParameters,
};
use crate::index::Neighbor;
use crate::persistence::{
    check_schema, pack_directory, read_config, read_payload, schema, unpack_directory,
    write_config, write_payload, Version,
};
use crate::pool::ThreadPool;
use crate::store::{
    DenseStore, LeanVecParameters, LeanVecStore, LvqParameters, LvqStore, SqStore,
};

/// Version stamped on every config record this build writes.
const CONFIG_VERSION: Version = Version::new(0, 1, 0);

/// Sentinel external id for padding entries.
pub const SENTINEL_EXTERNAL_ID: u64 = u64::MAX;

/// Index kinds owned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Brute-force exact scan.
    Flat,
    /// Static proximity graph.
    Vamana,
    /// Mutable proximity graph with external ids.
    DynamicVamana,
    /// Static inverted-file index.
    Ivf,
    /// Mutable inverted-file index with external ids.
    DynamicIvf,
}

/// Storage layouts available to the static Vamana index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StorageKind {
    /// Uncompressed f32.
    F32,
    /// Uncompressed f16.
    F16,
    /// Int8 scalar quantization.
    Sq,
    /// LVQ (one- or two-level per the parameters).
    Lvq(LvqParameters),
    /// LeanVec projection over an f32 payload.
    LeanVec(LeanVecParameters),
    /// LeanVec projection over an LVQ payload.
    LeanVecLvq(LeanVecParameters, LvqParameters),
}

/// What to build: the index kind plus its parameters.
#[derive(Debug, Clone)]
pub enum BuildSpec {
    /// Exact index, no parameters.
    Flat,
    /// Static Vamana over the given storage layout.
    Vamana(VamanaBuildParameters, StorageKind),
    /// Dynamic Vamana (always f32 blocked storage).
    DynamicVamana(DynamicVamanaParameters),
    /// Static IVF.
    Ivf(IvfBuildParameters),
    /// Dynamic IVF.
    DynamicIvf(IvfBuildParameters),
}

/// Search parameters at the manager surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchParameters {
    /// Graph-search window parameters.
    Vamana(VamanaSearchParameters),
    /// Cluster-probe parameters.
    Ivf(IvfSearchParameters),
    /// The flat index has no tunables.
    Flat,
}

/// Row-major result matrices of a batched search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// `[n_queries][k]` ids; [`SENTINEL_EXTERNAL_ID`] pads short rows.
    pub ids: Vec<Vec<u64>>,
    /// `[n_queries][k]` natural distances.
    pub distances: Vec<Vec<f32>>,
}

enum AnyVamana {
    F32(VamanaIndex<DenseStore<f32>>),
    F16(VamanaIndex<DenseStore<half::f16>>),
    Sq(VamanaIndex<SqStore>),
    Lvq(VamanaIndex<LvqStore>),
    LeanVecF32(VamanaIndex<LeanVecStore<DenseStore<f32>>>),
    LeanVecLvq(VamanaIndex<LeanVecStore<LvqStore>>),
}

enum AnyIndex {
    Flat(FlatIndex<DenseStore<f32>>),
    Vamana(AnyVamana),
    DynamicVamana(DynamicVamanaIndex),
    Ivf(IvfIndex<DenseStore<f32>>),
    DynamicIvf(DynamicIvfIndex),
}

/// Dispatches a closure over every static-Vamana storage variant.
macro_rules! with_vamana {
    ($index:expr, $name:ident => $body:expr) => {
        match $index {
            AnyVamana::F32($name) => $body,
            AnyVamana::F16($name) => $body,
            AnyVamana::Sq($name) => $body,
            AnyVamana::Lvq($name) => $body,
            AnyVamana::LeanVecF32($name) => $body,
            AnyVamana::LeanVecLvq($name) => $body,
        }
    };
}

/// Serializable payload of a static Vamana store.
#[derive(Serialize, Deserialize)]
enum VamanaStorePayload {
    F32(DenseStore<f32>),
    F16(DenseStore<half::f16>),
    Sq(SqStore),
    Lvq(LvqStore),
    LeanVecF32(LeanVecStore<DenseStore<f32>>),
    LeanVecLvq(LeanVecStore<LvqStore>),
}

impl VamanaStorePayload {
    fn data_schema(&self) -> &'static str {
        match self {
            Self::F32(_) | Self::F16(_) => schema::UNCOMPRESSED,
            Self::Sq(_) => schema::SCALAR_QUANTIZED,
            Self::Lvq(store) => {
                if store.residual_bits() > 0 {
                    schema::TWO_LEVEL_LVQ
                } else {
                    schema::ONE_LEVEL_LVQ
                }
            }
            Self::LeanVecF32(_) | Self::LeanVecLvq(_) => schema::LEANVEC,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "schema")]
enum IndexConfig {
    #[serde(rename = "vamana config parameters")]
    Vamana(VamanaConfigBody),
    #[serde(rename = "flat index parameters")]
    Flat(FlatConfigBody),
    #[serde(rename = "ivf clustering parameters")]
    Ivf(IvfConfigBody),
    #[serde(rename = "dynamic vamana state")]
    DynamicVamana(DynamicConfigBody),
    #[serde(rename = "dynamic ivf state")]
    DynamicIvf(DynamicConfigBody),
}

#[derive(Serialize, Deserialize)]
struct VamanaConfigBody {
    version: String,
    name: String,
    metric: DistanceMetric,
    alpha: f32,
    graph_max_degree: usize,
    construction_window_size: usize,
    max_candidates: usize,
    prune_to: usize,
    use_full_search_history: bool,
    entry_point: u32,
    default_search_window_size: usize,
    #[serde(default)]
    extra_search_capacity: usize,
    data_schema: String,
}

#[derive(Serialize, Deserialize)]
struct FlatConfigBody {
    version: String,
    name: String,
    metric: DistanceMetric,
    data_schema: String,
}

#[derive(Serialize, Deserialize)]
struct IvfConfigBody {
    version: String,
    name: String,
    metric: DistanceMetric,
    num_centroids: usize,
    n_probes: Option<usize>,
    #[serde(default)]
    k_reorder: usize,
    data_schema: String,
}

#[derive(Serialize, Deserialize)]
struct DynamicConfigBody {
    version: String,
    name: String,
}

/// Owns one index and the thread pool every batched operation runs on.
pub struct IndexManager {
    inner: AnyIndex,
    pool: ThreadPool,
    num_threads: usize,
}

impl IndexManager {
    /// Builds an index over `vectors`.
    ///
    /// `external_ids` is required by the dynamic kinds and ignored by the
    /// static ones; when absent, dynamic kinds number points `0..n`.
    ///
    /// # Errors
    ///
    /// Propagates parameter validation, compression and clustering errors.
    pub fn build(
        spec: &BuildSpec,
        vectors: &[Vec<f32>],
        external_ids: Option<&[u64]>,
        metric: DistanceMetric,
        num_threads: usize,
    ) -> Result<Self> {
        let pool = ThreadPool::new(num_threads)?;
        let inner = match spec {
            BuildSpec::Flat => AnyIndex::Flat(FlatIndex::new(
                DenseStore::from_vectors(vectors)?,
                metric,
            )),
            BuildSpec::Vamana(params, storage) => {
                AnyIndex::Vamana(build_vamana(*params, *storage, vectors, metric, &pool)?)
            }
            BuildSpec::DynamicVamana(params) => {
                let ids = default_ids(external_ids, vectors.len());
                AnyIndex::DynamicVamana(DynamicVamanaIndex::build(
                    *params, vectors, &ids, metric, &pool,
                )?)
            }
            BuildSpec::Ivf(params) => AnyIndex::Ivf(IvfIndex::build(
                params,
                DenseStore::from_vectors(vectors)?,
                metric,
                &pool,
            )?),
            BuildSpec::DynamicIvf(params) => {
                let ids = default_ids(external_ids, vectors.len());
                AnyIndex::DynamicIvf(DynamicIvfIndex::build(
                    params, vectors, &ids, metric, &pool,
                )?)
            }
        };
        Ok(Self {
            inner,
            pool,
            num_threads: num_threads.max(1),
        })
    }

    /// Which kind of index this manager owns.
    #[must_use]
    pub const fn kind(&self) -> IndexKind {
        match &self.inner {
            AnyIndex::Flat(_) => IndexKind::Flat,
            AnyIndex::Vamana(_) => IndexKind::Vamana,
            AnyIndex::DynamicVamana(_) => IndexKind::DynamicVamana,
            AnyIndex::Ivf(_) => IndexKind::Ivf,
            AnyIndex::DynamicIvf(_) => IndexKind::DynamicIvf,
        }
    }

    /// Number of (live) indexed vectors.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.inner {
            AnyIndex::Flat(index) => index.size(),
            AnyIndex::Vamana(index) => with_vamana!(index, i => i.size()),
            AnyIndex::DynamicVamana(index) => index.size(),
            AnyIndex::Ivf(index) => index.size(),
            AnyIndex::DynamicIvf(index) => index.size(),
        }
    }

    /// Logical vector dimension.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        match &self.inner {
            AnyIndex::Flat(index) => index.dimensions(),
            AnyIndex::Vamana(index) => with_vamana!(index, i => i.dimensions()),
            AnyIndex::DynamicVamana(index) => index.dimensions(),
            AnyIndex::Ivf(index) => index.dimensions(),
            AnyIndex::DynamicIvf(index) => index.dimensions(),
        }
    }

    /// Worker count used for batched operations.
    #[must_use]
    pub const fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Replaces the thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] if the pool cannot be spawned.
    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        self.pool = ThreadPool::new(num_threads)?;
        self.num_threads = num_threads.max(1);
        Ok(())
    }

    /// Batched k-nearest-neighbor search.
    ///
    /// # Errors
    ///
    /// The first failing query aborts the batch.
    pub fn search(&self, queries: &[Vec<f32>], k: usize) -> Result<SearchResults> {
        let rows: Vec<Vec<(u64, f32)>> = match &self.inner {
            AnyIndex::Flat(index) => {
                let results = index.search_batch(queries, k, &self.pool)?;
                results.into_iter().map(widen_neighbors).collect()
            }
            AnyIndex::Vamana(index) => with_vamana!(index, i => {
                let parts = self.pool.parallel_map(queries.len(), |range, _tid| {
                    range
                        .map(|qi| i.search(&queries[qi], k).map(widen_neighbors))
                        .collect::<Result<Vec<_>>>()
                });
                let mut rows = Vec::with_capacity(queries.len());
                for part in parts {
                    rows.extend(part?);
                }
                rows
            }),
            AnyIndex::DynamicVamana(index) => {
                let parts = self.pool.parallel_map(queries.len(), |range, _tid| {
                    range
                        .map(|qi| index.search(&queries[qi], k))
                        .collect::<Result<Vec<_>>>()
                });
                let mut rows = Vec::with_capacity(queries.len());
                for part in parts {
                    rows.extend(part?);
                }
                rows
            }
            AnyIndex::Ivf(index) => {
                let params = index.search_parameters().ok_or_else(|| {
                    Error::InvalidArgument("IVF search parameters (n_probes) not set".into())
                })?;
                let results = index.search_batch(queries, k, params, &self.pool)?;
                results.into_iter().map(widen_neighbors).collect()
            }
            AnyIndex::DynamicIvf(index) => {
                let parts = self.pool.parallel_map(queries.len(), |range, _tid| {
                    range
                        .map(|qi| index.search(&queries[qi], k))
                        .collect::<Result<Vec<_>>>()
                });
                let mut rows = Vec::with_capacity(queries.len());
                for part in parts {
                    rows.extend(part?);
                }
                rows
            }
        };

        let mut ids = Vec::with_capacity(rows.len());
        let mut distances = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.iter().map(|&(id, _)| id).collect());
            distances.push(row.iter().map(|&(_, d)| d).collect());
        }
        Ok(SearchResults { ids, distances })
    }

    /// Batched radius search (flat and static Vamana only).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] for the IVF and dynamic kinds.
    pub fn range_search(&self, queries: &[Vec<f32>], radius: f32) -> Result<Vec<Vec<Neighbor>>> {
        match &self.inner {
            AnyIndex::Flat(index) => queries
                .iter()
                .map(|q| index.range_search(q, radius, &self.pool))
                .collect(),
            AnyIndex::Vamana(index) => with_vamana!(index, i => {
                queries.iter().map(|q| i.range_search(q, radius)).collect()
            }),
            _ => Err(Error::NotImplemented(
                "range search is available on flat and static vamana indexes".into(),
            )),
        }
    }

    /// Inserts points into a dynamic index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] on static kinds.
    pub fn add_points(
        &mut self,
        vectors: &[Vec<f32>],
        external_ids: &[u64],
        reuse_empty: bool,
    ) -> Result<()> {
        match &mut self.inner {
            AnyIndex::DynamicVamana(index) => index.add_points(vectors, external_ids, reuse_empty),
            AnyIndex::DynamicIvf(index) => index.add_points(vectors, external_ids, reuse_empty),
            _ => Err(Error::NotImplemented(
                "add_points requires a dynamic index".into(),
            )),
        }
    }

    /// Soft-deletes points from a dynamic index; returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] on static kinds.
    pub fn delete_points(&mut self, external_ids: &[u64]) -> Result<usize> {
        match &mut self.inner {
            AnyIndex::DynamicVamana(index) => index.delete_points(external_ids, &self.pool),
            AnyIndex::DynamicIvf(index) => Ok(index.delete_points(external_ids)),
            _ => Err(Error::NotImplemented(
                "delete_points requires a dynamic index".into(),
            )),
        }
    }

    /// Rewrites adjacency/posting lists around tombstones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] on static kinds.
    pub fn consolidate(&mut self) -> Result<()> {
        match &mut self.inner {
            AnyIndex::DynamicVamana(index) => index.consolidate(&self.pool),
            AnyIndex::DynamicIvf(index) => {
                index.compact_postings();
                Ok(())
            }
            _ => Err(Error::NotImplemented(
                "consolidate requires a dynamic index".into(),
            )),
        }
    }

    /// Renumbers live slots densely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] on static kinds.
    pub fn compact(&mut self, batch_size: usize) -> Result<()> {
        match &mut self.inner {
            AnyIndex::DynamicVamana(index) => index.compact(batch_size),
            AnyIndex::DynamicIvf(index) => {
                index.compact_postings();
                Ok(())
            }
            _ => Err(Error::NotImplemented(
                "compact requires a dynamic index".into(),
            )),
        }
    }

    /// All live external ids of a dynamic index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] on static kinds.
    pub fn all_ids(&self) -> Result<Vec<u64>> {
        match &self.inner {
            AnyIndex::DynamicVamana(index) => Ok(index.all_ids()),
            AnyIndex::DynamicIvf(index) => Ok(index.all_ids()),
            _ => Err(Error::NotImplemented(
                "external ids exist only on dynamic indexes".into(),
            )),
        }
    }

    /// Current search parameters.
    #[must_use]
    pub fn get_search_parameters(&self) -> SearchParameters {
        match &self.inner {
            AnyIndex::Flat(_) => SearchParameters::Flat,
            AnyIndex::Vamana(index) => {
                SearchParameters::Vamana(with_vamana!(index, i => i.search_parameters()))
            }
            AnyIndex::DynamicVamana(index) => SearchParameters::Vamana(index.search_parameters()),
            AnyIndex::Ivf(index) => SearchParameters::Ivf(
                index
                    .search_parameters()
                    .unwrap_or(IvfSearchParameters::new(0)),
            ),
            AnyIndex::DynamicIvf(index) => SearchParameters::Ivf(
                index
                    .search_parameters()
                    .unwrap_or(IvfSearchParameters::new(0)),
            ),
        }
    }

    /// Replaces the search parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the parameter family does
    /// not match the owned index kind.
    pub fn set_search_parameters(&mut self, params: SearchParameters) -> Result<()> {
        match (&mut self.inner, params) {
            (AnyIndex::Flat(_), SearchParameters::Flat) => Ok(()),
            (AnyIndex::Vamana(index), SearchParameters::Vamana(p)) => {
                with_vamana!(index, i => i.set_search_parameters(p));
                Ok(())
            }
            (AnyIndex::DynamicVamana(index), SearchParameters::Vamana(p)) => {
                index.set_search_parameters(p);
                Ok(())
            }
            (AnyIndex::Ivf(index), SearchParameters::Ivf(p)) => {
                index.set_search_parameters(p);
                Ok(())
            }
            (AnyIndex::DynamicIvf(index), SearchParameters::Ivf(p)) => {
                index.set_search_parameters(p);
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "search parameter family does not match the index kind".into(),
            )),
        }
    }

    /// Saves the index into one directory (created if missing).
    ///
    /// # Errors
    ///
    /// Propagates IO and serialization failures.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.save_to(dir, dir, dir)
    }

    /// Saves config, graph and data payloads into separate directories.
    ///
    /// # Errors
    ///
    /// Propagates IO and serialization failures.
    pub fn save_to(&self, config_dir: &Path, graph_dir: &Path, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        std::fs::create_dir_all(graph_dir)?;
        std::fs::create_dir_all(data_dir)?;

        match &self.inner {
            AnyIndex::Flat(index) => {
                let config = IndexConfig::Flat(FlatConfigBody {
                    version: CONFIG_VERSION.to_string(),
                    name: "flat".into(),
                    metric: index.metric(),
                    data_schema: schema::UNCOMPRESSED.into(),
                });
                write_config(&config_dir.join("config.toml"), &config)?;
                write_payload(&data_dir.join("data.bin"), index.data())?;
            }
            AnyIndex::Vamana(index) => {
                let payload = vamana_store_payload(index);
                let (graph, body) = with_vamana!(index, i => {
                    let params = i.build_parameters();
                    let search = i.search_parameters();
                    (
                        i.graph().to_payload(),
                        VamanaConfigBody {
                            version: CONFIG_VERSION.to_string(),
                            name: "vamana".into(),
                            metric: i.metric(),
                            alpha: params.alpha,
                            graph_max_degree: params.graph_max_degree,
                            construction_window_size: params.construction_window_size,
                            max_candidates: params.max_candidate_pool,
                            prune_to: params.prune_to,
                            use_full_search_history: params.use_full_search_history,
                            entry_point: i.entry_point(),
                            default_search_window_size: search.search_window_size,
                            extra_search_capacity: search.extra_capacity,
                            data_schema: payload.data_schema().into(),
                        },
                    )
                });
                write_config(&config_dir.join("config.toml"), &IndexConfig::Vamana(body))?;
                write_payload(&graph_dir.join("graph.bin"), &graph)?;
                write_payload(&data_dir.join("data.bin"), &payload)?;
            }
            AnyIndex::DynamicVamana(index) => {
                let config = IndexConfig::DynamicVamana(DynamicConfigBody {
                    version: CONFIG_VERSION.to_string(),
                    name: "dynamic_vamana".into(),
                });
                write_config(&config_dir.join("config.toml"), &config)?;
                write_payload(&data_dir.join("state.bin"), &index.to_state())?;
            }
            AnyIndex::Ivf(index) => {
                let config = IndexConfig::Ivf(IvfConfigBody {
                    version: CONFIG_VERSION.to_string(),
                    name: "ivf".into(),
                    metric: index.metric(),
                    num_centroids: index.clustering().num_centroids(),
                    n_probes: index.search_parameters().map(|p| p.n_probes),
                    k_reorder: index.search_parameters().map_or(0, |p| p.k_reorder),
                    data_schema: schema::UNCOMPRESSED.into(),
                });
                write_config(&config_dir.join("config.toml"), &config)?;
                write_payload(&data_dir.join("data.bin"), index.data())?;
                write_payload(&data_dir.join("clustering.bin"), index.clustering())?;
            }
            AnyIndex::DynamicIvf(index) => {
                let config = IndexConfig::DynamicIvf(DynamicConfigBody {
                    version: CONFIG_VERSION.to_string(),
                    name: "dynamic_ivf".into(),
                });
                write_config(&config_dir.join("config.toml"), &config)?;
                write_payload(&data_dir.join("state.bin"), &index.to_state())?;
            }
        }
        Ok(())
    }

    /// Loads an index saved with [`IndexManager::save`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] for unknown or incompatible
    /// records, plus IO/serialization failures.
    pub fn assemble(dir: &Path, num_threads: usize) -> Result<Self> {
        Self::assemble_from(dir, dir, dir, num_threads)
    }

    /// Loads an index saved with [`IndexManager::save_to`].
    ///
    /// # Errors
    ///
    /// As [`IndexManager::assemble`].
    pub fn assemble_from(
        config_dir: &Path,
        graph_dir: &Path,
        data_dir: &Path,
        num_threads: usize,
    ) -> Result<Self> {
        let pool = ThreadPool::new(num_threads)?;
        let config: IndexConfig = read_config(&config_dir.join("config.toml"))?;
        let inner = match config {
            IndexConfig::Flat(body) => {
                check_schema(schema::FLAT_CONFIG, &body.version, schema::FLAT_CONFIG, CONFIG_VERSION)?;
                let data: DenseStore<f32> = read_payload(&data_dir.join("data.bin"))?;
                AnyIndex::Flat(FlatIndex::new(data, body.metric))
            }
            IndexConfig::Vamana(body) => {
                check_schema(
                    schema::VAMANA_CONFIG,
                    &body.version,
                    schema::VAMANA_CONFIG,
                    CONFIG_VERSION,
                )?;
                let graph: crate::graph::GraphPayload =
                    read_payload(&graph_dir.join("graph.bin"))?;
                let payload: VamanaStorePayload = read_payload(&data_dir.join("data.bin"))?;
                if payload.data_schema() != body.data_schema {
                    return Err(Error::SchemaMismatch {
                        schema: body.data_schema,
                        message: format!(
                            "data payload carries schema '{}'",
                            payload.data_schema()
                        ),
                    });
                }
                let build = VamanaBuildParameters {
                    alpha: body.alpha,
                    graph_max_degree: body.graph_max_degree,
                    construction_window_size: body.construction_window_size,
                    max_candidate_pool: body.max_candidates,
                    prune_to: body.prune_to,
                    use_full_search_history: body.use_full_search_history,
                };
                let search = VamanaSearchParameters {
                    search_window_size: body.default_search_window_size,
                    extra_capacity: body.extra_search_capacity,
                };
                let graph = SimpleGraph::from_payload(graph);
                let entry = body.entry_point;
                let metric = body.metric;
                AnyIndex::Vamana(match payload {
                    VamanaStorePayload::F32(data) => AnyVamana::F32(VamanaIndex::from_parts(
                        data, graph, metric, entry, build, search,
                    )?),
                    VamanaStorePayload::F16(data) => AnyVamana::F16(VamanaIndex::from_parts(
                        data, graph, metric, entry, build, search,
                    )?),
                    VamanaStorePayload::Sq(data) => AnyVamana::Sq(VamanaIndex::from_parts(
                        data, graph, metric, entry, build, search,
                    )?),
                    VamanaStorePayload::Lvq(data) => AnyVamana::Lvq(VamanaIndex::from_parts(
                        data, graph, metric, entry, build, search,
                    )?),
                    VamanaStorePayload::LeanVecF32(data) => AnyVamana::LeanVecF32(
                        VamanaIndex::from_parts(data, graph, metric, entry, build, search)?,
                    ),
                    VamanaStorePayload::LeanVecLvq(data) => AnyVamana::LeanVecLvq(
                        VamanaIndex::from_parts(data, graph, metric, entry, build, search)?,
                    ),
                })
            }
            IndexConfig::DynamicVamana(body) => {
                check_schema(
                    schema::DYNAMIC_VAMANA,
                    &body.version,
                    schema::DYNAMIC_VAMANA,
                    CONFIG_VERSION,
                )?;
                let state: DynamicVamanaState = read_payload(&data_dir.join("state.bin"))?;
                AnyIndex::DynamicVamana(DynamicVamanaIndex::from_state(state)?)
            }
            IndexConfig::Ivf(body) => {
                check_schema(schema::IVF_CONFIG, &body.version, schema::IVF_CONFIG, CONFIG_VERSION)?;
                let data: DenseStore<f32> = read_payload(&data_dir.join("data.bin"))?;
                let clustering: Clustering = read_payload(&data_dir.join("clustering.bin"))?;
                if clustering.num_centroids() != body.num_centroids {
                    return Err(Error::SchemaMismatch {
                        schema: schema::IVF_CONFIG.into(),
                        message: format!(
                            "config says {} centroids, payload has {}",
                            body.num_centroids,
                            clustering.num_centroids()
                        ),
                    });
                }
                let params = body.n_probes.map(|n_probes| IvfSearchParameters {
                    n_probes,
                    k_reorder: body.k_reorder,
                });
                AnyIndex::Ivf(IvfIndex::from_parts(data, body.metric, clustering, params)?)
            }
            IndexConfig::DynamicIvf(body) => {
                check_schema(
                    schema::DYNAMIC_IVF,
                    &body.version,
                    schema::DYNAMIC_IVF,
                    CONFIG_VERSION,
                )?;
                let state: DynamicIvfState = read_payload(&data_dir.join("state.bin"))?;
                AnyIndex::DynamicIvf(DynamicIvfIndex::from_state(state)?)
            }
        };
        Ok(Self {
            inner,
            pool,
            num_threads: num_threads.max(1),
        })
    }

    /// Saves the index as a single packed stream.
    ///
    /// # Errors
    ///
    /// Propagates IO and serialization failures.
    pub fn save_stream<W: Write>(&self, writer: &mut W) -> Result<()> {
        let staging = staging_dir()?;
        let result = self
            .save(&staging)
            .and_then(|()| pack_directory(&staging, writer));
        let _ = std::fs::remove_dir_all(&staging);
        result
    }

    /// Loads an index from a stream written by [`IndexManager::save_stream`].
    ///
    /// # Errors
    ///
    /// As [`IndexManager::assemble`], plus stream corruption.
    pub fn load_stream<R: Read>(reader: &mut R, num_threads: usize) -> Result<Self> {
        let staging = staging_dir()?;
        let result = unpack_directory(reader, &staging)
            .and_then(|()| Self::assemble(&staging, num_threads));
        let _ = std::fs::remove_dir_all(&staging);
        result
    }
}

fn default_ids(external_ids: Option<&[u64]>, n: usize) -> Vec<u64> {
    external_ids.map_or_else(|| (0..n as u64).collect(), <[u64]>::to_vec)
}

fn widen_neighbors(neighbors: Vec<Neighbor>) -> Vec<(u64, f32)> {
    neighbors
        .into_iter()
        .map(|n| {
            if n.is_sentinel() {
                (SENTINEL_EXTERNAL_ID, n.distance)
            } else {
                (u64::from(n.id), n.distance)
            }
        })
        .collect()
}

fn build_vamana(
    params: VamanaBuildParameters,
    storage: StorageKind,
    vectors: &[Vec<f32>],
    metric: DistanceMetric,
    pool: &ThreadPool,
) -> Result<AnyVamana> {
    let source = DenseStore::<f32>::from_vectors(vectors)?;

    // Compressed layouts need baseline vector support; otherwise degrade
    // to the uncompressed representation (mode permitting).
    let storage = match storage {
        StorageKind::F32 | StorageKind::F16 => storage,
        other => {
            if check_simd_requirement("compressed_vector_storage", SimdClass::V128)? {
                other
            } else {
                StorageKind::F32
            }
        }
    };

    Ok(match storage {
        StorageKind::F32 => AnyVamana::F32(VamanaIndex::build(params, source, metric, pool)?),
        StorageKind::F16 => {
            let data = DenseStore::<half::f16>::from_vectors(vectors)?;
            AnyVamana::F16(VamanaIndex::build(params, data, metric, pool)?)
        }
        StorageKind::Sq => {
            let data = SqStore::compress(&source, pool)?;
            AnyVamana::Sq(VamanaIndex::build(params, data, metric, pool)?)
        }
        StorageKind::Lvq(lvq) => {
            let data = LvqStore::compress(&source, pool, lvq, None)?;
            AnyVamana::Lvq(VamanaIndex::build(params, data, metric, pool)?)
        }
        StorageKind::LeanVec(lean) => {
            let data = LeanVecStore::reduce(&source, lean, None, pool)?;
            AnyVamana::LeanVecF32(VamanaIndex::build(params, data, metric, pool)?)
        }
        StorageKind::LeanVecLvq(lean, lvq) => {
            let data = LeanVecStore::reduce_lvq(&source, lean, lvq, None, pool)?;
            AnyVamana::LeanVecLvq(VamanaIndex::build(params, data, metric, pool)?)
        }
    })
}

fn vamana_store_payload(index: &AnyVamana) -> VamanaStorePayload {
    match index {
        AnyVamana::F32(i) => VamanaStorePayload::F32(i.data().clone()),
        AnyVamana::F16(i) => VamanaStorePayload::F16(i.data().clone()),
        AnyVamana::Sq(i) => VamanaStorePayload::Sq(i.data().clone()),
        AnyVamana::Lvq(i) => VamanaStorePayload::Lvq(i.data().clone()),
        AnyVamana::LeanVecF32(i) => VamanaStorePayload::LeanVecF32(i.data().clone()),
        AnyVamana::LeanVecLvq(i) => VamanaStorePayload::LeanVecLvq(i.data().clone()),
    }
}

/// Fresh unique staging directory under the system temp root.
fn staging_dir() -> Result<PathBuf> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "perun-stage-{}-{unique}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
