//! # Perun Core
//!
//! High-performance approximate nearest-neighbor search engine written in
//! Rust.
//!
//! Perun builds in-memory indexes over collections of high-dimensional
//! vectors and answers k-NN and radius queries with tunable recall:
//!
//! - **Vamana** proximity graphs (static, and dynamic with soft deletion)
//! - **IVF** inverted-file clustering with probe-top-m search
//! - **Compressed storage**: int8 scalar quantization, LVQ (4/8-bit with
//!   optional residual refinement) and the LeanVec dimensionality-reducing
//!   front-end, all behind one vector-access abstraction
//! - A **flat** exact index for groundtruth and small corpora
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use perun_core::{BuildSpec, DistanceMetric, IndexManager, StorageKind};
//! use perun_core::index::vamana::VamanaBuildParameters;
//!
//! let params = VamanaBuildParameters::new(1.2, 64, 200);
//! let spec = BuildSpec::Vamana(params, StorageKind::F32);
//! let index = IndexManager::build(&spec, &vectors, None, DistanceMetric::L2, 8)?;
//! let results = index.search(&queries, 10)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod distance;
pub mod error;
pub mod fallback;
pub mod graph;
pub mod index;
pub mod manager;
pub mod persistence;
pub mod pool;
pub mod recall;
pub mod store;

mod rng;

pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use fallback::FallbackMode;
pub use index::Neighbor;
pub use manager::{BuildSpec, IndexKind, IndexManager, SearchParameters, SearchResults, StorageKind};
pub use pool::ThreadPool;
