//! Vamana proximity-graph index: static build/search and the dynamic
//! variant with soft deletion.

mod build;
mod dynamic;
mod index;
mod iterator;
mod params;
mod search;

#[cfg(test)]
mod dynamic_tests;
#[cfg(test)]
mod vamana_tests;

pub use dynamic::{DynamicVamanaIndex, DynamicVamanaState};
pub use index::VamanaIndex;
pub use iterator::{BatchIterator, ITERATOR_EXTRA_CAPACITY};
pub use params::{
    DynamicVamanaParameters, VamanaBuildParameters, VamanaSearchParameters,
    DEFAULT_MAX_CANDIDATE_POOL,
};
