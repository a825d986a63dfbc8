//! Inverted-file index: k-means clustering plus cluster-probing search.

mod dynamic;
mod index;
mod kmeans;

#[cfg(test)]
mod ivf_tests;

pub use dynamic::{DynamicIvfIndex, DynamicIvfState};
pub use index::{IvfIndex, IvfSearchParameters};
pub use kmeans::{
    kmeans_clustering, Clustering, IvfBuildParameters, MIN_TRAINING_SAMPLE_MULTIPLIER,
};
