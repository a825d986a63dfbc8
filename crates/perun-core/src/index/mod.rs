//! Index implementations: flat exact scan, Vamana proximity graph and IVF.

pub mod flat;
pub mod ivf;
pub mod search_buffer;
pub mod vamana;


use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::distance::{SENTINEL_ID, WORST_ORDERED};

/// A search candidate: a vertex id and its ordered distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Internal vertex index, or [`SENTINEL_ID`] for padding entries.
    pub id: u32,
    /// Ordered distance (smaller is closer under every metric).
    pub distance: f32,
}

impl Neighbor {
    /// Creates a neighbor candidate.
    #[must_use]
    pub const fn new(id: u32, distance: f32) -> Self {
        Self { id, distance }
    }

    /// The padding entry used when fewer than `k` results exist.
    #[must_use]
    pub const fn sentinel() -> Self {
        Self {
            id: SENTINEL_ID,
            distance: WORST_ORDERED,
        }
    }

    /// Returns true for padding entries.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID
    }
}

/// Wrapper for f32 to implement `Ord` for heaps and sorts.
///
/// Uses `f32::total_cmp` for IEEE 754 total ordering, ensuring Ord/Eq
/// consistency even with NaN values.
#[derive(Debug, Clone, Copy)]
pub struct OrderedFloat(pub f32);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorts neighbors by ordered distance, breaking ties by id.
pub(crate) fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
}
