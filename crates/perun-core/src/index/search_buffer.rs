//! Bounded best-first buffer driving greedy graph search.
//!
//! The buffer holds up to `window + extra` candidates sorted by ordered
//! distance, partitioned by a cursor into *expanded* entries (their
//! neighborhoods have been visited) and *unexpanded* ones. The tail entry of
//! a full buffer is the pruning cutoff: anything worse is discarded on
//! insert. A visited set rides along so the search loop scores each vertex
//! at most once.

use rustc_hash::FxHashSet;

use crate::index::Neighbor;

/// Bounded best-first candidate buffer with an expansion cursor.
#[derive(Debug, Clone)]
pub struct SearchBuffer {
    window: usize,
    capacity: usize,
    entries: Vec<Neighbor>,
    expanded: Vec<bool>,
    cursor: usize,
    visited: FxHashSet<u32>,
}

impl SearchBuffer {
    /// Creates a buffer with search window `window` and `extra` capacity
    /// reserved for reranking/iteration.
    ///
    /// # Panics
    ///
    /// Panics if `window == 0`.
    #[must_use]
    pub fn new(window: usize, extra: usize) -> Self {
        assert!(window > 0, "search window must be positive");
        let capacity = window + extra;
        Self {
            window,
            capacity,
            entries: Vec::with_capacity(capacity + 1),
            expanded: Vec::with_capacity(capacity + 1),
            cursor: 0,
            visited: FxHashSet::default(),
        }
    }

    /// Search window size `W`.
    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Total capacity `W + X`.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of held candidates.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no candidates are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidate at rank `k` (ascending ordered distance).
    ///
    /// # Panics
    ///
    /// Panics if `k >= size()`.
    #[must_use]
    pub fn get(&self, k: usize) -> Neighbor {
        self.entries[k]
    }

    /// Sorted view of the held candidates.
    #[must_use]
    pub fn results(&self) -> &[Neighbor] {
        &self.entries
    }

    /// Clears candidates and the visited set.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.expanded.clear();
        self.cursor = 0;
        self.visited.clear();
    }

    /// Marks `id` visited; returns false if it already was.
    pub fn mark_visited(&mut self, id: u32) -> bool {
        self.visited.insert(id)
    }

    /// Seeds the buffer with an entry point (marks it visited).
    pub fn seed(&mut self, id: u32, distance: f32) {
        self.visited.insert(id);
        self.insert(id, distance);
    }

    /// Attempts to insert a candidate; returns true if it was accepted.
    ///
    /// Deduplication against the visited set is the caller's concern; the
    /// buffer only enforces the capacity/cutoff discipline.
    pub fn insert(&mut self, id: u32, distance: f32) -> bool {
        if self.entries.len() == self.capacity {
            // Full: the tail is the cutoff.
            if distance >= self.entries[self.capacity - 1].distance {
                return false;
            }
        }
        let pos = self
            .entries
            .partition_point(|e| e.distance <= distance);
        self.entries.insert(pos, Neighbor::new(id, distance));
        self.expanded.insert(pos, false);
        if self.entries.len() > self.capacity {
            self.entries.pop();
            self.expanded.pop();
        }
        if pos < self.cursor {
            self.cursor = pos;
        }
        true
    }

    /// Pops the best unexpanded candidate, marking it expanded.
    ///
    /// Returns `None` when every held candidate has been expanded, which is
    /// the termination condition of greedy search.
    pub fn next_unexpanded(&mut self) -> Option<Neighbor> {
        while self.cursor < self.entries.len() {
            if self.expanded[self.cursor] {
                self.cursor += 1;
                continue;
            }
            self.expanded[self.cursor] = true;
            let entry = self.entries[self.cursor];
            return Some(entry);
        }
        None
    }

    /// Re-sorts after distances were rewritten in place (reranking).
    pub fn sort(&mut self) {
        // Entries are kept sorted by insert; an explicit sort is only
        // needed after refine passes overwrite distances.
        let mut pairs: Vec<(Neighbor, bool)> = self
            .entries
            .iter()
            .copied()
            .zip(self.expanded.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.distance.total_cmp(&b.0.distance).then(a.0.id.cmp(&b.0.id)));
        for (slot, (entry, expanded)) in pairs.into_iter().enumerate() {
            self.entries[slot] = entry;
            self.expanded[slot] = expanded;
        }
    }

    /// Rewrites the distance of the candidate at rank `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k >= size()`.
    pub fn set_distance(&mut self, k: usize, distance: f32) {
        self.entries[k].distance = distance;
    }

    /// Copies out the best `k` candidates, padding with sentinels.
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<Neighbor> {
        let mut out = Vec::with_capacity(k);
        out.extend(self.entries.iter().take(k).copied());
        while out.len() < k {
            out.push(Neighbor::sentinel());
        }
        out
    }
}
