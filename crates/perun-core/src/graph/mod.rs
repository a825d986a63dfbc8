//! Adjacency containers with bounded out-degree.
//!
//! Both containers store one neighbor list per vertex behind a dedicated
//! `parking_lot` lock, so concurrent build passes can mutate different
//! vertices without a global lock. Distance computations never run under a
//! list lock; callers copy the list out, compute, then write back.
//!
//! [`SimpleGraph`] is sized once for a static index. [`BlockedGraph`] keeps
//! its locks in fixed-size blocks so the dynamic index can grow the vertex
//! set without moving existing lists.


use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Vertex slots per allocation block of a [`BlockedGraph`].
pub const GRAPH_BLOCK_SLOTS: usize = 4096;

/// Serializable payload shared by both graph containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    /// Bounded out-degree.
    pub max_degree: usize,
    /// One adjacency list per vertex.
    pub adjacency: Vec<Vec<u32>>,
}

/// Fixed-size adjacency container for the static index.
#[derive(Debug)]
pub struct SimpleGraph {
    max_degree: usize,
    nodes: Vec<RwLock<Vec<u32>>>,
}

impl SimpleGraph {
    /// Creates a graph of `n` vertices with empty adjacency lists.
    #[must_use]
    pub fn new(n: usize, max_degree: usize) -> Self {
        let mut nodes = Vec::with_capacity(n);
        nodes.resize_with(n, || RwLock::new(Vec::new()));
        Self { max_degree, nodes }
    }

    /// Number of vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bounded out-degree.
    #[must_use]
    pub const fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Copies the adjacency list of `v`.
    #[must_use]
    pub fn neighbors(&self, v: u32) -> Vec<u32> {
        self.nodes[v as usize].read().clone()
    }

    /// Copies the adjacency list of `v` into `out` without allocating.
    pub fn neighbors_into(&self, v: u32, out: &mut Vec<u32>) {
        out.clear();
        out.extend_from_slice(&self.nodes[v as usize].read());
    }

    /// Out-degree of `v`.
    #[must_use]
    pub fn degree(&self, v: u32) -> usize {
        self.nodes[v as usize].read().len()
    }

    /// Replaces the adjacency list of `v`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the list exceeds the degree bound or
    /// contains a self-loop.
    pub fn replace_node(&self, v: u32, neighbors: &[u32]) {
        debug_assert!(neighbors.len() <= self.max_degree);
        debug_assert!(neighbors.iter().all(|&w| w != v));
        let mut list = self.nodes[v as usize].write();
        list.clear();
        list.extend_from_slice(neighbors);
    }

    /// Appends `w` to the adjacency of `v` unless present.
    ///
    /// Returns the resulting out-degree; a result above `max_degree`
    /// signals that the caller must prune `v`.
    pub fn add_edge(&self, v: u32, w: u32) -> usize {
        debug_assert_ne!(v, w);
        let mut list = self.nodes[v as usize].write();
        if !list.contains(&w) {
            list.push(w);
        }
        list.len()
    }

    /// Empties the adjacency list of `v`.
    pub fn clear_node(&self, v: u32) {
        self.nodes[v as usize].write().clear();
    }

    /// Extracts a serializable payload (single-threaded).
    #[must_use]
    pub fn to_payload(&self) -> GraphPayload {
        GraphPayload {
            max_degree: self.max_degree,
            adjacency: self.nodes.iter().map(|n| n.read().clone()).collect(),
        }
    }

    /// Rebuilds a graph from a payload.
    #[must_use]
    pub fn from_payload(payload: GraphPayload) -> Self {
        Self {
            max_degree: payload.max_degree,
            nodes: payload.adjacency.into_iter().map(RwLock::new).collect(),
        }
    }
}

/// Block-allocated adjacency container for the dynamic index.
#[derive(Debug)]
pub struct BlockedGraph {
    max_degree: usize,
    len: usize,
    blocks: Vec<Box<[RwLock<Vec<u32>>]>>,
}

impl BlockedGraph {
    /// Creates a graph of `n` vertices with empty adjacency lists.
    #[must_use]
    pub fn new(n: usize, max_degree: usize) -> Self {
        let mut graph = Self {
            max_degree,
            len: 0,
            blocks: Vec::new(),
        };
        graph.resize(n);
        graph
    }

    fn new_block() -> Box<[RwLock<Vec<u32>>]> {
        let mut block = Vec::with_capacity(GRAPH_BLOCK_SLOTS);
        block.resize_with(GRAPH_BLOCK_SLOTS, || RwLock::new(Vec::new()));
        block.into_boxed_slice()
    }

    #[inline]
    fn node(&self, v: u32) -> &RwLock<Vec<u32>> {
        let v = v as usize;
        debug_assert!(v < self.len);
        &self.blocks[v / GRAPH_BLOCK_SLOTS][v % GRAPH_BLOCK_SLOTS]
    }

    /// Number of vertex slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the graph has no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounded out-degree.
    #[must_use]
    pub const fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Grows or shrinks the vertex set; new slots start empty.
    pub fn resize(&mut self, n: usize) {
        let blocks_needed = n.div_ceil(GRAPH_BLOCK_SLOTS);
        while self.blocks.len() < blocks_needed {
            self.blocks.push(Self::new_block());
        }
        self.blocks.truncate(blocks_needed);
        // Slots past the new length may hold stale lists from a shrink.
        if n < self.len {
            for v in n..self.len.min(blocks_needed * GRAPH_BLOCK_SLOTS) {
                self.blocks[v / GRAPH_BLOCK_SLOTS][v % GRAPH_BLOCK_SLOTS]
                    .write()
                    .clear();
            }
        }
        self.len = n;
    }

    /// Copies the adjacency list of `v`.
    #[must_use]
    pub fn neighbors(&self, v: u32) -> Vec<u32> {
        self.node(v).read().clone()
    }

    /// Copies the adjacency list of `v` into `out` without allocating.
    pub fn neighbors_into(&self, v: u32, out: &mut Vec<u32>) {
        out.clear();
        out.extend_from_slice(&self.node(v).read());
    }

    /// Out-degree of `v`.
    #[must_use]
    pub fn degree(&self, v: u32) -> usize {
        self.node(v).read().len()
    }

    /// Replaces the adjacency list of `v`.
    pub fn replace_node(&self, v: u32, neighbors: &[u32]) {
        debug_assert!(neighbors.len() <= self.max_degree);
        debug_assert!(neighbors.iter().all(|&w| w != v));
        let mut list = self.node(v).write();
        list.clear();
        list.extend_from_slice(neighbors);
    }

    /// Appends `w` to the adjacency of `v` unless present; returns the
    /// resulting out-degree.
    pub fn add_edge(&self, v: u32, w: u32) -> usize {
        debug_assert_ne!(v, w);
        let mut list = self.node(v).write();
        if !list.contains(&w) {
            list.push(w);
        }
        list.len()
    }

    /// Empties the adjacency list of `v`.
    pub fn clear_node(&self, v: u32) {
        self.node(v).write().clear();
    }

    /// Keeps the slots named by `new_to_old` (in order), renumbering every
    /// surviving edge; edges to dropped slots are removed.
    ///
    /// Exclusive access required: `&mut self` guarantees no concurrent
    /// readers.
    #[allow(clippy::cast_possible_truncation)]
    pub fn compact(&mut self, new_to_old: &[u32]) {
        let mut old_to_new = vec![u32::MAX; self.len];
        for (new_idx, &old_idx) in new_to_old.iter().enumerate() {
            old_to_new[old_idx as usize] = new_idx as u32;
        }
        for (new_idx, &old_idx) in new_to_old.iter().enumerate() {
            let mut list = self.node(old_idx).write();
            let remapped: Vec<u32> = list
                .iter()
                .filter_map(|&w| {
                    let w = old_to_new[w as usize];
                    (w != u32::MAX).then_some(w)
                })
                .collect();
            *list = remapped;
            drop(list);
            if old_idx as usize != new_idx {
                let moved = std::mem::take(&mut *self.node(old_idx).write());
                *self.blocks[new_idx / GRAPH_BLOCK_SLOTS][new_idx % GRAPH_BLOCK_SLOTS]
                    .write() = moved;
            }
        }
        self.resize(new_to_old.len());
    }

    /// Extracts a serializable payload (single-threaded).
    #[must_use]
    pub fn to_payload(&self) -> GraphPayload {
        GraphPayload {
            max_degree: self.max_degree,
            adjacency: (0..self.len)
                .map(|v| self.node(v as u32).read().clone())
                .collect(),
        }
    }

    /// Rebuilds a graph from a payload.
    #[must_use]
    pub fn from_payload(payload: GraphPayload) -> Self {
        let mut graph = Self::new(payload.adjacency.len(), payload.max_degree);
        for (v, list) in payload.adjacency.into_iter().enumerate() {
            *graph.node(v as u32).write() = list;
        }
        graph
    }
}

/// Read access shared by the search loop across both containers.
pub trait AdjacencyView: Send + Sync {
    /// Number of vertex slots.
    fn len(&self) -> usize;
    /// Returns true when there are no vertices.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Copies the adjacency list of `v` into `out`.
    fn neighbors_into(&self, v: u32, out: &mut Vec<u32>);
}

/// Mutation surface shared by the build and maintenance passes.
///
/// Methods take `&self`: every list carries its own lock, so distinct
/// vertices can be edited concurrently.
pub trait AdjacencyMut: AdjacencyView {
    /// Bounded out-degree.
    fn max_degree(&self) -> usize;
    /// Replaces the adjacency list of `v`.
    fn replace_node(&self, v: u32, neighbors: &[u32]);
    /// Appends an edge unless present; returns the resulting out-degree.
    fn add_edge(&self, v: u32, w: u32) -> usize;
    /// Empties the adjacency list of `v`.
    fn clear_node(&self, v: u32);
}

impl AdjacencyView for SimpleGraph {
    fn len(&self) -> usize {
        self.len()
    }

    fn neighbors_into(&self, v: u32, out: &mut Vec<u32>) {
        self.neighbors_into(v, out);
    }
}

impl AdjacencyMut for SimpleGraph {
    fn max_degree(&self) -> usize {
        self.max_degree()
    }

    fn replace_node(&self, v: u32, neighbors: &[u32]) {
        self.replace_node(v, neighbors);
    }

    fn add_edge(&self, v: u32, w: u32) -> usize {
        self.add_edge(v, w)
    }

    fn clear_node(&self, v: u32) {
        self.clear_node(v);
    }
}

impl AdjacencyView for BlockedGraph {
    fn len(&self) -> usize {
        self.len()
    }

    fn neighbors_into(&self, v: u32, out: &mut Vec<u32>) {
        self.neighbors_into(v, out);
    }
}

impl AdjacencyMut for BlockedGraph {
    fn max_degree(&self) -> usize {
        self.max_degree()
    }

    fn replace_node(&self, v: u32, neighbors: &[u32]) {
        self.replace_node(v, neighbors);
    }

    fn add_edge(&self, v: u32, w: u32) -> usize {
        self.add_edge(v, w)
    }

    fn clear_node(&self, v: u32) {
        self.clear_node(v);
    }
}
