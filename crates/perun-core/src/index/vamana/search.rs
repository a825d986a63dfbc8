//! Greedy best-first graph search shared by build, query and mutation paths.

use crate::graph::AdjacencyView;
use crate::index::search_buffer::SearchBuffer;
use crate::index::Neighbor;
use crate::store::VectorData;

/// Runs greedy best-first search from `seeds` toward the prepared query.
///
/// The buffer is reset, seeded, then repeatedly expands its best unexpanded
/// candidate until none remains; every accepted scored vertex passes the
/// `accept` predicate (the dynamic index filters tombstones here). When
/// `history` is given, every accepted scored vertex is also appended to it —
/// the full visited history the build pass can feed into pruning.
///
/// At termination the buffer holds a sorted prefix of the best candidates
/// encountered on the expanded frontier; no claim is made about globally
/// optimal neighbors.
pub(crate) fn greedy_search<D, G, F>(
    data: &D,
    graph: &G,
    query: &D::Query,
    seeds: &[u32],
    buffer: &mut SearchBuffer,
    accept: F,
    mut history: Option<&mut Vec<Neighbor>>,
) where
    D: VectorData,
    G: AdjacencyView,
    F: Fn(u32) -> bool,
{
    buffer.reset();
    for &seed in seeds {
        if buffer.mark_visited(seed) && accept(seed) {
            let d = data.query_distance(query, seed as usize);
            if let Some(history) = history.as_deref_mut() {
                history.push(Neighbor::new(seed, d));
            }
            buffer.insert(seed, d);
        }
    }

    let mut adjacency = Vec::new();
    while let Some(current) = buffer.next_unexpanded() {
        graph.neighbors_into(current.id, &mut adjacency);
        for &v in &adjacency {
            data.prefetch(v as usize);
        }
        for &v in &adjacency {
            if !buffer.mark_visited(v) || !accept(v) {
                continue;
            }
            let d = data.query_distance(query, v as usize);
            if let Some(history) = history.as_deref_mut() {
                history.push(Neighbor::new(v, d));
            }
            buffer.insert(v, d);
        }
    }
}

/// Replaces buffer distances with the refined two-phase distance and
/// re-sorts (the reranking step of two-level layouts).
pub(crate) fn rerank_buffer<D: VectorData>(data: &D, query: &D::Query, buffer: &mut SearchBuffer) {
    if !data.two_phase() {
        return;
    }
    for k in 0..buffer.size() {
        let id = buffer.get(k).id;
        buffer.set_distance(k, data.refine_distance(query, id as usize));
    }
    buffer.sort();
}
