//! Vamana graph construction: greedy search + RobustPrune refinement.

use crate::distance::{kernels, DistanceMetric};
use crate::error::{Error, Result};
use crate::graph::AdjacencyMut;
use crate::index::search_buffer::SearchBuffer;
use crate::index::{sort_neighbors, Neighbor};
use crate::pool::ThreadPool;
use crate::rng::XorShift64;
use crate::store::VectorData;

use super::params::VamanaBuildParameters;

/// Per-worker scratch reused across pruning calls.
pub(crate) struct BuildScratch {
    pub(crate) buffer: SearchBuffer,
    pub(crate) history: Vec<Neighbor>,
    pub(crate) pool: Vec<Neighbor>,
    pub(crate) adjacency: Vec<u32>,
    vec_a: Vec<f32>,
    vec_b: Vec<f32>,
}

impl BuildScratch {
    pub(crate) fn new(window: usize, dim: usize) -> Self {
        Self {
            buffer: SearchBuffer::new(window, 0),
            history: Vec::new(),
            pool: Vec::new(),
            adjacency: Vec::new(),
            vec_a: vec![0.0; dim],
            vec_b: vec![0.0; dim],
        }
    }
}

/// Approximate medioid: the vector nearest the dataset mean.
pub(crate) fn find_medioid<D: VectorData>(data: &D, pool: &ThreadPool) -> u32 {
    let n = data.size();
    let dim = data.dimensions();
    debug_assert!(n > 0);

    let partials = pool.parallel_map(n, |range, _tid| {
        let mut scratch = vec![0.0f32; dim];
        let mut sum = vec![0.0f64; dim];
        for i in range {
            data.reconstruct(i, &mut scratch);
            for (s, &x) in sum.iter_mut().zip(&scratch) {
                *s += f64::from(x);
            }
        }
        sum
    });
    let mut mean = vec![0.0f64; dim];
    for part in partials {
        for (m, p) in mean.iter_mut().zip(part) {
            *m += p;
        }
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let mean: Vec<f32> = mean.iter().map(|&m| (m / n as f64) as f32).collect();

    let candidates = pool.parallel_map(n, |range, _tid| {
        let mut scratch = vec![0.0f32; dim];
        let mut best = (0usize, f32::INFINITY);
        for i in range {
            data.reconstruct(i, &mut scratch);
            let d = kernels::l2_squared(&scratch, &mean);
            if d < best.1 {
                best = (i, d);
            }
        }
        best
    });
    #[allow(clippy::cast_possible_truncation)]
    candidates
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i as u32)
}

/// RobustPrune: keeps the closest candidate and drops any farther candidate
/// dominated under the alpha-relaxed triangle test.
///
/// `candidates` carry ordered distances to `node`; the result is a subset
/// of their ids of length at most `prune_to`, in selection order.
pub(crate) fn robust_prune<D: VectorData>(
    data: &D,
    metric: DistanceMetric,
    node: u32,
    candidates: &mut Vec<Neighbor>,
    alpha: f32,
    prune_to: usize,
    vec_a: &mut [f32],
    vec_b: &mut [f32],
) -> Vec<u32> {
    // Dedup by id, drop the node itself, then rank by distance.
    candidates.retain(|c| c.id != node);
    candidates.sort_by(|a, b| a.id.cmp(&b.id).then(a.distance.total_cmp(&b.distance)));
    candidates.dedup_by_key(|c| c.id);
    sort_neighbors(candidates);

    let mut result = Vec::with_capacity(prune_to);
    let mut pruned = vec![false; candidates.len()];
    for idx in 0..candidates.len() {
        if pruned[idx] {
            continue;
        }
        let pivot = candidates[idx];
        result.push(pivot.id);
        if result.len() == prune_to {
            break;
        }
        data.reconstruct(pivot.id as usize, vec_a);
        for (jdx, other) in candidates.iter().enumerate().skip(idx + 1) {
            if pruned[jdx] {
                continue;
            }
            data.reconstruct(other.id as usize, vec_b);
            let pair = metric.ordered(vec_a, vec_b);
            if metric.relax(pair, alpha) <= other.distance {
                pruned[jdx] = true;
            }
        }
    }
    result
}

/// One Vamana refinement step for vertex `i`: greedy search toward its own
/// vector, candidate-pool assembly, RobustPrune, adjacency replacement and
/// back-edge insertion with overflow pruning.
pub(crate) fn insert_point<D, G, F>(
    data: &D,
    graph: &G,
    metric: DistanceMetric,
    entry_points: &[u32],
    i: u32,
    alpha: f32,
    params: &VamanaBuildParameters,
    scratch: &mut BuildScratch,
    accept: F,
) where
    D: VectorData,
    G: AdjacencyMut,
    F: Fn(u32) -> bool,
{
    data.reconstruct(i as usize, &mut scratch.vec_a);
    let query = data.make_query(metric, &scratch.vec_a);

    scratch.history.clear();
    let history = params
        .use_full_search_history
        .then_some(&mut scratch.history);
    super::search::greedy_search(
        data,
        graph,
        &query,
        entry_points,
        &mut scratch.buffer,
        |v| v != i && accept(v),
        history,
    );

    // Candidate pool: visited history (or frontier) plus current adjacency.
    scratch.pool.clear();
    if params.use_full_search_history {
        scratch.pool.append(&mut scratch.history);
    } else {
        scratch.pool.extend_from_slice(scratch.buffer.results());
    }
    graph.neighbors_into(i, &mut scratch.adjacency);
    for k in 0..scratch.adjacency.len() {
        let v = scratch.adjacency[k];
        if v != i && accept(v) {
            let d = data.query_distance(&query, v as usize);
            scratch.pool.push(Neighbor::new(v, d));
        }
    }
    if data.two_phase() {
        for cand in &mut scratch.pool {
            cand.distance = data.refine_distance(&query, cand.id as usize);
        }
    }
    sort_neighbors(&mut scratch.pool);
    scratch.pool.truncate(params.max_candidate_pool);

    let mut pool = std::mem::take(&mut scratch.pool);
    let selected = robust_prune(
        data,
        metric,
        i,
        &mut pool,
        alpha,
        params.prune_to,
        &mut scratch.vec_a,
        &mut scratch.vec_b,
    );
    scratch.pool = pool;
    graph.replace_node(i, &selected);

    // Back edges, pruning any list the insertion overflows.
    for &p in &selected {
        if graph.add_edge(p, i) > graph.max_degree() {
            prune_vertex(data, graph, metric, p, alpha, params, scratch);
        }
    }
}

/// Re-prunes the adjacency of `v` down to `prune_to`.
fn prune_vertex<D, G>(
    data: &D,
    graph: &G,
    metric: DistanceMetric,
    v: u32,
    alpha: f32,
    params: &VamanaBuildParameters,
    scratch: &mut BuildScratch,
) where
    D: VectorData,
    G: AdjacencyMut,
{
    data.reconstruct(v as usize, &mut scratch.vec_a);
    let query = data.make_query(metric, &scratch.vec_a);
    graph.neighbors_into(v, &mut scratch.adjacency);

    scratch.pool.clear();
    for k in 0..scratch.adjacency.len() {
        let w = scratch.adjacency[k];
        let d = if data.two_phase() {
            data.refine_distance(&query, w as usize)
        } else {
            data.query_distance(&query, w as usize)
        };
        scratch.pool.push(Neighbor::new(w, d));
    }

    let mut pool = std::mem::take(&mut scratch.pool);
    let selected = robust_prune(
        data,
        metric,
        v,
        &mut pool,
        alpha,
        params.prune_to,
        &mut scratch.vec_a,
        &mut scratch.vec_b,
    );
    scratch.pool = pool;
    graph.replace_node(v, &selected);
}

/// Runs the full Vamana refinement schedule over an initialized graph.
///
/// The first pass runs at `alpha = 1.0`; a second pass applies the
/// configured relaxation when it differs. Vertices are visited in a
/// seeded random order, partitioned across the pool.
pub(crate) fn build_graph<D, G>(
    data: &D,
    graph: &G,
    metric: DistanceMetric,
    params: &VamanaBuildParameters,
    pool: &ThreadPool,
    entry_point: u32,
    seed: u64,
) -> Result<()>
where
    D: VectorData,
    G: AdjacencyMut,
{
    params.validate()?;
    let n = data.size();
    if n == 0 {
        return Err(Error::InvalidArgument("cannot build over an empty store".into()));
    }
    if n >= u32::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "corpus of {n} vectors exceeds the u32 vertex space"
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let mut order: Vec<u32> = (0..n as u32).collect();
    XorShift64::new(seed).shuffle(&mut order);

    let mut alphas = vec![1.0f32];
    if (params.alpha - 1.0).abs() > f32::EPSILON {
        alphas.push(params.alpha);
    }

    let dim = data.dimensions();
    let entry_points = [entry_point];
    for (pass, &alpha) in alphas.iter().enumerate() {
        tracing::debug!(pass, alpha, "vamana refinement pass");
        pool.parallel_for(n, |range, _tid| {
            let mut scratch = BuildScratch::new(params.construction_window_size, dim);
            for k in range {
                insert_point(
                    data,
                    graph,
                    metric,
                    &entry_points,
                    order[k],
                    alpha,
                    params,
                    &mut scratch,
                    |_| true,
                );
            }
        });
    }
    Ok(())
}
