//! Bucket-based Many-to-Many CH Algorithm
//!
//! Computes an N×M weight matrix between phantom nodes:
//!
//! 1. Backward phase: one search per target, every settled node records
//!    `(column, weight)` in its bucket
//! 2. Forward phase: one search per source, every settled node joins its own
//!    weight with the buckets found there
//!
//! d(s → t) = min over m: d(s → m) + d(m → t)
//!
//! ## Optimizations
//!
//! - **4-ary heap with decrease-key**: no stale entries, FIFO on equal keys
//! - **Version-stamped heap index**: O(1) clear between phantoms
//! - **Stall-on-demand** in both phases
//! - **Parallel rows**: forward searches share the read-only buckets and
//!   borrow pooled workspaces

use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::graph::{EdgeWeight, NodeId, QueryGraph, INVALID_EDGE_WEIGHT};
use crate::phantom::PhantomNode;
use crate::search::{is_stalled, relax, seed_phantom, Direction};
use crate::workspace::{SearchHeap, SearchWorkspace, WorkspacePool};

// =============================================================================
// BUCKETS AND RESULT LAYOUT
// =============================================================================

/// Bucket item left by a backward search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeBucket {
    pub column: u32,
    pub weight: EdgeWeight,
}

/// Node -> buckets, one entry per target search that settled the node,
/// in visitation order
pub type SearchSpaceWithBuckets = FxHashMap<NodeId, Vec<NodeBucket>>;

/// Row-major `rows × cols` weight matrix
///
/// Cells start at `INVALID_EDGE_WEIGHT` and are only ever lowered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultMatrix {
    rows: usize,
    cols: usize,
    weights: Vec<EdgeWeight>,
}

impl ResultMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            weights: vec![INVALID_EDGE_WEIGHT; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> EdgeWeight {
        self.weights[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[EdgeWeight] {
        &self.weights[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[EdgeWeight] {
        &self.weights
    }

    /// Lower a cell to `candidate` if it improves it
    #[inline]
    pub fn improve(&mut self, row: usize, col: usize, candidate: EdgeWeight) -> bool {
        improve_cell(&mut self.weights[row * self.cols + col], candidate)
    }

    /// Nested rows, the shape clients expect
    pub fn to_nested(&self) -> Vec<Vec<EdgeWeight>> {
        if self.cols == 0 {
            return vec![Vec::new(); self.rows];
        }
        self.weights.chunks(self.cols).map(<[_]>::to_vec).collect()
    }
}

#[inline]
fn improve_cell(cell: &mut EdgeWeight, candidate: EdgeWeight) -> bool {
    if candidate < *cell {
        *cell = candidate;
        true
    } else {
        false
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Statistics from one many-to-many computation
#[derive(Debug, Default, Clone)]
pub struct ManyToManyStats {
    pub n_sources: usize,
    pub n_targets: usize,
    pub bucket_items: usize,
    pub bucket_nodes: usize,
    pub backward_pops: usize,
    pub forward_pops: usize,
    pub stalled_nodes: usize,
    pub join_operations: usize,
    /// Negative joins repaired with a self-loop
    pub loop_corrections: usize,
    /// Negative joins without a usable loop
    pub discarded_joins: usize,
    pub backward_time_ms: u64,
    pub forward_time_ms: u64,
}

/// Counters of one forward row
#[derive(Debug, Default, Clone, Copy)]
struct RowCounters {
    pops: usize,
    stalled: usize,
    joins: usize,
    loop_corrections: usize,
    discarded: usize,
}

impl RowCounters {
    fn merge(self, other: RowCounters) -> RowCounters {
        RowCounters {
            pops: self.pops + other.pops,
            stalled: self.stalled + other.stalled,
            joins: self.joins + other.joins,
            loop_corrections: self.loop_corrections + other.loop_corrections,
            discarded: self.discarded + other.discarded,
        }
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Compute the weight matrix between `sources` (rows) and `targets` (columns)
///
/// Empty index lists select every phantom in natural order. Explicit indices
/// keep the caller's order.
pub fn many_to_many<G: QueryGraph + ?Sized>(
    graph: &G,
    workspace: &mut SearchWorkspace,
    phantoms: &[PhantomNode],
    source_indices: &[usize],
    target_indices: &[usize],
    cancel: &CancelToken,
) -> Result<ResultMatrix, QueryError> {
    many_to_many_with_stats(graph, workspace, phantoms, source_indices, target_indices, cancel)
        .map(|(matrix, _)| matrix)
}

/// [`many_to_many`] that also reports search statistics
pub fn many_to_many_with_stats<G: QueryGraph + ?Sized>(
    graph: &G,
    workspace: &mut SearchWorkspace,
    phantoms: &[PhantomNode],
    source_indices: &[usize],
    target_indices: &[usize],
    cancel: &CancelToken,
) -> Result<(ResultMatrix, ManyToManyStats), QueryError> {
    let (sources, targets) = resolve_request(graph, phantoms, source_indices, target_indices)?;
    let mut matrix = ResultMatrix::new(sources.len(), targets.len());
    let mut stats = ManyToManyStats {
        n_sources: sources.len(),
        n_targets: targets.len(),
        ..Default::default()
    };
    if sources.is_empty() || targets.is_empty() {
        return Ok((matrix, stats));
    }

    workspace.ensure_capacity(graph.node_count());
    let heap = workspace.many_to_many_heap();
    let buckets = build_buckets(graph, heap, phantoms, &targets, &mut stats, cancel)?;

    // ========== PHASE 2: Forward searches from SOURCES ==========
    let forward_start = Instant::now();
    let cols = matrix.cols;
    let mut totals = RowCounters::default();
    for (row, &source) in matrix.weights.chunks_mut(cols).zip(sources.iter()) {
        let counters = forward_scan_row(graph, heap, &phantoms[source], &buckets, row, cancel)?;
        totals = totals.merge(counters);
    }
    stats.forward_time_ms = forward_start.elapsed().as_millis() as u64;
    finish_stats(&mut stats, totals);

    Ok((matrix, stats))
}

/// [`many_to_many`] with forward rows computed on the rayon pool
///
/// Row workers borrow their workspaces from `pool` and hand them back when
/// the query ends, so repeated tables over one graph reuse the same heaps.
/// Results are identical to the sequential version.
pub fn many_to_many_parallel<G: QueryGraph + Sync + ?Sized>(
    graph: &G,
    workspace: &mut SearchWorkspace,
    pool: &WorkspacePool,
    phantoms: &[PhantomNode],
    source_indices: &[usize],
    target_indices: &[usize],
    cancel: &CancelToken,
) -> Result<ResultMatrix, QueryError> {
    many_to_many_parallel_with_stats(
        graph,
        workspace,
        pool,
        phantoms,
        source_indices,
        target_indices,
        cancel,
    )
    .map(|(matrix, _)| matrix)
}

/// [`many_to_many_parallel`] that also reports search statistics
pub fn many_to_many_parallel_with_stats<G: QueryGraph + Sync + ?Sized>(
    graph: &G,
    workspace: &mut SearchWorkspace,
    pool: &WorkspacePool,
    phantoms: &[PhantomNode],
    source_indices: &[usize],
    target_indices: &[usize],
    cancel: &CancelToken,
) -> Result<(ResultMatrix, ManyToManyStats), QueryError> {
    let (sources, targets) = resolve_request(graph, phantoms, source_indices, target_indices)?;
    let mut matrix = ResultMatrix::new(sources.len(), targets.len());
    let mut stats = ManyToManyStats {
        n_sources: sources.len(),
        n_targets: targets.len(),
        ..Default::default()
    };
    if sources.is_empty() || targets.is_empty() {
        return Ok((matrix, stats));
    }

    let node_count = graph.node_count();
    workspace.ensure_capacity(node_count);
    let buckets = build_buckets(
        graph,
        workspace.many_to_many_heap(),
        phantoms,
        &targets,
        &mut stats,
        cancel,
    )?;

    // ========== PHASE 2: Parallel forward searches ==========
    let forward_start = Instant::now();
    let cols = matrix.cols;
    let rows: Vec<RowCounters> = matrix
        .weights
        .par_chunks_mut(cols)
        .zip(sources.par_iter())
        .map_init(
            || pool.checkout(),
            |local, (row, &source)| {
                local.ensure_capacity(node_count);
                forward_scan_row(
                    graph,
                    local.many_to_many_heap(),
                    &phantoms[source],
                    &buckets,
                    row,
                    cancel,
                )
            },
        )
        .collect::<Result<_, _>>()?;
    stats.forward_time_ms = forward_start.elapsed().as_millis() as u64;
    let totals = rows
        .into_iter()
        .fold(RowCounters::default(), RowCounters::merge);
    finish_stats(&mut stats, totals);

    Ok((matrix, stats))
}

// =============================================================================
// PHASES
// =============================================================================

fn resolve_indices(indices: &[usize], len: usize) -> Result<Vec<usize>, QueryError> {
    if indices.is_empty() {
        return Ok((0..len).collect());
    }
    indices
        .iter()
        .map(|&index| {
            if index < len {
                Ok(index)
            } else {
                Err(QueryError::InvalidPhantomIndex { index, len })
            }
        })
        .collect()
}

/// Resolve row/column phantom lists and check they fit the graph
fn resolve_request<G: QueryGraph + ?Sized>(
    graph: &G,
    phantoms: &[PhantomNode],
    source_indices: &[usize],
    target_indices: &[usize],
) -> Result<(Vec<usize>, Vec<usize>), QueryError> {
    let sources = resolve_indices(source_indices, phantoms.len())?;
    let targets = resolve_indices(target_indices, phantoms.len())?;
    let node_count = graph.node_count();
    for &index in sources.iter().chain(targets.iter()) {
        if !phantoms[index].is_valid(node_count) {
            return Err(QueryError::InvalidPhantom { index });
        }
    }
    Ok((sources, targets))
}

/// Phase 1: backward search from every target, filling buckets
fn build_buckets<G: QueryGraph + ?Sized>(
    graph: &G,
    heap: &mut SearchHeap,
    phantoms: &[PhantomNode],
    targets: &[usize],
    stats: &mut ManyToManyStats,
    cancel: &CancelToken,
) -> Result<SearchSpaceWithBuckets, QueryError> {
    let backward_start = Instant::now();
    let mut buckets = SearchSpaceWithBuckets::default();

    for (column, &target) in targets.iter().enumerate() {
        heap.clear();
        seed_phantom(heap, &phantoms[target], Direction::Backward);

        while !heap.is_empty() {
            cancel.check()?;
            let (node, weight) = heap.pop_min_with_key()?;
            stats.backward_pops += 1;

            buckets.entry(node).or_default().push(NodeBucket {
                column: column as u32,
                weight,
            });

            if is_stalled(graph, heap, Direction::Backward, node, weight)? {
                stats.stalled_nodes += 1;
                continue;
            }
            relax(graph, heap, Direction::Backward, node, weight)?;
        }
    }

    stats.bucket_nodes = buckets.len();
    stats.bucket_items = buckets.values().map(Vec::len).sum();
    stats.backward_time_ms = backward_start.elapsed().as_millis() as u64;
    Ok(buckets)
}

/// Phase 2: forward search from one source, joining against the buckets
fn forward_scan_row<G: QueryGraph + ?Sized>(
    graph: &G,
    heap: &mut SearchHeap,
    phantom: &PhantomNode,
    buckets: &SearchSpaceWithBuckets,
    row: &mut [EdgeWeight],
    cancel: &CancelToken,
) -> Result<RowCounters, QueryError> {
    let mut counters = RowCounters::default();
    heap.clear();
    seed_phantom(heap, phantom, Direction::Forward);

    while !heap.is_empty() {
        cancel.check()?;
        let (node, source_weight) = heap.pop_min_with_key()?;
        counters.pops += 1;

        if let Some(bucket_list) = buckets.get(&node) {
            for bucket in bucket_list {
                counters.joins += 1;
                let mut candidate = source_weight.saturating_add(bucket.weight);

                // Source and target on the same edge-based node: the pair
                // only connects through the node's loop
                if candidate < 0 {
                    match graph.self_loop_weight(node) {
                        Some(loop_weight) if candidate + loop_weight >= 0 => {
                            candidate += loop_weight;
                            counters.loop_corrections += 1;
                        }
                        _ => {
                            trace!(node, column = bucket.column, candidate, "discarding negative join");
                            counters.discarded += 1;
                            continue;
                        }
                    }
                }

                improve_cell(&mut row[bucket.column as usize], candidate);
            }
        }

        if is_stalled(graph, heap, Direction::Forward, node, source_weight)? {
            counters.stalled += 1;
            continue;
        }
        relax(graph, heap, Direction::Forward, node, source_weight)?;
    }

    Ok(counters)
}

fn finish_stats(stats: &mut ManyToManyStats, totals: RowCounters) {
    stats.forward_pops = totals.pops;
    stats.stalled_nodes += totals.stalled;
    stats.join_operations = totals.joins;
    stats.loop_corrections = totals.loop_corrections;
    stats.discarded_joins = totals.discarded;

    debug!(
        sources = stats.n_sources,
        targets = stats.n_targets,
        bucket_items = stats.bucket_items,
        bucket_nodes = stats.bucket_nodes,
        backward_pops = stats.backward_pops,
        forward_pops = stats.forward_pops,
        stalled = stats.stalled_nodes,
        joins = stats.join_operations,
        loop_corrections = stats.loop_corrections,
        backward_ms = stats.backward_time_ms,
        forward_ms = stats.forward_time_ms,
        "many-to-many table computed"
    );
}
