//! Bidirectional point-to-point CH search
//!
//! The 1×1 case of the table machinery: a forward search from the source
//! phantom and a backward search from the target phantom, alternating steps
//! until both heaps are exhausted or pruned by the best meeting found so far.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::graph::{EdgeWeight, NodeId, QueryGraph, INVALID_EDGE_WEIGHT, SPECIAL_NODE_ID};
use crate::phantom::PhantomNode;
use crate::search::{is_stalled, relax, seed_phantom, Direction};
use crate::workspace::{SearchHeap, SearchWorkspace};

/// Result of a point-to-point query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortestPath {
    /// `INVALID_EDGE_WEIGHT` when the target is unreachable
    pub weight: EdgeWeight,
    /// Packed node sequence from the source seed to the target seed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<NodeId>>,
}

impl ShortestPath {
    pub fn unreachable() -> Self {
        Self {
            weight: INVALID_EDGE_WEIGHT,
            path: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.weight != INVALID_EDGE_WEIGHT
    }
}

/// Best meeting of the two searches so far
struct Meeting {
    middle: NodeId,
    upper_bound: EdgeWeight,
}

pub fn point_to_point<G: QueryGraph + ?Sized>(
    graph: &G,
    workspace: &mut SearchWorkspace,
    source: &PhantomNode,
    target: &PhantomNode,
    want_path: bool,
    cancel: &CancelToken,
) -> Result<ShortestPath, QueryError> {
    let node_count = graph.node_count();
    if !source.is_valid(node_count) {
        return Err(QueryError::InvalidPhantom { index: 0 });
    }
    if !target.is_valid(node_count) {
        return Err(QueryError::InvalidPhantom { index: 1 });
    }

    workspace.ensure_capacity(node_count);
    let (forward, reverse) = workspace.bidirectional_heaps();
    forward.clear();
    reverse.clear();
    seed_phantom(forward, source, Direction::Forward);
    seed_phantom(reverse, target, Direction::Backward);

    // Only the forward heap holds negative seeds
    let min_edge_offset = forward.min_key().unwrap_or(0).min(0);
    let mut meeting = Meeting {
        middle: SPECIAL_NODE_ID,
        upper_bound: INVALID_EDGE_WEIGHT,
    };

    while !forward.is_empty() || !reverse.is_empty() {
        if !forward.is_empty() {
            routing_step(
                graph,
                forward,
                reverse,
                Direction::Forward,
                &mut meeting,
                min_edge_offset,
                cancel,
            )?;
        }
        if !reverse.is_empty() {
            routing_step(
                graph,
                reverse,
                forward,
                Direction::Backward,
                &mut meeting,
                min_edge_offset,
                cancel,
            )?;
        }
    }

    if meeting.upper_bound == INVALID_EDGE_WEIGHT || meeting.middle == SPECIAL_NODE_ID {
        return Ok(ShortestPath::unreachable());
    }

    let path = want_path.then(|| packed_path(forward, reverse, meeting.middle));
    Ok(ShortestPath {
        weight: meeting.upper_bound,
        path,
    })
}

/// Settle one node of `heap`, updating the meeting with `opposite`
fn routing_step<G: QueryGraph + ?Sized>(
    graph: &G,
    heap: &mut SearchHeap,
    opposite: &SearchHeap,
    direction: Direction,
    meeting: &mut Meeting,
    min_edge_offset: EdgeWeight,
    cancel: &CancelToken,
) -> Result<(), QueryError> {
    cancel.check()?;
    let (node, weight) = heap.pop_min_with_key()?;

    if let Some(opposite_key) = opposite.key_of(node) {
        let new_weight = weight.saturating_add(opposite_key);
        if new_weight < meeting.upper_bound {
            if new_weight < 0 {
                // Source and target on the same edge-based node
                match graph.self_loop_weight(node) {
                    Some(loop_weight) => {
                        let looped = new_weight + loop_weight;
                        if looped >= 0 && looped < meeting.upper_bound {
                            meeting.middle = node;
                            meeting.upper_bound = looped;
                        }
                    }
                    None => trace!(node, new_weight, "discarding negative meeting"),
                }
            } else {
                meeting.middle = node;
                meeting.upper_bound = new_weight;
            }
        }
    }

    // Seeds may start below zero, so keep searching until the offset is covered
    if weight.saturating_add(min_edge_offset) > meeting.upper_bound {
        heap.delete_all();
        return Ok(());
    }

    if is_stalled(graph, heap, direction, node, weight)? {
        return Ok(());
    }
    relax(graph, heap, direction, node, weight)
}

/// Walk parent pointers out of both heaps; roots are their own parent
fn packed_path(forward: &SearchHeap, reverse: &SearchHeap, middle: NodeId) -> Vec<NodeId> {
    let mut path = vec![middle];
    let mut current = middle;
    while let Some(data) = forward.payload(current) {
        if data.parent == current {
            break;
        }
        current = data.parent;
        path.push(current);
    }
    path.reverse();

    current = middle;
    while let Some(data) = reverse.payload(current) {
        if data.parent == current {
            break;
        }
        current = data.parent;
        path.push(current);
    }
    path
}
