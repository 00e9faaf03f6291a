//! Direction-parameterized Dijkstra primitives shared by every CH search
//!
//! Both the many-to-many sweeps and the point-to-point search settle a node
//! the same way: stall check against the opposite direction, then relax the
//! edges usable in the search direction.

use crate::error::QueryError;
use crate::graph::{EdgeData, EdgeWeight, NodeId, QueryGraph};
use crate::heap::SearchData;
use crate::phantom::PhantomNode;
use crate::workspace::SearchHeap;

/// Which edge flag a search follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Source-side search, follows `forward` edges
    Forward,
    /// Target-side search, follows `backward` edges
    Backward,
}

impl Direction {
    #[inline]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    #[inline]
    pub fn allows(self, data: &EdgeData) -> bool {
        match self {
            Direction::Forward => data.forward,
            Direction::Backward => data.backward,
        }
    }
}

#[inline]
fn checked_weight(node: NodeId, target: NodeId, data: &EdgeData) -> Result<EdgeWeight, QueryError> {
    if data.weight <= 0 {
        return Err(QueryError::DataCorruption {
            node,
            target,
            weight: data.weight,
        });
    }
    Ok(data.weight)
}

/// Queue the usable endpoints of `phantom` as search roots
///
/// Forward (source) seeds are negated offsets, backward (target) seeds are
/// plain offsets, so a meeting sum is the true cost between the two phantoms.
/// A root is its own parent.
pub fn seed_phantom(heap: &mut SearchHeap, phantom: &PhantomNode, direction: Direction) {
    for endpoint in phantom.endpoints() {
        let key = match direction {
            Direction::Forward => -endpoint.weight_offset,
            Direction::Backward => endpoint.weight_offset,
        };
        match heap.key_of(endpoint.node) {
            None => heap.insert(endpoint.node, key, SearchData::new(endpoint.node)),
            Some(current) if key < current => heap.decrease_key(endpoint.node, key),
            Some(_) => {}
        }
    }
}

/// Stall-on-demand test for a node just popped at `weight`
///
/// The node is stalled when a neighbour reachable over an edge usable in the
/// opposite direction already carries a key that makes `weight` sub-optimal.
/// Settled neighbours count: their keys stay in the heap.
pub fn is_stalled<G: QueryGraph + ?Sized>(
    graph: &G,
    heap: &SearchHeap,
    direction: Direction,
    node: NodeId,
    weight: EdgeWeight,
) -> Result<bool, QueryError> {
    let reverse = direction.opposite();
    for edge in graph.adjacent_edges(node) {
        let data = graph.edge_data(edge);
        if !reverse.allows(&data) {
            continue;
        }
        let target = graph.edge_target(edge);
        let edge_weight = checked_weight(node, target, &data)?;
        if let Some(key) = heap.key_of(target) {
            if key.saturating_add(edge_weight) < weight {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Relax every edge of `node` usable in `direction`
pub fn relax<G: QueryGraph + ?Sized>(
    graph: &G,
    heap: &mut SearchHeap,
    direction: Direction,
    node: NodeId,
    weight: EdgeWeight,
) -> Result<(), QueryError> {
    for edge in graph.adjacent_edges(node) {
        let data = graph.edge_data(edge);
        if !direction.allows(&data) {
            continue;
        }
        let target = graph.edge_target(edge);
        let edge_weight = checked_weight(node, target, &data)?;
        let candidate = weight.saturating_add(edge_weight);

        match heap.key_of(target) {
            None => heap.insert(target, candidate, SearchData::new(node)),
            Some(key) if candidate < key => {
                if let Some(payload) = heap.payload_mut(target) {
                    payload.parent = node;
                }
                heap.decrease_key(target, candidate);
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StaticGraph;
    use crate::heap::QueryHeap;

    #[test]
    fn test_direction_flags() {
        let fwd_only = EdgeData { weight: 1, forward: true, backward: false };
        assert!(Direction::Forward.allows(&fwd_only));
        assert!(!Direction::Backward.allows(&fwd_only));
        assert_eq!(Direction::Forward.opposite(), Direction::Backward);
    }

    #[test]
    fn test_seed_negates_sources_only() {
        use crate::phantom::PhantomEndpoint;

        let phantom = PhantomNode::on_edge(PhantomEndpoint::new(1, 4), PhantomEndpoint::new(2, 6));
        let mut heap = QueryHeap::new(3);
        seed_phantom(&mut heap, &phantom, Direction::Forward);
        assert_eq!(heap.key_of(1), Some(-4));
        assert_eq!(heap.key_of(2), Some(-6));
        assert_eq!(heap.payload(2).unwrap().parent, 2);

        heap.clear();
        seed_phantom(&mut heap, &phantom, Direction::Backward);
        assert_eq!(heap.min_key(), Some(4));
    }

    #[test]
    fn test_relax_inserts_and_decreases() {
        // 0 -> 1 (5), 0 -> 2 (1), 2 -> 1 (1)
        let graph = StaticGraph::from_directed_edges(3, &[(0, 1, 5), (0, 2, 1), (2, 1, 1)]).unwrap();
        let mut heap = QueryHeap::new(3);
        heap.insert(0, 0, SearchData::new(0));

        let node = heap.pop_min().unwrap();
        relax(&graph, &mut heap, Direction::Forward, node, 0).unwrap();
        assert_eq!(heap.key_of(1), Some(5));
        assert_eq!(heap.key_of(2), Some(1));

        let node = heap.pop_min().unwrap();
        assert_eq!(node, 2);
        relax(&graph, &mut heap, Direction::Forward, node, 1).unwrap();
        assert_eq!(heap.key_of(1), Some(2));
        assert_eq!(heap.payload(1).unwrap().parent, 2);
    }

    #[test]
    fn test_relax_respects_direction() {
        let graph = StaticGraph::from_directed_edges(2, &[(0, 1, 3)]).unwrap();
        let mut heap = QueryHeap::new(2);
        heap.insert(1, 0, SearchData::new(1));
        let node = heap.pop_min().unwrap();

        // Forward search from 1 must not use the stored backward half
        relax(&graph, &mut heap, Direction::Forward, node, 0).unwrap();
        assert!(!heap.contains(0));

        relax(&graph, &mut heap, Direction::Backward, node, 0).unwrap();
        assert_eq!(heap.key_of(0), Some(3));
    }

    #[test]
    fn test_stall_detects_cheaper_opposite_path() {
        // Edges into node 2: from 0 (weight 1) and from 1 (weight 10)
        let graph = StaticGraph::from_directed_edges(3, &[(0, 2, 1), (1, 2, 10)]).unwrap();
        let mut heap = QueryHeap::new(3);
        heap.insert(0, 0, SearchData::default());

        // Node 2 reached at 5 while 0 sits at 0: 0 + 1 < 5
        assert!(is_stalled(&graph, &heap, Direction::Forward, 2, 5).unwrap());
        // Reached at exactly 1: not strictly cheaper
        assert!(!is_stalled(&graph, &heap, Direction::Forward, 2, 1).unwrap());
        // Backward search looks at forward edges out of 2: there are none
        assert!(!is_stalled(&graph, &heap, Direction::Backward, 2, 5).unwrap());
    }

    #[test]
    fn test_non_positive_weight_is_corruption() {
        let graph = StaticGraph::from_directed_edges(2, &[(0, 1, 0)]).unwrap();
        let mut heap = QueryHeap::new(2);
        let err = relax(&graph, &mut heap, Direction::Forward, 0, 0).unwrap_err();
        assert_eq!(
            err,
            QueryError::DataCorruption { node: 0, target: 1, weight: 0 }
        );

        let err = is_stalled(&graph, &heap, Direction::Forward, 1, 0).unwrap_err();
        assert!(err.is_fatal());
    }
}
