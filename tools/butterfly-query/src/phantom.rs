//! Snapped query endpoints
//!
//! A phantom is the graph-side view of one input coordinate. Snapping itself
//! happens upstream; the engine only consumes the resulting endpoints.

use serde::{Deserialize, Serialize};

use crate::graph::{EdgeWeight, NodeId};

/// One usable direction of a phantom: a graph node plus the fractional cost
/// from the coordinate to that node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhantomEndpoint {
    pub node: NodeId,
    #[serde(default)]
    pub weight_offset: EdgeWeight,
}

impl PhantomEndpoint {
    pub fn new(node: NodeId, weight_offset: EdgeWeight) -> Self {
        Self {
            node,
            weight_offset,
        }
    }
}

/// Snapped coordinate exposing zero, one or two usable directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhantomNode {
    #[serde(default)]
    pub forward: Option<PhantomEndpoint>,
    #[serde(default)]
    pub reverse: Option<PhantomEndpoint>,
}

impl PhantomNode {
    /// Phantom sitting exactly on `node`, usable in one direction
    pub fn at_node(node: NodeId) -> Self {
        Self {
            forward: Some(PhantomEndpoint::new(node, 0)),
            reverse: None,
        }
    }

    /// Phantom on a two-way edge, with offsets toward each endpoint
    pub fn on_edge(forward: PhantomEndpoint, reverse: PhantomEndpoint) -> Self {
        Self {
            forward: Some(forward),
            reverse: Some(reverse),
        }
    }

    /// Usable endpoints, forward first
    pub fn endpoints(&self) -> impl Iterator<Item = PhantomEndpoint> + '_ {
        self.forward.iter().chain(self.reverse.iter()).copied()
    }

    pub fn has_endpoint(&self) -> bool {
        self.forward.is_some() || self.reverse.is_some()
    }

    /// Every present endpoint refers to a node of a graph with `node_count` nodes
    pub fn is_valid(&self, node_count: usize) -> bool {
        self.endpoints()
            .all(|e| (e.node as usize) < node_count && e.weight_offset >= 0)
    }

    /// Smallest offset among usable endpoints, 0 when there are none
    pub fn min_weight_offset(&self) -> EdgeWeight {
        self.endpoints()
            .map(|e| e.weight_offset)
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_order() {
        let p = PhantomNode::on_edge(PhantomEndpoint::new(3, 7), PhantomEndpoint::new(4, 2));
        let nodes: Vec<_> = p.endpoints().map(|e| e.node).collect();
        assert_eq!(nodes, vec![3, 4]);
        assert_eq!(p.min_weight_offset(), 2);
    }

    #[test]
    fn test_empty_phantom() {
        let p = PhantomNode::default();
        assert!(!p.has_endpoint());
        assert_eq!(p.endpoints().count(), 0);
        assert!(p.is_valid(0));
        assert_eq!(p.min_weight_offset(), 0);
    }

    #[test]
    fn test_is_valid() {
        assert!(PhantomNode::at_node(3).is_valid(4));
        assert!(!PhantomNode::at_node(4).is_valid(4));

        let negative = PhantomNode {
            forward: Some(PhantomEndpoint::new(0, -1)),
            reverse: None,
        };
        assert!(!negative.is_valid(4));
    }

    #[test]
    fn test_deserialize_partial() {
        let p: PhantomNode = serde_json::from_str(r#"{"reverse": {"node": 5}}"#).unwrap();
        assert_eq!(p.forward, None);
        assert_eq!(p.reverse, Some(PhantomEndpoint::new(5, 0)));
    }
}
