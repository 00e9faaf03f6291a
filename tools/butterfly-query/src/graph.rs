//! Read-only graph access for the query engine
//!
//! The hierarchy itself is produced offline. At query time the engine only
//! needs adjacency ranges, per-edge data and the target of each edge, which is
//! what [`QueryGraph`] exposes. [`StaticGraph`] is the in-memory CSR layout
//! used by the binaries and the tests.

use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::Range;
use std::path::Path;

use butterfly_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub type NodeId = u32;
pub type EdgeId = u32;
pub type EdgeWeight = i32;

/// Unreachable sentinel used in every result
pub const INVALID_EDGE_WEIGHT: EdgeWeight = i32::MAX;
pub const SPECIAL_NODE_ID: NodeId = u32::MAX;

/// Edge properties as stored in the hierarchy
///
/// An edge is stored in the adjacency of one endpoint. `forward` means the
/// forward (source-side) search may follow it, `backward` means the backward
/// (target-side) search may follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    pub weight: EdgeWeight,
    pub forward: bool,
    pub backward: bool,
}

/// Graph accessor consumed by every search
pub trait QueryGraph {
    fn node_count(&self) -> usize;

    fn adjacent_edges(&self, node: NodeId) -> Range<EdgeId>;

    fn edge_data(&self, edge: EdgeId) -> EdgeData;

    fn edge_target(&self, edge: EdgeId) -> NodeId;

    /// Weight of the cheapest forward-usable loop edge `node -> node`
    ///
    /// Contraction creates such loops when a phantom pair lies on the same
    /// edge-based node and the target precedes the source.
    fn self_loop_weight(&self, node: NodeId) -> Option<EdgeWeight> {
        self.adjacent_edges(node)
            .filter(|&edge| self.edge_target(edge) == node)
            .map(|edge| self.edge_data(edge))
            .filter(|data| data.forward)
            .map(|data| data.weight)
            .min()
    }
}

fn default_true() -> bool {
    true
}

/// Edge as read from a graph file, before CSR layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: EdgeWeight,
    #[serde(default = "default_true")]
    pub forward: bool,
    #[serde(default = "default_true")]
    pub backward: bool,
}

/// On-disk JSON representation of a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFile {
    pub node_count: usize,
    pub edges: Vec<InputEdge>,
}

/// CSR adjacency with embedded edge data
#[derive(Debug, Clone)]
pub struct StaticGraph {
    offsets: Vec<u32>, // node_count + 1
    targets: Vec<NodeId>,
    data: Vec<EdgeData>,
}

impl StaticGraph {
    /// Build the CSR layout; edges keep their input order within a node
    pub fn from_edges(node_count: usize, edges: &[InputEdge]) -> Result<Self> {
        if node_count >= SPECIAL_NODE_ID as usize {
            return Err(Error::InvalidInput(format!(
                "node count {node_count} exceeds the node id space"
            )));
        }
        if edges.len() >= u32::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "edge count {} exceeds the edge id space",
                edges.len()
            )));
        }

        // First pass: count edges per node
        let mut counts = vec![0u32; node_count];
        for edge in edges {
            if edge.source as usize >= node_count || edge.target as usize >= node_count {
                return Err(Error::InvalidInput(format!(
                    "edge {} -> {} references a node outside 0..{}",
                    edge.source, edge.target, node_count
                )));
            }
            counts[edge.source as usize] += 1;
        }

        // Build offsets (prefix sum)
        let mut offsets = Vec::with_capacity(node_count + 1);
        let mut offset = 0u32;
        for &count in &counts {
            offsets.push(offset);
            offset += count;
        }
        offsets.push(offset);

        // Second pass: place edges
        let mut targets = vec![0 as NodeId; edges.len()];
        let mut data = vec![
            EdgeData {
                weight: INVALID_EDGE_WEIGHT,
                forward: false,
                backward: false,
            };
            edges.len()
        ];
        counts.fill(0);
        for edge in edges {
            let source = edge.source as usize;
            let pos = (offsets[source] + counts[source]) as usize;
            targets[pos] = edge.target;
            data[pos] = EdgeData {
                weight: edge.weight,
                forward: edge.forward,
                backward: edge.backward,
            };
            counts[source] += 1;
        }

        Ok(Self {
            offsets,
            targets,
            data,
        })
    }

    /// Graph where every `(u, v, w)` is a one-way edge `u -> v`
    ///
    /// Each edge is stored twice: at `u` for the forward search and at `v`
    /// for the backward search.
    pub fn from_directed_edges(
        node_count: usize,
        edges: &[(NodeId, NodeId, EdgeWeight)],
    ) -> Result<Self> {
        let mut input = Vec::with_capacity(edges.len() * 2);
        for &(source, target, weight) in edges {
            input.push(InputEdge {
                source,
                target,
                weight,
                forward: true,
                backward: false,
            });
            input.push(InputEdge {
                source: target,
                target: source,
                weight,
                forward: false,
                backward: true,
            });
        }
        Self::from_edges(node_count, &input)
    }

    /// Graph where every `(u, v, w)` can be travelled both ways
    pub fn from_undirected_edges(
        node_count: usize,
        edges: &[(NodeId, NodeId, EdgeWeight)],
    ) -> Result<Self> {
        let mut input = Vec::with_capacity(edges.len() * 2);
        for &(source, target, weight) in edges {
            input.push(InputEdge {
                source,
                target,
                weight,
                forward: true,
                backward: true,
            });
            if source != target {
                input.push(InputEdge {
                    source: target,
                    target: source,
                    weight,
                    forward: true,
                    backward: true,
                });
            }
        }
        Self::from_edges(node_count, &input)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let file: GraphFile = serde_json::from_reader(reader)?;
        Self::from_edges(file.node_count, &file.edges)
    }

    /// Load a [`GraphFile`] from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }
}

impl QueryGraph for StaticGraph {
    #[inline]
    fn node_count(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    fn adjacent_edges(&self, node: NodeId) -> Range<EdgeId> {
        let n = node as usize;
        self.offsets[n]..self.offsets[n + 1]
    }

    #[inline]
    fn edge_data(&self, edge: EdgeId) -> EdgeData {
        self.data[edge as usize]
    }

    #[inline]
    fn edge_target(&self, edge: EdgeId) -> NodeId {
        self.targets[edge as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_layout() {
        let graph = StaticGraph::from_directed_edges(3, &[(0, 1, 5), (1, 2, 7)]).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 4);

        // Node 1 holds the backward half of 0->1 and the forward half of 1->2
        let edges: Vec<_> = graph
            .adjacent_edges(1)
            .map(|e| (graph.edge_target(e), graph.edge_data(e)))
            .collect();
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&(
            0,
            EdgeData { weight: 5, forward: false, backward: true }
        )));
        assert!(edges.contains(&(
            2,
            EdgeData { weight: 7, forward: true, backward: false }
        )));
    }

    #[test]
    fn test_rejects_out_of_range_nodes() {
        let err = StaticGraph::from_directed_edges(2, &[(0, 2, 1)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_self_loop_weight() {
        let graph =
            StaticGraph::from_directed_edges(2, &[(0, 0, 9), (0, 0, 4), (0, 1, 1)]).unwrap();
        assert_eq!(graph.self_loop_weight(0), Some(4));
        assert_eq!(graph.self_loop_weight(1), None);
    }

    #[test]
    fn test_load_json_defaults_flags() {
        let json = r#"{"node_count": 2, "edges": [{"source": 0, "target": 1, "weight": 3}]}"#;
        let graph = StaticGraph::from_reader(json.as_bytes()).unwrap();
        let edge = graph.adjacent_edges(0).start;
        assert_eq!(
            graph.edge_data(edge),
            EdgeData { weight: 3, forward: true, backward: true }
        );
        assert!(graph.adjacent_edges(1).is_empty());
    }
}
