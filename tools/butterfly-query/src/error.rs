//! Query-time error taxonomy
//!
//! Unreachable pairs are not errors: they are the `INVALID_EDGE_WEIGHT`
//! sentinel inside a result. Everything here aborts the current query only;
//! shared graph data is never touched on an error path.

use thiserror::Error;

use crate::graph::{EdgeWeight, NodeId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Preprocessed data violates an invariant (non-positive edge weight)
    #[error("data corruption: edge {node} -> {target} has non-positive weight {weight}")]
    DataCorruption {
        node: NodeId,
        target: NodeId,
        weight: EdgeWeight,
    },

    /// `pop_min` on an empty heap, always an algorithm bug
    #[error("pop from an empty query heap")]
    EmptyHeap,

    /// Source or target index does not refer to a supplied phantom
    #[error("phantom index {index} out of range ({len} phantoms)")]
    InvalidPhantomIndex { index: usize, len: usize },

    /// Phantom references a node outside the loaded graph
    #[error("phantom {index} does not match the loaded graph")]
    InvalidPhantom { index: usize },

    /// Caller cancelled the query or its deadline passed
    #[error("query cancelled")]
    Cancelled,

    /// Table request exceeds the configured maximum size
    #[error("number of entries {entries} is higher than current maximum ({max})")]
    TableTooLarge { entries: usize, max: usize },

    /// Request is structurally invalid for the selected service
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl QueryError {
    /// Fatal errors signal invalid preprocessed input or a bug, not bad client input
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueryError::DataCorruption { .. } | QueryError::EmptyHeap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(QueryError::EmptyHeap.is_fatal());
        assert!(QueryError::DataCorruption { node: 1, target: 2, weight: 0 }.is_fatal());
        assert!(!QueryError::Cancelled.is_fatal());
        assert!(!QueryError::InvalidPhantomIndex { index: 3, len: 2 }.is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = QueryError::TableTooLarge { entries: 10_000, max: 2_500 };
        assert_eq!(
            err.to_string(),
            "number of entries 10000 is higher than current maximum (2500)"
        );
    }
}
