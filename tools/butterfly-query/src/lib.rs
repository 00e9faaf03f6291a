//! Contraction-hierarchy query engine
//!
//! Answers many-to-many tables and point-to-point queries over a prebuilt
//! hierarchy, serving concurrent readers against one dataset that a loader
//! may replace at any time.

pub mod cancel;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod graph;
pub mod heap;
pub mod logging;
pub mod matrix;
pub mod phantom;
pub mod route;
pub mod search;
pub mod workspace;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use dataset::{DatasetHandle, GenerationSource, Snapshot};
pub use dispatch::{Engine, Payload, ServiceRequest, ServiceResponse, StatusCode};
pub use error::QueryError;
pub use gate::{GateState, QueryGate};
pub use graph::{
    EdgeData, EdgeId, EdgeWeight, InputEdge, NodeId, QueryGraph, StaticGraph,
    INVALID_EDGE_WEIGHT, SPECIAL_NODE_ID,
};
pub use matrix::{many_to_many, many_to_many_parallel, ManyToManyStats, ResultMatrix};
pub use phantom::{PhantomEndpoint, PhantomNode};
pub use route::{point_to_point, ShortestPath};
pub use workspace::{SearchWorkspace, WorkspacePool};
