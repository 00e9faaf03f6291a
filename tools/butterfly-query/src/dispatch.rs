//! Named-service dispatch over the shared dataset
//!
//! [`Engine::dispatch`] is the only entry point the request layer needs:
//! it resolves the service, enters the gate, pins a snapshot, checks out a
//! workspace and maps the outcome to a status code. Failures come back as
//! responses, never as panics or `Err`.

use std::fmt;
use std::time::Instant;

use butterfly_common::{suggest_service, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::dataset::{DatasetHandle, Snapshot};
use crate::error::QueryError;
use crate::gate::QueryGate;
use crate::graph::{EdgeWeight, NodeId, QueryGraph, INVALID_EDGE_WEIGHT};
use crate::matrix::{many_to_many, many_to_many_parallel, ResultMatrix};
use crate::phantom::PhantomNode;
use crate::route::point_to_point;
use crate::workspace::{SearchWorkspace, WorkspacePool};

// ============ Request / Response ============

/// Request shared by all services; each service reads the fields it needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRequest {
    pub phantoms: Vec<PhantomNode>,
    /// Row phantoms; empty means all
    pub sources: Vec<usize>,
    /// Column phantoms; empty means all
    pub destinations: Vec<usize>,
    /// Return the packed node path with a route
    pub want_path: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    RequestTimeout,
    InternalError,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::RequestTimeout => 408,
            StatusCode::InternalError => 500,
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Table {
        generation: u64,
        matrix: ResultMatrix,
    },
    Route {
        generation: u64,
        weight: EdgeWeight,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<Vec<NodeId>>,
    },
    Timestamp {
        generation: u64,
        published_at: DateTime<Utc>,
    },
    Error {
        error: String,
    },
}

impl Payload {
    /// Status for a successfully computed payload
    fn status(&self) -> StatusCode {
        match self {
            Payload::Route { weight, .. } if *weight == INVALID_EDGE_WEIGHT => StatusCode::NotFound,
            Payload::Error { .. } => StatusCode::BadRequest,
            _ => StatusCode::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub payload: Payload,
}

impl ServiceResponse {
    fn error(status: StatusCode, message: String) -> Self {
        Self {
            status,
            payload: Payload::Error { error: message },
        }
    }
}

fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::InvalidPhantomIndex { .. }
        | QueryError::InvalidPhantom { .. }
        | QueryError::TableTooLarge { .. }
        | QueryError::InvalidRequest(_) => StatusCode::BadRequest,
        QueryError::Cancelled => StatusCode::RequestTimeout,
        QueryError::DataCorruption { .. } | QueryError::EmptyHeap => StatusCode::InternalError,
    }
}

// ============ Services ============

/// Everything a service may touch while answering one request
pub struct QueryContext<'a, G> {
    pub snapshot: &'a Snapshot<G>,
    pub workspace: &'a mut SearchWorkspace,
    /// Extra workspaces for parallel table rows
    pub pool: &'a WorkspacePool,
    pub config: &'a EngineConfig,
    pub cancel: &'a CancelToken,
}

pub trait Service<G>: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(
        &self,
        ctx: &mut QueryContext<'_, G>,
        request: &ServiceRequest,
    ) -> Result<Payload, QueryError>;
}

/// Many-to-many weight table
pub struct TableService;

impl<G: QueryGraph + Sync> Service<G> for TableService {
    fn name(&self) -> &'static str {
        "table"
    }

    fn handle(
        &self,
        ctx: &mut QueryContext<'_, G>,
        request: &ServiceRequest,
    ) -> Result<Payload, QueryError> {
        let phantoms = &request.phantoms;
        if phantoms.is_empty() {
            return Err(QueryError::InvalidRequest(
                "table needs at least one phantom".to_string(),
            ));
        }

        let rows = if request.sources.is_empty() { phantoms.len() } else { request.sources.len() };
        let cols = if request.destinations.is_empty() {
            phantoms.len()
        } else {
            request.destinations.len()
        };
        let entries = rows.saturating_mul(cols);
        let max = ctx.config.max_table_entries();
        if entries > max {
            return Err(QueryError::TableTooLarge { entries, max });
        }

        let graph = ctx.snapshot.graph();
        let matrix = if ctx.config.parallel_rows {
            many_to_many_parallel(
                graph,
                ctx.workspace,
                ctx.pool,
                phantoms,
                &request.sources,
                &request.destinations,
                ctx.cancel,
            )?
        } else {
            many_to_many(
                graph,
                ctx.workspace,
                phantoms,
                &request.sources,
                &request.destinations,
                ctx.cancel,
            )?
        };

        Ok(Payload::Table {
            generation: ctx.snapshot.generation(),
            matrix,
        })
    }
}

/// Point-to-point weight and packed path
pub struct RouteService;

impl RouteService {
    /// Phantom indices of the route endpoints
    fn endpoints(request: &ServiceRequest) -> Result<(usize, usize), QueryError> {
        let len = request.phantoms.len();
        let (source, target) = if request.sources.is_empty() && request.destinations.is_empty() {
            if len != 2 {
                return Err(QueryError::InvalidRequest(format!(
                    "route needs exactly two phantoms, got {len}"
                )));
            }
            (0, 1)
        } else {
            match (request.sources.as_slice(), request.destinations.as_slice()) {
                (&[source], &[target]) => (source, target),
                _ => {
                    return Err(QueryError::InvalidRequest(
                        "route needs exactly one source and one destination".to_string(),
                    ))
                }
            }
        };
        for index in [source, target] {
            if index >= len {
                return Err(QueryError::InvalidPhantomIndex { index, len });
            }
        }
        Ok((source, target))
    }
}

impl<G: QueryGraph + Sync> Service<G> for RouteService {
    fn name(&self) -> &'static str {
        "route"
    }

    fn handle(
        &self,
        ctx: &mut QueryContext<'_, G>,
        request: &ServiceRequest,
    ) -> Result<Payload, QueryError> {
        let (source, target) = Self::endpoints(request)?;
        let result = point_to_point(
            ctx.snapshot.graph(),
            ctx.workspace,
            &request.phantoms[source],
            &request.phantoms[target],
            request.want_path,
            ctx.cancel,
        )
        .map_err(|err| match err {
            // Report the caller's phantom index, not the role
            QueryError::InvalidPhantom { index: 0 } => QueryError::InvalidPhantom { index: source },
            QueryError::InvalidPhantom { .. } => QueryError::InvalidPhantom { index: target },
            other => other,
        })?;

        Ok(Payload::Route {
            generation: ctx.snapshot.generation(),
            weight: result.weight,
            path: result.path,
        })
    }
}

/// Generation and publish time of the dataset answering queries
pub struct TimestampService;

impl<G> Service<G> for TimestampService {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn handle(
        &self,
        ctx: &mut QueryContext<'_, G>,
        _request: &ServiceRequest,
    ) -> Result<Payload, QueryError> {
        Ok(Payload::Timestamp {
            generation: ctx.snapshot.generation(),
            published_at: ctx.snapshot.published_at(),
        })
    }
}

// ============ Engine ============

pub struct Engine<G> {
    config: EngineConfig,
    gate: QueryGate,
    dataset: DatasetHandle<G>,
    pool: WorkspacePool,
    services: Vec<Box<dyn Service<G>>>,
}

impl<G: QueryGraph + Send + Sync + 'static> Engine<G> {
    /// Engine with the `table`, `route` and `timestamp` services registered
    pub fn new(config: EngineConfig, graph: G) -> Self {
        let dataset = if config.live_reload {
            DatasetHandle::new_live(graph)
        } else {
            DatasetHandle::new_static(graph)
        };
        info!(
            nodes = dataset.snapshot().graph().node_count(),
            live_reload = config.live_reload,
            parallel_rows = config.parallel_rows,
            "Query engine ready"
        );
        Self {
            gate: QueryGate::for_live_reload(config.live_reload),
            pool: WorkspacePool::new(config.workspace_pool_size),
            dataset,
            config,
            services: vec![
                Box::new(TableService),
                Box::new(RouteService),
                Box::new(TimestampService),
            ],
        }
    }

    pub fn register(&mut self, service: Box<dyn Service<G>>) {
        self.services.retain(|s| s.name() != service.name());
        self.services.push(service);
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gate(&self) -> &QueryGate {
        &self.gate
    }

    pub fn dataset(&self) -> &DatasetHandle<G> {
        &self.dataset
    }

    pub fn generation(&self) -> u64 {
        self.dataset.generation()
    }

    pub fn dispatch(&self, service_name: &str, request: &ServiceRequest) -> ServiceResponse {
        self.dispatch_with_cancel(service_name, request, &CancelToken::none())
    }

    /// [`Engine::dispatch`] that the caller can abort through `cancel`
    pub fn dispatch_with_cancel(
        &self,
        service_name: &str,
        request: &ServiceRequest,
        cancel: &CancelToken,
    ) -> ServiceResponse {
        let Some(service) = self
            .services
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(service_name))
        else {
            let names = self.service_names();
            let err = Error::UnknownService {
                name: service_name.to_string(),
                suggestion: suggest_service(service_name, &names),
            };
            warn!(service = service_name, "Rejected request: {err}");
            return ServiceResponse::error(StatusCode::BadRequest, err.to_string());
        };

        let limited;
        let cancel = match self.config.query_timeout() {
            Some(timeout) => {
                limited = cancel.limited_to(timeout);
                &limited
            }
            None => cancel,
        };

        let start = Instant::now();
        let _guard = self.gate.enter_query(&self.dataset);
        let snapshot = self.dataset.snapshot();
        let mut workspace = self.pool.checkout();
        let mut ctx = QueryContext {
            snapshot: &snapshot,
            workspace: &mut workspace,
            pool: &self.pool,
            config: &self.config,
            cancel,
        };

        let response = match service.handle(&mut ctx, request) {
            Ok(payload) => ServiceResponse {
                status: payload.status(),
                payload,
            },
            Err(err) => {
                let status = status_for(&err);
                if err.is_fatal() {
                    error!(service = service.name(), generation = snapshot.generation(), %err, "Query aborted");
                } else {
                    warn!(service = service.name(), %err, "Rejected request");
                }
                ServiceResponse::error(status, err.to_string())
            }
        };

        debug!(
            service = service.name(),
            status = response.status.as_u16(),
            generation = snapshot.generation(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatched query"
        );
        response
    }

    /// Replace the dataset once running queries have drained
    pub fn reload(&self, graph: G) -> butterfly_common::Result<u64> {
        self.gate.exclusive_update(|| self.dataset.swap(graph))
    }

    /// Publish `graph` for the next idle-to-busy transition of the gate
    pub fn stage(&self, graph: G) -> butterfly_common::Result<u64> {
        self.dataset.stage(graph)
    }
}
