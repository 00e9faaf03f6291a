//! Dataset generations shared by all queries
//!
//! Queries never see a graph directly: they clone an `Arc<Snapshot<G>>` after
//! entering the gate and keep it until they finish. A reload replaces that
//! `Arc`, so in-flight queries keep the generation they started with.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use butterfly_common::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::info;

/// Collaborator the gate asks to publish a pending generation
///
/// Only called from inside the gate's critical section, when no other query
/// is running.
pub trait GenerationSource {
    fn try_apply_newer_generation(&self) -> bool;
}

/// One immutable published dataset
#[derive(Debug)]
pub struct Snapshot<G> {
    generation: u64,
    published_at: DateTime<Utc>,
    graph: G,
}

impl<G> Snapshot<G> {
    pub fn new(generation: u64, graph: G) -> Self {
        Self {
            generation,
            published_at: Utc::now(),
            graph,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }
}

impl<G> Deref for Snapshot<G> {
    type Target = G;

    fn deref(&self) -> &G {
        &self.graph
    }
}

/// Current dataset plus an optionally staged successor
#[derive(Debug)]
pub struct LiveDataset<G> {
    current: RwLock<Arc<Snapshot<G>>>,
    staged: Mutex<Option<Arc<Snapshot<G>>>>,
    next_generation: AtomicU64,
}

#[derive(Debug)]
pub enum DatasetHandle<G> {
    /// Loaded once, never replaced
    Static(Arc<Snapshot<G>>),
    /// Replaceable by a loader
    Live(LiveDataset<G>),
}

impl<G> DatasetHandle<G> {
    pub fn new_static(graph: G) -> Self {
        DatasetHandle::Static(Arc::new(Snapshot::new(1, graph)))
    }

    pub fn new_live(graph: G) -> Self {
        DatasetHandle::Live(LiveDataset {
            current: RwLock::new(Arc::new(Snapshot::new(1, graph))),
            staged: Mutex::new(None),
            next_generation: AtomicU64::new(2),
        })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, DatasetHandle::Live(_))
    }

    /// Snapshot a query works against until it completes
    pub fn snapshot(&self) -> Arc<Snapshot<G>> {
        match self {
            DatasetHandle::Static(snapshot) => Arc::clone(snapshot),
            DatasetHandle::Live(live) => Arc::clone(&*live.current.read()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    fn live(&self) -> Result<&LiveDataset<G>> {
        match self {
            DatasetHandle::Live(live) => Ok(live),
            DatasetHandle::Static(_) => Err(Error::Config(
                "dataset is static; enable live_reload to replace it".to_string(),
            )),
        }
    }

    /// Publish `graph` for the next safe point; returns its generation
    pub fn stage(&self, graph: G) -> Result<u64> {
        let live = self.live()?;
        let generation = live.next_generation.fetch_add(1, Ordering::Relaxed);
        *live.staged.lock() = Some(Arc::new(Snapshot::new(generation, graph)));
        info!(generation, "Staged dataset generation");
        Ok(generation)
    }

    /// Replace the current dataset now
    ///
    /// Callers hold the gate's exclusive update so no reader is mid-query.
    pub fn swap(&self, graph: G) -> Result<u64> {
        let live = self.live()?;
        let generation = live.next_generation.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(Snapshot::new(generation, graph));

        let mut staged = live.staged.lock();
        if staged.as_ref().is_some_and(|s| s.generation() < generation) {
            *staged = None;
        }
        let previous = std::mem::replace(&mut *live.current.write(), snapshot);
        info!(
            from = previous.generation(),
            to = generation,
            "Swapped dataset generation"
        );
        Ok(generation)
    }
}

impl<G> GenerationSource for DatasetHandle<G> {
    fn try_apply_newer_generation(&self) -> bool {
        let DatasetHandle::Live(live) = self else {
            return false;
        };
        let mut staged = live.staged.lock();
        let Some(candidate) = staged.take() else {
            return false;
        };
        let mut current = live.current.write();
        if candidate.generation() <= current.generation() {
            return false;
        }
        info!(
            from = current.generation(),
            to = candidate.generation(),
            "Applied staged dataset generation"
        );
        *current = candidate;
        true
    }
}
