//! Reader/writer gate between queries and dataset reloads
//!
//! Readers-preferred, writer-waits-for-drain:
//!
//! - a query takes `pending_update`, then `query_count`, releases
//!   `pending_update` and bumps the counter
//! - a reload holds `pending_update` for its whole duration, so new queries
//!   queue behind it, and waits on `no_running_queries` until the counter
//!   drains to zero
//!
//! The first query to enter an idle gate is a safe point to publish a staged
//! generation. Without a live dataset the gate is disabled and takes no locks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::dataset::GenerationSource;

/// Observable gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    QueryActive(usize),
    /// A reload holds the pending-update lock and waits for queries to drain
    ReloadWaiting,
    /// A reload is replacing the dataset
    Swapping,
}

#[derive(Debug, Default)]
struct Barrier {
    pending_update: Mutex<()>,
    query_count: Mutex<usize>,
    no_running_queries: Condvar,
    // Mirrors for `state()`, written under the locks above
    active: AtomicUsize,
    reload_waiting: AtomicBool,
    swapping: AtomicBool,
}

#[derive(Debug, Default)]
pub struct QueryGate {
    barrier: Option<Barrier>,
}

impl QueryGate {
    /// Gate that coordinates readers with reloads
    pub fn new() -> Self {
        Self {
            barrier: Some(Barrier::default()),
        }
    }

    /// No-op gate for datasets that are never replaced
    pub fn disabled() -> Self {
        Self { barrier: None }
    }

    pub fn for_live_reload(live_reload: bool) -> Self {
        if live_reload {
            Self::new()
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.barrier.is_some()
    }

    /// Register a running query; the returned guard unregisters it on drop
    pub fn enter_query(&self, source: &dyn GenerationSource) -> QueryGuard<'_> {
        let Some(barrier) = &self.barrier else {
            return QueryGuard { barrier: None };
        };

        let pending = barrier.pending_update.lock();
        let mut count = barrier.query_count.lock();
        drop(pending);

        *count += 1;
        barrier.active.store(*count, Ordering::Release);
        if *count == 1 && source.try_apply_newer_generation() {
            debug!("Published staged generation on query entry");
        }
        drop(count);

        QueryGuard {
            barrier: Some(barrier),
        }
    }

    /// Run `update` once every running query has finished
    ///
    /// New queries block until `update` returns. Must not be called while the
    /// calling thread holds a [`QueryGuard`] of this gate.
    pub fn exclusive_update<R>(&self, update: impl FnOnce() -> R) -> R {
        let Some(barrier) = &self.barrier else {
            return update();
        };

        let _pending = barrier.pending_update.lock();
        let mut count = barrier.query_count.lock();
        barrier.reload_waiting.store(true, Ordering::Release);
        while *count > 0 {
            debug!(active = *count, "Reload waiting for queries to drain");
            barrier.no_running_queries.wait(&mut count);
        }
        barrier.reload_waiting.store(false, Ordering::Release);

        barrier.swapping.store(true, Ordering::Release);
        let result = update();
        barrier.swapping.store(false, Ordering::Release);
        result
    }

    pub fn active_queries(&self) -> usize {
        self.barrier
            .as_ref()
            .map_or(0, |b| b.active.load(Ordering::Acquire))
    }

    pub fn state(&self) -> GateState {
        let Some(barrier) = &self.barrier else {
            return GateState::Idle;
        };
        if barrier.swapping.load(Ordering::Acquire) {
            return GateState::Swapping;
        }
        if barrier.reload_waiting.load(Ordering::Acquire) {
            return GateState::ReloadWaiting;
        }
        match barrier.active.load(Ordering::Acquire) {
            0 => GateState::Idle,
            n => GateState::QueryActive(n),
        }
    }
}

/// Registration of one running query
#[must_use = "the query is unregistered as soon as the guard is dropped"]
pub struct QueryGuard<'a> {
    barrier: Option<&'a Barrier>,
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        let Some(barrier) = self.barrier else {
            return;
        };
        let mut count = barrier.query_count.lock();
        *count = count.saturating_sub(1);
        barrier.active.store(*count, Ordering::Release);
        if *count == 0 {
            barrier.no_running_queries.notify_all();
        }
    }
}
