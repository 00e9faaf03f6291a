//! Reusable heap storage for queries
//!
//! A [`SearchWorkspace`] belongs to exactly one in-flight query. The engine
//! keeps idle workspaces in a [`WorkspacePool`] so concurrent requests each
//! get a private one without reallocating per call.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::heap::{QueryHeap, SearchData};

pub type SearchHeap = QueryHeap<SearchData>;

/// Heaps for the many-to-many search and the two point-to-point directions
#[derive(Debug, Default)]
pub struct SearchWorkspace {
    node_count: usize,
    many_to_many: Option<SearchHeap>,
    forward: Option<SearchHeap>,
    reverse: Option<SearchHeap>,
}

impl SearchWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a query over a graph with `node_count` nodes
    ///
    /// Heaps sized for another graph are dropped and recreated lazily;
    /// otherwise existing heaps are cleared.
    pub fn ensure_capacity(&mut self, node_count: usize) {
        if node_count != self.node_count {
            if self.node_count != 0 {
                debug!(
                    old = self.node_count,
                    new = node_count,
                    "Resizing search workspace"
                );
            }
            self.node_count = node_count;
            self.many_to_many = None;
            self.forward = None;
            self.reverse = None;
            return;
        }
        for heap in [&mut self.many_to_many, &mut self.forward, &mut self.reverse]
            .into_iter()
            .flatten()
        {
            heap.clear();
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn many_to_many_heap(&mut self) -> &mut SearchHeap {
        let n = self.node_count;
        self.many_to_many.get_or_insert_with(|| QueryHeap::new(n))
    }

    /// Forward and reverse heaps, borrowed together for bidirectional search
    pub fn bidirectional_heaps(&mut self) -> (&mut SearchHeap, &mut SearchHeap) {
        let n = self.node_count;
        let forward = self.forward.get_or_insert_with(|| QueryHeap::new(n));
        let reverse = self.reverse.get_or_insert_with(|| QueryHeap::new(n));
        (forward, reverse)
    }
}

/// Pool of idle workspaces shared by the dispatch layer
#[derive(Debug)]
pub struct WorkspacePool {
    idle: Mutex<Vec<SearchWorkspace>>,
    max_idle: usize,
    /// Workspaces created because none was idle
    created: AtomicUsize,
}

impl WorkspacePool {
    /// Keep at most `max_idle` workspaces around between queries
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Take an exclusive workspace, allocating a fresh one when none is idle
    pub fn checkout(&self) -> PooledWorkspace<'_> {
        let idle = self.idle.lock().pop();
        let workspace = idle.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            SearchWorkspace::new()
        });
        PooledWorkspace {
            pool: self,
            workspace,
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Workspaces allocated over the pool's lifetime
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn give_back(&self, workspace: SearchWorkspace) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(workspace);
        }
    }
}

/// Workspace on loan from a [`WorkspacePool`]; returned on drop
pub struct PooledWorkspace<'a> {
    pool: &'a WorkspacePool,
    workspace: SearchWorkspace,
}

impl Deref for PooledWorkspace<'_> {
    type Target = SearchWorkspace;

    fn deref(&self) -> &SearchWorkspace {
        &self.workspace
    }
}

impl DerefMut for PooledWorkspace<'_> {
    fn deref_mut(&mut self) -> &mut SearchWorkspace {
        &mut self.workspace
    }
}

impl Drop for PooledWorkspace<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.workspace));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heaps_created_lazily() {
        let mut ws = SearchWorkspace::new();
        ws.ensure_capacity(10);
        assert!(ws.many_to_many.is_none());

        assert_eq!(ws.many_to_many_heap().node_capacity(), 10);
        let (fwd, rev) = ws.bidirectional_heaps();
        assert_eq!(fwd.node_capacity(), 10);
        assert_eq!(rev.node_capacity(), 10);
    }

    #[test]
    fn test_same_size_clears() {
        let mut ws = SearchWorkspace::new();
        ws.ensure_capacity(4);
        ws.many_to_many_heap().insert(2, 5, SearchData::default());

        ws.ensure_capacity(4);
        let heap = ws.many_to_many_heap();
        assert!(!heap.contains(2));
        assert!(heap.is_empty());
    }

    #[test]
    fn test_new_size_reallocates() {
        let mut ws = SearchWorkspace::new();
        ws.ensure_capacity(4);
        ws.many_to_many_heap().insert(3, 1, SearchData::default());

        ws.ensure_capacity(32);
        assert_eq!(ws.node_count(), 32);
        assert_eq!(ws.many_to_many_heap().node_capacity(), 32);
        assert!(!ws.many_to_many_heap().contains(3));
    }

    #[test]
    fn test_pool_reuses_workspaces() {
        let pool = WorkspacePool::new(1);
        {
            let mut a = pool.checkout();
            a.ensure_capacity(8);
            let b = pool.checkout();
            assert_eq!(b.node_count(), 0);
        }
        // Only one idle slot: the second workspace was dropped
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.checkout();
        assert!(reused.node_count() == 8 || reused.node_count() == 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.created_count(), 2);
    }
}
