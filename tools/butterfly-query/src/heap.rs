//! Indexed 4-ary min-heap with decrease-key
//!
//! Every node inserted during a round gets a slot in `inserted`, which keeps
//! its key and payload after it has been popped. The node index is
//! version-stamped so `clear()` is O(1) instead of O(node_count).
//!
//! Heap order is `(key, slot)`. Slots are handed out in insertion order, so
//! equal keys pop first-in first-out.

use crate::error::QueryError;
use crate::graph::{EdgeWeight, NodeId, SPECIAL_NODE_ID};

const ARITY: usize = 4;
/// Heap position of a node that has been popped (or dropped by `delete_all`)
const REMOVED: u32 = u32::MAX;

/// Per-node payload carried by the query searches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchData {
    pub parent: NodeId,
}

impl SearchData {
    pub fn new(parent: NodeId) -> Self {
        Self { parent }
    }
}

impl Default for SearchData {
    fn default() -> Self {
        Self {
            parent: SPECIAL_NODE_ID,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapItem {
    key: EdgeWeight,
    slot: u32,
}

impl HeapItem {
    #[inline]
    fn precedes(&self, other: &HeapItem) -> bool {
        (self.key, self.slot) < (other.key, other.slot)
    }
}

#[derive(Debug, Clone)]
struct InsertedNode<D> {
    node: NodeId,
    key: EdgeWeight,
    /// Position in `heap`, `REMOVED` once settled
    handle: u32,
    data: D,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    slot: u32,
    version: u32,
}

#[derive(Debug, Clone)]
pub struct QueryHeap<D> {
    heap: Vec<HeapItem>,
    inserted: Vec<InsertedNode<D>>,
    index: Vec<IndexEntry>,
    version: u32,
}

impl<D> QueryHeap<D> {
    pub fn new(node_count: usize) -> Self {
        Self {
            heap: Vec::new(),
            inserted: Vec::new(),
            index: vec![IndexEntry { slot: 0, version: 0 }; node_count],
            version: 1,
        }
    }

    /// Start a new round: every node becomes absent again
    pub fn clear(&mut self) {
        self.heap.clear();
        self.inserted.clear();
        self.version = self.version.wrapping_add(1);
        if self.version == 0 {
            // Stamp overflow - reset all entries
            for entry in &mut self.index {
                entry.version = 0;
            }
            self.version = 1;
        }
    }

    /// Number of queued (not yet settled) nodes
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn node_capacity(&self) -> usize {
        self.index.len()
    }

    /// Nodes inserted this round, queued or settled
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    #[inline]
    fn slot_of(&self, node: NodeId) -> Option<usize> {
        let entry = self.index.get(node as usize)?;
        (entry.version == self.version).then_some(entry.slot as usize)
    }

    /// Inserted in the current round, whether still queued or already settled
    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.slot_of(node).is_some()
    }

    /// Settled (popped) in the current round
    #[inline]
    pub fn was_removed(&self, node: NodeId) -> bool {
        self.slot_of(node)
            .is_some_and(|slot| self.inserted[slot].handle == REMOVED)
    }

    /// Key of a node inserted this round; stays readable after the pop
    #[inline]
    pub fn key_of(&self, node: NodeId) -> Option<EdgeWeight> {
        self.slot_of(node).map(|slot| self.inserted[slot].key)
    }

    #[inline]
    pub fn payload(&self, node: NodeId) -> Option<&D> {
        self.slot_of(node).map(|slot| &self.inserted[slot].data)
    }

    #[inline]
    pub fn payload_mut(&mut self, node: NodeId) -> Option<&mut D> {
        let slot = self.slot_of(node)?;
        Some(&mut self.inserted[slot].data)
    }

    /// Queue `node` with `key`; the node must not be present this round
    pub fn insert(&mut self, node: NodeId, key: EdgeWeight, data: D) {
        debug_assert!(
            !self.contains(node),
            "insert: node {} already present this round",
            node
        );
        let slot = self.inserted.len() as u32;
        self.inserted.push(InsertedNode {
            node,
            key,
            handle: REMOVED,
            data,
        });
        self.index[node as usize] = IndexEntry {
            slot,
            version: self.version,
        };
        let pos = self.heap.len();
        self.heap.push(HeapItem { key, slot });
        self.heapify_up(pos);
    }

    /// Lower the key of a node inserted this round
    pub fn decrease_key(&mut self, node: NodeId, new_key: EdgeWeight) {
        debug_assert!(
            self.contains(node),
            "decrease_key: node {} not present this round",
            node
        );
        let Some(slot) = self.slot_of(node) else {
            return;
        };
        let entry = &mut self.inserted[slot];
        debug_assert!(
            new_key <= entry.key,
            "decrease_key: {} > current key {}",
            new_key,
            entry.key
        );
        entry.key = new_key;
        let handle = entry.handle;
        if handle == REMOVED {
            return;
        }
        let pos = handle as usize;
        self.heap[pos].key = new_key;
        self.heapify_up(pos);
    }

    #[inline]
    pub fn min_key(&self) -> Option<EdgeWeight> {
        self.heap.first().map(|item| item.key)
    }

    /// Remove and return the queued node with the smallest key
    pub fn pop_min(&mut self) -> Result<NodeId, QueryError> {
        self.pop_min_with_key().map(|(node, _)| node)
    }

    /// Like [`QueryHeap::pop_min`], also returning the settled key
    pub fn pop_min_with_key(&mut self) -> Result<(NodeId, EdgeWeight), QueryError> {
        let Some(&top) = self.heap.first() else {
            return Err(QueryError::EmptyHeap);
        };
        let settled = &mut self.inserted[top.slot as usize];
        settled.handle = REMOVED;
        let result = (settled.node, settled.key);

        // Move last element to the front and heapify down
        if let Some(last) = self.heap.pop() {
            if !self.heap.is_empty() {
                self.heap[0] = last;
                self.heapify_down(0);
            }
        }
        Ok(result)
    }

    /// Drop every queued entry; keys and payloads of inserted nodes remain
    pub fn delete_all(&mut self) {
        for item in &self.heap {
            self.inserted[item.slot as usize].handle = REMOVED;
        }
        self.heap.clear();
    }

    #[inline]
    fn parent(index: usize) -> usize {
        (index - 1) / ARITY
    }

    #[inline]
    fn kth_child(index: usize, k: usize) -> usize {
        ARITY * index + k + 1
    }

    #[inline]
    fn heapify_up(&mut self, mut pos: usize) {
        let item = self.heap[pos];
        while pos > 0 {
            let parent_pos = Self::parent(pos);
            if !item.precedes(&self.heap[parent_pos]) {
                break;
            }
            // Move parent down
            let parent_item = self.heap[parent_pos];
            self.heap[pos] = parent_item;
            self.inserted[parent_item.slot as usize].handle = pos as u32;
            pos = parent_pos;
        }
        self.heap[pos] = item;
        self.inserted[item.slot as usize].handle = pos as u32;
    }

    #[inline]
    fn heapify_down(&mut self, mut pos: usize) {
        let item = self.heap[pos];
        let len = self.heap.len();
        loop {
            let first_child = Self::kth_child(pos, 0);
            if first_child >= len {
                break;
            }
            // Find minimum child
            let mut min_child = first_child;
            for k in 1..ARITY {
                let child = Self::kth_child(pos, k);
                if child >= len {
                    break;
                }
                if self.heap[child].precedes(&self.heap[min_child]) {
                    min_child = child;
                }
            }
            if !self.heap[min_child].precedes(&item) {
                break;
            }
            // Move min child up
            let child_item = self.heap[min_child];
            self.heap[pos] = child_item;
            self.inserted[child_item.slot as usize].handle = pos as u32;
            pos = min_child;
        }
        self.heap[pos] = item;
        self.inserted[item.slot as usize].handle = pos as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(n: usize) -> QueryHeap<SearchData> {
        QueryHeap::new(n)
    }

    #[test]
    fn test_pop_order() {
        let mut h = heap(16);
        let keys = [7, -3, 12, 0, 5, 5, 9, -8, 1, 30, 2];
        for (node, &key) in keys.iter().enumerate() {
            h.insert(node as NodeId, key, SearchData::default());
        }
        let mut popped = Vec::new();
        while !h.is_empty() {
            let node = h.pop_min().unwrap();
            popped.push(h.key_of(node).unwrap());
        }
        let mut sorted = keys.to_vec();
        sorted.sort();
        assert_eq!(popped, sorted);
    }

    #[test]
    fn test_equal_keys_pop_fifo() {
        let mut h = heap(8);
        h.insert(5, 3, SearchData::default());
        h.insert(2, 3, SearchData::default());
        h.insert(7, 1, SearchData::default());
        h.insert(0, 3, SearchData::default());

        assert_eq!(h.pop_min().unwrap(), 7);
        assert_eq!(h.pop_min().unwrap(), 5);
        assert_eq!(h.pop_min().unwrap(), 2);
        assert_eq!(h.pop_min().unwrap(), 0);
    }

    #[test]
    fn test_decrease_key_reorders() {
        let mut h = heap(8);
        h.insert(1, 10, SearchData::new(0));
        h.insert(2, 20, SearchData::new(0));
        h.insert(3, 30, SearchData::new(0));

        h.decrease_key(3, 5);
        h.payload_mut(3).unwrap().parent = 2;

        assert_eq!(h.min_key(), Some(5));
        assert_eq!(h.pop_min().unwrap(), 3);
        assert_eq!(h.payload(3), Some(&SearchData::new(2)));
        assert_eq!(h.pop_min().unwrap(), 1);
    }

    #[test]
    fn test_settled_nodes_keep_key() {
        let mut h = heap(4);
        h.insert(1, 4, SearchData::default());
        h.insert(2, 6, SearchData::default());

        assert_eq!(h.pop_min().unwrap(), 1);
        assert!(h.contains(1));
        assert!(h.was_removed(1));
        assert_eq!(h.key_of(1), Some(4));

        assert!(h.contains(2));
        assert!(!h.was_removed(2));
        assert!(!h.contains(3));
        assert_eq!(h.key_of(3), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not present this round")]
    fn test_decrease_key_requires_present_node() {
        let mut h = heap(4);
        h.insert(1, 5, SearchData::default());
        h.decrease_key(2, 3);
    }

    #[test]
    fn test_pop_empty_is_error() {
        let mut h = heap(4);
        assert_eq!(h.pop_min(), Err(QueryError::EmptyHeap));

        h.insert(0, 1, SearchData::default());
        h.pop_min().unwrap();
        assert_eq!(h.pop_min(), Err(QueryError::EmptyHeap));
    }

    #[test]
    fn test_clear_forgets_round() {
        let mut h = heap(4);
        h.insert(0, 1, SearchData::default());
        h.insert(3, 2, SearchData::default());
        h.pop_min().unwrap();

        h.clear();
        assert!(h.is_empty());
        assert!(!h.contains(0));
        assert!(!h.contains(3));
        assert_eq!(h.inserted_count(), 0);

        // Reinsertion after clear is allowed
        h.insert(0, 9, SearchData::default());
        assert_eq!(h.key_of(0), Some(9));
    }

    #[test]
    fn test_clear_survives_stamp_overflow() {
        let mut h = heap(4);
        h.insert(2, 1, SearchData::default());
        h.version = u32::MAX;
        h.index[2].version = u32::MAX;
        assert!(h.contains(2));

        h.clear();
        assert_eq!(h.version, 1);
        assert!(!h.contains(2));
        assert!(h.index.iter().all(|e| e.version == 0));
    }

    #[test]
    fn test_delete_all_keeps_keys() {
        let mut h = heap(8);
        for node in 0..5 {
            h.insert(node, node as EdgeWeight * 2, SearchData::default());
        }
        h.pop_min().unwrap();
        h.delete_all();

        assert!(h.is_empty());
        assert_eq!(h.min_key(), None);
        for node in 0..5 {
            assert!(h.contains(node));
            assert!(h.was_removed(node));
            assert_eq!(h.key_of(node), Some(node as EdgeWeight * 2));
        }
    }

    #[test]
    fn test_interleaved_operations_match_sorted_order() {
        // Deterministic pseudo-random keys, with a decrease on every third node
        let n = 200;
        let mut h = heap(n);
        let mut expected = Vec::new();
        let mut x: u64 = 0x2545_f491;
        for node in 0..n as NodeId {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let key = (x % 1000) as EdgeWeight - 500;
            h.insert(node, key, SearchData::default());
            let key = if node % 3 == 0 {
                h.decrease_key(node, key - 100);
                key - 100
            } else {
                key
            };
            expected.push((key, node));
        }
        expected.sort();

        let mut popped = Vec::new();
        while let Ok(node) = h.pop_min() {
            popped.push((h.key_of(node).unwrap(), node));
        }
        let popped_keys: Vec<_> = popped.iter().map(|p| p.0).collect();
        let expected_keys: Vec<_> = expected.iter().map(|p| p.0).collect();
        assert_eq!(popped_keys, expected_keys);
        assert_eq!(h.node_capacity(), n);
    }
}
