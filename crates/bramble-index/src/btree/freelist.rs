//! Bounded free list of recycled B-tree nodes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::node::Node;

/// A bounded pool of recycled nodes.
///
/// Allocation hands out pooled nodes last-in-first-out and mints fresh
/// nodes with monotonically increasing ids once the pool runs dry.
/// Releasing into a full pool simply drops the node. The mutex
/// serialises allocate/release; all other tree state is caller-serialised.
pub(crate) struct FreeList {
    /// Maximum number of pooled nodes.
    capacity: usize,
    /// Recycled nodes; their pair and child vecs are already cleared.
    pool: Mutex<Vec<Box<Node>>>,
    /// Next fresh-node allocation id.
    next_id: AtomicU64,
    /// Nodes currently alive in the owning tree.
    live: AtomicU64,
}

impl FreeList {
    /// Creates an empty pool bounded at `capacity` nodes.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pool: Mutex::new(Vec::with_capacity(capacity)),
            next_id: AtomicU64::new(0),
            live: AtomicU64::new(0),
        }
    }

    /// Pops a recycled node, or mints a fresh one with the next id.
    pub(crate) fn allocate(&self) -> Box<Node> {
        self.live.fetch_add(1, Ordering::Relaxed);
        if let Some(node) = self.pool.lock().pop() {
            return node;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Box::new(Node::new(id))
    }

    /// Returns a node to the pool, dropping it when the pool is full.
    pub(crate) fn release(&self, mut node: Box<Node>) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            node.pairs.clear();
            node.children.clear();
            pool.push(node);
        }
    }

    /// Number of nodes waiting in the pool.
    pub(crate) fn pooled(&self) -> usize {
        self.pool.lock().len()
    }

    /// Number of nodes currently alive in the owning tree.
    pub(crate) fn live(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::pair::Pair;

    #[test]
    fn test_allocate_mints_fresh_nodes_with_increasing_ids() {
        let free = FreeList::new(32);
        let a = free.allocate();
        let b = free.allocate();
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(free.live(), 2);
        assert_eq!(free.pooled(), 0);
    }

    #[test]
    fn test_release_then_allocate_reuses_node() {
        let free = FreeList::new(32);
        let node = free.allocate();
        let id = node.id;
        free.release(node);
        assert_eq!(free.pooled(), 1);

        let again = free.allocate();
        assert_eq!(again.id, id);
        assert!(again.pairs.is_empty());
        assert!(again.children.is_empty());
        assert_eq!(free.pooled(), 0);
    }

    #[test]
    fn test_release_clears_node_state() {
        let free = FreeList::new(32);
        let mut node = free.allocate();
        node.pairs.push(Pair::new(&b"k"[..], &b"v"[..]));
        node.children.push(free.allocate());

        // Move the child out first; the pool must never hold live data.
        let child = node.children.pop().expect("child just pushed");
        free.release(child);
        free.release(node);

        let recycled = free.allocate();
        assert!(recycled.pairs.is_empty());
        assert!(recycled.children.is_empty());
    }

    #[test]
    fn test_pool_never_exceeds_capacity() {
        let capacity = 32;
        let free = FreeList::new(capacity);

        // Allocation only pops existing entries, so the pool stays empty
        // while nodes are being handed out.
        let nodes: Vec<_> = (0..capacity * 10).map(|_| free.allocate()).collect();
        assert_eq!(free.pooled(), 0);
        assert_eq!(free.live(), (capacity * 10) as u64);

        for node in nodes {
            free.release(node);
        }
        assert_eq!(free.pooled(), capacity);
        assert_eq!(free.live(), 0);
    }

    #[test]
    fn test_zero_capacity_pool_drops_everything() {
        let free = FreeList::new(0);
        let node = free.allocate();
        free.release(node);
        assert_eq!(free.pooled(), 0);

        // Fresh ids keep advancing since nothing is ever reused.
        assert_eq!(free.allocate().id, 1);
    }
}
