//! The B-tree façade: construction and the public index operations.

use bytes::Bytes;
use std::fmt;
use tracing::trace;

use bramble_common::{Result, TreeConfig};

use super::freelist::FreeList;
use super::node::Node;
use super::pair::Pair;

/// An ordered index over byte-string keys and values.
///
/// Keys compare in raw byte lexicographic order and are unique; setting
/// an existing key replaces its value. Mutation is single-writer through
/// `&mut self`; only the node free list synchronises internally.
///
/// ```
/// use bramble_index::BTree;
///
/// let mut tree = BTree::new(3);
/// assert_eq!(tree.set("hello", "world"), None);
/// assert_eq!(tree.get(b"hello").as_deref(), Some(&b"world"[..]));
/// assert_eq!(tree.delete(b"hello").as_deref(), Some(&b"world"[..]));
/// assert!(tree.is_empty());
/// ```
pub struct BTree {
    /// Root node; absent until the first `set`.
    root: Option<Box<Node>>,
    /// Branching parameter.
    degree: usize,
    /// Upper occupancy bound per node (`2 * degree - 1`).
    max_pairs: usize,
    /// Lower occupancy bound per non-root node (`degree - 1`).
    min_pairs: usize,
    /// Live pair count.
    len: usize,
    /// Node allocator and recycled-node pool.
    free: FreeList,
}

impl BTree {
    /// Creates an empty tree with the default free-list capacity.
    ///
    /// # Panics
    ///
    /// Panics when `degree < 2`; the occupancy bounds are meaningless
    /// below that.
    pub fn new(degree: usize) -> Self {
        let config = TreeConfig {
            degree,
            ..TreeConfig::default()
        };
        match Self::with_config(config) {
            Ok(tree) => tree,
            Err(e) => panic!("invalid B-tree configuration: {e}"),
        }
    }

    /// Creates an empty tree from a validated configuration.
    pub fn with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root: None,
            degree: config.degree,
            max_pairs: config.max_pairs(),
            min_pairs: config.min_pairs(),
            len: 0,
            free: FreeList::new(config.free_list_capacity),
        })
    }

    /// Returns the value mapped to `key`.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.root.as_ref().and_then(|root| root.get(key).cloned())
    }

    /// Inserts or replaces `key`, returning the previous value if one
    /// existed.
    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Option<Bytes> {
        let key = key.into();
        let value = value.into();
        let mut root = match self.root.take() {
            None => {
                // First write: the root appears holding the one pair.
                let mut root = self.free.allocate();
                root.pairs.push(Pair { key, value });
                self.root = Some(root);
                self.len = 1;
                return None;
            }
            Some(root) => root,
        };
        if root.pairs.len() >= self.max_pairs {
            // Split the root before descending; the tree grows by one
            // level and every insertion below finds room.
            trace!(root = root.id, "split root");
            let (mid, right) = root.split(self.max_pairs / 2, &self.free);
            let mut new_root = self.free.allocate();
            new_root.pairs.push(mid);
            new_root.children.push(root);
            new_root.children.push(right);
            root = new_root;
        }
        let old = root.set(key, value, self.max_pairs, &self.free);
        self.root = Some(root);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Removes `key`, returning its value if a mapping existed.
    pub fn delete(&mut self, key: &[u8]) -> Option<Bytes> {
        let mut root = self.root.take()?;
        let removed = root.remove(key, self.min_pairs, &self.free);
        if removed.is_some() {
            self.len -= 1;
        }
        // Rebalancing may drain the root even when the key was absent.
        if root.pairs.is_empty() {
            if root.children.is_empty() {
                trace!(root = root.id, "release empty root");
                self.free.release(root);
                return removed;
            }
            trace!(root = root.id, "collapse root into its only child");
            let child = root
                .children
                .pop()
                .expect("collapsing root has no child");
            self.free.release(root);
            root = child;
        }
        self.root = Some(root);
        removed
    }

    /// Calls `f` once per pair, in ascending key order.
    pub fn iterate<F: FnMut(&Pair)>(&self, mut f: F) {
        if let Some(root) = &self.root {
            root.iterate(&mut f);
        }
    }

    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Branching parameter the tree was constructed with.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of nodes currently alive in the tree.
    pub fn node_count(&self) -> u64 {
        self.free.live()
    }

    /// Number of released nodes waiting in the free list.
    pub fn free_nodes(&self) -> usize {
        self.free.pooled()
    }

    /// Walks the whole tree verifying the structural invariants: pair
    /// ordering, occupancy bounds, the pair/child ratio, parent key
    /// brackets, and equal leaf depth.
    ///
    /// # Panics
    ///
    /// Panics with the offending node's id on any violation.
    pub fn check_invariants(&self) {
        if let Some(root) = &self.root {
            root.check_subtree(self.min_pairs, self.max_pairs, true, None, None);
        }
    }
}

impl fmt::Debug for BTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BTree(degree={}, len={})", self.degree, self.len)?;
        if let Some(root) = &self.root {
            root.dump(f, 1)?;
        }
        Ok(())
    }
}
