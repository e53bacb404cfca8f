//! B-tree node operations: search, insert with proactive splitting,
//! delete with borrow/merge rebalancing, and in-order traversal.

use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;
use tracing::trace;

use super::freelist::FreeList;
use super::pair::{compare_keys, Pair};

/// A single B-tree node.
///
/// Leaves have no children. Internal nodes hold exactly one more child
/// than pairs, and every key in `children[i]` sorts strictly between
/// `pairs[i - 1]` and `pairs[i]` (open endpoints at the borders).
pub(crate) struct Node {
    /// Allocation id, unique within the owning tree.
    pub(crate) id: u64,
    /// Pairs, strictly ascending by key.
    pub(crate) pairs: Vec<Pair>,
    /// Child subtrees; empty for leaves.
    pub(crate) children: Vec<Box<Node>>,
}

impl Node {
    /// Creates an empty node with the given allocation id.
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            pairs: Vec::new(),
            children: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns `(found, index)` where `index` is the first position whose
    /// key is >= `key`.
    pub(crate) fn search(&self, key: &[u8]) -> (bool, usize) {
        match self.pairs.binary_search_by(|p| compare_keys(&p.key, key)) {
            Ok(i) => (true, i),
            Err(i) => (false, i),
        }
    }

    /// Looks up `key` in the subtree rooted here.
    pub(crate) fn get(&self, key: &[u8]) -> Option<&Bytes> {
        let (found, i) = self.search(key);
        if found {
            return Some(&self.pairs[i].value);
        }
        if self.is_leaf() {
            return None;
        }
        self.children[i].get(key)
    }

    /// Inserts or replaces `key` in the subtree rooted here, returning
    /// the previous value. The caller guarantees this node is not full.
    pub(crate) fn set(
        &mut self,
        key: Bytes,
        value: Bytes,
        max_pairs: usize,
        free: &FreeList,
    ) -> Option<Bytes> {
        self.check();
        let (found, mut i) = self.search(&key);
        if found {
            let old = std::mem::replace(&mut self.pairs[i].value, value);
            return Some(old);
        }
        if self.is_leaf() {
            self.pairs.insert(i, Pair { key, value });
            return None;
        }
        // Split the child about to be descended into if it is full, so
        // the insertion below always finds room.
        if self.children[i].pairs.len() >= max_pairs {
            trace!(node = self.id, child = i, "split full child");
            let (mid, right) = self.children[i].split(max_pairs / 2, free);
            self.pairs.insert(i, mid);
            self.children.insert(i + 1, right);
            self.check_child(i);
            self.check_child(i + 1);
            match compare_keys(&key, &self.pairs[i].key) {
                Ordering::Equal => {
                    // The key is the promoted median; overwrite in place.
                    let old = std::mem::replace(&mut self.pairs[i].value, value);
                    return Some(old);
                }
                Ordering::Greater => i += 1,
                Ordering::Less => {}
            }
        }
        self.children[i].set(key, value, max_pairs, free)
    }

    /// Splits this node at `at`: the pair at `at` is promoted, and the
    /// pairs and children above it move into a right sibling obtained
    /// from the allocator.
    pub(crate) fn split(&mut self, at: usize, free: &FreeList) -> (Pair, Box<Node>) {
        self.check();
        let mut right = free.allocate();
        let mut tail = self.pairs.drain(at..);
        let mid = tail.next().expect("split index past end of node");
        right.pairs.extend(tail);
        if !self.children.is_empty() {
            right.children.extend(self.children.drain(at + 1..));
        }
        (mid, right)
    }

    /// Removes `key` from the subtree rooted here, returning its value.
    pub(crate) fn remove(
        &mut self,
        key: &[u8],
        min_pairs: usize,
        free: &FreeList,
    ) -> Option<Bytes> {
        let (mut found, mut i) = self.search(key);
        if self.is_leaf() {
            if found {
                return Some(self.pairs.remove(i).value);
            }
            return None;
        }
        // Grow the descent-path child before entering it, then re-run the
        // search: borrowing or merging shifts indices.
        if self.children[i].pairs.len() <= min_pairs {
            self.extend_child(i, min_pairs, free);
            let redo = self.search(key);
            found = redo.0;
            i = redo.1;
        }
        if found {
            // The pair lives at this level; its in-order predecessor from
            // the left subtree takes its place.
            let replacement = self.children[i].remove_max(min_pairs, free);
            let old = std::mem::replace(&mut self.pairs[i], replacement);
            self.check_child(i);
            return Some(old.value);
        }
        self.children[i].remove(key, min_pairs, free)
    }

    /// Removes and returns the smallest pair in the subtree rooted here.
    pub(crate) fn remove_min(&mut self, min_pairs: usize, free: &FreeList) -> Pair {
        if self.is_leaf() {
            return self.pairs.remove(0);
        }
        if self.children[0].pairs.len() <= min_pairs {
            self.extend_child(0, min_pairs, free);
        }
        self.children[0].remove_min(min_pairs, free)
    }

    /// Removes and returns the largest pair in the subtree rooted here.
    pub(crate) fn remove_max(&mut self, min_pairs: usize, free: &FreeList) -> Pair {
        if self.is_leaf() {
            return self.pairs.pop().expect("remove_max from an empty node");
        }
        let last = self.children.len() - 1;
        if self.children[last].pairs.len() <= min_pairs {
            self.extend_child(last, min_pairs, free);
        }
        // A merge shrinks the child array; re-resolve the rightmost.
        let last = self.children.len() - 1;
        self.children[last].remove_max(min_pairs, free)
    }

    /// Grows `children[i]` above `min_pairs` by borrowing from a sibling
    /// or merging with one. Returns the index the child ends up at.
    pub(crate) fn extend_child(&mut self, mut i: usize, min_pairs: usize, free: &FreeList) -> usize {
        if i > 0 && self.children[i - 1].pairs.len() > min_pairs {
            trace!(node = self.id, child = i, "borrow from left sibling");
            self.borrow_from_left(i);
            return i;
        }
        if i < self.children.len() - 1 && self.children[i + 1].pairs.len() > min_pairs {
            trace!(node = self.id, child = i, "borrow from right sibling");
            self.borrow_from_right(i);
            return i;
        }
        if i == self.children.len() - 1 {
            // The rightmost child merges with its left neighbour.
            i -= 1;
        }
        trace!(node = self.id, child = i, "merge with right sibling");
        self.merge_with_right(i, free);
        self.check_child(i);
        i
    }

    /// Rotates the parent pair at `i - 1` down into `children[i]` and the
    /// left sibling's last pair up into its place.
    fn borrow_from_left(&mut self, i: usize) {
        let (head, tail) = self.children.split_at_mut(i);
        let left = &mut head[i - 1];
        let child = &mut tail[0];
        let up = left.pairs.pop().expect("left sibling has no pair to lend");
        let down = std::mem::replace(&mut self.pairs[i - 1], up);
        child.pairs.insert(0, down);
        if !child.children.is_empty() {
            let moved = left
                .children
                .pop()
                .expect("left sibling has no child to lend");
            child.children.insert(0, moved);
        }
    }

    /// Rotates the parent pair at `i` down into `children[i]` and the
    /// right sibling's first pair up into its place.
    fn borrow_from_right(&mut self, i: usize) {
        let (head, tail) = self.children.split_at_mut(i + 1);
        let child = &mut head[i];
        let right = &mut tail[0];
        let up = right.pairs.remove(0);
        let down = std::mem::replace(&mut self.pairs[i], up);
        child.pairs.push(down);
        if !child.children.is_empty() {
            child.children.push(right.children.remove(0));
        }
    }

    /// Folds the parent pair at `i` and all of `children[i + 1]` into
    /// `children[i]`, releasing the emptied sibling.
    fn merge_with_right(&mut self, i: usize, free: &FreeList) {
        let mut right = self.children.remove(i + 1);
        let sep = self.pairs.remove(i);
        let child = &mut self.children[i];
        child.pairs.push(sep);
        child.pairs.append(&mut right.pairs);
        child.children.append(&mut right.children);
        free.release(right);
    }

    /// Visits every pair in the subtree rooted here in ascending key
    /// order.
    pub(crate) fn iterate<F: FnMut(&Pair)>(&self, f: &mut F) {
        for (i, pair) in self.pairs.iter().enumerate() {
            if let Some(child) = self.children.get(i) {
                child.iterate(f);
            }
            f(pair);
        }
        if let Some(last) = self.children.last() {
            last.iterate(f);
        }
    }

    /// Verifies pair ordering and the pair/child ratio of this node.
    #[cfg(debug_assertions)]
    pub(crate) fn check(&self) {
        for w in self.pairs.windows(2) {
            if compare_keys(&w[0].key, &w[1].key) != Ordering::Less {
                panic!(
                    "node {}: pair order violation: {:?} !< {:?}",
                    self.id, w[0].key, w[1].key
                );
            }
        }
        if !self.children.is_empty() && self.children.len() != self.pairs.len() + 1 {
            panic!(
                "node {}: {} pairs but {} children",
                self.id,
                self.pairs.len(),
                self.children.len()
            );
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn check(&self) {}

    /// Verifies that every key in `children[i]` stays inside the parent
    /// brackets.
    #[cfg(debug_assertions)]
    pub(crate) fn check_child(&self, i: usize) {
        let child = &self.children[i];
        for pair in &child.pairs {
            if i > 0 && compare_keys(&pair.key, &self.pairs[i - 1].key) != Ordering::Greater {
                panic!(
                    "node {}: child {} key {:?} at or below parent bracket {:?}",
                    self.id,
                    i,
                    pair.key,
                    self.pairs[i - 1].key
                );
            }
            if i < self.pairs.len()
                && compare_keys(&pair.key, &self.pairs[i].key) != Ordering::Less
            {
                panic!(
                    "node {}: child {} key {:?} at or above parent bracket {:?}",
                    self.id, i, pair.key, self.pairs[i].key
                );
            }
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub(crate) fn check_child(&self, _i: usize) {}

    /// Walks the subtree verifying every structural invariant, returning
    /// the leaf depth. Panics with the offending node's id on violation.
    pub(crate) fn check_subtree(
        &self,
        min_pairs: usize,
        max_pairs: usize,
        is_root: bool,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> usize {
        if self.pairs.is_empty() {
            panic!("node {}: empty node reachable from the root", self.id);
        }
        if self.pairs.len() > max_pairs {
            panic!(
                "node {}: {} pairs exceeds the {} maximum",
                self.id,
                self.pairs.len(),
                max_pairs
            );
        }
        if !is_root && self.pairs.len() < min_pairs {
            panic!(
                "node {}: {} pairs under the {} minimum",
                self.id,
                self.pairs.len(),
                min_pairs
            );
        }
        for w in self.pairs.windows(2) {
            if compare_keys(&w[0].key, &w[1].key) != Ordering::Less {
                panic!(
                    "node {}: pair order violation: {:?} !< {:?}",
                    self.id, w[0].key, w[1].key
                );
            }
        }
        if let Some(lower) = lower {
            if compare_keys(&self.pairs[0].key, lower) != Ordering::Greater {
                panic!("node {}: key {:?} escapes the parent bracket", self.id, self.pairs[0].key);
            }
        }
        if let Some(upper) = upper {
            let last = &self.pairs[self.pairs.len() - 1].key;
            if compare_keys(last, upper) != Ordering::Less {
                panic!("node {}: key {:?} escapes the parent bracket", self.id, last);
            }
        }
        if self.is_leaf() {
            return 1;
        }
        if self.children.len() != self.pairs.len() + 1 {
            panic!(
                "node {}: {} pairs but {} children",
                self.id,
                self.pairs.len(),
                self.children.len()
            );
        }
        let mut depth = None;
        for (i, child) in self.children.iter().enumerate() {
            let child_lower = if i == 0 {
                lower
            } else {
                Some(self.pairs[i - 1].key.as_ref())
            };
            let child_upper = if i == self.pairs.len() {
                upper
            } else {
                Some(self.pairs[i].key.as_ref())
            };
            let d = child.check_subtree(min_pairs, max_pairs, false, child_lower, child_upper);
            match depth {
                None => depth = Some(d),
                Some(expected) if expected != d => {
                    panic!(
                        "node {}: child {} at depth {} while siblings are at {}",
                        self.id, i, d, expected
                    );
                }
                Some(_) => {}
            }
        }
        depth.unwrap_or(0) + 1
    }

    /// Writes one line per node, indented by depth.
    pub(crate) fn dump(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        for _ in 0..depth {
            f.write_str("  ")?;
        }
        write!(f, "node {}:", self.id)?;
        for pair in &self.pairs {
            write!(f, " {:?}", pair.key)?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.dump(f, depth + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: u64, keys: &[&'static [u8]]) -> Box<Node> {
        let mut node = Box::new(Node::new(id));
        node.pairs = keys.iter().map(|k| Pair::new(*k, *k)).collect();
        node
    }

    #[test]
    fn test_search_positions() {
        let node = leaf(0, &[b"b", b"d", b"f"]);
        assert_eq!(node.search(b"a"), (false, 0));
        assert_eq!(node.search(b"b"), (true, 0));
        assert_eq!(node.search(b"c"), (false, 1));
        assert_eq!(node.search(b"d"), (true, 1));
        assert_eq!(node.search(b"f"), (true, 2));
        assert_eq!(node.search(b"g"), (false, 3));
    }

    #[test]
    fn test_split_leaf_at_median() {
        let free = FreeList::new(4);
        let mut node = leaf(0, &[b"a", b"b", b"c", b"d", b"e"]);
        let (mid, right) = node.split(2, &free);

        assert_eq!(mid.key.as_ref(), b"c");
        assert_eq!(node.pairs.len(), 2);
        assert_eq!(node.pairs[1].key.as_ref(), b"b");
        assert_eq!(right.pairs.len(), 2);
        assert_eq!(right.pairs[0].key.as_ref(), b"d");
        assert!(right.children.is_empty());
    }

    #[test]
    fn test_split_internal_moves_children() {
        let free = FreeList::new(4);
        let mut node = leaf(0, &[b"b", b"d", b"f", b"h", b"j"]);
        node.children = vec![
            leaf(1, &[b"a"]),
            leaf(2, &[b"c"]),
            leaf(3, &[b"e"]),
            leaf(4, &[b"g"]),
            leaf(5, &[b"i"]),
            leaf(6, &[b"k"]),
        ];
        let (mid, right) = node.split(2, &free);

        assert_eq!(mid.key.as_ref(), b"f");
        assert_eq!(node.pairs.len(), 2);
        assert_eq!(node.children.len(), 3);
        assert_eq!(right.pairs.len(), 2);
        assert_eq!(right.children.len(), 3);
        assert_eq!(right.children[0].pairs[0].key.as_ref(), b"g");
    }

    #[test]
    fn test_extend_child_borrows_from_left() {
        let free = FreeList::new(4);
        let mut parent = leaf(0, &[b"d"]);
        parent.children = vec![leaf(1, &[b"a", b"b", b"c"]), leaf(2, &[b"e"])];

        let i = parent.extend_child(1, 1, &free);
        assert_eq!(i, 1);
        assert_eq!(parent.pairs[0].key.as_ref(), b"c");
        assert_eq!(parent.children[0].pairs.len(), 2);
        assert_eq!(parent.children[1].pairs.len(), 2);
        assert_eq!(parent.children[1].pairs[0].key.as_ref(), b"d");
    }

    #[test]
    fn test_extend_child_borrows_from_right() {
        let free = FreeList::new(4);
        let mut parent = leaf(0, &[b"b"]);
        parent.children = vec![leaf(1, &[b"a"]), leaf(2, &[b"c", b"d", b"e"])];

        let i = parent.extend_child(0, 1, &free);
        assert_eq!(i, 0);
        assert_eq!(parent.pairs[0].key.as_ref(), b"c");
        assert_eq!(parent.children[0].pairs.len(), 2);
        assert_eq!(parent.children[0].pairs[1].key.as_ref(), b"b");
        assert_eq!(parent.children[1].pairs.len(), 2);
    }

    #[test]
    fn test_extend_child_merges_when_siblings_minimal() {
        let free = FreeList::new(4);
        let mut parent = leaf(0, &[b"b", b"d"]);
        parent.children = vec![leaf(1, &[b"a"]), leaf(2, &[b"c"]), leaf(3, &[b"e"])];

        let i = parent.extend_child(1, 1, &free);
        assert_eq!(i, 1);
        assert_eq!(parent.pairs.len(), 1);
        assert_eq!(parent.children.len(), 2);
        let merged = &parent.children[1];
        let keys: Vec<_> = merged.pairs.iter().map(|p| p.key.as_ref()).collect();
        assert_eq!(keys, vec![&b"c"[..], &b"d"[..], &b"e"[..]]);
        // The emptied sibling went back to the pool.
        assert_eq!(free.pooled(), 1);
    }

    #[test]
    fn test_extend_rightmost_child_merges_leftward() {
        let free = FreeList::new(4);
        let mut parent = leaf(0, &[b"b"]);
        parent.children = vec![leaf(1, &[b"a"]), leaf(2, &[b"c"])];

        let i = parent.extend_child(1, 1, &free);
        assert_eq!(i, 0);
        assert!(parent.pairs.is_empty());
        assert_eq!(parent.children.len(), 1);
        let keys: Vec<_> = parent.children[0]
            .pairs
            .iter()
            .map(|p| p.key.as_ref())
            .collect();
        assert_eq!(keys, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn test_iterate_in_order() {
        let mut parent = leaf(0, &[b"c", b"f"]);
        parent.children = vec![
            leaf(1, &[b"a", b"b"]),
            leaf(2, &[b"d", b"e"]),
            leaf(3, &[b"g"]),
        ];

        let mut seen = Vec::new();
        parent.iterate(&mut |pair: &Pair| seen.push(pair.key.clone()));
        let keys: Vec<_> = seen.iter().map(|k| k.as_ref()).collect();
        assert_eq!(
            keys,
            vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..], &b"e"[..], &b"f"[..], &b"g"[..]]
        );
    }

    #[test]
    fn test_remove_min_and_max_descend_spines() {
        let free = FreeList::new(4);
        let mut parent = leaf(0, &[b"c", b"f"]);
        parent.children = vec![
            leaf(1, &[b"a", b"b"]),
            leaf(2, &[b"d", b"e"]),
            leaf(3, &[b"g", b"h"]),
        ];

        let min = parent.remove_min(1, &free);
        assert_eq!(min.key.as_ref(), b"a");
        let max = parent.remove_max(1, &free);
        assert_eq!(max.key.as_ref(), b"h");
        parent.check_subtree(1, 5, true, None, None);
    }

    #[test]
    fn test_remove_max_extends_minimal_rightmost_child() {
        let free = FreeList::new(4);
        let mut parent = leaf(0, &[b"b"]);
        parent.children = vec![leaf(1, &[b"a"]), leaf(2, &[b"c"])];

        // Both children sit at the minimum, so the spine child merges
        // before the descent and the parent empties out.
        let max = parent.remove_max(1, &free);
        assert_eq!(max.key.as_ref(), b"c");
        assert!(parent.pairs.is_empty());
        assert_eq!(parent.children.len(), 1);
        assert_eq!(parent.children[0].pairs.len(), 2);
    }

    #[test]
    fn test_check_subtree_reports_depth() {
        let mut parent = leaf(0, &[b"c"]);
        parent.children = vec![leaf(1, &[b"a", b"b"]), leaf(2, &[b"d"])];
        assert_eq!(parent.check_subtree(1, 5, true, None, None), 2);
    }

    #[test]
    #[should_panic(expected = "pair order violation")]
    fn test_check_subtree_rejects_disorder() {
        let node = leaf(7, &[b"b", b"a"]);
        node.check_subtree(1, 5, true, None, None);
    }

    #[test]
    #[should_panic(expected = "escapes the parent bracket")]
    fn test_check_subtree_rejects_key_outside_bracket() {
        let mut parent = leaf(0, &[b"c"]);
        parent.children = vec![leaf(1, &[b"a", b"d"]), leaf(2, &[b"e"])];
        parent.check_subtree(1, 5, true, None, None);
    }
}
