//! Index engine for BrambleDB.
//!
//! This crate provides:
//! - An in-memory B-tree over variable-length byte-string keys and values
//! - A bounded free list that recycles released nodes
//! - A page codec that marshals nodes to and from fixed-size page frames

mod btree;

// Re-exports for public API
pub use btree::codec::{encoded_size, read_page, write_page, DecodedPage, KvMeta};
pub use btree::pair::{compare_keys, Pair};
pub use btree::tree::BTree;
