//! Page codec: marshals a node's pairs and child ids to and from a
//! fixed-size page frame.
//!
//! Frame layout (little-endian):
//! ```text
//! +----------------------------+ 0
//! | PageHeader (16 bytes)      |
//! +----------------------------+ 16
//! | child ids: (count+1) * 8   |  internal pages only
//! +----------------------------+
//! | KvMeta records: count * 12 |
//! +----------------------------+
//! | key | value | key | value  |  packed payload
//! +----------------------------+ frame.len()
//! ```
//!
//! Each [`KvMeta`] stores the byte distance from the start of its own
//! record to the start of the pair's key, so the records stay valid
//! wherever the frame sits in memory. Child ids are written and read as
//! opaque [`PageId`]s; resolving them to nodes is the pager's concern.
//! The codec borrows the frame only for the duration of one call.

use bytes::Bytes;

use bramble_common::page::{PageFlags, PageHeader, PageId};
use bramble_common::{BrambleError, Result};

use super::pair::Pair;

/// Per-pair metadata record inside a page frame.
///
/// Layout (12 bytes):
/// - offset: 4 bytes (distance from this record to the pair's key)
/// - keysz: 4 bytes
/// - valuesz: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvMeta {
    /// Byte distance from the start of this record to the pair's key.
    pub offset: u32,
    /// Key length in bytes.
    pub keysz: u32,
    /// Value length in bytes.
    pub valuesz: u32,
}

impl KvMeta {
    /// Size of one metadata record in bytes.
    pub const SIZE: usize = 12;

    /// Serializes the record to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.keysz.to_le_bytes());
        buf[8..12].copy_from_slice(&self.valuesz.to_le_bytes());
        buf
    }

    /// Deserializes the record from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            offset: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            keysz: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            valuesz: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

/// A node decoded from a page frame.
#[derive(Debug)]
pub struct DecodedPage {
    /// Identifier the page was written under.
    pub id: PageId,
    /// Internal/leaf marker.
    pub flags: PageFlags,
    /// Pairs reconstructed from the payload, in stored order.
    pub pairs: Vec<Pair>,
    /// Child page ids; empty for leaf pages.
    pub children: Vec<PageId>,
}

impl DecodedPage {
    /// Returns true when the page holds an internal node.
    pub fn is_internal(&self) -> bool {
        self.flags.is_internal()
    }
}

/// Number of frame bytes needed to encode the given node shape.
pub fn encoded_size(pairs: &[Pair], children: &[PageId]) -> usize {
    let payload: usize = pairs.iter().map(Pair::payload_size).sum();
    PageHeader::SIZE + children.len() * 8 + pairs.len() * KvMeta::SIZE + payload
}

/// Serialises a node into `frame`.
///
/// `children` must be empty (leaf) or hold exactly one more id than
/// there are pairs (internal). Fails with `PageOverflow` when the node
/// does not fit the frame.
pub fn write_page(
    id: PageId,
    pairs: &[Pair],
    children: &[PageId],
    frame: &mut [u8],
) -> Result<()> {
    debug_assert!(
        children.is_empty() || children.len() == pairs.len() + 1,
        "internal page needs pairs + 1 child ids"
    );
    let needed = encoded_size(pairs, children);
    if needed > frame.len() || pairs.len() > u16::MAX as usize {
        return Err(BrambleError::PageOverflow {
            needed,
            capacity: frame.len(),
        });
    }

    let mut flags = PageFlags::empty();
    if children.is_empty() {
        flags.set_leaf(true);
    } else {
        flags.set_internal(true);
    }
    let mut header = PageHeader::new(id, flags);
    header.pair_count = pairs.len() as u16;
    frame[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());

    let mut pos = PageHeader::SIZE;
    for child in children {
        frame[pos..pos + 8].copy_from_slice(&child.raw().to_le_bytes());
        pos += 8;
    }

    let meta_start = pos;
    let mut payload = meta_start + pairs.len() * KvMeta::SIZE;
    for (i, pair) in pairs.iter().enumerate() {
        let meta_pos = meta_start + i * KvMeta::SIZE;
        let meta = KvMeta {
            offset: (payload - meta_pos) as u32,
            keysz: pair.key.len() as u32,
            valuesz: pair.value.len() as u32,
        };
        frame[meta_pos..meta_pos + KvMeta::SIZE].copy_from_slice(&meta.to_bytes());

        frame[payload..payload + pair.key.len()].copy_from_slice(&pair.key);
        payload += pair.key.len();
        frame[payload..payload + pair.value.len()].copy_from_slice(&pair.value);
        payload += pair.value.len();
    }
    Ok(())
}

/// Reconstructs a node's pairs and child ids from `frame`.
pub fn read_page(frame: &[u8]) -> Result<DecodedPage> {
    if frame.len() < PageHeader::SIZE {
        return Err(BrambleError::PageSizeMismatch {
            expected: PageHeader::SIZE,
            actual: frame.len(),
        });
    }
    let header = PageHeader::from_bytes(&frame[..PageHeader::SIZE]);
    let id = header.page_id;
    let internal = header.flags.is_internal();
    if internal == header.flags.is_leaf() {
        return Err(corrupted(id, "flags must mark the page internal or leaf"));
    }
    let count = header.pair_count as usize;

    let mut pos = PageHeader::SIZE;
    let mut children = Vec::new();
    if internal {
        children.reserve(count + 1);
        for _ in 0..count + 1 {
            let raw = frame
                .get(pos..pos + 8)
                .ok_or_else(|| corrupted(id, "child id array past end of frame"))?;
            children.push(PageId::new(u64::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ])));
            pos += 8;
        }
    }

    let meta_start = pos;
    let mut pairs = Vec::with_capacity(count);
    for i in 0..count {
        let meta_pos = meta_start + i * KvMeta::SIZE;
        let raw = frame
            .get(meta_pos..meta_pos + KvMeta::SIZE)
            .ok_or_else(|| corrupted(id, "metadata array past end of frame"))?;
        let meta = KvMeta::from_bytes(raw);

        let key_start = meta_pos + meta.offset as usize;
        let value_start = key_start + meta.keysz as usize;
        let end = value_start + meta.valuesz as usize;
        let key = frame
            .get(key_start..value_start)
            .ok_or_else(|| corrupted(id, "key payload past end of frame"))?;
        let value = frame
            .get(value_start..end)
            .ok_or_else(|| corrupted(id, "value payload past end of frame"))?;
        pairs.push(Pair {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
        });
    }

    Ok(DecodedPage {
        id,
        flags: header.flags,
        pairs,
        children,
    })
}

fn corrupted(id: PageId, reason: &str) -> BrambleError {
    BrambleError::PageCorrupted {
        page_id: id.raw(),
        reason: reason.to_string(),
    }
}
