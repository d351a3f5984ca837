//! Typed views decoded from a page body: the node model proper.

use crate::errors::{EngineError, Result};
use crate::page::codec::{PageKind, RawPage, decode_page, encode_page};
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};

pub const MAGIC: u32 = 0x4E58_5442; // "NXTB"
pub const FORMAT_VERSION: u16 = 1;

/// Where a leaf entry's value lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Inline(Vec<u8>),
    Overflow { length: u64, head: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafNode {
    pub entries: Vec<LeafEntry>,
    /// Page id of the next leaf in ascending key order, or [`crate::page::NULL_PAGE`].
    pub next: u64,
}

impl LeafNode {
    /// Returns the index of the first entry whose key is `>= key`, and
    /// whether an exact match was found at that index.
    #[must_use]
    pub fn find_slot(&self, key: &[u8]) -> (usize, bool) {
        match self.entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(idx) => (idx, true),
            Err(idx) => (idx, false),
        }
    }

    pub fn insert_entry(&mut self, key: Vec<u8>, payload: Payload) -> Option<Payload> {
        let (idx, found) = self.find_slot(&key);
        if found {
            let old = std::mem::replace(&mut self.entries[idx].payload, payload);
            Some(old)
        } else {
            self.entries.insert(idx, LeafEntry { key, payload });
            None
        }
    }

    /// Removes the entry for `key`, if present, returning its payload.
    ///
    /// No rebalancing: the entry is simply dropped from the ordered
    /// sequence, with no tombstone and no merge against a sibling even if
    /// the leaf falls below the minimum-fill bound.
    pub fn remove_entry(&mut self, key: &[u8]) -> Option<Payload> {
        let (idx, found) = self.find_slot(key);
        if !found {
            return None;
        }
        Some(self.entries.remove(idx).payload)
    }

    /// Splits `self` in half, keeping the lower half and returning the
    /// upper half as a new sibling plus the separator key (the new
    /// sibling's first key).
    #[must_use]
    pub fn split(&mut self) -> (LeafNode, Vec<u8>) {
        let mid = self.entries.len() / 2;
        let upper = self.entries.split_off(mid);
        let separator = upper[0].key.clone();
        let right = LeafNode { entries: upper, next: self.next };
        (right, separator)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalNode {
    /// `keys.len() + 1 == children.len()`.
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<u64>,
}

impl InternalNode {
    /// Returns the child page id whose range contains `key`.
    ///
    /// # Panics
    /// Panics if `children` is empty, which never happens for a well-formed
    /// internal node.
    #[must_use]
    pub fn child_for(&self, key: &[u8]) -> u64 {
        let idx = match self.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        self.children[idx]
    }

    pub fn insert_child(&mut self, separator: Vec<u8>, right_child: u64) {
        let idx = match self.keys.binary_search_by(|k| k.as_slice().cmp(&separator)) {
            Ok(i) | Err(i) => i,
        };
        self.keys.insert(idx, separator);
        self.children.insert(idx + 1, right_child);
    }

    /// Splits `self`, promoting the middle key upward (it is removed from
    /// both halves).
    #[must_use]
    pub fn split(&mut self) -> (InternalNode, Vec<u8>) {
        let mid = self.keys.len() / 2;
        let separator = self.keys[mid].clone();
        let right_keys = self.keys.split_off(mid + 1);
        self.keys.truncate(mid);
        let right_children = self.children.split_off(mid + 1);
        let right = InternalNode { keys: right_keys, children: right_children };
        (right, separator)
    }

    #[must_use]
    pub fn is_overfull(&self, order: u16) -> bool {
        self.children.len() > order as usize
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverflowPage {
    pub next: u64,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FreelistPage {
    pub next: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPage {
    pub magic: u32,
    pub version: u16,
    pub page_size: u32,
    pub order: u16,
    pub key_size: u16,
    pub value_size: u16,
    pub root_id: u64,
    pub freelist_head: u64,
    /// Smallest page id not yet allocated to any node.
    pub next_page_id: u64,
}

/// A decoded node of any kind, as held by the page cache.
#[derive(Debug, Clone)]
pub enum Node {
    Metadata(MetadataPage),
    Leaf(LeafNode),
    Internal(InternalNode),
    Overflow(OverflowPage),
    Freelist(FreelistPage),
}

impl Node {
    #[must_use]
    pub fn is_dirty_candidate(&self) -> bool {
        true
    }

    /// Encodes this node into a `page_size`-byte frame.
    ///
    /// # Errors
    /// Returns an error if serialization fails or the encoded body exceeds
    /// `page_size`.
    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        let (kind, body) = match self {
            Node::Metadata(m) => (PageKind::Metadata, encode_to_vec(m, standard())?),
            Node::Leaf(l) => (PageKind::Leaf, encode_to_vec(l, standard())?),
            Node::Internal(i) => (PageKind::Internal, encode_to_vec(i, standard())?),
            Node::Overflow(o) => (PageKind::Overflow, encode_to_vec(o, standard())?),
            Node::Freelist(f) => (PageKind::Freelist, encode_to_vec(f, standard())?),
        };
        encode_page(kind, &body, page_size)
    }

    /// Decodes a `page_size`-byte frame into a typed node.
    ///
    /// # Errors
    /// Returns [`EngineError::CorruptPage`] if the frame is malformed or the
    /// body cannot be deserialized as the kind its header declares.
    pub fn decode(page_id: u64, frame: &[u8]) -> Result<Self> {
        let RawPage { kind, body } = decode_page(page_id, frame)?;
        let wrap = |reason: bincode::error::DecodeError| EngineError::CorruptPage {
            page_id,
            reason: reason.to_string(),
        };
        Ok(match kind {
            PageKind::Metadata => {
                Node::Metadata(decode_from_slice(&body, standard()).map_err(wrap)?.0)
            }
            PageKind::Leaf => Node::Leaf(decode_from_slice(&body, standard()).map_err(wrap)?.0),
            PageKind::Internal => {
                Node::Internal(decode_from_slice(&body, standard()).map_err(wrap)?.0)
            }
            PageKind::Overflow => {
                Node::Overflow(decode_from_slice(&body, standard()).map_err(wrap)?.0)
            }
            PageKind::Freelist => {
                Node::Freelist(decode_from_slice(&body, standard()).map_err(wrap)?.0)
            }
        })
    }

    #[must_use]
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode> {
        match self {
            Node::Leaf(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            Node::Internal(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_metadata(&self) -> Option<&MetadataPage> {
        match self {
            Node::Metadata(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_overflow(&self) -> Option<&OverflowPage> {
        match self {
            Node::Overflow(o) => Some(o),
            _ => None,
        }
    }
}
