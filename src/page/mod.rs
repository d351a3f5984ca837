//! Page framing and the typed node views decoded from page frames.

pub mod codec;
pub mod node;

pub use codec::{PageKind, RawPage};
pub use node::{InternalNode, LeafEntry, LeafNode, MetadataPage, Node, OverflowPage};

/// Page id 0 is reserved for the metadata page.
pub const METADATA_PAGE_ID: u64 = 0;

/// Null page-id sentinel used for absent siblings/children/overflow links.
pub const NULL_PAGE: u64 = 0;
