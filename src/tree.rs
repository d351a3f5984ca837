//! The B+tree engine: search, insert with split/promote, range scan, and
//! the checkpoint entry point. One [`Tree`] owns one pair of files; callers
//! serialize access through the [`crate::Engine`] facade's lock.

use crate::config::Options;
use crate::errors::{EngineError, Result};
use crate::file_manager::FileManager;
use crate::freelist::{Freelist, PageStore};
use crate::page::node::{InternalNode, LeafNode, MetadataPage, Node, OverflowPage, Payload, FORMAT_VERSION, MAGIC};
use crate::page::{METADATA_PAGE_ID, NULL_PAGE};
use std::path::Path;

use crate::cache::PageCache;
use parking_lot::Mutex;

pub struct Tree {
    file_manager: FileManager,
    /// Guards only the in-memory LRU structure; never held across I/O. This
    /// is what lets `get`/`range` take `&self` and run concurrently under
    /// the engine facade's shared lock (see §5 of the design: the tree-level
    /// lock governs writer exclusion, a finer mutex protects the cache).
    cache: Mutex<PageCache>,
    freelist: Freelist,
    root_id: u64,
    options: Options,
    closed: bool,
    /// Set once a fatal error (corruption or I/O failure) is observed, by a
    /// reader or a writer. Poisoning must be visible to concurrent readers,
    /// hence the interior mutability rather than requiring `&mut self`.
    poison: Mutex<Option<String>>,
}

impl PageStore for Tree {
    fn read_node(&mut self, page_id: u64) -> Result<Node> {
        self.get_node(page_id)
    }

    fn write_node(&mut self, page_id: u64, node: &Node) -> Result<()> {
        self.put_node(page_id, node.clone())
    }

    fn extend(&mut self) -> Result<u64> {
        self.file_manager.extend()
    }
}

impl Tree {
    /// Opens an existing tree file, or creates one with an empty root leaf
    /// if `path` does not yet exist.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if an existing file's
    /// persisted layout does not match `options`, or any of the WAL/page
    /// error kinds on corruption or I/O failure.
    pub fn open(path: &Path, options: Options) -> Result<Self> {
        let is_new = !path.exists();
        let mut file_manager = FileManager::open(path, crate::utils::num::u32_to_usize(options.page_size))?;

        if is_new {
            let mut tree = Self {
                file_manager,
                cache: Mutex::new(PageCache::new(options.cache_size)),
                freelist: Freelist::new(NULL_PAGE),
                root_id: NULL_PAGE,
                options,
                closed: false,
                poison: Mutex::new(None),
            };
            tree.initialize_fresh_file()?;
            return Ok(tree);
        }

        let meta_frame = file_manager.read_page(METADATA_PAGE_ID)?;
        let meta = match Node::decode(METADATA_PAGE_ID, &meta_frame)? {
            Node::Metadata(m) => m,
            _ => {
                return Err(EngineError::CorruptPage {
                    page_id: METADATA_PAGE_ID,
                    reason: "page 0 is not a metadata page".into(),
                });
            }
        };
        if meta.magic != MAGIC {
            return Err(EngineError::CorruptPage {
                page_id: METADATA_PAGE_ID,
                reason: "bad magic".into(),
            });
        }
        if meta.page_size != options.page_size
            || meta.order != options.order
            || meta.key_size != options.key_size
            || meta.value_size != options.value_size
        {
            return Err(EngineError::InvalidArgument(
                "options do not match the file's persisted layout".into(),
            ));
        }

        Ok(Self {
            file_manager,
            cache: Mutex::new(PageCache::new(options.cache_size)),
            freelist: Freelist::new(meta.freelist_head),
            root_id: meta.root_id,
            options,
            closed: false,
            poison: Mutex::new(None),
        })
    }

    fn initialize_fresh_file(&mut self) -> Result<()> {
        self.file_manager.begin_transaction();
        let meta_id = self.file_manager.extend()?;
        debug_assert_eq!(meta_id, METADATA_PAGE_ID);
        let root_id = self.file_manager.extend()?;
        self.root_id = root_id;
        self.put_node(root_id, Node::Leaf(LeafNode::default()))?;
        self.persist_metadata()?;
        self.file_manager.commit_transaction()?;
        self.file_manager.checkpoint()?;
        Ok(())
    }

    fn check_alive(&self) -> Result<()> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        if let Some(reason) = self.poison.lock().clone() {
            return Err(EngineError::CorruptPage { page_id: 0, reason });
        }
        Ok(())
    }

    /// Poisons the tree if `err` is one of the fatal kinds (§7). Safe to
    /// call from a reader: poisoning must be visible to every subsequent
    /// caller, writer or reader alike.
    fn poison(&self, err: &EngineError) {
        if matches!(
            err,
            EngineError::CorruptPage { .. } | EngineError::CorruptWal(_) | EngineError::IoError(_)
        ) {
            *self.poison.lock() = Some(err.to_string());
        }
    }

    fn get_node(&self, page_id: u64) -> Result<Node> {
        if let Some(node) = self.cache.lock().get(page_id) {
            return Ok(node.clone());
        }
        let frame = self.file_manager.read_page(page_id)?;
        let node = Node::decode(page_id, &frame)?;
        self.cache.lock().insert_clean(page_id, node.clone());
        Ok(node)
    }

    fn put_node(&mut self, page_id: u64, node: Node) -> Result<()> {
        let frame = node.encode(crate::utils::num::u32_to_usize(self.options.page_size))?;
        self.file_manager.write_page(page_id, frame);
        self.cache.lock().insert_dirty(page_id, node);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u64> {
        let mut freelist = std::mem::take(&mut self.freelist);
        let result = freelist.allocate(self);
        self.freelist = freelist;
        result
    }

    fn free_page(&mut self, page_id: u64) -> Result<()> {
        let mut freelist = std::mem::take(&mut self.freelist);
        let result = freelist.deallocate(self, page_id);
        self.freelist = freelist;
        result
    }

    fn persist_metadata(&mut self) -> Result<()> {
        let meta = MetadataPage {
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size: self.options.page_size,
            order: self.options.order,
            key_size: self.options.key_size,
            value_size: self.options.value_size,
            root_id: self.root_id,
            freelist_head: self.freelist.head,
            next_page_id: 0,
        };
        self.put_node(METADATA_PAGE_ID, Node::Metadata(meta))
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != crate::utils::num::u16_to_usize(self.options.key_size) {
            return Err(EngineError::InvalidArgument(format!(
                "key is {} bytes, expected {}",
                key.len(),
                self.options.key_size
            )));
        }
        Ok(())
    }

    /// Conservative reserve, in bytes, for an overflow page's framing: the
    /// page codec's 1-byte kind tag and 4-byte trailing CRC32, plus the
    /// bincode-encoded `next` page id and payload-length prefix (both
    /// variable-length integers, a handful of bytes each in practice).
    /// Reserving this much off `page_size` keeps every overflow page's
    /// encoded body within the codec's capacity.
    const OVERFLOW_PAGE_OVERHEAD: usize = 32;

    /// Per §4.8, each overflow page holds a payload slice of
    /// `page_size − fixed_header` bytes — not `value_size`, which bounds
    /// only how large an inline leaf payload may be before it overflows at
    /// all.
    fn overflow_chunk_size(&self) -> usize {
        crate::utils::num::u32_to_usize(self.options.page_size)
            .saturating_sub(Self::OVERFLOW_PAGE_OVERHEAD)
            .max(1)
    }

    fn write_overflow_chain(&mut self, value: &[u8]) -> Result<u64> {
        let chunk = self.overflow_chunk_size();
        let mut next_id = NULL_PAGE;
        for piece in value.chunks(chunk).collect::<Vec<_>>().into_iter().rev() {
            let id = self.allocate_page()?;
            self.put_node(id, Node::Overflow(OverflowPage { next: next_id, payload: piece.to_vec() }))?;
            next_id = id;
        }
        Ok(next_id)
    }

    fn read_overflow_chain(&self, head: u64, total_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(total_len);
        let mut cur = head;
        while cur != NULL_PAGE {
            let node = self.get_node(cur)?;
            let page = node.as_overflow().ok_or_else(|| EngineError::CorruptPage {
                page_id: cur,
                reason: "expected overflow page in chain".into(),
            })?;
            out.extend_from_slice(&page.payload);
            cur = page.next;
        }
        out.truncate(total_len);
        Ok(out)
    }

    fn free_overflow_chain(&mut self, head: u64) -> Result<()> {
        let mut cur = head;
        while cur != NULL_PAGE {
            let node = self.get_node(cur)?;
            let next = node.as_overflow().map_or(NULL_PAGE, |p| p.next);
            self.free_page(cur)?;
            cur = next;
        }
        Ok(())
    }

    fn resolve_payload(&self, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Inline(bytes) => Ok(bytes.clone()),
            Payload::Overflow { head, length } => {
                self.read_overflow_chain(*head, *length as usize)
            }
        }
    }

    fn make_payload(&mut self, value: &[u8]) -> Result<Payload> {
        if value.len() <= crate::utils::num::u16_to_usize(self.options.value_size) {
            Ok(Payload::Inline(value.to_vec()))
        } else {
            let head = self.write_overflow_chain(value)?;
            Ok(Payload::Overflow { length: value.len() as u64, head })
        }
    }

    /// Looks up `key`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if `key` is the wrong width,
    /// or a fatal error on corruption/I/O failure (which poisons the tree).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_alive()?;
        self.validate_key(key)?;
        let result = self.get_inner(key);
        if let Err(e) = &result {
            self.poison(e);
        }
        result
    }

    fn get_inner(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cur = self.root_id;
        loop {
            match self.get_node(cur)? {
                Node::Internal(internal) => cur = internal.child_for(key),
                Node::Leaf(leaf) => {
                    let (idx, found) = leaf.find_slot(key);
                    if !found {
                        return Ok(None);
                    }
                    let payload = leaf.entries[idx].payload.clone();
                    return self.resolve_payload(&payload).map(Some);
                }
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: cur,
                        reason: "expected leaf or internal node while descending".into(),
                    });
                }
            }
        }
    }

    /// Inserts `key` → `value`, overwriting any existing entry for `key`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if `key` is the wrong width;
    /// otherwise any fatal error poisons the tree and leaves the prior
    /// durable state untouched (the open transaction is discarded).
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_alive()?;
        self.validate_key(key)?;
        self.file_manager.begin_transaction();
        let result = self.insert_inner(key, value).and_then(|()| self.persist_metadata());
        match result {
            Ok(()) => {
                self.file_manager.commit_transaction()?;
                self.maybe_checkpoint()
            }
            Err(e) => {
                self.file_manager.discard_transaction();
                self.poison(&e);
                Err(e)
            }
        }
    }

    fn insert_inner(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut path = Vec::new();
        let mut cur = self.root_id;
        loop {
            match self.get_node(cur)? {
                Node::Internal(internal) => {
                    path.push(cur);
                    cur = internal.child_for(key);
                }
                Node::Leaf(_) => break,
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: cur,
                        reason: "expected leaf or internal node while descending".into(),
                    });
                }
            }
        }

        let leaf_id = cur;
        let mut leaf = match self.get_node(leaf_id)? {
            Node::Leaf(l) => l,
            _ => unreachable!("path descent always terminates on a leaf"),
        };

        let payload = self.make_payload(value)?;
        if let Some(Payload::Overflow { head, .. }) = leaf.insert_entry(key.to_vec(), payload) {
            self.free_overflow_chain(head)?;
        }

        let capacity = self.options.order.saturating_sub(1) as usize;
        if leaf.entries.len() <= capacity {
            self.put_node(leaf_id, Node::Leaf(leaf))?;
            return Ok(());
        }

        let right_id = self.allocate_page()?;
        let (mut right, separator) = leaf.split();
        leaf.next = right_id;
        log::debug!("splitting leaf {leaf_id} into {leaf_id} and {right_id}");
        self.put_node(leaf_id, Node::Leaf(leaf))?;
        self.put_node(right_id, Node::Leaf(right))?;
        self.insert_into_parent(&mut path, leaf_id, right_id, separator)
    }

    fn insert_into_parent(
        &mut self,
        path: &mut Vec<u64>,
        left_id: u64,
        right_id: u64,
        separator: Vec<u8>,
    ) -> Result<()> {
        let Some(parent_id) = path.pop() else {
            let new_root_id = self.allocate_page()?;
            let new_root = InternalNode { keys: vec![separator], children: vec![left_id, right_id] };
            log::debug!("growing root: new root {new_root_id} over {left_id} and {right_id}");
            self.put_node(new_root_id, Node::Internal(new_root))?;
            self.root_id = new_root_id;
            return Ok(());
        };

        let mut internal = match self.get_node(parent_id)? {
            Node::Internal(i) => i,
            _ => {
                return Err(EngineError::CorruptPage {
                    page_id: parent_id,
                    reason: "expected internal node as split parent".into(),
                });
            }
        };
        internal.insert_child(separator, right_id);

        if !internal.is_overfull(self.options.order) {
            self.put_node(parent_id, Node::Internal(internal))?;
            return Ok(());
        }

        let (right_internal, promoted) = internal.split();
        let right_internal_id = self.allocate_page()?;
        log::debug!("splitting internal node {parent_id} into {parent_id} and {right_internal_id}");
        self.put_node(parent_id, Node::Internal(internal))?;
        self.put_node(right_internal_id, Node::Internal(right_internal))?;
        self.insert_into_parent(path, parent_id, right_internal_id, promoted)
    }

    /// Removes `key`, if present, without rebalancing: the entry is dropped
    /// from its leaf and any overflow chain it held is freed, but no
    /// sibling merge is attempted even if the leaf falls below the
    /// minimum-fill bound (§3 invariant 4 is relaxed for leaves touched by
    /// `remove`, matching the non-rebalancing deletion documented in the
    /// design notes).
    ///
    /// Returns whether `key` was present.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if `key` is the wrong width;
    /// otherwise any fatal error poisons the tree and leaves the prior
    /// durable state untouched (the open transaction is discarded).
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.check_alive()?;
        self.validate_key(key)?;
        self.file_manager.begin_transaction();
        let result = self.remove_inner(key).and_then(|removed| self.persist_metadata().map(|()| removed));
        match result {
            Ok(removed) => {
                self.file_manager.commit_transaction()?;
                self.maybe_checkpoint()?;
                Ok(removed)
            }
            Err(e) => {
                self.file_manager.discard_transaction();
                self.poison(&e);
                Err(e)
            }
        }
    }

    fn remove_inner(&mut self, key: &[u8]) -> Result<bool> {
        let mut cur = self.root_id;
        loop {
            match self.get_node(cur)? {
                Node::Internal(internal) => cur = internal.child_for(key),
                Node::Leaf(_) => break,
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: cur,
                        reason: "expected leaf or internal node while descending".into(),
                    });
                }
            }
        }

        let leaf_id = cur;
        let mut leaf = match self.get_node(leaf_id)? {
            Node::Leaf(l) => l,
            _ => unreachable!("path descent always terminates on a leaf"),
        };

        let Some(payload) = leaf.remove_entry(key) else {
            return Ok(false);
        };
        if let Payload::Overflow { head, .. } = payload {
            self.free_overflow_chain(head)?;
        }
        self.put_node(leaf_id, Node::Leaf(leaf))?;
        Ok(true)
    }

    /// Inserts many entries as a single WAL transaction. Entries may arrive
    /// in any order; duplicate keys within the batch resolve to the last
    /// occurrence, matching plain sequential [`Tree::insert`] calls.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if any key is the wrong
    /// width; otherwise any fatal error discards the whole batch.
    pub fn batch_insert<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        self.check_alive()?;
        use std::collections::BTreeMap;
        let mut deduped: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for (key, value) in entries {
            self.validate_key(&key)?;
            deduped.insert(key, value);
        }

        self.file_manager.begin_transaction();
        let result = (|| {
            for (key, value) in &deduped {
                self.insert_inner(key, value)?;
            }
            self.persist_metadata()
        })();

        match result {
            Ok(()) => {
                self.file_manager.commit_transaction()?;
                self.maybe_checkpoint()
            }
            Err(e) => {
                self.file_manager.discard_transaction();
                self.poison(&e);
                Err(e)
            }
        }
    }

    /// Returns every `(key, value)` pair with `lower <= key < upper`, in
    /// ascending key order.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidArgument`] if `lower`/`upper` are the
    /// wrong width, or a fatal error on corruption/I/O failure.
    pub fn range(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_alive()?;
        self.validate_key(lower)?;
        self.validate_key(upper)?;
        let result = self.range_inner(lower, upper);
        if let Err(e) = &result {
            self.poison(e);
        }
        result
    }

    fn range_inner(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut cur = self.root_id;
        loop {
            match self.get_node(cur)? {
                Node::Internal(internal) => cur = internal.child_for(lower),
                Node::Leaf(_) => break,
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: cur,
                        reason: "expected leaf or internal node while descending".into(),
                    });
                }
            }
        }

        let mut out = Vec::new();
        let mut leaf_id = cur;
        'outer: loop {
            let leaf = match self.get_node(leaf_id)? {
                Node::Leaf(l) => l,
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: leaf_id,
                        reason: "expected leaf while scanning range".into(),
                    });
                }
            };
            for entry in &leaf.entries {
                if entry.key.as_slice() >= upper {
                    break 'outer;
                }
                if entry.key.as_slice() >= lower {
                    let value = self.resolve_payload(&entry.payload)?;
                    out.push((entry.key.clone(), value));
                }
            }
            if leaf.next == NULL_PAGE {
                break;
            }
            leaf_id = leaf.next;
        }
        Ok(out)
    }

    /// Returns every key in the tree, in ascending order.
    ///
    /// # Errors
    /// Propagates any error from a full forward scan.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.items()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Returns every `(key, value)` pair in the tree, in ascending order.
    ///
    /// Unlike [`Tree::range`], this is an unbounded walk from the leftmost
    /// leaf to the end of the leaf chain rather than a half-open scan
    /// against a sentinel upper bound: a bound of all-`0xFF` bytes would
    /// exclude a key that is itself all `0xFF` (e.g. `u32::MAX`).
    ///
    /// # Errors
    /// Propagates any error from a full forward scan.
    pub fn items(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_alive()?;
        let result = self.items_inner();
        if let Err(e) = &result {
            self.poison(e);
        }
        result
    }

    fn items_inner(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut cur = self.root_id;
        loop {
            match self.get_node(cur)? {
                Node::Internal(internal) => cur = internal.children[0],
                Node::Leaf(_) => break,
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: cur,
                        reason: "expected leaf or internal node while descending".into(),
                    });
                }
            }
        }

        let mut out = Vec::new();
        let mut leaf_id = cur;
        loop {
            let leaf = match self.get_node(leaf_id)? {
                Node::Leaf(l) => l,
                _ => {
                    return Err(EngineError::CorruptPage {
                        page_id: leaf_id,
                        reason: "expected leaf while scanning full tree".into(),
                    });
                }
            };
            for entry in &leaf.entries {
                let value = self.resolve_payload(&entry.payload)?;
                out.push((entry.key.clone(), value));
            }
            if leaf.next == NULL_PAGE {
                break;
            }
            leaf_id = leaf.next;
        }
        Ok(out)
    }

    fn maybe_checkpoint(&mut self) -> Result<()> {
        if self.options.checkpoint_threshold > 0
            && self.file_manager.committed_len() >= self.options.checkpoint_threshold
        {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Flushes every WAL-committed page into the main file and truncates
    /// the WAL.
    ///
    /// # Errors
    /// Returns [`EngineError::IoError`] on underlying I/O failure, which
    /// poisons the tree.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.check_alive()?;
        let pending = self.file_manager.committed_len();
        match self.file_manager.checkpoint() {
            Ok(()) => {
                log::debug!("checkpointed {pending} page(s) into the main file");
                self.cache.lock().clear_all_dirty();
                Ok(())
            }
            Err(e) => {
                self.poison(&e);
                Err(e)
            }
        }
    }

    /// Performs a final checkpoint and marks the tree closed. Any operation
    /// after `close` fails with [`EngineError::Closed`].
    ///
    /// # Errors
    /// Returns [`EngineError::IoError`] if the final checkpoint fails.
    pub fn close(&mut self) -> Result<()> {
        self.check_alive()?;
        self.file_manager.close()?;
        self.cache.lock().clear_all_dirty();
        self.closed = true;
        Ok(())
    }
}
