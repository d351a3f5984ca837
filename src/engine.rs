//! Thread-safe facade over [`Tree`]: the multiple-readers/single-writer
//! coordination described in the concurrency model. `get`/`range`/`keys`/
//! `items` take the lock in shared mode; `insert`/`batch_insert`/
//! `checkpoint`/`close` take it exclusively.
//!
//! [`Tree`]'s own methods already take `&self` for reads (the page cache and
//! poison flag use interior mutability internally), so the shared lock here
//! genuinely admits concurrent readers rather than serializing them.

use crate::config::Options;
use crate::errors::Result;
use crate::tree::Tree;
use parking_lot::RwLock;
use std::path::Path;

/// An opened on-disk B+tree. Cheaply cloneable behind an `Arc` if shared
/// across threads; every operation takes the engine's lock for its own
/// duration and releases it before returning.
pub struct Engine {
    tree: RwLock<Tree>,
}

impl Engine {
    /// Opens an existing tree file, or creates one if `path` does not exist.
    ///
    /// # Errors
    /// See [`Tree::open`].
    pub fn open(path: &Path, options: Options) -> Result<Self> {
        Ok(Self { tree: RwLock::new(Tree::open(path, options)?) })
    }

    /// Looks up `key`. Acquired in shared mode: safe to call concurrently
    /// with other readers, blocks while a writer holds the lock.
    ///
    /// # Errors
    /// See [`Tree::get`].
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree.read().get(key)
    }

    /// Returns every `(key, value)` pair with `lower <= key < upper`.
    ///
    /// # Errors
    /// See [`Tree::range`].
    pub fn range(&self, lower: &[u8], upper: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.read().range(lower, upper)
    }

    /// Returns every key in the tree, in ascending order.
    ///
    /// # Errors
    /// See [`Tree::keys`].
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        self.tree.read().keys()
    }

    /// Returns every `(key, value)` pair in the tree, in ascending order.
    ///
    /// # Errors
    /// See [`Tree::items`].
    pub fn items(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.read().items()
    }

    /// Inserts `key` → `value`, overwriting any existing entry. Acquired
    /// exclusively: blocks until every in-flight reader releases the lock,
    /// and blocks subsequent readers until this call returns.
    ///
    /// # Errors
    /// See [`Tree::insert`].
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.write().insert(key, value)
    }

    /// Inserts many entries as a single write-ahead-log transaction.
    ///
    /// # Errors
    /// See [`Tree::batch_insert`].
    pub fn batch_insert<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        self.tree.write().batch_insert(entries)
    }

    /// Removes `key`, without rebalancing. Returns whether it was present.
    ///
    /// # Errors
    /// See [`Tree::remove`].
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.tree.write().remove(key)
    }

    /// Flushes every WAL-committed page into the main file and truncates
    /// the WAL.
    ///
    /// # Errors
    /// See [`Tree::checkpoint`].
    pub fn checkpoint(&self) -> Result<()> {
        self.tree.write().checkpoint()
    }

    /// Performs a final checkpoint and marks the engine closed.
    ///
    /// # Errors
    /// See [`Tree::close`].
    pub fn close(&self) -> Result<()> {
        self.tree.write().close()
    }
}
