#![forbid(unsafe_code)]
//! An embeddable, on-disk B+tree index for ordered key/value storage.
//!
//! [`Engine`] is the byte-level facade: keys and values are opaque
//! `Vec<u8>`s, and callers are responsible for producing fixed-width,
//! lexicographically-ordered key bytes. [`NexusTree`] is the ergonomic,
//! typed wrapper most callers want: it pairs an [`Engine`] with a
//! [`config::Serializer`] so keys can be ordinary Rust values.
//!
//! ```no_run
//! use nexustree::{NexusTree, config::Options, config::U64Serializer};
//!
//! # fn main() -> Result<(), nexustree::errors::EngineError> {
//! let tree: NexusTree<u64, _> = NexusTree::open(
//!     "example.db",
//!     Options::default().with_key_size(8),
//!     U64Serializer,
//! )?;
//! tree.insert(&42, b"hello")?;
//! assert_eq!(tree.get(&42)?, Some(b"hello".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod file_manager;
pub mod freelist;
pub mod fsutil;
pub mod logger;
pub mod page;
pub mod tree;
pub mod utils;
pub mod wal;

pub use config::{Options, Serializer};
pub use engine::Engine;
pub use errors::{EngineError, Result};

use std::marker::PhantomData;
use std::path::Path;

/// Ergonomic typed wrapper over [`Engine`]: translates `K` to and from the
/// fixed-width key bytes the engine stores via a caller-supplied
/// [`Serializer`].
///
/// The engine itself never inspects `K`; `NexusTree` exists purely to avoid
/// every caller hand-rolling the serialize/deserialize boilerplate around
/// [`Engine::get`]/[`Engine::insert`].
pub struct NexusTree<K, S> {
    engine: Engine,
    serializer: S,
    _key: PhantomData<K>,
}

impl<K, S: Serializer<K>> NexusTree<K, S> {
    /// Opens (or creates) a tree file at `path`, with `serializer.key_size()`
    /// overriding `options.key_size`.
    ///
    /// # Errors
    /// See [`Engine::open`].
    pub fn open(path: impl AsRef<Path>, options: Options, serializer: S) -> Result<Self> {
        let options = options.with_key_size(serializer.key_size());
        let engine = Engine::open(path.as_ref(), options)?;
        Ok(Self { engine, serializer, _key: PhantomData })
    }

    /// Looks up `key`.
    ///
    /// # Errors
    /// See [`Engine::get`].
    pub fn get(&self, key: &K) -> Result<Option<Vec<u8>>> {
        self.engine.get(&self.serializer.serialize(key))
    }

    /// Inserts `key` → `value`, overwriting any existing entry for `key`.
    ///
    /// # Errors
    /// See [`Engine::insert`].
    pub fn insert(&self, key: &K, value: &[u8]) -> Result<()> {
        self.engine.insert(&self.serializer.serialize(key), value)
    }

    /// Inserts many entries as a single write-ahead-log transaction.
    ///
    /// # Errors
    /// See [`Engine::batch_insert`].
    pub fn batch_insert<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
    {
        let encoded =
            entries.into_iter().map(|(k, v)| (self.serializer.serialize(&k), v)).collect::<Vec<_>>();
        self.engine.batch_insert(encoded)
    }

    /// Returns every `(key, value)` pair with `lower <= key < upper`.
    ///
    /// # Errors
    /// See [`Engine::range`].
    pub fn range(&self, lower: &K, upper: &K) -> Result<Vec<(K, Vec<u8>)>> {
        let lower = self.serializer.serialize(lower);
        let upper = self.serializer.serialize(upper);
        let rows = self.engine.range(&lower, &upper)?;
        Ok(rows.into_iter().map(|(k, v)| (self.serializer.deserialize(&k), v)).collect())
    }

    /// Removes `key`, without rebalancing. Returns whether it was present.
    ///
    /// # Errors
    /// See [`Engine::remove`].
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.engine.remove(&self.serializer.serialize(key))
    }

    /// Returns every key in the tree, in ascending order.
    ///
    /// # Errors
    /// See [`Engine::keys`].
    pub fn keys(&self) -> Result<Vec<K>> {
        Ok(self.engine.keys()?.into_iter().map(|k| self.serializer.deserialize(&k)).collect())
    }

    /// Returns every `(key, value)` pair in the tree, in ascending order.
    ///
    /// # Errors
    /// See [`Engine::items`].
    pub fn items(&self) -> Result<Vec<(K, Vec<u8>)>> {
        let rows = self.engine.items()?;
        Ok(rows.into_iter().map(|(k, v)| (self.serializer.deserialize(&k), v)).collect())
    }

    /// Flushes every WAL-committed page into the main file and truncates
    /// the WAL.
    ///
    /// # Errors
    /// See [`Engine::checkpoint`].
    pub fn checkpoint(&self) -> Result<()> {
        self.engine.checkpoint()
    }

    /// Performs a final checkpoint and marks the tree closed.
    ///
    /// # Errors
    /// See [`Engine::close`].
    pub fn close(&self) -> Result<()> {
        self.engine.close()
    }

    /// Returns the underlying byte-level [`Engine`], for callers that need
    /// direct access alongside the typed surface.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::U64Serializer;
    use tempfile::tempdir;

    #[test]
    fn typed_wrapper_round_trips_u64_keys() {
        let dir = tempdir().unwrap();
        let tree: NexusTree<u64, _> =
            NexusTree::open(dir.path().join("t.db"), Options::default(), U64Serializer).unwrap();
        tree.insert(&7, b"seven").unwrap();
        tree.insert(&3, b"three").unwrap();
        assert_eq!(tree.get(&7).unwrap(), Some(b"seven".to_vec()));
        let items = tree.items().unwrap();
        assert_eq!(items, vec![(3, b"three".to_vec()), (7, b"seven".to_vec())]);

        assert!(tree.remove(&3).unwrap());
        assert_eq!(tree.get(&3).unwrap(), None);
        assert!(!tree.remove(&3).unwrap());
    }
}
