//! On-disk freelist: a chain of pages, threaded through the metadata page's
//! `freelist_head`, each holding the id of the next free page (0 terminates
//! the chain). Grounded in the linked free-list convention used by simpler
//! single-file B+tree stores: a freed page's own body becomes the next
//! pointer, so no separate bookkeeping structure is needed on disk.

use crate::errors::Result;
use crate::page::node::{FreelistPage, Node};

/// Abstraction the freelist needs from whatever owns page storage: read a
/// decoded node, write a decoded node back (staged through the WAL by the
/// caller), or extend the file for a brand new page id.
pub trait PageStore {
    fn read_node(&mut self, page_id: u64) -> Result<Node>;
    fn write_node(&mut self, page_id: u64, node: &Node) -> Result<()>;
    fn extend(&mut self) -> Result<u64>;
}

/// In-memory handle on the freelist's head pointer. The authoritative value
/// lives in the metadata page; callers are responsible for persisting an
/// updated head there after `allocate`/`deallocate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Freelist {
    pub head: u64,
}

impl Freelist {
    #[must_use]
    pub fn new(head: u64) -> Self {
        Self { head }
    }

    /// Pops a page id off the freelist, or extends the file if it is empty.
    ///
    /// # Errors
    /// Propagates any I/O or decode failure from `store`.
    pub fn allocate(&mut self, store: &mut impl PageStore) -> Result<u64> {
        if self.head == crate::page::NULL_PAGE {
            return store.extend();
        }
        let id = self.head;
        let node = store.read_node(id)?;
        let next = match node {
            Node::Freelist(FreelistPage { next }) => next,
            _ => crate::page::NULL_PAGE,
        };
        self.head = next;
        Ok(id)
    }

    /// Pushes `page_id` back onto the freelist, overwriting its contents
    /// with a freelist link to the previous head.
    ///
    /// # Errors
    /// Propagates any I/O failure from `store`.
    pub fn deallocate(&mut self, store: &mut impl PageStore, page_id: u64) -> Result<()> {
        let node = Node::Freelist(FreelistPage { next: self.head });
        store.write_node(page_id, &node)?;
        self.head = page_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeStore {
        pages: HashMap<u64, Node>,
        next_id: u64,
    }

    impl PageStore for FakeStore {
        fn read_node(&mut self, page_id: u64) -> Result<Node> {
            Ok(self.pages.get(&page_id).cloned().unwrap())
        }

        fn write_node(&mut self, page_id: u64, node: &Node) -> Result<()> {
            self.pages.insert(page_id, node.clone());
            Ok(())
        }

        fn extend(&mut self) -> Result<u64> {
            let id = self.next_id;
            self.next_id += 1;
            Ok(id)
        }
    }

    #[test]
    fn allocate_extends_file_when_empty() {
        let mut store = FakeStore { pages: HashMap::new(), next_id: 1 };
        let mut freelist = Freelist::new(0);
        assert_eq!(freelist.allocate(&mut store).unwrap(), 1);
        assert_eq!(freelist.allocate(&mut store).unwrap(), 2);
    }

    #[test]
    fn deallocate_then_allocate_reuses_the_page_lifo() {
        let mut store = FakeStore { pages: HashMap::new(), next_id: 1 };
        let mut freelist = Freelist::new(0);
        freelist.deallocate(&mut store, 5).unwrap();
        freelist.deallocate(&mut store, 6).unwrap();
        assert_eq!(freelist.allocate(&mut store).unwrap(), 6);
        assert_eq!(freelist.allocate(&mut store).unwrap(), 5);
        assert_eq!(freelist.allocate(&mut store).unwrap(), 1);
    }
}
