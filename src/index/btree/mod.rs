//! Paged B+tree mapping `i64` keys to `i64` values.
//!
//! # Structure
//! ```text
//!                  ┌──────────────┐
//!                  │  Inner (root)│  separators + child refs
//!                  └──────┬───────┘
//!          ┌──────────────┼──────────────┐
//!     ┌────┴────┐    ┌────┴────┐    ┌────┴────┐
//!     │  Leaf   │    │  Leaf   │    │  Leaf   │   sorted (key, value)
//!     └─────────┘    └─────────┘    └─────────┘
//! ```
//! - [`page`] - leaf/inner pages, search and on-page encoding
//! - `tree` - page arena, lazy loading, write-back, diagnostics
//! - `mutator` - insert/delete with split, merge and copy-on-write
//! - `ascending` / `descending` - range-scan cursors
//!
//! # Iterating while mutating
//! Iterators and mutations may be interleaved freely on one thread. Before
//! a page is changed, every open iterator is asked whether it still needs
//! that page. An iterator positioned on it is moved onto an unmodified copy
//! and finishes that leaf from the copy; later leaves are read from the
//! live tree.

mod ascending;
mod cursor;
mod descending;
mod iterator;
mod mutator;
pub mod page;
mod tree;

use std::cell::RefCell;
use std::rc::Rc;

use crate::common::{PageId, Result};
use crate::index::config::IndexConfig;
use crate::index::stats::StatsSnapshot;
use crate::storage::PageStore;

use ascending::AscendingCursor;
use cursor::Cursor;
use descending::DescendingCursor;
use mutator::IndexCore;
use tree::PageTree;

pub use iterator::IndexIterator;
pub use page::Entry;

/// One unique key/value index.
///
/// # Example
/// ```
/// use pagedindex::{Index, IndexConfig, MemoryPageStore};
///
/// let mut index = Index::create(MemoryPageStore::new(), IndexConfig::default()).unwrap();
/// for key in [1, 5, 10, 15, 20] {
///     index.insert(key, key * 2).unwrap();
/// }
///
/// let keys: Vec<i64> = index
///     .ascending_iter(5, 15)
///     .unwrap()
///     .map(|entry| entry.unwrap().key)
///     .collect();
/// assert_eq!(keys, vec![5, 10, 15]);
///
/// // Delete while iterating
/// let mut iter = index.ascending_iter(i64::MIN, i64::MAX).unwrap();
/// while iter.has_next() {
///     let entry = iter.next_entry().unwrap();
///     index.delete_existing(entry.key).unwrap();
/// }
/// assert!(index.is_empty().unwrap());
/// ```
pub struct Index<S: PageStore> {
    core: Rc<RefCell<IndexCore<S>>>,
}

impl<S: PageStore> Index<S> {
    /// Create an empty index: a single empty leaf as root.
    ///
    /// Nothing is written to `store` until [`Index::write`].
    pub fn create(store: S, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_tree(PageTree::create(store, config)))
    }

    /// Open an index persisted earlier under `root`.
    ///
    /// Only the root is read here; other pages are read on first use.
    pub fn open(store: S, root: PageId, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_tree(PageTree::open(store, root, config)?))
    }

    fn from_tree(tree: PageTree<S>) -> Self {
        Self {
            core: Rc::new(RefCell::new(IndexCore::new(tree))),
        }
    }

    /// Insert `key`, or overwrite its value if already present.
    pub fn insert(&mut self, key: i64, value: i64) -> Result<()> {
        self.core.borrow_mut().insert(key, value)
    }

    /// Remove `key`. Returns `false` if it was not present.
    pub fn delete(&mut self, key: i64) -> Result<bool> {
        self.core.borrow_mut().delete(key)
    }

    /// Remove a key the caller has verified to exist and return its value.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent; this indicates the caller
    /// and the index disagree and is logged with a dump of the tree.
    pub fn delete_existing(&mut self, key: i64) -> Result<i64> {
        self.core.borrow_mut().delete_existing(key)
    }

    /// Value stored under `key`, if any.
    pub fn lookup(&self, key: i64) -> Result<Option<i64>> {
        self.core.borrow_mut().tree.lookup(key)
    }

    /// Scan `[min, max]` in increasing key order.
    pub fn ascending_iter(&self, min: i64, max: i64) -> Result<IndexIterator<S>> {
        self.open_iter(Cursor::Ascending(AscendingCursor::new(min, max)))
    }

    /// Scan from `max` down to `min`. The upper bound comes first.
    pub fn descending_iter(&self, max: i64, min: i64) -> Result<IndexIterator<S>> {
        self.open_iter(Cursor::Descending(DescendingCursor::new(max, min)))
    }

    fn open_iter(&self, cursor: Cursor) -> Result<IndexIterator<S>> {
        let slot = self.core.borrow_mut().open_cursor(cursor)?;
        Ok(IndexIterator::new(Rc::clone(&self.core), slot))
    }

    /// Close an iterator. Same as [`IndexIterator::close`].
    pub fn close(&self, iter: &mut IndexIterator<S>) {
        iter.close();
    }

    /// Persist all modified pages and return the root page id.
    ///
    /// Pass the returned id to [`Index::open`] to reload the index.
    pub fn write(&mut self) -> Result<PageId> {
        self.core.borrow_mut().tree.write()
    }

    /// Highest key, or `None` when empty.
    pub fn max_key(&self) -> Result<Option<i64>> {
        self.core.borrow_mut().tree.max_key()
    }

    pub fn is_empty(&self) -> Result<bool> {
        let core = self.core.borrow();
        let empty = core.tree.pages.node(core.tree.root)?.page.is_empty();
        Ok(empty)
    }

    /// Number of levels; an index whose root is a leaf has height 1.
    pub fn height(&self) -> Result<usize> {
        self.core.borrow_mut().tree.height()
    }

    pub fn config(&self) -> IndexConfig {
        self.core.borrow().tree.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.borrow().tree.stats.snapshot()
    }

    /// Iterators not yet exhausted or closed.
    pub fn open_iterators(&self) -> usize {
        self.core.borrow().cursors.len()
    }

    /// Pages held in memory, including copies still read by iterators.
    pub fn loaded_pages(&self) -> usize {
        self.core.borrow().tree.pages.len()
    }

    /// Text dump of the loaded pages, one per line, indented by depth.
    pub fn dump(&self) -> String {
        self.core.borrow().tree.dump()
    }

    /// Check ordering, separator bounds, parent links and fill bounds of
    /// the whole tree, reading stored pages as needed.
    pub fn verify(&self) -> Result<()> {
        self.core.borrow_mut().tree.verify()
    }
}
