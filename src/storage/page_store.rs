//! Page store interface and in-memory adapters.
//!
//! The index engine only ever talks to a [`PageStore`]. How pages reach
//! durable storage is up to the implementation:
//! - [`DiskManager`](super::DiskManager) - one database file
//! - [`MemoryPageStore`] - heap-backed, for transient indexes and tests
//! - [`SharedPageStore`] - lets several indexes allocate from one store

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Fixed-size page I/O consumed by the index engine.
pub trait PageStore {
    /// Read the page stored under `page_id`.
    fn read_page(&mut self, page_id: PageId) -> Result<Page>;

    /// Overwrite a previously allocated page.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()>;

    /// Reserve a page id that is not in use by anything else.
    fn allocate_page(&mut self) -> Result<PageId>;

    /// Return a page id to the store. The store may reuse it later.
    fn free_page(&mut self, page_id: PageId) -> Result<()>;

    /// Flush buffered writes to durable storage.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Heap-backed page store.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: HashMap<PageId, Box<Page>>,
    free_list: Vec<PageId>,
    next_page_id: u32,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated (not freed) pages.
    pub fn live_pages(&self) -> usize {
        self.pages.len()
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        let stored = self
            .pages
            .get(&page_id)
            .ok_or(Error::PageNotFound(page_id.0))?;

        let mut page = Page::new();
        page.copy_from(stored);
        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        let stored = self
            .pages
            .get_mut(&page_id)
            .ok_or(Error::PageNotFound(page_id.0))?;
        stored.copy_from(page);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = match self.free_list.pop() {
            Some(page_id) => page_id,
            None => {
                if self.next_page_id == u32::MAX {
                    return Err(Error::InvalidPageId(self.next_page_id));
                }
                let page_id = PageId::new(self.next_page_id);
                self.next_page_id += 1;
                page_id
            }
        };

        self.pages.insert(page_id, Box::new(Page::new()));
        Ok(page_id)
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        if self.pages.remove(&page_id).is_none() {
            return Err(Error::InvalidPageId(page_id.0));
        }
        self.free_list.push(page_id);
        Ok(())
    }
}

/// A page store shared by several owners.
///
/// An embedded database keeps the object-id index and every field index
/// in the same file; each [`Index`](crate::Index) gets a clone of the
/// same `SharedPageStore`.
pub struct SharedPageStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: PageStore> SharedPageStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run `f` with exclusive access to the underlying store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

impl<S> Clone for SharedPageStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PageStore> PageStore for SharedPageStore<S> {
    fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        self.inner.lock().read_page(page_id)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.inner.lock().write_page(page_id, page)
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        self.inner.lock().allocate_page()
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        self.inner.lock().free_page(page_id)
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.lock().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_write_and_read() {
        let mut store = MemoryPageStore::new();
        let page_id = store.allocate_page().unwrap();

        let mut page = Page::new();
        page.as_mut_slice()[10] = 0xAB;
        store.write_page(page_id, &page).unwrap();

        let read = store.read_page(page_id).unwrap();
        assert_eq!(read.as_slice()[10], 0xAB);
    }

    #[test]
    fn test_memory_store_reuses_freed_pages() {
        let mut store = MemoryPageStore::new();
        let first = store.allocate_page().unwrap();
        let second = store.allocate_page().unwrap();
        assert_ne!(first, second);

        store.free_page(first).unwrap();
        assert_eq!(store.live_pages(), 1);
        assert!(matches!(store.read_page(first), Err(Error::PageNotFound(_))));

        let reused = store.allocate_page().unwrap();
        assert_eq!(reused, first);
    }

    #[test]
    fn test_memory_store_double_free_fails() {
        let mut store = MemoryPageStore::new();
        let page_id = store.allocate_page().unwrap();
        store.free_page(page_id).unwrap();

        assert!(matches!(
            store.free_page(page_id),
            Err(Error::InvalidPageId(_))
        ));
    }

    #[test]
    fn test_shared_store_allocates_from_one_pool() {
        let mut a = SharedPageStore::new(MemoryPageStore::new());
        let mut b = a.clone();

        let pa = a.allocate_page().unwrap();
        let pb = b.allocate_page().unwrap();
        assert_ne!(pa, pb);

        assert_eq!(a.with_store(|s| s.live_pages()), 2);
    }
}
