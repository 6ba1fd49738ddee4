//! Disk Manager - single-file page store.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Allocating pages, reusing freed ones first
//! - Flushing the file on `sync`

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::trace;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageType};
use crate::storage::page_store::PageStore;

/// Stores pages in a single database file.
///
/// # File Layout
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096     8192    ...    N×4096
/// ```
///
/// # Free pages
/// Freed pages are stamped with [`PageType::Free`] and kept on an
/// in-memory free list for the lifetime of this `DiskManager`. A reopened
/// file starts with an empty free list.
///
/// # Durability
/// Writes are not flushed individually. [`PageStore::sync`] calls
/// `fsync()`; the index calls it at the end of every write-back.
pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u32,
    free_list: Vec<PageId>,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_count: 0,
            free_list: Vec::new(),
        })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let page_count = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file,
            page_count,
            free_list: Vec::new(),
        })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Get the number of pages in the database file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Number of pages waiting on the free list.
    #[inline]
    pub fn free_pages(&self) -> usize {
        self.free_list.len()
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }

    fn check_allocated(&self, page_id: PageId) -> Result<()> {
        if page_id.0 >= self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }
        if self.free_list.contains(&page_id) {
            return Err(Error::InvalidPageId(page_id.0));
        }
        Ok(())
    }

    fn write_at(&mut self, page_id: PageId, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(page_id.offset(PAGE_SIZE)))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

impl PageStore for DiskManager {
    /// # Errors
    /// Returns `Error::PageNotFound` past the end of the file and
    /// `Error::InvalidPageId` for a page on the free list.
    fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        self.check_allocated(page_id)?;

        self.file.seek(SeekFrom::Start(page_id.offset(PAGE_SIZE)))?;
        let mut page = Page::new();
        self.file.read_exact(page.as_mut_slice())?;

        trace!(%page_id, "read page");
        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.check_allocated(page_id)?;
        self.write_at(page_id, page.as_slice())?;

        trace!(%page_id, "wrote page");
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_list.pop() {
            return Ok(page_id);
        }

        if self.page_count == u32::MAX {
            return Err(Error::InvalidPageId(self.page_count));
        }

        // Extend the file with a zeroed page
        let page_id = PageId::new(self.page_count);
        self.write_at(page_id, &[0u8; PAGE_SIZE])?;
        self.page_count += 1;
        Ok(page_id)
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        self.check_allocated(page_id)?;

        let mut page = Page::new();
        page.seal(PageType::Free);
        self.write_at(page_id, page.as_slice())?;
        self.free_list.push(page_id);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        DiskManager::create(&path).unwrap();
        assert!(DiskManager::create(&path).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        assert!(DiskManager::open(dir.path().join("missing.db")).is_err());
    }

    #[test]
    fn test_write_sync_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let page_id;
        {
            let mut dm = DiskManager::create(&path).unwrap();
            page_id = dm.allocate_page().unwrap();

            let mut page = Page::new();
            page.write_i64(20, 42);
            page.seal(PageType::IndexLeaf);
            dm.write_page(page_id, &page).unwrap();
            dm.sync().unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.page_count(), 1);
        assert_eq!(dm.file_size(), PAGE_SIZE as u64);

        let page = dm.read_page(page_id).unwrap();
        assert!(page.verify_checksum());
        assert_eq!(page.read_i64(20), 42);
    }

    #[test]
    fn test_freed_page_is_reused() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();

        let first = dm.allocate_page().unwrap();
        let _second = dm.allocate_page().unwrap();
        dm.free_page(first).unwrap();
        assert_eq!(dm.free_pages(), 1);

        assert!(matches!(dm.read_page(first), Err(Error::InvalidPageId(0))));

        let reused = dm.allocate_page().unwrap();
        assert_eq!(reused, first);
        assert_eq!(dm.page_count(), 2);
        assert_eq!(dm.free_pages(), 0);
    }

    #[test]
    fn test_freed_page_is_stamped_free() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path).unwrap();
            let page_id = dm.allocate_page().unwrap();
            dm.free_page(page_id).unwrap();
            dm.sync().unwrap();
        }

        // A fresh handle forgets the free list but the page says Free
        let mut dm = DiskManager::open(&path).unwrap();
        let page = dm.read_page(PageId::new(0)).unwrap();
        assert_eq!(page.header().page_type, PageType::Free);
    }

    #[test]
    fn test_read_and_write_past_end() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        dm.allocate_page().unwrap();

        assert!(matches!(
            dm.read_page(PageId::new(1)),
            Err(Error::PageNotFound(1))
        ));
        assert!(dm.write_page(PageId::new(5), &Page::new()).is_err());
    }
}
