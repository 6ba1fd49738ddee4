//! Page - the fixed 4KB unit exchanged with a page store.

use crate::common::config::PAGE_SIZE;

use super::page_header::{PageHeader, PageType};

/// A page of data (4KB, 4KB-aligned).
///
/// Index pages are encoded into a `Page` before they reach the store and
/// decoded from one when they are read back. All multi-byte fields are
/// little-endian.
///
/// # Clone
/// `Page` does NOT implement `Clone` outside tests. Stores that keep
/// pages in memory copy them explicitly with [`Page::copy_from`].
///
/// # Example
/// ```
/// use pagedindex::storage::page::Page;
///
/// let mut page = Page::new();
/// page.write_i64(16, -5);
/// assert_eq!(page.read_i64(16), -5);
/// ```
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Overwrite this page with the contents of `other`.
    pub fn copy_from(&mut self, other: &Page) {
        self.data.copy_from_slice(&other.data);
    }

    /// Get the size of a page.
    #[inline]
    pub const fn size() -> usize {
        PAGE_SIZE
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Stamp the page type and a fresh checksum.
    ///
    /// Call this after the payload is complete.
    pub fn seal(&mut self, page_type: PageType) {
        self.set_header(&PageHeader::new(page_type));
        self.update_checksum();
    }

    /// Compute and store checksum in the header.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }

    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    #[inline]
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    #[inline]
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn read_i64(&self, offset: usize) -> i64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[offset..offset + 8]);
        i64::from_le_bytes(bytes)
    }

    #[inline]
    pub fn write_i64(&mut self, offset: usize, value: i64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new();
        new_page.copy_from(self);
        new_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_and_alignment() {
        assert_eq!(std::mem::size_of::<Page>(), PAGE_SIZE);
        assert_eq!(std::mem::align_of::<Page>(), 4096);
    }

    #[test]
    fn test_little_endian_fields() {
        let mut page = Page::new();
        page.write_u16(5, 0x0102);
        page.write_u32(7, 0x0A0B0C0D);
        page.write_i64(11, -2);

        assert_eq!(&page.as_slice()[5..7], &[0x02, 0x01]);
        assert_eq!(&page.as_slice()[7..11], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(page.read_u16(5), 0x0102);
        assert_eq!(page.read_u32(7), 0x0A0B0C0D);
        assert_eq!(page.read_i64(11), -2);
    }

    #[test]
    fn test_seal_sets_type_and_checksum() {
        let mut page = Page::new();
        page.write_i64(100, 77);
        page.seal(PageType::IndexLeaf);

        assert_eq!(page.header().page_type, PageType::IndexLeaf);
        assert!(page.verify_checksum());

        page.write_i64(100, 78);
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_copy_from() {
        let mut source = Page::new();
        source.as_mut_slice()[4095] = 0xCD;

        let mut target = Page::new();
        target.as_mut_slice()[0] = 0xFF;
        target.copy_from(&source);

        assert_eq!(target.as_slice()[0], 0);
        assert_eq!(target.as_slice()[4095], 0xCD);
    }
}
