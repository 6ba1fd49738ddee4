//! Layout constants shared by the storage and index layers.

/// Size of a page in bytes (4KB).
///
/// Every index page, leaf or inner, occupies exactly one page in the
/// page store. The value matches the OS page size on most systems.
///
/// # Alignment
/// Pages are aligned to 4096 bytes so a store may use Direct I/O.
pub const PAGE_SIZE: usize = 4096;

/// Size of the page header (type tag + CRC32).
pub const PAGE_HEADER_SIZE: usize = 5;

/// Width of the entry count written ahead of every index payload.
pub const ENTRY_COUNT_SIZE: usize = 2;

/// Width of a serialized key.
pub const KEY_SIZE: usize = 8;

/// Width of a serialized value.
pub const VALUE_SIZE: usize = 8;

/// Width of a serialized child page reference.
pub const CHILD_REF_SIZE: usize = 4;

/// Bytes available for index entries after header and entry count.
pub const PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - ENTRY_COUNT_SIZE;

/// Maximum number of (key, value) pairs a leaf page can hold.
///
/// With 4KB pages: `4089 / 16 = 255`.
pub const LEAF_CAPACITY: usize = PAYLOAD_SIZE / (KEY_SIZE + VALUE_SIZE);

/// Maximum number of separator keys an inner page can hold.
///
/// An inner page with `n` separators stores `n + 1` child references,
/// so `12n + 4 <= 4089`, giving 340 with 4KB pages.
pub const INNER_CAPACITY: usize = (PAYLOAD_SIZE - CHILD_REF_SIZE) / (KEY_SIZE + CHILD_REF_SIZE);

/// Maximum number of pages with u32 PageId.
pub const MAX_PAGES: u64 = (u32::MAX as u64) + 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_capacities_fit_in_page() {
        assert_eq!(LEAF_CAPACITY, 255);
        assert_eq!(INNER_CAPACITY, 340);

        let leaf_bytes = PAGE_HEADER_SIZE + ENTRY_COUNT_SIZE + LEAF_CAPACITY * 16;
        assert!(leaf_bytes <= PAGE_SIZE);

        let inner_bytes =
            PAGE_HEADER_SIZE + ENTRY_COUNT_SIZE + INNER_CAPACITY * 8 + (INNER_CAPACITY + 1) * 4;
        assert!(inner_bytes <= PAGE_SIZE);
    }
}
