//! Index pages: sorted leaves and separator-routing inner pages.
//!
//! # On-page layout
//! ```text
//! Leaf:   [header:5][n:u16][key:i64 value:i64] * n
//! Inner:  [header:5][n:u16][key:i64] * n [child:u32] * (n + 1)
//! ```
//! Inner pages store keys and child ids in separate runs so a scan over
//! the separators touches contiguous bytes.

use std::fmt;

use crate::common::config::{
    CHILD_REF_SIZE, ENTRY_COUNT_SIZE, INNER_CAPACITY, KEY_SIZE, LEAF_CAPACITY, PAGE_HEADER_SIZE,
    VALUE_SIZE,
};
use crate::common::{Error, NodeId, PageId, Result};
use crate::storage::page::{Page, PageType};

const COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = PAGE_HEADER_SIZE + ENTRY_COUNT_SIZE;

/// A (key, value) pair produced by an index iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    pub key: i64,
    pub value: i64,
}

/// Reference from an inner page to one of its children.
///
/// Children are read from the store on first access and cached as
/// `Loaded` from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Loaded(NodeId),
    Stored(PageId),
}

/// Leaf page: `keys` strictly increasing, `values[i]` belongs to `keys[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafPage {
    pub(crate) keys: Vec<i64>,
    pub(crate) values: Vec<i64>,
}

impl LeafPage {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn entry(&self, pos: usize) -> Entry {
        Entry {
            key: self.keys[pos],
            value: self.values[pos],
        }
    }

    pub fn first_key(&self) -> Option<i64> {
        self.keys.first().copied()
    }

    pub fn last_key(&self) -> Option<i64> {
        self.keys.last().copied()
    }

    /// `Ok(pos)` if `key` is stored at `pos`, `Err(pos)` with its insertion point otherwise.
    pub fn search(&self, key: i64) -> std::result::Result<usize, usize> {
        self.keys.binary_search(&key)
    }

    /// Position of the first key `>= key`.
    pub fn lower_bound(&self, key: i64) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Number of keys `<= key`; the position just past the last such key.
    pub fn upper_bound(&self, key: i64) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    pub fn get(&self, key: i64) -> Option<i64> {
        self.search(key).ok().map(|pos| self.values[pos])
    }

    pub(crate) fn insert_at(&mut self, pos: usize, key: i64, value: i64) {
        self.keys.insert(pos, key);
        self.values.insert(pos, value);
    }

    pub(crate) fn remove_at(&mut self, pos: usize) -> Entry {
        Entry {
            key: self.keys.remove(pos),
            value: self.values.remove(pos),
        }
    }

    /// Move entries `[at..]` into a new leaf.
    pub(crate) fn split_off(&mut self, at: usize) -> LeafPage {
        LeafPage {
            keys: self.keys.split_off(at),
            values: self.values.split_off(at),
        }
    }

    /// Move every entry of `right` onto the end of this leaf.
    pub(crate) fn append(&mut self, right: &mut LeafPage) {
        self.keys.append(&mut right.keys);
        self.values.append(&mut right.values);
    }

    pub fn encode(&self, page: &mut Page) {
        page.reset();
        page.write_u16(COUNT_OFFSET, self.len() as u16);

        let mut offset = ENTRIES_OFFSET;
        for (&key, &value) in self.keys.iter().zip(&self.values) {
            page.write_i64(offset, key);
            page.write_i64(offset + KEY_SIZE, value);
            offset += KEY_SIZE + VALUE_SIZE;
        }
        page.seal(PageType::IndexLeaf);
    }
}

/// Inner page: `n` separators routing to `n + 1` children.
///
/// Every key under `children[i]` is `< keys[i]` and `>= keys[i - 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerPage {
    pub(crate) keys: Vec<i64>,
    pub(crate) children: Vec<ChildRef>,
}

impl InnerPage {
    /// A page with a single separator and two children.
    pub fn new(left: ChildRef, separator: i64, right: ChildRef) -> Self {
        Self {
            keys: vec![separator],
            children: vec![left, right],
        }
    }

    /// Number of separators.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Index of the child whose subtree would contain `key`.
    ///
    /// A key equal to a separator routes to the child on its right.
    pub fn locate(&self, key: i64) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Slot holding `Loaded(node)`, if any.
    pub fn position_of(&self, node: NodeId) -> Option<usize> {
        self.children
            .iter()
            .position(|child| *child == ChildRef::Loaded(node))
    }

    /// Keep `keys[..at]` and `children[..=at]`; return the promoted
    /// separator and a page holding the rest.
    pub(crate) fn split_off(&mut self, at: usize) -> (i64, InnerPage) {
        let mut right_keys = self.keys.split_off(at);
        let right_children = self.children.split_off(at + 1);
        let promoted = right_keys.remove(0);
        (
            promoted,
            InnerPage {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    /// Encode with child page ids resolved by the caller.
    pub fn encode(&self, child_ids: &[PageId], page: &mut Page) {
        debug_assert_eq!(child_ids.len(), self.children.len());

        page.reset();
        page.write_u16(COUNT_OFFSET, self.len() as u16);

        let mut offset = ENTRIES_OFFSET;
        for &key in &self.keys {
            page.write_i64(offset, key);
            offset += KEY_SIZE;
        }
        for child in child_ids {
            page.write_u32(offset, child.0);
            offset += CHILD_REF_SIZE;
        }
        page.seal(PageType::IndexInner);
    }
}

/// A node of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPage {
    Leaf(LeafPage),
    Inner(InnerPage),
}

impl IndexPage {
    pub fn is_leaf(&self) -> bool {
        matches!(self, IndexPage::Leaf(_))
    }

    /// Entries (leaf) or separators (inner).
    pub fn len(&self) -> usize {
        match self {
            IndexPage::Leaf(leaf) => leaf.len(),
            IndexPage::Inner(inner) => inner.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> &[i64] {
        match self {
            IndexPage::Leaf(leaf) => &leaf.keys,
            IndexPage::Inner(inner) => &inner.keys,
        }
    }

    /// Decode a page read from the store.
    ///
    /// # Errors
    /// - `Error::ChecksumMismatch` if the CRC does not verify
    /// - `Error::CorruptPage` for a non-index page type, an entry count
    ///   beyond page capacity or keys out of order
    pub fn decode(page_id: PageId, page: &Page) -> Result<IndexPage> {
        if !page.verify_checksum() {
            return Err(Error::ChecksumMismatch(page_id.0));
        }

        let corrupt = |reason: String| Error::CorruptPage {
            page_id: page_id.0,
            reason,
        };

        let n = page.read_u16(COUNT_OFFSET) as usize;
        let decoded = match page.header().page_type {
            PageType::IndexLeaf => {
                if n > LEAF_CAPACITY {
                    return Err(corrupt(format!("leaf entry count {n} exceeds capacity")));
                }
                let mut leaf = LeafPage {
                    keys: Vec::with_capacity(n),
                    values: Vec::with_capacity(n),
                };
                let mut offset = ENTRIES_OFFSET;
                for _ in 0..n {
                    leaf.keys.push(page.read_i64(offset));
                    leaf.values.push(page.read_i64(offset + KEY_SIZE));
                    offset += KEY_SIZE + VALUE_SIZE;
                }
                IndexPage::Leaf(leaf)
            }
            PageType::IndexInner => {
                if n > INNER_CAPACITY {
                    return Err(corrupt(format!("inner key count {n} exceeds capacity")));
                }
                let keys: Vec<i64> = (0..n)
                    .map(|i| page.read_i64(ENTRIES_OFFSET + i * KEY_SIZE))
                    .collect();
                let children_offset = ENTRIES_OFFSET + n * KEY_SIZE;
                let children = (0..=n)
                    .map(|i| {
                        ChildRef::Stored(PageId::new(
                            page.read_u32(children_offset + i * CHILD_REF_SIZE),
                        ))
                    })
                    .collect();
                IndexPage::Inner(InnerPage { keys, children })
            }
            other => return Err(corrupt(format!("unexpected page type {:?}", other))),
        };

        if decoded.keys().windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt("keys are not strictly increasing".to_string()));
        }
        Ok(decoded)
    }
}

impl fmt::Display for IndexPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexPage::Leaf(leaf) => {
                write!(f, "Leaf(n={}) [", leaf.len())?;
                for (i, (key, value)) in leaf.keys.iter().zip(&leaf.values).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                write!(f, "]")
            }
            IndexPage::Inner(inner) => write!(f, "Inner(n={}) {:?}", inner.len(), inner.keys),
        }
    }
}
