//! Cursor plumbing shared by the ascending and descending scans.
//!
//! A cursor is the state behind one open [`IndexIterator`]. Cursors live in
//! a [`CursorRegistry`] owned by the index so the tree mutator can ask every
//! open cursor whether a page it is about to change is still needed
//! (`page_is_relevant`) and hand it a pre-mutation copy
//! (`replace_current_and_stack_if_equal`).
//!
//! [`IndexIterator`]: super::IndexIterator

use crate::common::{NodeId, Result};
use crate::storage::PageStore;

use super::ascending::AscendingCursor;
use super::descending::DescendingCursor;
use super::page::Entry;
use super::tree::{PageArena, PageTree};

/// Hooks every range-scan cursor exposes to the index.
pub(crate) trait PageIterator {
    /// Position on the first qualifying entry and buffer it.
    fn seek_first<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<()>;

    /// Hand out the buffered entry and buffer the one after it.
    fn advance<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<Option<Entry>>;

    fn has_next(&self) -> bool;

    /// Whether this cursor holds, or will still need, `node`.
    ///
    /// May answer `true` for pages it will never read; must never answer
    /// `false` for a page it is reading.
    fn page_is_relevant(&self, pages: &PageArena, root: NodeId, node: NodeId) -> Result<bool>;

    fn is_current(&self, node: NodeId) -> bool;

    /// `node` is the current leaf or on the navigation stack.
    fn references(&self, node: NodeId) -> bool;

    /// `node` is about to change. Move off it onto `snapshot`, its
    /// unmodified copy, and forget any recorded path through it.
    fn replace_current_and_stack_if_equal(&mut self, node: NodeId, snapshot: NodeId);
}

/// Leaf position plus the descent path that led there.
#[derive(Debug, Default)]
pub(crate) struct CursorPosition {
    pub(crate) current: Option<NodeId>,
    pub(crate) pos: usize,
    /// (inner page, child slot taken) from the root down.
    pub(crate) stack: Vec<(NodeId, usize)>,
}

impl CursorPosition {
    pub(crate) fn is_current(&self, node: NodeId) -> bool {
        self.current == Some(node)
    }

    pub(crate) fn in_stack(&self, node: NodeId) -> bool {
        self.stack.iter().any(|&(page, _)| page == node)
    }

    pub(crate) fn references(&self, node: NodeId) -> bool {
        self.is_current(node) || self.in_stack(node)
    }

    pub(crate) fn replace_current_and_stack_if_equal(&mut self, node: NodeId, snapshot: NodeId) {
        if self.current == Some(node) {
            self.current = Some(snapshot);
        }
        // Child slots below a changed inner page are no longer trustworthy;
        // the next leaf transition re-descends by key.
        if self.in_stack(node) {
            self.stack.clear();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.current = None;
        self.pos = 0;
        self.stack.clear();
    }
}

/// An open scan in either direction.
#[derive(Debug)]
pub(crate) enum Cursor {
    Ascending(AscendingCursor),
    Descending(DescendingCursor),
}

impl PageIterator for Cursor {
    fn seek_first<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<()> {
        match self {
            Cursor::Ascending(c) => c.seek_first(tree),
            Cursor::Descending(c) => c.seek_first(tree),
        }
    }

    fn advance<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<Option<Entry>> {
        match self {
            Cursor::Ascending(c) => c.advance(tree),
            Cursor::Descending(c) => c.advance(tree),
        }
    }

    fn has_next(&self) -> bool {
        match self {
            Cursor::Ascending(c) => c.has_next(),
            Cursor::Descending(c) => c.has_next(),
        }
    }

    fn page_is_relevant(&self, pages: &PageArena, root: NodeId, node: NodeId) -> Result<bool> {
        match self {
            Cursor::Ascending(c) => c.page_is_relevant(pages, root, node),
            Cursor::Descending(c) => c.page_is_relevant(pages, root, node),
        }
    }

    fn is_current(&self, node: NodeId) -> bool {
        match self {
            Cursor::Ascending(c) => c.is_current(node),
            Cursor::Descending(c) => c.is_current(node),
        }
    }

    fn references(&self, node: NodeId) -> bool {
        match self {
            Cursor::Ascending(c) => c.references(node),
            Cursor::Descending(c) => c.references(node),
        }
    }

    fn replace_current_and_stack_if_equal(&mut self, node: NodeId, snapshot: NodeId) {
        match self {
            Cursor::Ascending(c) => c.replace_current_and_stack_if_equal(node, snapshot),
            Cursor::Descending(c) => c.replace_current_and_stack_if_equal(node, snapshot),
        }
    }
}

/// Open cursors of one index, addressed by slot.
#[derive(Debug, Default)]
pub(crate) struct CursorRegistry {
    slots: Vec<Option<Cursor>>,
    free: Vec<usize>,
}

impl CursorRegistry {
    pub(crate) fn open(&mut self, cursor: Cursor) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(cursor);
                slot
            }
            None => {
                self.slots.push(Some(cursor));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn close(&mut self, slot: usize) -> Option<Cursor> {
        let cursor = self.slots.get_mut(slot)?.take();
        if cursor.is_some() {
            self.free.push(slot);
        }
        cursor
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&Cursor> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut Cursor> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Cursor> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Cursor> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
