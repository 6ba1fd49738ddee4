//! Caller-facing handle over an open range scan.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::common::{Error, Result};
use crate::storage::PageStore;

use super::mutator::IndexCore;
use super::page::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    Open(usize),
    Exhausted,
    Closed,
}

/// A lazy, non-restartable range scan.
///
/// Created by [`Index::ascending_iter`] or [`Index::descending_iter`].
/// The index may be mutated while the iterator is open: every key that was
/// present when the scan first reached its page, and is not moved by the
/// mutation, is returned exactly once.
///
/// `has_next() == false` is the normal end of a scan. Calling
/// [`next_entry`](Self::next_entry) after that is a programming error and
/// returns [`Error::IteratorExhausted`], or [`Error::IteratorClosed`] after
/// [`close`](Self::close). Dropping the iterator closes it.
///
/// [`Index::ascending_iter`]: super::Index::ascending_iter
/// [`Index::descending_iter`]: super::Index::descending_iter
pub struct IndexIterator<S: PageStore> {
    core: Rc<RefCell<IndexCore<S>>>,
    state: IterState,
}

impl<S: PageStore> IndexIterator<S> {
    pub(crate) fn new(core: Rc<RefCell<IndexCore<S>>>, slot: Option<usize>) -> Self {
        let state = match slot {
            Some(slot) => IterState::Open(slot),
            None => IterState::Exhausted,
        };
        Self { core, state }
    }

    /// True while another entry is buffered.
    pub fn has_next(&self) -> bool {
        match self.state {
            IterState::Open(slot) => self.core.borrow().cursor_has_next(slot),
            IterState::Exhausted | IterState::Closed => false,
        }
    }

    /// Return the next entry.
    ///
    /// # Errors
    /// - `Error::IteratorExhausted` if `has_next()` is false
    /// - `Error::IteratorClosed` after `close()`
    /// - any page store or corruption error hit while reading ahead
    pub fn next_entry(&mut self) -> Result<Entry> {
        let slot = match self.state {
            IterState::Open(slot) => slot,
            IterState::Exhausted => return Err(Error::IteratorExhausted),
            IterState::Closed => return Err(Error::IteratorClosed),
        };

        let mut core = self.core.borrow_mut();
        let entry = core.advance(slot)?;
        if !core.cursor_has_next(slot) {
            core.close_cursor(slot);
            self.state = IterState::Exhausted;
        }
        entry.ok_or(Error::IteratorExhausted)
    }

    /// Removal through an iterator is not supported; delete through the
    /// index instead.
    pub fn remove(&mut self) -> Result<()> {
        Err(Error::UnsupportedOperation("remove through an index iterator"))
    }

    /// Release the scan. Later `next_entry` calls fail with `IteratorClosed`.
    pub fn close(&mut self) {
        if let IterState::Open(slot) = self.state {
            if let Ok(mut core) = self.core.try_borrow_mut() {
                core.close_cursor(slot);
            }
        }
        self.state = IterState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == IterState::Closed
    }
}

impl<S: PageStore> Iterator for IndexIterator<S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        Some(self.next_entry())
    }
}

impl<S: PageStore> Drop for IndexIterator<S> {
    fn drop(&mut self) {
        if matches!(self.state, IterState::Open(_)) {
            self.close();
        }
    }
}

impl<S: PageStore> fmt::Debug for IndexIterator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexIterator")
            .field("state", &self.state)
            .finish()
    }
}
