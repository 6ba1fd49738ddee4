//! Ascending range scan over `[min, max]`.

use crate::common::{NodeId, Result};
use crate::storage::PageStore;

use super::cursor::{CursorPosition, PageIterator};
use super::page::{Entry, IndexPage};
use super::tree::{PageArena, PageTree};

/// Cursor yielding keys from `min` up to `max`.
///
/// One entry is always buffered ahead so `has_next` never touches pages.
/// Besides the navigation stack the cursor remembers `leaf_upper`, the
/// separator bounding its current leaf from above: everything below it has
/// been or is being read. When the stack is dropped because an ancestor
/// changed, the next leaf is found by descending to `leaf_upper` again.
#[derive(Debug)]
pub(crate) struct AscendingCursor {
    min: i64,
    max: i64,
    at: CursorPosition,
    leaf_upper: Option<i64>,
    next: Option<Entry>,
}

impl AscendingCursor {
    pub(crate) fn new(min: i64, max: i64) -> Self {
        Self {
            min,
            max,
            at: CursorPosition::default(),
            leaf_upper: None,
            next: None,
        }
    }

    /// Descend from the live root to the first key `>= key`.
    fn seek<S: PageStore>(&mut self, tree: &mut PageTree<S>, key: i64) -> Result<()> {
        self.at.stack.clear();
        self.leaf_upper = None;

        let mut node = tree.root;
        loop {
            let pos = match &tree.pages.node(node)?.page {
                IndexPage::Leaf(leaf) => {
                    self.at.current = Some(node);
                    self.at.pos = leaf.lower_bound(key);
                    return Ok(());
                }
                IndexPage::Inner(inner) => {
                    let pos = inner.locate(key);
                    if pos < inner.len() {
                        self.leaf_upper = Some(inner.keys[pos]);
                    }
                    pos
                }
            };
            self.at.stack.push((node, pos));
            node = tree.child(node, pos)?;
        }
    }

    /// Pop to the nearest ancestor with an unvisited right child and take
    /// its leftmost path down.
    fn step_right<S: PageStore>(&mut self, tree: &mut PageTree<S>, upper: i64) -> Result<()> {
        while let Some((node, pos)) = self.at.stack.pop() {
            if pos >= tree.pages.inner(node)?.len() {
                continue;
            }

            self.at.stack.push((node, pos + 1));
            let mut child = tree.child(node, pos + 1)?;
            while !tree.pages.node(child)?.page.is_leaf() {
                self.at.stack.push((child, 0));
                child = tree.child(child, 0)?;
            }

            self.at.current = Some(child);
            self.at.pos = 0;
            self.leaf_upper = self.upper_from_stack(&tree.pages)?;
            return Ok(());
        }
        self.seek(tree, upper)
    }

    fn upper_from_stack(&self, pages: &PageArena) -> Result<Option<i64>> {
        for &(node, pos) in self.at.stack.iter().rev() {
            let inner = pages.inner(node)?;
            if pos < inner.len() {
                return Ok(Some(inner.keys[pos]));
            }
        }
        Ok(None)
    }

    fn fill<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<()> {
        loop {
            let Some(current) = self.at.current else {
                self.finish();
                return Ok(());
            };

            let leaf = tree.pages.leaf(current)?;
            if self.at.pos < leaf.len() {
                let entry = leaf.entry(self.at.pos);
                if entry.key > self.max {
                    self.finish();
                } else {
                    self.at.pos += 1;
                    self.next = Some(entry);
                }
                return Ok(());
            }

            match self.leaf_upper {
                Some(upper) if upper <= self.max => {
                    if self.at.stack.is_empty() {
                        self.seek(tree, upper)?;
                    } else {
                        self.step_right(tree, upper)?;
                    }
                }
                _ => {
                    self.finish();
                    return Ok(());
                }
            }
        }
    }

    fn finish(&mut self) {
        self.next = None;
        self.leaf_upper = None;
        self.at.clear();
    }
}

impl PageIterator for AscendingCursor {
    fn seek_first<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<()> {
        self.seek(tree, self.min)?;
        self.fill(tree)
    }

    fn advance<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<Option<Entry>> {
        let entry = self.next.take();
        if entry.is_some() {
            self.fill(tree)?;
        }
        Ok(entry)
    }

    fn has_next(&self) -> bool {
        self.next.is_some()
    }

    fn page_is_relevant(&self, pages: &PageArena, root: NodeId, node: NodeId) -> Result<bool> {
        let Some(next) = self.next else {
            return Ok(false);
        };
        if self.at.is_current(node) || node == root {
            return Ok(true);
        }

        match &pages.node(node)?.page {
            IndexPage::Leaf(leaf) => Ok(match (leaf.first_key(), leaf.last_key()) {
                (Some(first), Some(last)) => first <= self.max && last >= next.key,
                _ => false,
            }),
            IndexPage::Inner(_) => {
                if self.at.in_stack(node) {
                    return Ok(true);
                }
                // Subtree keys lie in [preceding, following)
                if let Some(following) = pages.following_key(node)? {
                    if following <= next.key {
                        return Ok(false);
                    }
                }
                if let Some(preceding) = pages.preceding_key(node)? {
                    if preceding > self.max {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn is_current(&self, node: NodeId) -> bool {
        self.at.is_current(node)
    }

    fn references(&self, node: NodeId) -> bool {
        self.at.references(node)
    }

    fn replace_current_and_stack_if_equal(&mut self, node: NodeId, snapshot: NodeId) {
        self.at.replace_current_and_stack_if_equal(node, snapshot);
    }
}
