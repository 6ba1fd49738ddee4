//! Descending range scan from `max` down to `min`.

use crate::common::{NodeId, Result};
use crate::storage::PageStore;

use super::cursor::{CursorPosition, PageIterator};
use super::page::{Entry, IndexPage};
use super::tree::{PageArena, PageTree};

/// Cursor yielding keys from `max` down to `min`.
///
/// `at.pos` counts the entries of the current leaf not yet handed out, so
/// the next candidate sits at `pos - 1`. Descent takes the last child that
/// can hold the target key, and `leaf_lower` keeps the separator bounding
/// the current leaf from below.
#[derive(Debug)]
pub(crate) struct DescendingCursor {
    max: i64,
    min: i64,
    at: CursorPosition,
    leaf_lower: Option<i64>,
    next: Option<Entry>,
}

impl DescendingCursor {
    pub(crate) fn new(max: i64, min: i64) -> Self {
        Self {
            max,
            min,
            at: CursorPosition::default(),
            leaf_lower: None,
            next: None,
        }
    }

    /// Descend from the live root to the last key `<= key`.
    fn seek<S: PageStore>(&mut self, tree: &mut PageTree<S>, key: i64) -> Result<()> {
        self.at.stack.clear();
        self.leaf_lower = None;

        let mut node = tree.root;
        loop {
            let pos = match &tree.pages.node(node)?.page {
                IndexPage::Leaf(leaf) => {
                    self.at.current = Some(node);
                    self.at.pos = leaf.upper_bound(key);
                    return Ok(());
                }
                IndexPage::Inner(inner) => {
                    let pos = inner.locate(key);
                    if pos > 0 {
                        self.leaf_lower = Some(inner.keys[pos - 1]);
                    }
                    pos
                }
            };
            self.at.stack.push((node, pos));
            node = tree.child(node, pos)?;
        }
    }

    /// Pop to the nearest ancestor with an unvisited left child and take
    /// its rightmost path down.
    fn step_left<S: PageStore>(&mut self, tree: &mut PageTree<S>, lower: i64) -> Result<()> {
        while let Some((node, pos)) = self.at.stack.pop() {
            if pos == 0 {
                continue;
            }

            self.at.stack.push((node, pos - 1));
            let mut child = tree.child(node, pos - 1)?;
            loop {
                let last = match &tree.pages.node(child)?.page {
                    IndexPage::Leaf(leaf) => {
                        self.at.current = Some(child);
                        self.at.pos = leaf.len();
                        break;
                    }
                    IndexPage::Inner(inner) => inner.len(),
                };
                self.at.stack.push((child, last));
                child = tree.child(child, last)?;
            }

            self.leaf_lower = self.lower_from_stack(&tree.pages)?;
            return Ok(());
        }
        self.seek(tree, lower - 1)
    }

    fn lower_from_stack(&self, pages: &PageArena) -> Result<Option<i64>> {
        for &(node, pos) in self.at.stack.iter().rev() {
            if pos > 0 {
                return Ok(Some(pages.inner(node)?.keys[pos - 1]));
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

            if self.at.pos > 0 {
                let entry = tree.pages.leaf(current)?.entry(self.at.pos - 1);
                if entry.key < self.min {
                    self.finish();
                } else {
                    self.at.pos -= 1;
                    self.next = Some(entry);
                }
                return Ok(());
            }

            // lower > min, so lower - 1 cannot overflow
            match self.leaf_lower {
                Some(lower) if lower > self.min => {
                    if self.at.stack.is_empty() {
                        self.seek(tree, lower - 1)?;
                    } else {
                        self.step_left(tree, lower)?;
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
        self.leaf_lower = None;
        self.at.clear();
    }
}

impl PageIterator for DescendingCursor {
    fn seek_first<S: PageStore>(&mut self, tree: &mut PageTree<S>) -> Result<()> {
        self.seek(tree, self.max)?;
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
                (Some(first), Some(last)) => last >= self.min && first <= next.key,
                _ => false,
            }),
            IndexPage::Inner(_) => {
                if self.at.in_stack(node) {
                    return Ok(true);
                }
                if let Some(preceding) = pages.preceding_key(node)? {
                    if preceding > next.key {
                        return Ok(false);
                    }
                }
                if let Some(following) = pages.following_key(node)? {
                    if following <= self.min {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::mutator::IndexCore;
    use crate::index::config::IndexConfig;
    use crate::storage::MemoryPageStore;

    fn core_with(keys: impl IntoIterator<Item = i64>) -> IndexCore<MemoryPageStore> {
        let config = IndexConfig::new(2, 4, 2, 4).unwrap();
        let mut core = IndexCore::new(PageTree::create(MemoryPageStore::new(), config));
        for key in keys {
            core.insert(key, -key).unwrap();
        }
        core
    }

    fn drain(core: &mut IndexCore<MemoryPageStore>, cursor: &mut DescendingCursor) -> Vec<i64> {
        cursor.seek_first(&mut core.tree).unwrap();
        let mut keys = Vec::new();
        while let Some(entry) = cursor.advance(&mut core.tree).unwrap() {
            assert_eq!(entry.value, -entry.key);
            keys.push(entry.key);
        }
        keys
    }

    #[test]
    fn test_scans_across_leaves() {
        let mut core = core_with((1..=40).rev());
        let mut cursor = DescendingCursor::new(i64::MAX, i64::MIN);
        assert_eq!(drain(&mut core, &mut cursor), (1..=40).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_bounds_between_keys() {
        let mut core = core_with((0..30).map(|k| k * 3));

        let mut cursor = DescendingCursor::new(20, 10);
        assert_eq!(drain(&mut core, &mut cursor), vec![18, 15, 12]);

        let mut cursor = DescendingCursor::new(10, 20);
        assert!(drain(&mut core, &mut cursor).is_empty());
    }

    #[test]
    fn test_extreme_bounds() {
        let mut core = core_with([i64::MIN, -1, 0, 1, i64::MAX]);

        let mut cursor = DescendingCursor::new(i64::MAX, i64::MIN);
        assert_eq!(
            drain(&mut core, &mut cursor),
            vec![i64::MAX, 1, 0, -1, i64::MIN]
        );

        let mut cursor = DescendingCursor::new(0, i64::MIN);
        assert_eq!(drain(&mut core, &mut cursor), vec![0, -1, i64::MIN]);
    }

    #[test]
    fn test_reseek_after_dropped_stack() {
        let mut core = core_with(1..=20);
        let mut cursor = DescendingCursor::new(20, 1);
        cursor.seek_first(&mut core.tree).unwrap();

        let mut keys = Vec::new();
        while let Some(entry) = cursor.advance(&mut core.tree).unwrap() {
            keys.push(entry.key);
            cursor.at.stack.clear();
        }
        assert_eq!(keys, (1..=20).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_relevance_of_visited_leaf() {
        let mut core = core_with(1..=12);
        let mut cursor = DescendingCursor::new(4, 1);
        cursor.seek_first(&mut core.tree).unwrap();

        let last_leaf = core.tree.find_leaf(12).unwrap();
        let current = core.tree.find_leaf(4).unwrap();
        let root = core.tree.root;

        assert!(!cursor
            .page_is_relevant(&core.tree.pages, root, last_leaf)
            .unwrap());
        assert!(cursor
            .page_is_relevant(&core.tree.pages, root, current)
            .unwrap());
    }
}
