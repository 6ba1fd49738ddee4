//! Insert and delete with split, merge and copy-on-write for open cursors.
//!
//! Every page is passed to [`IndexCore::touch`] before it is changed. If an
//! open cursor is reading that page, the cursor is moved onto an unmodified
//! copy first; the live page keeps its slot and is changed in place.

use tracing::{debug, error};

use crate::common::{Error, NodeId, Result};
use crate::index::stats::IndexStats;
use crate::storage::PageStore;

use super::cursor::{Cursor, CursorRegistry, PageIterator};
use super::page::{ChildRef, Entry, IndexPage, InnerPage};
use super::tree::{Node, PageTree};

/// Tree, open cursors and pages waiting to be reclaimed.
pub(crate) struct IndexCore<S> {
    pub(crate) tree: PageTree<S>,
    pub(crate) cursors: CursorRegistry,
    /// Pages out of the tree that may still be referenced by a cursor.
    retired: Vec<NodeId>,
}

impl<S: PageStore> IndexCore<S> {
    pub(crate) fn new(tree: PageTree<S>) -> Self {
        Self {
            tree,
            cursors: CursorRegistry::default(),
            retired: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Cursors
    // ------------------------------------------------------------------

    /// Position a new cursor. Returns its slot, or `None` when the range
    /// is already empty.
    pub(crate) fn open_cursor(&mut self, mut cursor: Cursor) -> Result<Option<usize>> {
        cursor.seek_first(&mut self.tree)?;
        if !cursor.has_next() {
            return Ok(None);
        }
        Ok(Some(self.cursors.open(cursor)))
    }

    pub(crate) fn advance(&mut self, slot: usize) -> Result<Option<Entry>> {
        let cursor = self.cursors.get_mut(slot).ok_or(Error::IteratorClosed)?;
        let entry = cursor.advance(&mut self.tree);
        self.collect_retired();
        entry
    }

    pub(crate) fn cursor_has_next(&self, slot: usize) -> bool {
        self.cursors.get(slot).is_some_and(|cursor| cursor.has_next())
    }

    pub(crate) fn close_cursor(&mut self, slot: usize) {
        self.cursors.close(slot);
        self.collect_retired();
    }

    /// Free retired pages no cursor references any more.
    fn collect_retired(&mut self) {
        let cursors = &self.cursors;
        let pages = &mut self.tree.pages;
        self.retired.retain(|&node| {
            if cursors.iter().any(|cursor| cursor.references(node)) {
                return true;
            }
            pages.remove(node);
            false
        });
    }

    // ------------------------------------------------------------------
    // Copy-on-write
    // ------------------------------------------------------------------

    /// Announce that `node` is about to change.
    ///
    /// Each cursor that finds the page relevant and is positioned on it
    /// gets moved to a copy (one copy shared by all such cursors). Cursors
    /// whose descent path runs through it drop the path.
    fn touch(&mut self, node: NodeId) -> Result<()> {
        let root = self.tree.root;
        let mut snapshot = None;

        for cursor in self.cursors.iter_mut() {
            let relevant = cursor.page_is_relevant(&self.tree.pages, root, node)?;
            if !relevant || !cursor.references(node) {
                continue;
            }
            let replacement = if cursor.is_current(node) {
                match snapshot {
                    Some(copy) => copy,
                    None => {
                        let copy = Self::snapshot(&mut self.tree, node)?;
                        self.retired.push(copy);
                        snapshot = Some(copy);
                        copy
                    }
                }
            } else {
                node
            };
            cursor.replace_current_and_stack_if_equal(node, replacement);
        }

        self.tree.pages.node_mut(node)?.dirty = true;
        Ok(())
    }

    fn snapshot(tree: &mut PageTree<S>, node: NodeId) -> Result<NodeId> {
        let page = tree.pages.node(node)?.page.clone();
        let copy = tree.pages.insert(Node {
            page_id: None,
            parent: None,
            dirty: false,
            page,
        });

        IndexStats::bump(&tree.stats.cow_snapshots);
        debug!(original = %node, snapshot = %copy, "copied page for open iterator");
        Ok(copy)
    }

    /// Take `node` out of the tree. Its store page is released now; the
    /// slot once no cursor holds it.
    fn retire(&mut self, node: NodeId) -> Result<()> {
        let retired = self.tree.pages.node_mut(node)?;
        retired.parent = None;
        if let Some(page_id) = retired.page_id.take() {
            self.tree.store.free_page(page_id)?;
        }
        self.retired.push(node);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Insert or overwrite `key`.
    pub(crate) fn insert(&mut self, key: i64, value: i64) -> Result<()> {
        let leaf_id = self.tree.find_leaf(key)?;
        let leaf = self.tree.pages.leaf(leaf_id)?;

        match leaf.search(key) {
            Ok(pos) => {
                if leaf.values[pos] != value {
                    self.touch(leaf_id)?;
                    self.tree.pages.leaf_mut(leaf_id)?.values[pos] = value;
                }
            }
            Err(pos) => {
                let full = leaf.len() >= self.tree.config.max_leaf_n;
                self.touch(leaf_id)?;
                if full {
                    self.split_leaf(leaf_id, key, value)?;
                } else {
                    self.tree.pages.leaf_mut(leaf_id)?.insert_at(pos, key, value);
                }
            }
        }

        self.collect_retired();
        Ok(())
    }

    /// Split a full leaf: the lower `min_leaf_n` entries stay, the rest move
    /// to a new right sibling, then `key` goes to whichever half covers it.
    fn split_leaf(&mut self, leaf_id: NodeId, key: i64, value: i64) -> Result<()> {
        let min = self.tree.config.min_leaf_n;
        let leaf = self.tree.pages.leaf_mut(leaf_id)?;
        let mut right = leaf.split_off(min);

        let separator = match right.first_key() {
            Some(first) if key >= first => {
                let pos = right.lower_bound(key);
                right.insert_at(pos, key, value);
                first
            }
            Some(first) => {
                let pos = leaf.lower_bound(key);
                leaf.insert_at(pos, key, value);
                first
            }
            None => return Err(self.tree.corruption(leaf_id, "split of a leaf below capacity")),
        };

        let parent = self.tree.pages.parent(leaf_id)?;
        let right_id = self
            .tree
            .pages
            .insert(Node::new(IndexPage::Leaf(right), parent));

        IndexStats::bump(&self.tree.stats.leaf_splits);
        debug!(left = %leaf_id, right = %right_id, separator, "split leaf");
        self.insert_into_parent(leaf_id, separator, right_id)
    }

    /// Register `right` as the sibling after `left`, splitting ancestors
    /// upward as long as they overflow.
    fn insert_into_parent(
        &mut self,
        mut left: NodeId,
        mut separator: i64,
        mut right: NodeId,
    ) -> Result<()> {
        loop {
            let Some(parent) = self.tree.pages.parent(left)? else {
                return self.grow_root(left, separator, right);
            };

            self.touch(parent)?;
            let pos = self.tree.pages.child_position(parent, left)?;
            let inner = self.tree.pages.inner_mut(parent)?;
            inner.keys.insert(pos, separator);
            inner.children.insert(pos + 1, ChildRef::Loaded(right));
            let overflow = inner.len() > self.tree.config.max_inner_n;
            self.tree.pages.node_mut(right)?.parent = Some(parent);

            if !overflow {
                return Ok(());
            }
            let (promoted, sibling) = self.split_inner(parent)?;
            left = parent;
            separator = promoted;
            right = sibling;
        }
    }

    /// Split an inner page holding `max_inner_n + 1` separators.
    fn split_inner(&mut self, node: NodeId) -> Result<(i64, NodeId)> {
        let min = self.tree.config.min_inner_n;
        let parent = self.tree.pages.parent(node)?;
        let (promoted, right) = self.tree.pages.inner_mut(node)?.split_off(min);
        let moved = right.children.clone();

        let right_id = self
            .tree
            .pages
            .insert(Node::new(IndexPage::Inner(right), parent));
        for child in moved {
            self.tree.adopt(child, right_id)?;
        }

        IndexStats::bump(&self.tree.stats.inner_splits);
        debug!(left = %node, right = %right_id, promoted, "split inner page");
        Ok((promoted, right_id))
    }

    fn grow_root(&mut self, left: NodeId, separator: i64, right: NodeId) -> Result<()> {
        let page = InnerPage::new(ChildRef::Loaded(left), separator, ChildRef::Loaded(right));
        let root = self.tree.pages.insert(Node::new(IndexPage::Inner(page), None));
        self.tree.pages.node_mut(left)?.parent = Some(root);
        self.tree.pages.node_mut(right)?.parent = Some(root);
        self.tree.root = root;

        IndexStats::bump(&self.tree.stats.root_growths);
        debug!(%root, separator, "grew new root");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove `key`; `false` if it was not present.
    pub(crate) fn delete(&mut self, key: i64) -> Result<bool> {
        Ok(self.remove_entry(key)?.is_some())
    }

    /// Remove a key the caller knows to be present and return its value.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent. The tree is logged.
    pub(crate) fn delete_existing(&mut self, key: i64) -> Result<i64> {
        if let Some(value) = self.remove_entry(key)? {
            return Ok(value);
        }

        let leaf = self.tree.find_leaf(key)?;
        let detail = self.tree.pages.describe(leaf);
        error!(key, leaf = %detail, tree = %self.tree.dump(), "delete of a missing key");
        Err(Error::KeyNotFound { key, leaf: detail })
    }

    fn remove_entry(&mut self, key: i64) -> Result<Option<i64>> {
        let leaf_id = self.tree.find_leaf(key)?;
        let Ok(pos) = self.tree.pages.leaf(leaf_id)?.search(key) else {
            return Ok(None);
        };

        self.touch(leaf_id)?;
        let removed = self.tree.pages.leaf_mut(leaf_id)?.remove_at(pos);
        self.rebalance_leaf(leaf_id)?;

        self.collect_retired();
        Ok(Some(removed.value))
    }

    /// Restore the fill bound of a leaf that just lost an entry.
    ///
    /// Merge with the previous sibling if both fit one page, else borrow
    /// its last entry. The leftmost child uses its next sibling instead.
    fn rebalance_leaf(&mut self, leaf_id: NodeId) -> Result<()> {
        let config = self.tree.config;
        let len = self.tree.pages.leaf(leaf_id)?.len();
        let Some(parent) = self.tree.pages.parent(leaf_id)? else {
            return Ok(());
        };
        if len >= config.min_leaf_n {
            return Ok(());
        }

        let pos = self.tree.pages.child_position(parent, leaf_id)?;
        if pos > 0 {
            let left = self.tree.child(parent, pos - 1)?;
            if self.tree.pages.leaf(left)?.len() + len <= config.max_leaf_n {
                self.merge_leaves(parent, pos - 1, left, leaf_id)?;
            } else {
                return self.borrow_from_left_leaf(parent, pos - 1, left, leaf_id);
            }
        } else {
            let right = self.tree.child(parent, 1)?;
            if len + self.tree.pages.leaf(right)?.len() <= config.max_leaf_n {
                self.merge_leaves(parent, 0, leaf_id, right)?;
            } else {
                return self.borrow_from_right_leaf(parent, 0, leaf_id, right);
            }
        }

        self.rebalance_inner(parent)
    }

    /// Move all of `right` into `left`; `right` leaves the tree.
    fn merge_leaves(
        &mut self,
        parent: NodeId,
        sep_pos: usize,
        left: NodeId,
        right: NodeId,
    ) -> Result<()> {
        self.touch(left)?;
        self.touch(right)?;
        self.touch(parent)?;

        let mut moved = std::mem::take(self.tree.pages.leaf_mut(right)?);
        self.tree.pages.leaf_mut(left)?.append(&mut moved);

        let inner = self.tree.pages.inner_mut(parent)?;
        inner.keys.remove(sep_pos);
        inner.children.remove(sep_pos + 1);
        self.retire(right)?;

        IndexStats::bump(&self.tree.stats.leaf_merges);
        debug!(%left, %right, "merged leaves");
        Ok(())
    }

    fn borrow_from_left_leaf(
        &mut self,
        parent: NodeId,
        sep_pos: usize,
        left: NodeId,
        node: NodeId,
    ) -> Result<()> {
        self.touch(left)?;
        self.touch(node)?;
        self.touch(parent)?;

        let donor = self.tree.pages.leaf_mut(left)?;
        let Some(last) = donor.len().checked_sub(1) else {
            return Err(self.tree.corruption(left, "borrow from an empty leaf"));
        };
        let moved = donor.remove_at(last);
        self.tree
            .pages
            .leaf_mut(node)?
            .insert_at(0, moved.key, moved.value);
        self.tree.pages.inner_mut(parent)?.keys[sep_pos] = moved.key;

        IndexStats::bump(&self.tree.stats.redistributions);
        debug!(from = %left, to = %node, key = moved.key, "moved entry right");
        Ok(())
    }

    fn borrow_from_right_leaf(
        &mut self,
        parent: NodeId,
        sep_pos: usize,
        node: NodeId,
        right: NodeId,
    ) -> Result<()> {
        self.touch(node)?;
        self.touch(right)?;
        self.touch(parent)?;

        let donor = self.tree.pages.leaf_mut(right)?;
        if donor.len() < 2 {
            return Err(self.tree.corruption(right, "borrow would empty the leaf"));
        }
        let moved = donor.remove_at(0);
        let new_separator = donor.keys[0];

        let leaf = self.tree.pages.leaf_mut(node)?;
        leaf.insert_at(leaf.len(), moved.key, moved.value);
        self.tree.pages.inner_mut(parent)?.keys[sep_pos] = new_separator;

        IndexStats::bump(&self.tree.stats.redistributions);
        debug!(from = %right, to = %node, key = moved.key, "moved entry left");
        Ok(())
    }

    /// Walk up from an inner page that lost a separator, merging or
    /// rotating until every page is within bounds.
    fn rebalance_inner(&mut self, start: NodeId) -> Result<()> {
        let config = self.tree.config;
        let mut node = start;

        loop {
            let len = self.tree.pages.inner(node)?.len();
            let Some(parent) = self.tree.pages.parent(node)? else {
                if len == 0 {
                    self.demote_root(node)?;
                }
                return Ok(());
            };
            if len >= config.min_inner_n {
                return Ok(());
            }

            let pos = self.tree.pages.child_position(parent, node)?;
            if pos > 0 {
                let left = self.tree.child(parent, pos - 1)?;
                if self.tree.pages.inner(left)?.len() + len < config.max_inner_n {
                    self.merge_inner(parent, pos - 1, left, node)?;
                } else {
                    return self.rotate_from_left(parent, pos - 1, left, node);
                }
            } else {
                let right = self.tree.child(parent, 1)?;
                if len + self.tree.pages.inner(right)?.len() < config.max_inner_n {
                    self.merge_inner(parent, 0, node, right)?;
                } else {
                    return self.rotate_from_right(parent, 0, node, right);
                }
            }
            node = parent;
        }
    }

    /// Pull the separator down and append all of `right` to `left`.
    fn merge_inner(
        &mut self,
        parent: NodeId,
        sep_pos: usize,
        left: NodeId,
        right: NodeId,
    ) -> Result<()> {
        self.touch(left)?;
        self.touch(right)?;
        self.touch(parent)?;

        let parent_page = self.tree.pages.inner_mut(parent)?;
        parent_page.children.remove(sep_pos + 1);
        let separator = parent_page.keys.remove(sep_pos);

        let right_page = self.tree.pages.inner_mut(right)?;
        let keys = std::mem::take(&mut right_page.keys);
        let children = std::mem::take(&mut right_page.children);
        for &child in &children {
            self.tree.adopt(child, left)?;
        }

        let left_page = self.tree.pages.inner_mut(left)?;
        left_page.keys.push(separator);
        left_page.keys.extend(keys);
        left_page.children.extend(children);
        self.retire(right)?;

        IndexStats::bump(&self.tree.stats.inner_merges);
        debug!(%left, %right, separator, "merged inner pages");
        Ok(())
    }

    /// Rotate the last child of `left` through the parent into `node`.
    fn rotate_from_left(
        &mut self,
        parent: NodeId,
        sep_pos: usize,
        left: NodeId,
        node: NodeId,
    ) -> Result<()> {
        self.touch(left)?;
        self.touch(node)?;
        self.touch(parent)?;

        let donor = self.tree.pages.inner_mut(left)?;
        let (Some(key), Some(child)) = (donor.keys.pop(), donor.children.pop()) else {
            return Err(self.tree.corruption(left, "rotate from an empty inner page"));
        };
        let parent_keys = &mut self.tree.pages.inner_mut(parent)?.keys;
        let separator = std::mem::replace(&mut parent_keys[sep_pos], key);

        let inner = self.tree.pages.inner_mut(node)?;
        inner.keys.insert(0, separator);
        inner.children.insert(0, child);
        self.tree.adopt(child, node)?;

        IndexStats::bump(&self.tree.stats.redistributions);
        debug!(from = %left, to = %node, separator = key, "rotated separator right");
        Ok(())
    }

    /// Rotate the first child of `right` through the parent into `node`.
    fn rotate_from_right(
        &mut self,
        parent: NodeId,
        sep_pos: usize,
        node: NodeId,
        right: NodeId,
    ) -> Result<()> {
        self.touch(node)?;
        self.touch(right)?;
        self.touch(parent)?;

        let donor = self.tree.pages.inner_mut(right)?;
        if donor.keys.len() < 2 {
            return Err(self.tree.corruption(right, "rotate would empty the inner page"));
        }
        let key = donor.keys.remove(0);
        let child = donor.children.remove(0);
        let parent_keys = &mut self.tree.pages.inner_mut(parent)?.keys;
        let separator = std::mem::replace(&mut parent_keys[sep_pos], key);

        let inner = self.tree.pages.inner_mut(node)?;
        inner.keys.push(separator);
        inner.children.push(child);
        self.tree.adopt(child, node)?;

        IndexStats::bump(&self.tree.stats.redistributions);
        debug!(from = %right, to = %node, separator = key, "rotated separator left");
        Ok(())
    }

    /// Replace an inner root with no separators by its only child.
    fn demote_root(&mut self, root: NodeId) -> Result<()> {
        let child = self.tree.child(root, 0)?;
        self.touch(root)?;
        self.tree.pages.node_mut(child)?.parent = None;
        self.tree.root = child;
        self.retire(root)?;

        IndexStats::bump(&self.tree.stats.root_demotions);
        debug!(old = %root, new = %child, "demoted root");
        Ok(())
    }
}
