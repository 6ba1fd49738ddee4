//! Page arena and the tree of loaded pages.
//!
//! Pages live in a [`PageArena`] addressed by [`NodeId`]. A node knows its
//! parent by id; inner pages reach children through [`ChildRef`]s that are
//! read from the page store on first use.

use std::fmt::Write as _;

use tracing::{debug, error, trace};

use crate::common::{Error, NodeId, PageId, Result};
use crate::index::config::IndexConfig;
use crate::index::stats::IndexStats;
use crate::storage::page::Page;
use crate::storage::PageStore;

use super::page::{ChildRef, IndexPage, InnerPage, LeafPage};

/// A loaded index page plus its bookkeeping.
#[derive(Debug)]
pub(crate) struct Node {
    /// Where the page lives in the store; `None` until first written.
    pub(crate) page_id: Option<PageId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) dirty: bool,
    pub(crate) page: IndexPage,
}

impl Node {
    pub(crate) fn new(page: IndexPage, parent: Option<NodeId>) -> Self {
        Self {
            page_id: None,
            parent,
            dirty: true,
            page,
        }
    }
}

/// Slab of loaded pages. Freed slots are reused.
#[derive(Debug, Default)]
pub(crate) struct PageArena {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl PageArena {
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId::new(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId::new(self.slots.len() - 1)
            }
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.slots.get_mut(id.0)?.take();
        if node.is_some() {
            self.free.push(id.0);
        }
        node
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id)
            .ok_or_else(|| Error::Corruption(format!("{id} is not loaded")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Corruption(format!("{id} is not loaded")))
    }

    pub(crate) fn leaf(&self, id: NodeId) -> Result<&LeafPage> {
        match &self.node(id)?.page {
            IndexPage::Leaf(leaf) => Ok(leaf),
            IndexPage::Inner(_) => Err(Error::Corruption(format!("{id} is not a leaf"))),
        }
    }

    pub(crate) fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafPage> {
        match &mut self.node_mut(id)?.page {
            IndexPage::Leaf(leaf) => Ok(leaf),
            IndexPage::Inner(_) => Err(Error::Corruption(format!("{id} is not a leaf"))),
        }
    }

    pub(crate) fn inner(&self, id: NodeId) -> Result<&InnerPage> {
        match &self.node(id)?.page {
            IndexPage::Inner(inner) => Ok(inner),
            IndexPage::Leaf(_) => Err(Error::Corruption(format!("{id} is not an inner page"))),
        }
    }

    pub(crate) fn inner_mut(&mut self, id: NodeId) -> Result<&mut InnerPage> {
        match &mut self.node_mut(id)?.page {
            IndexPage::Inner(inner) => Ok(inner),
            IndexPage::Leaf(_) => Err(Error::Corruption(format!("{id} is not an inner page"))),
        }
    }

    pub(crate) fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    /// Slot of `child` in `parent`.
    ///
    /// # Errors
    /// `Error::Corruption` if the parent does not reference the child,
    /// which means a parent link is stale.
    pub(crate) fn child_position(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.inner(parent)?.position_of(child).ok_or_else(|| {
            Error::Corruption(format!("{parent} does not reference its child {child}"))
        })
    }

    /// Separator just below the subtree rooted at `id`, if any.
    ///
    /// Walks parent links until a node is found that is not the leftmost
    /// child of its parent.
    pub(crate) fn preceding_key(&self, id: NodeId) -> Result<Option<i64>> {
        let mut node = id;
        while let Some(parent) = self.parent(node)? {
            let pos = self.child_position(parent, node)?;
            if pos > 0 {
                return Ok(Some(self.inner(parent)?.keys[pos - 1]));
            }
            node = parent;
        }
        Ok(None)
    }

    /// Separator just above the subtree rooted at `id`, if any.
    pub(crate) fn following_key(&self, id: NodeId) -> Result<Option<i64>> {
        let mut node = id;
        while let Some(parent) = self.parent(node)? {
            let pos = self.child_position(parent, node)?;
            let inner = self.inner(parent)?;
            if pos < inner.len() {
                return Ok(Some(inner.keys[pos]));
            }
            node = parent;
        }
        Ok(None)
    }

    fn stored_id(&self, child: ChildRef) -> Result<PageId> {
        match child {
            ChildRef::Stored(page_id) => Ok(page_id),
            ChildRef::Loaded(id) => self
                .node(id)?
                .page_id
                .ok_or_else(|| Error::Corruption(format!("{id} has no page id"))),
        }
    }

    /// One-line description of a node for diagnostics.
    pub(crate) fn describe(&self, id: NodeId) -> String {
        match self.get(id) {
            Some(node) => {
                let page_id = node
                    .page_id
                    .map_or_else(|| "unwritten".to_string(), |p| p.to_string());
                let dirty = if node.dirty { "*" } else { "" };
                format!("{id} {page_id}{dirty} {}", node.page)
            }
            None => format!("{id} <free slot>"),
        }
    }
}

/// The loaded part of one index plus the store behind it.
pub(crate) struct PageTree<S> {
    pub(crate) pages: PageArena,
    pub(crate) store: S,
    pub(crate) root: NodeId,
    pub(crate) config: IndexConfig,
    pub(crate) stats: IndexStats,
}

impl<S: PageStore> PageTree<S> {
    /// Bootstrap: a single empty leaf as root.
    pub(crate) fn create(store: S, config: IndexConfig) -> Self {
        let mut pages = PageArena::default();
        let root = pages.insert(Node::new(IndexPage::Leaf(LeafPage::new()), None));

        debug!(?config, "created empty index");
        Self {
            pages,
            store,
            root,
            config,
            stats: IndexStats::new(),
        }
    }

    /// Load the root from the store; everything below it is read lazily.
    pub(crate) fn open(store: S, root_page: PageId, config: IndexConfig) -> Result<Self> {
        let mut tree = Self {
            pages: PageArena::default(),
            store,
            root: NodeId::new(0),
            config,
            stats: IndexStats::new(),
        };
        tree.root = tree.load(root_page, None)?;

        debug!(%root_page, "opened index");
        Ok(tree)
    }

    fn load(&mut self, page_id: PageId, parent: Option<NodeId>) -> Result<NodeId> {
        let raw = self.store.read_page(page_id)?;
        let page = IndexPage::decode(page_id, &raw).map_err(|e| {
            error!(%page_id, error = %e, "failed to decode index page");
            e
        })?;
        IndexStats::bump(&self.stats.pages_read);

        let id = self.pages.insert(Node {
            page_id: Some(page_id),
            parent,
            dirty: false,
            page,
        });
        trace!(%page_id, node = %id, "loaded index page");
        Ok(id)
    }

    /// Child `pos` of an inner page, reading it from the store if needed.
    pub(crate) fn child(&mut self, parent: NodeId, pos: usize) -> Result<NodeId> {
        let child = self
            .pages
            .inner(parent)?
            .children
            .get(pos)
            .copied()
            .ok_or_else(|| Error::Corruption(format!("{parent} has no child {pos}")))?;

        match child {
            ChildRef::Loaded(id) => Ok(id),
            ChildRef::Stored(page_id) => {
                let id = self.load(page_id, Some(parent))?;
                self.pages.inner_mut(parent)?.children[pos] = ChildRef::Loaded(id);
                Ok(id)
            }
        }
    }

    /// Point a loaded child back at its (new) parent.
    pub(crate) fn adopt(&mut self, child: ChildRef, parent: NodeId) -> Result<()> {
        if let ChildRef::Loaded(id) = child {
            self.pages.node_mut(id)?.parent = Some(parent);
        }
        Ok(())
    }

    /// The unique leaf whose key range covers `key`.
    pub(crate) fn find_leaf(&mut self, key: i64) -> Result<NodeId> {
        let mut node = self.root;
        loop {
            let pos = match &self.pages.node(node)?.page {
                IndexPage::Leaf(_) => return Ok(node),
                IndexPage::Inner(inner) => inner.locate(key),
            };
            node = self.child(node, pos)?;
        }
    }

    pub(crate) fn lookup(&mut self, key: i64) -> Result<Option<i64>> {
        let leaf = self.find_leaf(key)?;
        Ok(self.pages.leaf(leaf)?.get(key))
    }

    /// Highest key in the index.
    pub(crate) fn max_key(&mut self) -> Result<Option<i64>> {
        let mut node = self.root;
        loop {
            let last = match &self.pages.node(node)?.page {
                IndexPage::Leaf(leaf) => return Ok(leaf.last_key()),
                IndexPage::Inner(inner) => inner.len(),
            };
            node = self.child(node, last)?;
        }
    }

    /// Number of levels; a lone leaf root has height 1.
    pub(crate) fn height(&mut self) -> Result<usize> {
        let mut node = self.root;
        let mut height = 1;
        while !self.pages.node(node)?.page.is_leaf() {
            node = self.child(node, 0)?;
            height += 1;
        }
        Ok(height)
    }

    /// Loaded nodes reachable from the root, parents before children.
    fn loaded_preorder(&self) -> Result<Vec<NodeId>> {
        let mut order = Vec::with_capacity(self.pages.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let IndexPage::Inner(inner) = &self.pages.node(id)?.page {
                stack.extend(inner.children.iter().rev().filter_map(|child| match child {
                    ChildRef::Loaded(child) => Some(*child),
                    ChildRef::Stored(_) => None,
                }));
            }
        }
        Ok(order)
    }

    /// Persist every dirty page, children before parents, and return the
    /// root's page id.
    pub(crate) fn write(&mut self) -> Result<PageId> {
        let order = self.loaded_preorder()?;

        // A page written for the first time changes its parent's child ids
        for &id in &order {
            if self.pages.node(id)?.page_id.is_some() {
                continue;
            }
            let page_id = self.store.allocate_page()?;
            let node = self.pages.node_mut(id)?;
            node.page_id = Some(page_id);
            node.dirty = true;
            if let Some(parent) = node.parent {
                self.pages.node_mut(parent)?.dirty = true;
            }
        }

        let mut page = Page::new();
        let mut written = 0usize;
        for &id in order.iter().rev() {
            let node = self.pages.node(id)?;
            if !node.dirty {
                continue;
            }
            let page_id = self.pages.stored_id(ChildRef::Loaded(id))?;
            match &node.page {
                IndexPage::Leaf(leaf) => leaf.encode(&mut page),
                IndexPage::Inner(inner) => {
                    let child_ids = inner
                        .children
                        .iter()
                        .map(|&child| self.pages.stored_id(child))
                        .collect::<Result<Vec<_>>>()?;
                    inner.encode(&child_ids, &mut page);
                }
            }

            self.store.write_page(page_id, &page)?;
            self.pages.node_mut(id)?.dirty = false;
            IndexStats::bump(&self.stats.pages_written);
            written += 1;
        }

        self.store.sync()?;
        let root = self.pages.stored_id(ChildRef::Loaded(self.root))?;
        debug!(%root, written, "index written");
        Ok(root)
    }

    /// Multi-line dump of the loaded tree. Unloaded children are listed
    /// by page id only.
    pub(crate) fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(ChildRef::Loaded(self.root), 0usize)];
        while let Some((child, depth)) = stack.pop() {
            let indent = "  ".repeat(depth);
            match child {
                ChildRef::Stored(page_id) => {
                    let _ = writeln!(out, "{indent}{page_id} <not loaded>");
                }
                ChildRef::Loaded(id) => {
                    let _ = writeln!(out, "{indent}{}", self.pages.describe(id));
                    if let Some(Node {
                        page: IndexPage::Inner(inner),
                        ..
                    }) = self.pages.get(id)
                    {
                        stack.extend(inner.children.iter().rev().map(|&c| (c, depth + 1)));
                    }
                }
            }
        }
        out
    }

    /// Log and build a corruption error naming the offending node.
    pub(crate) fn corruption(&self, id: NodeId, what: &str) -> Error {
        let detail = self.pages.describe(id);
        error!(node = %id, page = %detail, "{what}");
        Error::Corruption(format!("{what}: {detail}"))
    }

    /// Check every structural invariant, reading unloaded pages as needed.
    ///
    /// - keys strictly increasing and inside the separator bounds
    /// - parent links match the child references
    /// - every non-root page within its fill bounds
    /// - all leaves at the same depth
    pub(crate) fn verify(&mut self) -> Result<()> {
        let config = self.config;
        let mut leaf_depth = None;
        let mut stack = vec![(self.root, None::<i64>, None::<i64>, 1usize)];

        while let Some((id, low, high, depth)) = stack.pop() {
            let is_root = id == self.root;
            let node = self.pages.node(id)?;
            let keys = node.page.keys();

            if is_root && node.parent.is_some() {
                return Err(self.corruption(id, "root has a parent"));
            }
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                return Err(self.corruption(id, "keys out of order"));
            }
            if let (Some(low), Some(&first)) = (low, keys.first()) {
                if first < low {
                    return Err(self.corruption(id, "key below lower separator"));
                }
            }
            if let (Some(high), Some(&last)) = (high, keys.last()) {
                if last >= high {
                    return Err(self.corruption(id, "key at or above upper separator"));
                }
            }

            let separators = match &node.page {
                IndexPage::Leaf(leaf) => {
                    if !is_root && !(config.min_leaf_n..=config.max_leaf_n).contains(&leaf.len()) {
                        return Err(self.corruption(id, "leaf outside fill bounds"));
                    }
                    if *leaf_depth.get_or_insert(depth) != depth {
                        return Err(self.corruption(id, "leaves at different depths"));
                    }
                    continue;
                }
                IndexPage::Inner(inner) => {
                    if inner.children.len() != inner.len() + 1 {
                        return Err(self.corruption(id, "child count does not match keys"));
                    }
                    if is_root && inner.is_empty() {
                        return Err(self.corruption(id, "inner root without separators"));
                    }
                    if !is_root
                        && !(config.min_inner_n..=config.max_inner_n).contains(&inner.len())
                    {
                        return Err(self.corruption(id, "inner page outside fill bounds"));
                    }
                    inner.keys.clone()
                }
            };

            let n = separators.len();
            for pos in 0..=n {
                let child = self.child(id, pos)?;
                if self.pages.parent(child)? != Some(id) {
                    return Err(self.corruption(child, "stale parent link"));
                }
                let child_low = if pos > 0 { Some(separators[pos - 1]) } else { low };
                let child_high = if pos < n { Some(separators[pos]) } else { high };
                stack.push((child, child_low, child_high, depth + 1));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageStore;

    fn leaf_node(keys: &[i64]) -> Node {
        Node::new(
            IndexPage::Leaf(LeafPage {
                keys: keys.to_vec(),
                values: keys.to_vec(),
            }),
            None,
        )
    }

    /// Root with separators [10, 20] over three leaves.
    fn two_level_tree() -> PageTree<MemoryPageStore> {
        let config = IndexConfig::new(1, 4, 1, 4).unwrap();
        let mut tree = PageTree::create(MemoryPageStore::new(), config);
        tree.pages.remove(tree.root);

        let a = tree.pages.insert(leaf_node(&[1, 5]));
        let b = tree.pages.insert(leaf_node(&[10, 15]));
        let c = tree.pages.insert(leaf_node(&[20, 25]));
        let mut root_page = InnerPage::new(ChildRef::Loaded(a), 10, ChildRef::Loaded(b));
        root_page.keys.push(20);
        root_page.children.push(ChildRef::Loaded(c));
        let root = tree
            .pages
            .insert(Node::new(IndexPage::Inner(root_page), None));
        for leaf in [a, b, c] {
            tree.pages.node_mut(leaf).unwrap().parent = Some(root);
        }
        tree.root = root;
        tree
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = PageArena::default();
        let a = arena.insert(leaf_node(&[1]));
        let b = arena.insert(leaf_node(&[2]));
        assert_eq!(arena.len(), 2);

        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert!(arena.node(a).is_err());

        let c = arena.insert(leaf_node(&[3]));
        assert_eq!(c, a);
        assert_eq!(arena.leaf(b).unwrap().keys, vec![2]);
        assert!(arena.inner(b).is_err());
    }

    #[test]
    fn test_find_leaf_and_lookup() {
        let mut tree = two_level_tree();

        let leaf = tree.find_leaf(10).unwrap();
        assert_eq!(tree.pages.leaf(leaf).unwrap().keys, vec![10, 15]);
        assert_eq!(tree.lookup(25).unwrap(), Some(25));
        assert_eq!(tree.lookup(11).unwrap(), None);
        assert_eq!(tree.max_key().unwrap(), Some(25));
        assert_eq!(tree.height().unwrap(), 2);
    }

    #[test]
    fn test_bracketing_separators() {
        let tree = two_level_tree();
        let inner = tree.pages.inner(tree.root).unwrap();
        let [a, b, c] = [0, 1, 2].map(|i| match inner.children[i] {
            ChildRef::Loaded(id) => id,
            ChildRef::Stored(_) => unreachable!(),
        });

        assert_eq!(tree.pages.preceding_key(a).unwrap(), None);
        assert_eq!(tree.pages.following_key(a).unwrap(), Some(10));
        assert_eq!(tree.pages.preceding_key(b).unwrap(), Some(10));
        assert_eq!(tree.pages.following_key(b).unwrap(), Some(20));
        assert_eq!(tree.pages.preceding_key(c).unwrap(), Some(20));
        assert_eq!(tree.pages.following_key(c).unwrap(), None);
        assert_eq!(tree.pages.following_key(tree.root).unwrap(), None);
    }

    #[test]
    fn test_verify_accepts_valid_tree() {
        let mut tree = two_level_tree();
        tree.verify().unwrap();
    }

    #[test]
    fn test_verify_detects_misplaced_key() {
        let mut tree = two_level_tree();
        let leaf = tree.find_leaf(10).unwrap();
        tree.pages.leaf_mut(leaf).unwrap().keys[1] = 21;

        assert!(matches!(tree.verify(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_write_and_reopen_lazily() {
        let mut tree = two_level_tree();
        let root = tree.write().unwrap();
        assert_eq!(tree.stats.snapshot().pages_written, 4);

        // Nothing dirty, nothing rewritten
        tree.write().unwrap();
        assert_eq!(tree.stats.snapshot().pages_written, 4);

        let store = std::mem::take(&mut tree.store);
        let mut reopened = PageTree::open(store, root, tree.config).unwrap();
        assert_eq!(reopened.pages.len(), 1);

        assert_eq!(reopened.lookup(15).unwrap(), Some(15));
        assert_eq!(reopened.pages.len(), 2);
        assert!(reopened.dump().contains("<not loaded>"));

        reopened.verify().unwrap();
        assert_eq!(reopened.stats.snapshot().pages_read, 4);
    }
}
