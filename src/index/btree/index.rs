use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{PageId, PagePtr, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::codec::{
    default_internal_max_size, default_leaf_max_size, load_node, serialize_node, store_node,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;

pub type Result<T> = std::result::Result<T, BTreeError>;

/// An ordered key -> RID index persisted as a graph of internal and leaf
/// pages held through the buffer pool. The root page id is registered in
/// the header-page directory under the index name and rewritten on every
/// root change, so an index can be reopened by name.
///
/// Nodes are worked on as owned copies: load, mutate, store. Concurrent
/// mutators must serialize through an external index-level latch.
pub struct BPlusTree<K> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: AtomicI32,
    leaf_max_size: usize,
    internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    pub fn new(name: impl Into<String>, buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        Self::new_with_max_sizes(
            name,
            buffer_pool,
            default_leaf_max_size::<K>(),
            default_internal_max_size::<K>(),
        )
    }

    /// Open or create an index with explicit fan-out bounds (small bounds
    /// make structural tests practical)
    pub fn new_with_max_sizes(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2, "leaf pages need at least two entries");
        assert!(internal_max_size >= 3, "internal pages need at least three children");

        let index_name = name.into();
        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page_guard = header.write();
            match HeaderPage::get_root_id(&page_guard, &index_name) {
                Some(root) => root,
                None => {
                    if !HeaderPage::insert_record(&mut page_guard, &index_name, INVALID_PAGE_ID) {
                        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                        return Err(BTreeError::HeaderDirectory(index_name));
                    }
                    INVALID_PAGE_ID
                }
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: AtomicI32::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root() == INVALID_PAGE_ID
    }

    /// Point lookup
    pub fn get(&self, key: &K) -> Result<Option<Rid>> {
        if self.is_empty() {
            return Ok(None);
        }
        let leaf: BTreeNode<K> = self.load(self.find_leaf_page(key)?)?;
        Ok(leaf.lookup(key))
    }

    /// Insert a key; false on duplicate
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }

        let leaf_page_id = self.find_leaf_page(&key)?;
        let mut leaf: BTreeNode<K> = self.load(leaf_page_id)?;
        if !leaf.leaf_insert(key, rid) {
            return Ok(false);
        }

        if leaf.size() > leaf.max_size {
            let (right_page, right_page_id) = self.buffer_pool.new_page()?;
            let (right, promoted) = leaf.split_leaf(right_page_id);
            self.write_new_node(&right_page, &right)?;
            self.store(&leaf)?;
            self.insert_into_parent(leaf.page_id, leaf.parent_page_id, promoted, right_page_id)?;
        } else {
            self.store(&leaf)?;
        }
        Ok(true)
    }

    /// Remove a key; false if absent. Underflowing pages coalesce with or
    /// borrow from an adjacent sibling, recursing upward; the root collapses
    /// when it empties.
    pub fn remove(&self, key: &K) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let leaf_page_id = self.find_leaf_page(key)?;
        let mut leaf: BTreeNode<K> = self.load(leaf_page_id)?;
        if !leaf.leaf_remove(key) {
            return Ok(false);
        }

        if leaf.is_root() {
            self.adjust_root(leaf)?;
        } else if leaf.is_underflowing() {
            self.coalesce_or_redistribute(leaf)?;
        } else {
            self.store(&leaf)?;
        }
        Ok(true)
    }

    /// Iterator over all entries in key order
    pub fn iter(&self) -> Result<BTreeIterator<K>> {
        if self.is_empty() {
            return Ok(BTreeIterator::empty(Arc::clone(&self.buffer_pool)));
        }
        let leaf = self.load(self.find_leftmost_leaf_page()?)?;
        Ok(BTreeIterator::new(Arc::clone(&self.buffer_pool), leaf, 0))
    }

    /// Iterator positioned at the first entry with key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>> {
        if self.is_empty() {
            return Ok(BTreeIterator::empty(Arc::clone(&self.buffer_pool)));
        }
        let leaf: BTreeNode<K> = self.load(self.find_leaf_page(key)?)?;
        let index = leaf.key_index(key);
        Ok(BTreeIterator::new(Arc::clone(&self.buffer_pool), leaf, index))
    }

    /// Walk the whole tree checking the structural invariants: parent
    /// pointers, strict key ordering, separator bounds, and size limits on
    /// non-root pages.
    pub fn check_integrity(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.verify_node(self.root(), INVALID_PAGE_ID, None, None)
    }

    // ---- internals ----

    fn root(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    /// Update the cached root and its directory record
    fn set_root_page_id(&self, new_root: PageId) -> Result<()> {
        self.root_page_id.store(new_root, Ordering::SeqCst);
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page_guard = header.write();
            HeaderPage::update_record(&mut page_guard, &self.index_name, new_root);
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    fn load(&self, page_id: PageId) -> Result<BTreeNode<K>> {
        load_node(&self.buffer_pool, page_id)
    }

    fn store(&self, node: &BTreeNode<K>) -> Result<()> {
        store_node(&self.buffer_pool, node)
    }

    /// Serialize a freshly allocated node into its still-pinned page
    fn write_new_node(&self, page: &PagePtr, node: &BTreeNode<K>) -> Result<()> {
        let result = {
            let mut page_guard = page.write();
            serialize_node(node, &mut page_guard)
        };
        self.buffer_pool.unpin_page(node.page_id, result.is_ok())?;
        result
    }

    fn find_leaf_page(&self, key: &K) -> Result<PageId> {
        debug_assert!(!self.is_empty());
        let mut page_id = self.root();
        loop {
            let node: BTreeNode<K> = self.load(page_id)?;
            if node.is_leaf() {
                return Ok(page_id);
            }
            page_id = node.lookup_child(key);
        }
    }

    fn find_leftmost_leaf_page(&self) -> Result<PageId> {
        debug_assert!(!self.is_empty());
        let mut page_id = self.root();
        loop {
            let node: BTreeNode<K> = self.load(page_id)?;
            if node.is_leaf() {
                return Ok(page_id);
            }
            page_id = node.children[0];
        }
    }

    fn start_new_tree(&self, key: K, rid: Rid) -> Result<()> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        let mut root = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        root.leaf_insert(key, rid);
        self.write_new_node(&page, &root)?;
        self.set_root_page_id(page_id)
    }

    /// Hook a freshly split-off sibling into the tree: either grow a new
    /// root or insert the promoted key into the existing parent, splitting
    /// it in turn on overflow.
    fn insert_into_parent(
        &self,
        left_page_id: PageId,
        parent_page_id: PageId,
        key: K,
        right_page_id: PageId,
    ) -> Result<()> {
        if parent_page_id == INVALID_PAGE_ID {
            let (root_page, root_page_id) = self.buffer_pool.new_page()?;
            let mut new_root =
                BTreeNode::new_internal(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
            new_root.populate_new_root(left_page_id, key, right_page_id);
            self.write_new_node(&root_page, &new_root)?;
            self.set_parent(left_page_id, root_page_id)?;
            self.set_parent(right_page_id, root_page_id)?;
            return self.set_root_page_id(root_page_id);
        }

        let mut parent: BTreeNode<K> = self.load(parent_page_id)?;
        parent.insert_after(left_page_id, key, right_page_id);

        if parent.size() > parent.max_size {
            let (new_page, new_page_id) = self.buffer_pool.new_page()?;
            let (right_node, promoted) = parent.split_internal(new_page_id);
            self.write_new_node(&new_page, &right_node)?;
            for &child in &right_node.children {
                self.set_parent(child, new_page_id)?;
            }
            self.store(&parent)?;
            self.insert_into_parent(parent.page_id, parent.parent_page_id, promoted, new_page_id)
        } else {
            self.store(&parent)
        }
    }

    /// Resolve an underflow on a non-root node: merge with the adjacent
    /// sibling when both fit in one page, else borrow one entry from it
    fn coalesce_or_redistribute(&self, node: BTreeNode<K>) -> Result<()> {
        let mut parent: BTreeNode<K> = self.load(node.parent_page_id)?;
        let node_index = parent
            .value_index(node.page_id)
            .ok_or(BTreeError::OrphanPage(node.page_id))?;
        let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
        let sibling: BTreeNode<K> = self.load(parent.children[sibling_index])?;

        if sibling.size() + node.size() <= node.max_size {
            // coalesce, always into the left of the two
            let (mut left, right, right_index) = if node_index == 0 {
                (node, sibling, 1)
            } else {
                (sibling, node, node_index)
            };
            let right_page_id = right.page_id;

            if left.is_leaf() {
                left.leaf_merge_from(right);
            } else {
                // the separator between the halves is demoted into the
                // merged page
                let separator = parent.separator_key(right_index).clone();
                let moved_children = right.children.clone();
                left.internal_merge_from(right, separator);
                for child in moved_children {
                    self.set_parent(child, left.page_id)?;
                }
            }
            parent.remove_at(right_index);
            self.store(&left)?;
            self.buffer_pool.delete_page(right_page_id)?;

            if parent.is_root() {
                self.adjust_root(parent)
            } else if parent.is_underflowing() {
                self.coalesce_or_redistribute(parent)
            } else {
                self.store(&parent)
            }
        } else {
            self.redistribute(node, sibling, &mut parent, node_index)?;
            self.store(&parent)
        }
    }

    /// Borrow one entry from the richer sibling and refresh the parent
    /// separator between the two pages
    fn redistribute(
        &self,
        mut node: BTreeNode<K>,
        mut sibling: BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        node_index: usize,
    ) -> Result<()> {
        if node_index == 0 {
            // sibling is the right neighbor: its first entry moves to
            // node's end
            if node.is_leaf() {
                let new_separator = node.leaf_steal_first_from(&mut sibling);
                parent.set_separator_key(1, new_separator);
            } else {
                let separator = parent.separator_key(1).clone();
                let (new_separator, moved_child) =
                    node.internal_steal_first_from(&mut sibling, separator);
                parent.set_separator_key(1, new_separator);
                self.set_parent(moved_child, node.page_id)?;
            }
        } else {
            // sibling is the left neighbor: its last entry moves to node's
            // front
            if node.is_leaf() {
                let new_separator = node.leaf_steal_last_from(&mut sibling);
                parent.set_separator_key(node_index, new_separator);
            } else {
                let separator = parent.separator_key(node_index).clone();
                let (new_separator, moved_child) =
                    node.internal_steal_last_from(&mut sibling, separator);
                parent.set_separator_key(node_index, new_separator);
                self.set_parent(moved_child, node.page_id)?;
            }
        }
        self.store(&node)?;
        self.store(&sibling)
    }

    /// Root adjustment after deletion: an empty leaf root empties the tree;
    /// an internal root with one child is replaced by that child
    fn adjust_root(&self, mut root: BTreeNode<K>) -> Result<()> {
        if root.is_leaf() && root.size() == 0 {
            self.buffer_pool.delete_page(root.page_id)?;
            self.set_root_page_id(INVALID_PAGE_ID)
        } else if !root.is_leaf() && root.size() == 1 {
            let child_page_id = root.remove_and_return_only_child();
            self.set_parent(child_page_id, INVALID_PAGE_ID)?;
            self.buffer_pool.delete_page(root.page_id)?;
            self.set_root_page_id(child_page_id)
        } else {
            self.store(&root)
        }
    }

    fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<()> {
        let mut node: BTreeNode<K> = self.load(page_id)?;
        node.parent_page_id = parent_page_id;
        self.store(&node)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
    ) -> Result<()> {
        let node: BTreeNode<K> = self.load(page_id)?;
        let fail = |what: &str| {
            Err(BTreeError::CorruptTree(format!(
                "page {}: {}",
                page_id, what
            )))
        };

        if node.parent_page_id != expected_parent {
            return fail("parent pointer mismatch");
        }
        if node.size() > node.max_size {
            return fail("over max size");
        }
        if !node.is_root() && node.is_underflowing() {
            return fail("under min size");
        }
        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return fail("keys not strictly increasing");
        }
        if let Some(lower) = &lower {
            if node.keys.first().is_some_and(|k| k < lower) {
                return fail("key below subtree lower bound");
            }
        }
        if let Some(upper) = &upper {
            if node.keys.last().is_some_and(|k| k >= upper) {
                return fail("key above subtree upper bound");
            }
        }

        if !node.is_leaf() {
            if node.children.len() != node.keys.len() + 1 {
                return fail("child/key count mismatch");
            }
            for (index, &child) in node.children.iter().enumerate() {
                let child_lower = if index == 0 {
                    lower.clone()
                } else {
                    Some(node.keys[index - 1].clone())
                };
                let child_upper = if index == node.children.len() - 1 {
                    upper.clone()
                } else {
                    Some(node.keys[index].clone())
                };
                self.verify_node(child, node.page_id, child_lower, child_upper)?;
            }
        }
        Ok(())
    }
}
