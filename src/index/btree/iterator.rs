use std::sync::Arc;
use serde::de::DeserializeOwned;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::codec::load_node;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over a tree's leaf chain, yielding entries in key
/// order. Works on owned leaf images, so no page stays pinned between
/// `next` calls.
pub struct BTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    node: Option<BTreeNode<K>>,
    index: usize,
}

impl<K> BTreeIterator<K>
where
    K: Clone + Ord + DeserializeOwned,
{
    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, node: BTreeNode<K>, index: usize) -> Self {
        debug_assert!(node.is_leaf());
        Self {
            buffer_pool,
            node: Some(node),
            index,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            node: None,
            index: 0,
        }
    }
}

impl<K> Iterator for BTreeIterator<K>
where
    K: Clone + Ord + DeserializeOwned,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node.as_ref()?;

            if self.index < node.keys.len() {
                let entry = (node.keys[self.index].clone(), node.rids[self.index]);
                self.index += 1;
                return Some(Ok(entry));
            }

            let next_page_id = node.next_page_id;
            if next_page_id == INVALID_PAGE_ID {
                self.node = None;
                return None;
            }

            match load_node(&self.buffer_pool, next_page_id) {
                Ok(next_node) => {
                    self.node = Some(next_node);
                    self.index = 0;
                }
                Err(e) => {
                    self.node = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
