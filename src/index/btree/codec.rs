use std::mem;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeType};
use crate::storage::buffer::BufferPoolManager;

// Page header (little-endian):
//   0..4   node_type (i32: 1 leaf, 2 internal)
//   4..12  lsn (i64)
//   12..16 size (u32, entry count)
//   16..20 max_size (u32)
//   20..24 parent_page_id (i32)
//   24..28 page_id (i32)
//   28..32 next_page_id (i32, leaves only; INVALID_PAGE_ID on internal)
// Leaf entries follow as (key_len u16, key bytes, rid 8B) pairs; internal
// pages store `size` child ids then `size - 1` length-prefixed keys. Keys go
// through bincode so the index stays generic over the key type.
pub const BTREE_PAGE_HEADER_SIZE: usize = 32;

const RID_SIZE: usize = 8;
const KEY_LEN_PREFIX: usize = 2;

pub type Result<T> = std::result::Result<T, BTreeError>;

/// Serialize a node into its page
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<()>
where
    K: Clone + Ord + Serialize,
{
    page.data.fill(0);
    LittleEndian::write_i32(&mut page.data[0..4], node.node_type as i32);
    LittleEndian::write_i64(&mut page.data[4..12], node.lsn);
    LittleEndian::write_u32(&mut page.data[12..16], node.size() as u32);
    LittleEndian::write_u32(&mut page.data[16..20], node.max_size as u32);
    LittleEndian::write_i32(&mut page.data[20..24], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[24..28], node.page_id);
    LittleEndian::write_i32(
        &mut page.data[28..32],
        if node.is_leaf() {
            node.next_page_id
        } else {
            INVALID_PAGE_ID
        },
    );
    page.lsn = node.lsn;

    let mut offset = BTREE_PAGE_HEADER_SIZE;
    if node.is_leaf() {
        for (key, rid) in node.keys.iter().zip(node.rids.iter()) {
            offset = write_key(page, offset, key)?;
            if offset + RID_SIZE > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], rid.page_id);
            LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], rid.slot_num);
            offset += RID_SIZE;
        }
    } else {
        for child in &node.children {
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], *child);
            offset += 4;
        }
        for key in &node.keys {
            offset = write_key(page, offset, key)?;
        }
    }

    Ok(())
}

/// Deserialize the node stored in a page
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>>
where
    K: Clone + Ord + DeserializeOwned,
{
    let node_type = match LittleEndian::read_i32(&page.data[0..4]) {
        1 => NodeType::Leaf,
        2 => NodeType::Internal,
        _ => return Err(BTreeError::InvalidPageFormat(page.page_id)),
    };
    let lsn = LittleEndian::read_i64(&page.data[4..12]);
    let size = LittleEndian::read_u32(&page.data[12..16]) as usize;
    let max_size = LittleEndian::read_u32(&page.data[16..20]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[20..24]);
    let page_id = LittleEndian::read_i32(&page.data[24..28]);
    let next_page_id = LittleEndian::read_i32(&page.data[28..32]);

    let mut node = BTreeNode {
        node_type,
        lsn,
        max_size,
        parent_page_id,
        page_id,
        next_page_id,
        keys: Vec::new(),
        rids: Vec::new(),
        children: Vec::new(),
    };

    let mut offset = BTREE_PAGE_HEADER_SIZE;
    match node_type {
        NodeType::Leaf => {
            node.keys.reserve(size);
            node.rids.reserve(size);
            for _ in 0..size {
                let (key, next) = read_key(page, offset)?;
                node.keys.push(key);
                offset = next;
                node.rids.push(Rid::new(
                    LittleEndian::read_i32(&page.data[offset..offset + 4]),
                    LittleEndian::read_u32(&page.data[offset + 4..offset + 8]),
                ));
                offset += RID_SIZE;
            }
        }
        NodeType::Internal => {
            node.children.reserve(size);
            for _ in 0..size {
                node.children
                    .push(LittleEndian::read_i32(&page.data[offset..offset + 4]));
                offset += 4;
            }
            if size > 0 {
                node.keys.reserve(size - 1);
                for _ in 0..size - 1 {
                    let (key, next) = read_key(page, offset)?;
                    node.keys.push(key);
                    offset = next;
                }
            }
        }
    }

    Ok(node)
}

/// Fetch, decode, and immediately unpin a node. The caller works on the
/// owned copy and writes it back through `store_node`.
pub(crate) fn load_node<K>(buffer_pool: &BufferPoolManager, page_id: PageId) -> Result<BTreeNode<K>>
where
    K: Clone + Ord + DeserializeOwned,
{
    let page = buffer_pool.fetch_page(page_id)?;
    let node = {
        let page_guard = page.read();
        deserialize_node(&page_guard)
    };
    buffer_pool.unpin_page(page_id, false)?;
    node
}

/// Write a node image back to its page
pub(crate) fn store_node<K>(buffer_pool: &BufferPoolManager, node: &BTreeNode<K>) -> Result<()>
where
    K: Clone + Ord + Serialize,
{
    let page = buffer_pool.fetch_page(node.page_id)?;
    let result = {
        let mut page_guard = page.write();
        serialize_node(node, &mut page_guard)
    };
    buffer_pool.unpin_page(node.page_id, result.is_ok())?;
    result
}

/// Rough per-node fan-out from the in-memory key width, mirroring how much
/// of a page the serialized entries may take. Callers can always override
/// the result for tests.
pub fn default_leaf_max_size<K>() -> usize {
    let entry = mem::size_of::<K>() + KEY_LEN_PREFIX + RID_SIZE;
    ((PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / entry).saturating_sub(1).max(3)
}

pub fn default_internal_max_size<K>() -> usize {
    let entry = mem::size_of::<K>() + KEY_LEN_PREFIX + 4;
    ((PAGE_SIZE - BTREE_PAGE_HEADER_SIZE) / entry).saturating_sub(1).max(3)
}

fn write_key<K: Serialize>(page: &mut Page, offset: usize, key: &K) -> Result<usize> {
    let bytes = bincode::serialize(key)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if offset + KEY_LEN_PREFIX + bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_u16(&mut page.data[offset..offset + 2], bytes.len() as u16);
    page.data[offset + 2..offset + 2 + bytes.len()].copy_from_slice(&bytes);
    Ok(offset + KEY_LEN_PREFIX + bytes.len())
}

fn read_key<K: DeserializeOwned>(page: &Page, offset: usize) -> Result<(K, usize)> {
    let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
    let start = offset + KEY_LEN_PREFIX;
    let key = bincode::deserialize(&page.data[start..start + len])
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
    Ok((key, start + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_LSN;

    #[test]
    fn test_leaf_round_trip() {
        let mut node = BTreeNode::new_leaf(3, 7, 16);
        node.lsn = 5;
        node.next_page_id = 11;
        for k in 0..10i32 {
            node.keys.push(k);
            node.rids.push(Rid::new(k, k as u32 * 2));
        }

        let mut page = Page::new(3);
        serialize_node(&node, &mut page).unwrap();
        assert_eq!(page.lsn, 5);

        let parsed: BTreeNode<i32> = deserialize_node(&page).unwrap();
        assert_eq!(parsed.node_type, NodeType::Leaf);
        assert_eq!(parsed.lsn, 5);
        assert_eq!(parsed.max_size, 16);
        assert_eq!(parsed.parent_page_id, 7);
        assert_eq!(parsed.page_id, 3);
        assert_eq!(parsed.next_page_id, 11);
        assert_eq!(parsed.keys, node.keys);
        assert_eq!(parsed.rids, node.rids);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node = BTreeNode::new_internal(4, crate::common::types::INVALID_PAGE_ID, 8);
        node.children = vec![10, 11, 12, 13];
        node.keys = vec![100i32, 200, 300];

        let mut page = Page::new(4);
        serialize_node(&node, &mut page).unwrap();

        let parsed: BTreeNode<i32> = deserialize_node(&page).unwrap();
        assert_eq!(parsed.node_type, NodeType::Internal);
        assert_eq!(parsed.lsn, INVALID_LSN);
        assert_eq!(parsed.children, node.children);
        assert_eq!(parsed.keys, node.keys);
        assert_eq!(parsed.next_page_id, INVALID_PAGE_ID);
        assert!(parsed.rids.is_empty());
    }

    #[test]
    fn test_string_keys_round_trip() {
        let mut node = BTreeNode::new_leaf(5, 1, 8);
        node.keys = vec!["apple".to_string(), "banana".to_string(), "cherry".to_string()];
        node.rids = vec![Rid::new(1, 1), Rid::new(1, 2), Rid::new(1, 3)];

        let mut page = Page::new(5);
        serialize_node(&node, &mut page).unwrap();
        let parsed: BTreeNode<String> = deserialize_node(&page).unwrap();
        assert_eq!(parsed.keys, node.keys);
        assert_eq!(parsed.rids, node.rids);
    }

    #[test]
    fn test_garbage_page_rejected() {
        let mut page = Page::new(9);
        page.data[0] = 0xFF;
        assert!(deserialize_node::<i32>(&page).is_err());
    }

    #[test]
    fn test_default_sizes_scale_with_key_width() {
        assert!(default_leaf_max_size::<i64>() <= default_leaf_max_size::<i32>());
        assert!(default_leaf_max_size::<i32>() >= 3);
        assert!(default_internal_max_size::<[u8; 64]>() >= 3);
    }
}
