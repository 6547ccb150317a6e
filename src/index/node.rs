//! On-disk B+ tree node codec.
//!
//! Nodes reuse the 12-byte chain header: `prev` holds the parent block
//! (-1 at the root), `next` holds the right sibling for leaves, `count`
//! the number of keys. The payload starts with a 4-byte kind tag, then
//! the packed entries:
//!
//!   leaf:     count x (key, block i32, slot i32)
//!   internal: child0 i32, count x (key, child i32)
//!
//! Locators are two explicit fields; block and slot are not packed into
//! one integer, so neither is capped at 65536.

use super::error::{IndexError, IndexResult};
use crate::file::{BlockCache, BlockMut, BlockRef, FileId, BLOCK_HEADER_SIZE, BLOCK_SIZE};
use crate::record::{DataType, Value};

const TAG_INTERNAL: i32 = 0;
const TAG_LEAF: i32 = 1;

/// Where a record lives: block number and slot within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub block: i32,
    pub slot: i32,
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub parent: i32,
    pub next: i32,
    pub keys: Vec<Value>,
    pub locators: Vec<Locator>,
}

#[derive(Debug, Clone)]
pub struct InternalNode {
    pub parent: i32,
    pub keys: Vec<Value>,
    /// Always `keys.len() + 1` entries
    pub children: Vec<i32>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn parent(&self) -> i32 {
        match self {
            Node::Leaf(leaf) => leaf.parent,
            Node::Internal(node) => node.parent,
        }
    }

    pub fn key_count(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.keys.len(),
            Node::Internal(node) => node.keys.len(),
        }
    }
}

/// Maximum keys per node for a key of `key_len` bytes, sized so both node
/// kinds fit the block payload.
pub fn rank_for(key_len: usize) -> IndexResult<usize> {
    let payload = BLOCK_SIZE - BLOCK_HEADER_SIZE - 4;
    let leaf_cap = payload / (key_len + 8);
    let internal_cap = (payload - 4) / (key_len + 4);
    let rank = leaf_cap.min(internal_cap);
    if rank < 3 {
        return Err(IndexError::KeyTooWide(key_len));
    }
    Ok(rank)
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn write_i32(bytes: &mut [u8], at: usize, value: i32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn decode_key(bytes: &[u8], key_type: DataType) -> IndexResult<Value> {
    Value::decode(bytes, key_type).map_err(|e| IndexError::Corrupt(e.to_string()))
}

fn encode_key(key: &Value, key_type: DataType) -> IndexResult<Vec<u8>> {
    key.encode(key_type)
        .map_err(|e| IndexError::Corrupt(e.to_string()))
}

pub fn read_node(
    cache: &mut BlockCache,
    file: FileId,
    block_num: i32,
    key_type: DataType,
) -> IndexResult<Node> {
    let key_len = key_type.size();
    let frame = cache.get_block(file, block_num)?;
    let block = BlockRef::new(frame);
    let parent = block.prev();
    let next = block.next();
    let count = block.count() as usize;
    let payload = block.payload();

    match read_i32(payload, 0) {
        TAG_LEAF => {
            let mut keys = Vec::with_capacity(count);
            let mut locators = Vec::with_capacity(count);
            let mut at = 4;
            for _ in 0..count {
                keys.push(decode_key(&payload[at..at + key_len], key_type)?);
                locators.push(Locator {
                    block: read_i32(payload, at + key_len),
                    slot: read_i32(payload, at + key_len + 4),
                });
                at += key_len + 8;
            }
            Ok(Node::Leaf(LeafNode {
                parent,
                next,
                keys,
                locators,
            }))
        }
        TAG_INTERNAL => {
            let mut keys = Vec::with_capacity(count);
            let mut children = Vec::with_capacity(count + 1);
            children.push(read_i32(payload, 4));
            let mut at = 8;
            for _ in 0..count {
                keys.push(decode_key(&payload[at..at + key_len], key_type)?);
                children.push(read_i32(payload, at + key_len));
                at += key_len + 4;
            }
            Ok(Node::Internal(InternalNode {
                parent,
                keys,
                children,
            }))
        }
        tag => Err(IndexError::Corrupt(format!(
            "unknown node tag {} in block {}",
            tag, block_num
        ))),
    }
}

pub fn write_node(
    cache: &mut BlockCache,
    file: FileId,
    block_num: i32,
    node: &Node,
    key_type: DataType,
) -> IndexResult<()> {
    let key_len = key_type.size();
    let frame = cache.get_block_mut(file, block_num)?;
    frame.fill(0);
    let mut block = BlockMut::new(frame);

    match node {
        Node::Leaf(leaf) => {
            debug_assert_eq!(leaf.keys.len(), leaf.locators.len());
            block.init(leaf.parent, leaf.next, leaf.keys.len() as i32);
            let payload = block.payload_mut();
            write_i32(payload, 0, TAG_LEAF);
            let mut at = 4;
            for (key, loc) in leaf.keys.iter().zip(&leaf.locators) {
                payload[at..at + key_len].copy_from_slice(&encode_key(key, key_type)?);
                write_i32(payload, at + key_len, loc.block);
                write_i32(payload, at + key_len + 4, loc.slot);
                at += key_len + 8;
            }
        }
        Node::Internal(internal) => {
            debug_assert_eq!(internal.children.len(), internal.keys.len() + 1);
            block.init(internal.parent, crate::file::NO_BLOCK, internal.keys.len() as i32);
            let payload = block.payload_mut();
            write_i32(payload, 0, TAG_INTERNAL);
            write_i32(payload, 4, internal.children[0]);
            let mut at = 8;
            for (key, child) in internal.keys.iter().zip(&internal.children[1..]) {
                payload[at..at + key_len].copy_from_slice(&encode_key(key, key_type)?);
                write_i32(payload, at + key_len, *child);
                at += key_len + 4;
            }
        }
    }

    Ok(())
}
