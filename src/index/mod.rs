//! Persistent B+ tree: an ordered key -> locator map spread over the
//! blocks of an index file. Every node read and write goes through the
//! block cache; nothing here holds a frame across a cache call.

mod error;
mod node;

pub use error::{IndexError, IndexResult};
pub use node::{rank_for, Locator};

use std::cmp::Ordering;

use crate::catalog::IndexMetadata;
use crate::file::{BlockCache, BlockMut, BlockRef, FileId, NO_BLOCK};
use crate::record::Value;

use node::{read_node, write_node, InternalNode, LeafNode, Node};

fn compare(a: &Value, b: &Value) -> IndexResult<Ordering> {
    a.compare(b)
        .ok_or_else(|| IndexError::Corrupt("mismatched key types in tree".to_string()))
}

/// First position whose key is >= `key`
fn lower_bound(keys: &[Value], key: &Value) -> IndexResult<usize> {
    let mut at = 0;
    while at < keys.len() && compare(&keys[at], key)? == Ordering::Less {
        at += 1;
    }
    Ok(at)
}

/// Whether folding `right` into `left` stays within the rank. An internal
/// pair also absorbs the separator that stood between the two nodes.
fn merged_fits(left: &Node, right: &Node, rank: usize) -> bool {
    let sep = match left {
        Node::Internal(_) => 1,
        Node::Leaf(_) => 0,
    };
    left.key_count() + right.key_count() + sep <= rank
}

/// Child slot to descend into: the number of separators <= `key`, so that
/// separator K at position i keeps child i strictly below K and child i+1
/// at or above it.
fn child_slot(keys: &[Value], key: &Value) -> IndexResult<usize> {
    let mut at = 0;
    while at < keys.len() && compare(&keys[at], key)? != Ordering::Greater {
        at += 1;
    }
    Ok(at)
}

/// One B+ tree, bound to its index file and catalog metadata for the
/// duration of a statement.
pub struct BPlusTree<'a> {
    cache: &'a mut BlockCache,
    file: FileId,
    meta: &'a mut IndexMetadata,
}

impl<'a> BPlusTree<'a> {
    pub fn new(cache: &'a mut BlockCache, file: FileId, meta: &'a mut IndexMetadata) -> Self {
        Self { cache, file, meta }
    }

    /// Point lookup
    pub fn get(&mut self, key: &Value) -> IndexResult<Option<Locator>> {
        if self.meta.root == NO_BLOCK {
            return Ok(None);
        }
        let leaf_num = self.find_leaf(key)?;
        let Node::Leaf(leaf) = self.read(leaf_num)? else {
            return Err(IndexError::Corrupt("expected leaf".to_string()));
        };
        let at = lower_bound(&leaf.keys, key)?;
        if at < leaf.keys.len() && compare(&leaf.keys[at], key)? == Ordering::Equal {
            Ok(Some(leaf.locators[at]))
        } else {
            Ok(None)
        }
    }

    /// Insert a key and its locator. Keys are unique; inserting an
    /// existing key fails with `DuplicateKey`.
    pub fn insert(&mut self, key: &Value, locator: Locator) -> IndexResult<()> {
        if self.meta.root == NO_BLOCK {
            let num = self.alloc_node()?;
            let leaf = LeafNode {
                parent: NO_BLOCK,
                next: NO_BLOCK,
                keys: vec![key.clone()],
                locators: vec![locator],
            };
            self.write(num, &Node::Leaf(leaf))?;
            self.meta.root = num;
            self.meta.leaf_head = num;
            self.meta.level = 0;
            self.meta.key_count = 1;
            return Ok(());
        }

        let leaf_num = self.find_leaf(key)?;
        let Node::Leaf(mut leaf) = self.read(leaf_num)? else {
            return Err(IndexError::Corrupt("expected leaf".to_string()));
        };

        let at = lower_bound(&leaf.keys, key)?;
        if at < leaf.keys.len() && compare(&leaf.keys[at], key)? == Ordering::Equal {
            return Err(IndexError::DuplicateKey);
        }
        leaf.keys.insert(at, key.clone());
        leaf.locators.insert(at, locator);
        self.meta.key_count += 1;

        if leaf.keys.len() <= self.meta.rank {
            return self.write(leaf_num, &Node::Leaf(leaf));
        }

        // Overflow: split, copy the right half's first key up
        let mid = leaf.keys.len() / 2;
        let right_keys = leaf.keys.split_off(mid);
        let right_locators = leaf.locators.split_off(mid);
        let separator = right_keys[0].clone();

        let right_num = self.alloc_node()?;
        let right = LeafNode {
            parent: leaf.parent,
            next: leaf.next,
            keys: right_keys,
            locators: right_locators,
        };
        let parent = leaf.parent;
        leaf.next = right_num;
        self.write(leaf_num, &Node::Leaf(leaf))?;
        self.write(right_num, &Node::Leaf(right))?;

        self.insert_into_parent(parent, leaf_num, separator, right_num)
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &Value) -> IndexResult<bool> {
        if self.meta.root == NO_BLOCK {
            return Ok(false);
        }
        let leaf_num = self.find_leaf(key)?;
        let Node::Leaf(mut leaf) = self.read(leaf_num)? else {
            return Err(IndexError::Corrupt("expected leaf".to_string()));
        };

        let at = lower_bound(&leaf.keys, key)?;
        if at >= leaf.keys.len() || compare(&leaf.keys[at], key)? != Ordering::Equal {
            return Ok(false);
        }
        leaf.keys.remove(at);
        leaf.locators.remove(at);
        self.meta.key_count -= 1;
        self.write(leaf_num, &Node::Leaf(leaf))?;

        self.fix_underflow(leaf_num)?;
        Ok(true)
    }

    /// Rewrite the locator stored at an existing key. Returns whether the
    /// key was found.
    pub fn update_locator(&mut self, key: &Value, locator: Locator) -> IndexResult<bool> {
        if self.meta.root == NO_BLOCK {
            return Ok(false);
        }
        let leaf_num = self.find_leaf(key)?;
        let Node::Leaf(mut leaf) = self.read(leaf_num)? else {
            return Err(IndexError::Corrupt("expected leaf".to_string()));
        };
        let at = lower_bound(&leaf.keys, key)?;
        if at >= leaf.keys.len() || compare(&leaf.keys[at], key)? != Ordering::Equal {
            return Ok(false);
        }
        leaf.locators[at] = locator;
        self.write(leaf_num, &Node::Leaf(leaf))
            .map(|_| true)
    }

    /// In-order dump of the whole tree by walking the leaf chain.
    /// A debug and test hook, not a query path.
    pub fn entries(&mut self) -> IndexResult<Vec<(Value, Locator)>> {
        let mut out = Vec::with_capacity(self.meta.key_count);
        let mut cur = self.meta.leaf_head;
        while cur != NO_BLOCK {
            let Node::Leaf(leaf) = self.read(cur)? else {
                return Err(IndexError::Corrupt("non-leaf in leaf chain".to_string()));
            };
            out.extend(leaf.keys.into_iter().zip(leaf.locators));
            cur = leaf.next;
        }
        Ok(out)
    }

    fn read(&mut self, num: i32) -> IndexResult<Node> {
        read_node(self.cache, self.file, num, self.meta.key_type)
    }

    fn write(&mut self, num: i32, node: &Node) -> IndexResult<()> {
        write_node(self.cache, self.file, num, node, self.meta.key_type)
    }

    fn find_leaf(&mut self, key: &Value) -> IndexResult<i32> {
        let mut cur = self.meta.root;
        loop {
            match self.read(cur)? {
                Node::Leaf(_) => return Ok(cur),
                Node::Internal(internal) => {
                    let slot = child_slot(&internal.keys, key)?;
                    cur = internal.children[slot];
                }
            }
        }
    }

    /// Take a node block from the rubbish chain, or extend the file
    fn alloc_node(&mut self) -> IndexResult<i32> {
        let num = if self.meta.rubbish != NO_BLOCK {
            let num = self.meta.rubbish;
            let frame = self.cache.get_block(self.file, num)?;
            self.meta.rubbish = BlockRef::new(frame).next();
            num
        } else {
            let num = self.meta.block_count;
            self.meta.block_count += 1;
            num
        };
        self.meta.node_count += 1;
        Ok(num)
    }

    /// Push a removed node onto the rubbish chain
    fn free_node(&mut self, num: i32) -> IndexResult<()> {
        let frame = self.cache.get_block_mut(self.file, num)?;
        let mut block = BlockMut::new(frame);
        block.init(NO_BLOCK, self.meta.rubbish, 0);
        self.meta.rubbish = num;
        self.meta.node_count -= 1;
        Ok(())
    }

    fn set_parent(&mut self, num: i32, parent: i32) -> IndexResult<()> {
        let frame = self.cache.get_block_mut(self.file, num)?;
        BlockMut::new(frame).set_prev(parent);
        Ok(())
    }

    /// Register `right` (with separator `sep`) next to `left` in their
    /// parent, growing a new root when `left` was the root.
    fn insert_into_parent(
        &mut self,
        parent: i32,
        left: i32,
        sep: Value,
        right: i32,
    ) -> IndexResult<()> {
        if parent == NO_BLOCK {
            let root_num = self.alloc_node()?;
            let root = InternalNode {
                parent: NO_BLOCK,
                keys: vec![sep],
                children: vec![left, right],
            };
            self.write(root_num, &Node::Internal(root))?;
            self.set_parent(left, root_num)?;
            self.set_parent(right, root_num)?;
            self.meta.root = root_num;
            self.meta.level += 1;
            return Ok(());
        }

        let Node::Internal(mut internal) = self.read(parent)? else {
            return Err(IndexError::Corrupt("expected internal parent".to_string()));
        };
        let slot = internal
            .children
            .iter()
            .position(|&c| c == left)
            .ok_or_else(|| IndexError::Corrupt("child missing from parent".to_string()))?;
        internal.keys.insert(slot, sep);
        internal.children.insert(slot + 1, right);
        self.set_parent(right, parent)?;

        if internal.keys.len() <= self.meta.rank {
            return self.write(parent, &Node::Internal(internal));
        }

        // Overflow: split, push the middle key up
        let mid = internal.keys.len() / 2;
        let sep_up = internal.keys[mid].clone();
        let right_keys = internal.keys.split_off(mid + 1);
        internal.keys.truncate(mid);
        let right_children = internal.children.split_off(mid + 1);

        let right_num = self.alloc_node()?;
        let grandparent = internal.parent;
        let right_node = InternalNode {
            parent: grandparent,
            keys: right_keys,
            children: right_children.clone(),
        };
        self.write(parent, &Node::Internal(internal))?;
        self.write(right_num, &Node::Internal(right_node))?;
        for child in right_children {
            self.set_parent(child, right_num)?;
        }

        self.insert_into_parent(grandparent, parent, sep_up, right_num)
    }

    /// Restore minimum occupancy after a removal, borrowing from a sibling
    /// with spare keys or merging right-into-left and recursing upward.
    fn fix_underflow(&mut self, num: i32) -> IndexResult<()> {
        let node = self.read(num)?;
        let parent = node.parent();

        if parent == NO_BLOCK {
            // Root rules: an empty leaf root empties the tree, an internal
            // root with no keys hands the tree to its only child
            match node {
                Node::Leaf(leaf) => {
                    if leaf.keys.is_empty() {
                        self.free_node(num)?;
                        self.meta.root = NO_BLOCK;
                        self.meta.leaf_head = NO_BLOCK;
                        self.meta.level = -1;
                    }
                }
                Node::Internal(internal) => {
                    if internal.keys.is_empty() {
                        let child = internal.children[0];
                        self.set_parent(child, NO_BLOCK)?;
                        self.meta.root = child;
                        self.meta.level -= 1;
                        self.free_node(num)?;
                    }
                }
            }
            return Ok(());
        }

        // Minimum keys per non-root node; rounds up for odd ranks
        let min_keys = self.meta.rank.div_ceil(2);
        if node.key_count() >= min_keys {
            return Ok(());
        }

        let Node::Internal(mut par) = self.read(parent)? else {
            return Err(IndexError::Corrupt("expected internal parent".to_string()));
        };
        let slot = par
            .children
            .iter()
            .position(|&c| c == num)
            .ok_or_else(|| IndexError::Corrupt("child missing from parent".to_string()))?;

        // Borrow from the left sibling
        if slot > 0 {
            let left_num = par.children[slot - 1];
            let left = self.read(left_num)?;
            if left.key_count() > min_keys {
                self.borrow_from_left(&mut par, slot, left_num, left, num, node)?;
                return self.write(parent, &Node::Internal(par));
            }
        }

        // Borrow from the right sibling
        if slot + 1 < par.children.len() {
            let right_num = par.children[slot + 1];
            let right = self.read(right_num)?;
            if right.key_count() > min_keys {
                self.borrow_from_right(&mut par, slot, num, node, right_num, right)?;
                return self.write(parent, &Node::Internal(par));
            }
        }

        // No sibling can spare a key: merge right-into-left and drop the
        // separator between the pair. With an odd rank, two internal nodes
        // at minimum occupancy hold one key more than a node can take, so
        // that pair redistributes a single key instead.
        if slot > 0 {
            let left_num = par.children[slot - 1];
            let left = self.read(left_num)?;
            if !merged_fits(&left, &node, self.meta.rank) {
                self.borrow_from_left(&mut par, slot, left_num, left, num, node)?;
                return self.write(parent, &Node::Internal(par));
            }
            let sep = par.keys.remove(slot - 1);
            par.children.remove(slot);
            self.merge(left_num, left, num, node, sep)?;
        } else {
            let right_num = par.children[slot + 1];
            let right = self.read(right_num)?;
            if !merged_fits(&node, &right, self.meta.rank) {
                self.borrow_from_right(&mut par, slot, num, node, right_num, right)?;
                return self.write(parent, &Node::Internal(par));
            }
            let sep = par.keys.remove(slot);
            par.children.remove(slot + 1);
            self.merge(num, node, right_num, right, sep)?;
        }
        self.write(parent, &Node::Internal(par))?;

        self.fix_underflow(parent)
    }

    fn borrow_from_left(
        &mut self,
        par: &mut InternalNode,
        slot: usize,
        left_num: i32,
        left: Node,
        num: i32,
        node: Node,
    ) -> IndexResult<()> {
        match (left, node) {
            (Node::Leaf(mut left), Node::Leaf(mut leaf)) => {
                let key = left.keys.pop().ok_or_else(Self::empty_sibling)?;
                let loc = left.locators.pop().ok_or_else(Self::empty_sibling)?;
                par.keys[slot - 1] = key.clone();
                leaf.keys.insert(0, key);
                leaf.locators.insert(0, loc);
                self.write(left_num, &Node::Leaf(left))?;
                self.write(num, &Node::Leaf(leaf))
            }
            (Node::Internal(mut left), Node::Internal(mut internal)) => {
                // The separator rotates down, the sibling's last key up
                let sep = std::mem::replace(
                    &mut par.keys[slot - 1],
                    left.keys.pop().ok_or_else(Self::empty_sibling)?,
                );
                let child = left.children.pop().ok_or_else(Self::empty_sibling)?;
                internal.keys.insert(0, sep);
                internal.children.insert(0, child);
                self.set_parent(child, num)?;
                self.write(left_num, &Node::Internal(left))?;
                self.write(num, &Node::Internal(internal))
            }
            _ => Err(IndexError::Corrupt("sibling kind mismatch".to_string())),
        }
    }

    fn borrow_from_right(
        &mut self,
        par: &mut InternalNode,
        slot: usize,
        num: i32,
        node: Node,
        right_num: i32,
        right: Node,
    ) -> IndexResult<()> {
        match (node, right) {
            (Node::Leaf(mut leaf), Node::Leaf(mut right)) => {
                let key = right.keys.remove(0);
                let loc = right.locators.remove(0);
                leaf.keys.push(key);
                leaf.locators.push(loc);
                par.keys[slot] = right.keys[0].clone();
                self.write(num, &Node::Leaf(leaf))?;
                self.write(right_num, &Node::Leaf(right))
            }
            (Node::Internal(mut internal), Node::Internal(mut right)) => {
                let sep = std::mem::replace(&mut par.keys[slot], right.keys.remove(0));
                let child = right.children.remove(0);
                internal.keys.push(sep);
                internal.children.push(child);
                self.set_parent(child, num)?;
                self.write(num, &Node::Internal(internal))?;
                self.write(right_num, &Node::Internal(right))
            }
            _ => Err(IndexError::Corrupt("sibling kind mismatch".to_string())),
        }
    }

    /// Fold `right` into `left`; `sep` is the separator that stood between
    /// them in the parent. Frees the right block.
    fn merge(
        &mut self,
        left_num: i32,
        left: Node,
        right_num: i32,
        right: Node,
        sep: Value,
    ) -> IndexResult<()> {
        match (left, right) {
            (Node::Leaf(mut left), Node::Leaf(right)) => {
                left.keys.extend(right.keys);
                left.locators.extend(right.locators);
                left.next = right.next;
                self.write(left_num, &Node::Leaf(left))?;
            }
            (Node::Internal(mut left), Node::Internal(right)) => {
                left.keys.push(sep);
                left.keys.extend(right.keys);
                for &child in &right.children {
                    self.set_parent(child, left_num)?;
                }
                left.children.extend(right.children);
                self.write(left_num, &Node::Internal(left))?;
            }
            _ => return Err(IndexError::Corrupt("sibling kind mismatch".to_string())),
        }
        self.free_node(right_num)
    }

    fn empty_sibling() -> IndexError {
        IndexError::Corrupt("sibling unexpectedly empty".to_string())
    }
}
