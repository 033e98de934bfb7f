//! Adaptive radix tree index
//!
//! Inner nodes grow through four layouts as their fan-out increases
//! (4 → 16 → 48 → 256 children) and shrink back on deletes. Single-child
//! paths are compressed into a byte prefix stored on the inner node.
//!
//! ```text
//!            Inner(prefix "ke")
//!             ├─ 'y' → Leaf("key")
//!             └─ 'e' → Inner(prefix "p", leaf "keep")
//!                        └─ 's' → Leaf("keeps")
//! ```
//!
//! A key that ends exactly at an inner node is stored in that node's
//! `leaf` slot, so keys that prefix other keys need no terminator byte.

use parking_lot::RwLock;

use crate::data::LogRecordPos;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Adaptive radix tree behind a reader/writer lock
#[derive(Default)]
pub struct AdaptiveRadixTree {
    tree: RwLock<ArtTree>,
}

impl AdaptiveRadixTree {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for AdaptiveRadixTree {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let old = self.tree.write().remove(key);
        Ok((old, old.is_some()))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.read().size)
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let tree = self.tree.read();
        let mut items = Vec::with_capacity(tree.size);
        if let Some(root) = &tree.root {
            collect(root, &mut items);
        }
        if reverse {
            items.reverse();
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Tree
// =============================================================================

#[derive(Default)]
struct ArtTree {
    root: Option<Node>,
    size: usize,
}

enum Node {
    Leaf(Leaf),
    Inner(Box<Inner>),
}

struct Leaf {
    /// Full key, compared on lookup
    key: Vec<u8>,
    pos: LogRecordPos,
}

struct Inner {
    /// Compressed path between the parent's branch byte and this node
    prefix: Vec<u8>,
    /// Key ending exactly at this node
    leaf: Option<Leaf>,
    children: Children,
}

impl Inner {
    fn new(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            leaf: None,
            children: Children::Node4 {
                keys: Vec::with_capacity(4),
                nodes: Vec::with_capacity(4),
            },
        }
    }

    /// Hang `leaf` under this node, whose path covers `leaf.key[..depth]`
    fn place_leaf(&mut self, leaf: Leaf, depth: usize) {
        if leaf.key.len() == depth {
            self.leaf = Some(leaf);
        } else {
            let byte = leaf.key[depth];
            self.children.add(byte, Node::Leaf(leaf));
        }
    }
}

impl ArtTree {
    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        loop {
            match node {
                Node::Leaf(leaf) => return (leaf.key == key).then_some(leaf.pos),
                Node::Inner(inner) => {
                    if !key[depth..].starts_with(&inner.prefix) {
                        return None;
                    }
                    depth += inner.prefix.len();
                    if depth == key.len() {
                        return inner.leaf.as_ref().map(|leaf| leaf.pos);
                    }
                    node = inner.children.find(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    fn insert(&mut self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        let old = match self.root.as_mut() {
            Some(root) => insert_at(root, key, pos, 0),
            None => {
                self.root = Some(Node::Leaf(Leaf { key, pos }));
                None
            }
        };
        if old.is_none() {
            self.size += 1;
        }
        old
    }

    fn remove(&mut self, key: &[u8]) -> Option<LogRecordPos> {
        let removed = match self.root.as_mut()? {
            Node::Leaf(leaf) => {
                if leaf.key != key {
                    return None;
                }
                let pos = leaf.pos;
                self.root = None;
                Some(pos)
            }
            Node::Inner(inner) => {
                let removed = remove_from(inner, key, 0);
                if removed.is_some() {
                    if let Some(root) = self.root.as_mut() {
                        if normalize(root) {
                            self.root = None;
                        }
                    }
                }
                removed
            }
        };
        if removed.is_some() {
            self.size -= 1;
        }
        removed
    }
}

fn insert_at(node: &mut Node, key: Vec<u8>, pos: LogRecordPos, depth: usize) -> Option<LogRecordPos> {
    match &mut *node {
        Node::Leaf(leaf) => {
            if leaf.key == key {
                return Some(std::mem::replace(&mut leaf.pos, pos));
            }
            // Two distinct keys share this slot: push both under a new inner node
            let split = depth + common_prefix_len(&leaf.key[depth..], &key[depth..]);
            let mut inner = Inner::new(key[depth..split].to_vec());
            if let Node::Leaf(old) = take(node) {
                inner.place_leaf(old, split);
            }
            inner.place_leaf(Leaf { key, pos }, split);
            *node = Node::Inner(Box::new(inner));
            None
        }
        Node::Inner(inner) => {
            let common = common_prefix_len(&inner.prefix, &key[depth..]);
            if common < inner.prefix.len() {
                // The key leaves the compressed path: split the prefix
                let mut parent = Inner::new(key[depth..depth + common].to_vec());
                if let Node::Inner(mut old) = take(node) {
                    let branch = old.prefix[common];
                    old.prefix = old.prefix[common + 1..].to_vec();
                    parent.children.add(branch, Node::Inner(old));
                }
                parent.place_leaf(Leaf { key, pos }, depth + common);
                *node = Node::Inner(Box::new(parent));
                return None;
            }

            let depth = depth + inner.prefix.len();
            if depth == key.len() {
                return match &mut inner.leaf {
                    Some(leaf) => Some(std::mem::replace(&mut leaf.pos, pos)),
                    None => {
                        inner.leaf = Some(Leaf { key, pos });
                        None
                    }
                };
            }

            let byte = key[depth];
            match inner.children.find_mut(byte) {
                Some(child) => insert_at(child, key, pos, depth + 1),
                None => {
                    inner.children.add(byte, Node::Leaf(Leaf { key, pos }));
                    None
                }
            }
        }
    }
}

fn remove_from(inner: &mut Inner, key: &[u8], depth: usize) -> Option<LogRecordPos> {
    if !key[depth..].starts_with(&inner.prefix) {
        return None;
    }
    let depth = depth + inner.prefix.len();
    if depth == key.len() {
        return inner.leaf.take().map(|leaf| leaf.pos);
    }

    let byte = key[depth];
    let child = inner.children.find_mut(byte)?;
    match &mut *child {
        Node::Leaf(leaf) => {
            if leaf.key != key {
                return None;
            }
            let pos = leaf.pos;
            inner.children.remove(byte);
            Some(pos)
        }
        Node::Inner(child_inner) => {
            let removed = remove_from(child_inner, key, depth + 1)?;
            if normalize(child) {
                inner.children.remove(byte);
            }
            Some(removed)
        }
    }
}

/// Restore the tree shape after a removal below `node`
///
/// Returns true when `node` is now empty and must be unlinked.
fn normalize(node: &mut Node) -> bool {
    let Node::Inner(inner) = &mut *node else {
        return false;
    };

    if inner.children.len() == 0 {
        return match inner.leaf.take() {
            Some(leaf) => {
                *node = Node::Leaf(leaf);
                false
            }
            None => true,
        };
    }

    if inner.leaf.is_none() && inner.children.len() == 1 {
        let mut prefix = std::mem::take(&mut inner.prefix);
        if let Some((byte, child)) = inner.children.take_only() {
            *node = match child {
                Node::Leaf(leaf) => Node::Leaf(leaf),
                Node::Inner(mut child_inner) => {
                    prefix.push(byte);
                    prefix.extend_from_slice(&child_inner.prefix);
                    child_inner.prefix = prefix;
                    Node::Inner(child_inner)
                }
            };
        }
    }
    false
}

fn collect(node: &Node, out: &mut Vec<(Vec<u8>, LogRecordPos)>) {
    match node {
        Node::Leaf(leaf) => out.push((leaf.key.clone(), leaf.pos)),
        Node::Inner(inner) => {
            if let Some(leaf) = &inner.leaf {
                out.push((leaf.key.clone(), leaf.pos));
            }
            for child in inner.children.iter_ordered() {
                collect(child, out);
            }
        }
    }
}

fn take(node: &mut Node) -> Node {
    std::mem::replace(node, Node::Inner(Box::new(Inner::new(Vec::new()))))
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// =============================================================================
// Child Layouts
// =============================================================================

enum Children {
    /// Up to 4 children, keys sorted
    Node4 { keys: Vec<u8>, nodes: Vec<Node> },
    /// Up to 16 children, keys sorted
    Node16 { keys: Vec<u8>, nodes: Vec<Node> },
    /// Up to 48 children; `index[byte]` is slot + 1, 0 when absent
    Node48 { index: Box<[u8; 256]>, nodes: Vec<Node> },
    /// Direct table indexed by byte
    Node256 { nodes: Vec<Option<Node>>, count: usize },
}

impl Children {
    fn empty() -> Self {
        Children::Node4 {
            keys: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Children::Node4 { keys, .. } | Children::Node16 { keys, .. } => keys.len(),
            Children::Node48 { nodes, .. } => nodes.len(),
            Children::Node256 { count, .. } => *count,
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Children::Node4 { keys, .. } => keys.len() >= 4,
            Children::Node16 { keys, .. } => keys.len() >= 16,
            Children::Node48 { nodes, .. } => nodes.len() >= 48,
            Children::Node256 { .. } => false,
        }
    }

    fn find(&self, byte: u8) -> Option<&Node> {
        match self {
            Children::Node4 { keys, nodes } | Children::Node16 { keys, nodes } => {
                keys.binary_search(&byte).ok().map(|i| &nodes[i])
            }
            Children::Node48 { index, nodes } => match index[byte as usize] {
                0 => None,
                slot => Some(&nodes[slot as usize - 1]),
            },
            Children::Node256 { nodes, .. } => nodes[byte as usize].as_ref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self {
            Children::Node4 { keys, nodes } | Children::Node16 { keys, nodes } => {
                keys.binary_search(&byte).ok().map(move |i| &mut nodes[i])
            }
            Children::Node48 { index, nodes } => match index[byte as usize] {
                0 => None,
                slot => Some(&mut nodes[slot as usize - 1]),
            },
            Children::Node256 { nodes, .. } => nodes[byte as usize].as_mut(),
        }
    }

    /// Add a child under a byte that is not present yet
    fn add(&mut self, byte: u8, node: Node) {
        if self.is_full() {
            self.grow();
        }
        match self {
            Children::Node4 { keys, nodes } | Children::Node16 { keys, nodes } => {
                let i = keys.partition_point(|&k| k < byte);
                keys.insert(i, byte);
                nodes.insert(i, node);
            }
            Children::Node48 { index, nodes } => {
                nodes.push(node);
                index[byte as usize] = nodes.len() as u8;
            }
            Children::Node256 { nodes, count } => {
                nodes[byte as usize] = Some(node);
                *count += 1;
            }
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Node> {
        let removed = match self {
            Children::Node4 { keys, nodes } | Children::Node16 { keys, nodes } => {
                let i = keys.binary_search(&byte).ok()?;
                keys.remove(i);
                Some(nodes.remove(i))
            }
            Children::Node48 { index, nodes } => {
                let slot = index[byte as usize] as usize;
                if slot == 0 {
                    return None;
                }
                index[byte as usize] = 0;
                let last = nodes.len();
                let node = nodes.swap_remove(slot - 1);
                // The former last node moved into the freed slot
                if slot != last {
                    if let Some(moved) = index.iter_mut().find(|s| **s as usize == last) {
                        *moved = slot as u8;
                    }
                }
                Some(node)
            }
            Children::Node256 { nodes, count } => {
                let node = nodes[byte as usize].take()?;
                *count -= 1;
                Some(node)
            }
        };
        self.shrink();
        removed
    }

    /// Detach the only child; callers check `len() == 1` first
    fn take_only(&mut self) -> Option<(u8, Node)> {
        match self {
            Children::Node4 { keys, nodes } | Children::Node16 { keys, nodes } => {
                Some((keys.pop()?, nodes.pop()?))
            }
            Children::Node48 { index, nodes } => {
                let byte = index.iter().position(|&s| s != 0)?;
                index[byte] = 0;
                Some((byte as u8, nodes.pop()?))
            }
            Children::Node256 { nodes, count } => {
                let byte = nodes.iter().position(Option::is_some)?;
                *count -= 1;
                Some((byte as u8, nodes[byte].take()?))
            }
        }
    }

    fn iter_ordered(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        match self {
            Children::Node4 { nodes, .. } | Children::Node16 { nodes, .. } => Box::new(nodes.iter()),
            Children::Node48 { index, nodes } => Box::new(
                index
                    .iter()
                    .filter(|&&slot| slot != 0)
                    .map(move |&slot| &nodes[slot as usize - 1]),
            ),
            Children::Node256 { nodes, .. } => Box::new(nodes.iter().flatten()),
        }
    }

    fn grow(&mut self) {
        *self = match std::mem::replace(self, Children::empty()) {
            Children::Node4 { keys, nodes } => Children::Node16 { keys, nodes },
            Children::Node16 { keys, nodes } => {
                let mut index = Box::new([0u8; 256]);
                for (i, &key) in keys.iter().enumerate() {
                    index[key as usize] = (i + 1) as u8;
                }
                Children::Node48 { index, nodes }
            }
            Children::Node48 { index, nodes } => {
                let count = nodes.len();
                let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
                let mut table: Vec<Option<Node>> = (0..256).map(|_| None).collect();
                for (byte, &slot) in index.iter().enumerate() {
                    if slot != 0 {
                        table[byte] = slots[slot as usize - 1].take();
                    }
                }
                Children::Node256 {
                    nodes: table,
                    count,
                }
            }
            full @ Children::Node256 { .. } => full,
        };
    }

    fn shrink(&mut self) {
        let should_shrink = match self {
            Children::Node4 { .. } => false,
            Children::Node16 { keys, .. } => keys.len() <= 3,
            Children::Node48 { nodes, .. } => nodes.len() <= 12,
            Children::Node256 { count, .. } => *count <= 40,
        };
        if !should_shrink {
            return;
        }

        *self = match std::mem::replace(self, Children::empty()) {
            Children::Node16 { keys, nodes } => Children::Node4 { keys, nodes },
            Children::Node48 { index, nodes } => {
                let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
                let mut keys = Vec::with_capacity(16);
                let mut ordered = Vec::with_capacity(16);
                for (byte, &slot) in index.iter().enumerate() {
                    if slot != 0 {
                        if let Some(node) = slots[slot as usize - 1].take() {
                            keys.push(byte as u8);
                            ordered.push(node);
                        }
                    }
                }
                Children::Node16 {
                    keys,
                    nodes: ordered,
                }
            }
            Children::Node256 { nodes, .. } => {
                let mut index = Box::new([0u8; 256]);
                let mut compact = Vec::with_capacity(48);
                for (byte, node) in nodes.into_iter().enumerate() {
                    if let Some(node) = node {
                        compact.push(node);
                        index[byte] = compact.len() as u8;
                    }
                }
                Children::Node48 {
                    index,
                    nodes: compact,
                }
            }
            other => other,
        };
    }
}
