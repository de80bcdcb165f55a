//! Adaptive Radix Tree
//!
//! A byte-wise trie whose inner nodes change representation with their
//! fan-out:
//!
//! ```text
//!   Node4    up to 4 children    sorted key bytes + child vec
//!   Node16   up to 16 children   sorted key bytes + child vec (binary search)
//!   Node48   up to 48 children   256-entry byte → slot table + 48 slots
//!   Node256  up to 256 children  direct array indexed by byte
//! ```
//!
//! Paths through single-child chains are compressed into the `prefix` of the
//! next inner node. A key that ends exactly at an inner node (because it is a
//! prefix of longer keys) is kept in that node's `terminal` slot, which sorts
//! before every child. Leaves keep the full key so lookups confirm the match
//! without re-walking compressed prefixes.

use std::mem;

const NODE4_CAPACITY: usize = 4;
const NODE16_CAPACITY: usize = 16;
const NODE48_CAPACITY: usize = 48;

// Shrink thresholds sit below the next-smaller capacity to avoid
// grow/shrink thrash around a boundary
const NODE16_SHRINK: usize = 3;
const NODE48_SHRINK: usize = 12;
const NODE256_SHRINK: usize = 36;

/// Ordered map from byte strings to `V`
pub struct AdaptiveRadixTree<V> {
    root: Option<Node<V>>,
    len: usize,
}

enum Node<V> {
    Leaf(Box<Leaf<V>>),
    Inner(Box<Inner<V>>),
}

struct Leaf<V> {
    key: Vec<u8>,
    value: V,
}

struct Inner<V> {
    /// Compressed path below the parent's edge byte
    prefix: Vec<u8>,
    /// Key ending exactly at this node
    terminal: Option<Box<Leaf<V>>>,
    children: Children<V>,
}

enum Children<V> {
    Node4(Sparse<V>),
    Node16(Sparse<V>),
    Node48(Indirect<V>),
    Node256(Direct<V>),
}

/// Sorted parallel arrays (Node4 / Node16)
struct Sparse<V> {
    keys: Vec<u8>,
    nodes: Vec<Node<V>>,
}

/// Byte → slot table (Node48). A zero entry means "no child",
/// otherwise the slot index is `entry - 1`.
struct Indirect<V> {
    index: [u8; 256],
    slots: Vec<Option<Node<V>>>,
    len: usize,
}

/// One slot per byte (Node256)
struct Direct<V> {
    slots: Vec<Option<Node<V>>>,
    len: usize,
}

impl<V> Leaf<V> {
    fn boxed(key: &[u8], value: V) -> Box<Self> {
        Box::new(Self {
            key: key.to_vec(),
            value,
        })
    }
}

impl<V> Inner<V> {
    fn new(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            terminal: None,
            children: Children::Node4(Sparse::with_capacity(NODE4_CAPACITY)),
        }
    }

    /// Hang `leaf` below this node, whose subtree starts at `depth`
    fn attach_leaf(&mut self, leaf: Box<Leaf<V>>, depth: usize) {
        if leaf.key.len() == depth {
            self.terminal = Some(leaf);
        } else {
            let byte = leaf.key[depth];
            self.children.add(byte, Node::Leaf(leaf));
        }
    }
}

impl<V> Sparse<V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
        }
    }
}

impl<V> Indirect<V> {
    fn new() -> Self {
        Self {
            index: [0; 256],
            slots: (0..NODE48_CAPACITY).map(|_| None).collect(),
            len: 0,
        }
    }

    fn insert(&mut self, byte: u8, node: Node<V>) {
        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            self.slots[slot] = Some(node);
            self.index[byte as usize] = slot as u8 + 1;
            self.len += 1;
        }
    }
}

impl<V> Direct<V> {
    fn new() -> Self {
        Self {
            slots: (0..256).map(|_| None).collect(),
            len: 0,
        }
    }
}

impl<V> Children<V> {
    fn len(&self) -> usize {
        match self {
            Children::Node4(n) | Children::Node16(n) => n.keys.len(),
            Children::Node48(n) => n.len,
            Children::Node256(n) => n.len,
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Children::Node4(n) => n.keys.len() >= NODE4_CAPACITY,
            Children::Node16(n) => n.keys.len() >= NODE16_CAPACITY,
            Children::Node48(n) => n.len >= NODE48_CAPACITY,
            Children::Node256(_) => false,
        }
    }

    fn find(&self, byte: u8) -> Option<&Node<V>> {
        match self {
            Children::Node4(n) | Children::Node16(n) => {
                let i = n.keys.binary_search(&byte).ok()?;
                Some(&n.nodes[i])
            }
            Children::Node48(n) => match n.index[byte as usize] {
                0 => None,
                slot => n.slots[slot as usize - 1].as_ref(),
            },
            Children::Node256(n) => n.slots[byte as usize].as_ref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node<V>> {
        match self {
            Children::Node4(n) | Children::Node16(n) => {
                let i = n.keys.binary_search(&byte).ok()?;
                Some(&mut n.nodes[i])
            }
            Children::Node48(n) => match n.index[byte as usize] {
                0 => None,
                slot => n.slots[slot as usize - 1].as_mut(),
            },
            Children::Node256(n) => n.slots[byte as usize].as_mut(),
        }
    }

    /// Add a child for a byte that has none yet
    fn add(&mut self, byte: u8, node: Node<V>) {
        if self.is_full() {
            self.grow();
        }
        match self {
            Children::Node4(n) | Children::Node16(n) => {
                let i = n.keys.binary_search(&byte).unwrap_or_else(|i| i);
                n.keys.insert(i, byte);
                n.nodes.insert(i, node);
            }
            Children::Node48(n) => n.insert(byte, node),
            Children::Node256(n) => {
                if n.slots[byte as usize].replace(node).is_none() {
                    n.len += 1;
                }
            }
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Node<V>> {
        let removed = match self {
            Children::Node4(n) | Children::Node16(n) => {
                let i = n.keys.binary_search(&byte).ok()?;
                n.keys.remove(i);
                Some(n.nodes.remove(i))
            }
            Children::Node48(n) => {
                let slot = n.index[byte as usize];
                if slot == 0 {
                    return None;
                }
                n.index[byte as usize] = 0;
                n.len -= 1;
                n.slots[slot as usize - 1].take()
            }
            Children::Node256(n) => {
                let node = n.slots[byte as usize].take()?;
                n.len -= 1;
                Some(node)
            }
        };
        self.shrink();
        removed
    }

    /// Remove and return the only child
    fn pop_only(&mut self) -> Option<(u8, Node<V>)> {
        if self.len() != 1 {
            return None;
        }
        let byte = match self {
            Children::Node4(n) | Children::Node16(n) => n.keys[0],
            Children::Node48(n) => n.index.iter().position(|&slot| slot != 0)? as u8,
            Children::Node256(n) => n.slots.iter().position(Option::is_some)? as u8,
        };
        self.remove(byte).map(|node| (byte, node))
    }

    /// Children in ascending byte order
    fn ordered(&self) -> Box<dyn Iterator<Item = &Node<V>> + '_> {
        match self {
            Children::Node4(n) | Children::Node16(n) => Box::new(n.nodes.iter()),
            Children::Node48(n) => Box::new(n.index.iter().filter_map(move |&slot| {
                if slot == 0 {
                    None
                } else {
                    n.slots[slot as usize - 1].as_ref()
                }
            })),
            Children::Node256(n) => Box::new(n.slots.iter().filter_map(Option::as_ref)),
        }
    }

    fn grow(&mut self) {
        let old = mem::replace(self, Children::Node4(Sparse::with_capacity(0)));
        *self = match old {
            Children::Node4(mut n) => {
                n.keys.reserve(NODE16_CAPACITY - n.keys.len());
                n.nodes.reserve(NODE16_CAPACITY - n.nodes.len());
                Children::Node16(n)
            }
            Children::Node16(n) => {
                let mut grown = Indirect::new();
                for (byte, node) in n.keys.into_iter().zip(n.nodes) {
                    grown.insert(byte, node);
                }
                Children::Node48(grown)
            }
            Children::Node48(mut n) => {
                let mut grown = Direct::new();
                for byte in 0..256usize {
                    let slot = n.index[byte];
                    if slot != 0 {
                        grown.slots[byte] = n.slots[slot as usize - 1].take();
                        grown.len += 1;
                    }
                }
                Children::Node256(grown)
            }
            full @ Children::Node256(_) => full,
        };
    }

    fn shrink(&mut self) {
        let len = self.len();
        let should_shrink = match self {
            Children::Node4(_) => false,
            Children::Node16(_) => len <= NODE16_SHRINK,
            Children::Node48(_) => len <= NODE48_SHRINK,
            Children::Node256(_) => len <= NODE256_SHRINK,
        };
        if !should_shrink {
            return;
        }

        let old = mem::replace(self, Children::Node4(Sparse::with_capacity(0)));
        *self = match old {
            Children::Node16(n) => Children::Node4(n),
            Children::Node48(mut n) => {
                let mut shrunk = Sparse::with_capacity(NODE16_CAPACITY);
                for byte in 0..256usize {
                    let slot = n.index[byte];
                    if slot != 0 {
                        if let Some(node) = n.slots[slot as usize - 1].take() {
                            shrunk.keys.push(byte as u8);
                            shrunk.nodes.push(node);
                        }
                    }
                }
                Children::Node16(shrunk)
            }
            Children::Node256(n) => {
                let mut shrunk = Indirect::new();
                for (byte, slot) in n.slots.into_iter().enumerate() {
                    if let Some(node) = slot {
                        shrunk.insert(byte as u8, node);
                    }
                }
                Children::Node48(shrunk)
            }
            small @ Children::Node4(_) => small,
        };
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl<V> AdaptiveRadixTree<V> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or overwrite; returns the previous value
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let previous = match self.root.as_mut() {
            None => {
                self.root = Some(Node::Leaf(Leaf::boxed(key, value)));
                None
            }
            Some(root) => Self::insert_at(root, key, 0, value),
        };
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn insert_at(node: &mut Node<V>, key: &[u8], depth: usize, value: V) -> Option<V> {
        match node {
            Node::Leaf(leaf) => {
                if leaf.key.as_slice() == key {
                    return Some(mem::replace(&mut leaf.value, value));
                }

                // Two distinct keys now share this spot: split into an inner node
                let split = depth + common_prefix_len(&leaf.key[depth..], &key[depth..]);
                let mut inner = Inner::new(key[depth..split].to_vec());
                inner.attach_leaf(Leaf::boxed(key, value), split);

                let old = mem::replace(node, Node::Inner(Box::new(inner)));
                if let (Node::Inner(inner), Node::Leaf(old_leaf)) = (&mut *node, old) {
                    inner.attach_leaf(old_leaf, split);
                }
                None
            }
            Node::Inner(inner) => {
                let matched = common_prefix_len(&inner.prefix, &key[depth..]);

                if matched < inner.prefix.len() {
                    // Key diverges inside the compressed path: cut it
                    let edge = inner.prefix[matched];
                    let mut parent = Inner::new(inner.prefix[..matched].to_vec());
                    inner.prefix.drain(..=matched);
                    parent.attach_leaf(Leaf::boxed(key, value), depth + matched);

                    let old = mem::replace(node, Node::Inner(Box::new(parent)));
                    if let Node::Inner(parent) = node {
                        parent.children.add(edge, old);
                    }
                    return None;
                }

                let depth = depth + inner.prefix.len();
                if key.len() == depth {
                    return match inner.terminal.as_mut() {
                        Some(leaf) => Some(mem::replace(&mut leaf.value, value)),
                        None => {
                            inner.terminal = Some(Leaf::boxed(key, value));
                            None
                        }
                    };
                }

                let byte = key[depth];
                if let Some(child) = inner.children.find_mut(byte) {
                    return Self::insert_at(child, key, depth + 1, value);
                }
                inner.children.add(byte, Node::Leaf(Leaf::boxed(key, value)));
                None
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;

        loop {
            match node {
                Node::Leaf(leaf) => {
                    return (leaf.key.as_slice() == key).then_some(&leaf.value);
                }
                Node::Inner(inner) => {
                    if !key[depth..].starts_with(&inner.prefix) {
                        return None;
                    }
                    depth += inner.prefix.len();
                    if depth == key.len() {
                        return inner.terminal.as_ref().map(|leaf| &leaf.value);
                    }
                    node = inner.children.find(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    /// Remove `key`; returns its value if it was present
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let root = self.root.as_mut()?;
        let removed = if let Node::Leaf(leaf) = root {
            if leaf.key.as_slice() != key {
                return None;
            }
            match self.root.take() {
                Some(Node::Leaf(leaf)) => Some(leaf.value),
                _ => None,
            }
        } else {
            Self::remove_at(root, key, 0)
        };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_at(node: &mut Node<V>, key: &[u8], depth: usize) -> Option<V> {
        let Node::Inner(inner) = node else {
            return None;
        };
        if !key[depth..].starts_with(&inner.prefix) {
            return None;
        }
        let depth = depth + inner.prefix.len();

        let removed = if key.len() == depth {
            inner.terminal.take().map(|leaf| leaf.value)
        } else {
            let byte = key[depth];
            let leaf_matches = match inner.children.find(byte)? {
                Node::Leaf(leaf) => Some(leaf.key.as_slice() == key),
                Node::Inner(_) => None,
            };
            match leaf_matches {
                Some(false) => return None,
                Some(true) => match inner.children.remove(byte) {
                    Some(Node::Leaf(leaf)) => Some(leaf.value),
                    _ => None,
                },
                None => Self::remove_at(inner.children.find_mut(byte)?, key, depth + 1),
            }
        };

        if removed.is_some() {
            Self::compact(node);
        }
        removed
    }

    /// Restore the invariant that an inner node has at least two entries
    /// (children plus terminal)
    fn compact(node: &mut Node<V>) {
        let Node::Inner(inner) = node else {
            return;
        };

        match (inner.children.len(), inner.terminal.is_some()) {
            (0, true) => {
                if let Some(leaf) = inner.terminal.take() {
                    *node = Node::Leaf(leaf);
                }
            }
            (1, false) => {
                if let Some((byte, child)) = inner.children.pop_only() {
                    let merged = match child {
                        leaf @ Node::Leaf(_) => leaf,
                        Node::Inner(mut grand) => {
                            let mut prefix = mem::take(&mut inner.prefix);
                            prefix.push(byte);
                            prefix.extend_from_slice(&grand.prefix);
                            grand.prefix = prefix;
                            Node::Inner(grand)
                        }
                    };
                    *node = merged;
                }
            }
            _ => {}
        }
    }

    /// Visit entries in ascending key order until `f` returns false
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        if let Some(root) = &self.root {
            Self::walk(root, &mut f);
        }
    }

    fn walk<F>(node: &Node<V>, f: &mut F) -> bool
    where
        F: FnMut(&[u8], &V) -> bool,
    {
        match node {
            Node::Leaf(leaf) => f(&leaf.key, &leaf.value),
            Node::Inner(inner) => {
                if let Some(leaf) = &inner.terminal {
                    if !f(&leaf.key, &leaf.value) {
                        return false;
                    }
                }
                for child in inner.children.ordered() {
                    if !Self::walk(child, f) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

impl<V> Default for AdaptiveRadixTree<V> {
    fn default() -> Self {
        Self::new()
    }
}
