//! A binary trie keyed on address bits, for CIDR prefix lookup.
//!
//! Spec lists a "trie for CIDR lookup" among the supporting primitives even
//! though its usual consumer, service classification, is out of scope. It is
//! included here as a standalone, address-family-generic primitive: insert a
//! `(prefix, prefix_len, value)` and look up the longest matching prefix for
//! an address.

struct Node<V> {
    children: [Option<Box<Node<V>>>; 2],
    value: Option<V>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self {
            children: [None, None],
            value: None,
        }
    }
}

/// A longest-prefix-match trie over big-endian address bytes.
pub struct CidrTrie<V> {
    root: Node<V>,
}

impl<V> Default for CidrTrie<V> {
    fn default() -> Self {
        Self { root: Node::default() }
    }
}

impl<V> CidrTrie<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under the prefix formed by the first `prefix_len` bits
    /// of `address`.
    pub fn insert(&mut self, address: &[u8], prefix_len: usize, value: V) {
        let mut node = &mut self.root;
        for bit in bits(address).take(prefix_len) {
            node = node.children[bit as usize].get_or_insert_with(Default::default);
        }
        node.value = Some(value);
    }

    /// Returns the value of the longest stored prefix that matches `address`.
    pub fn longest_match(&self, address: &[u8]) -> Option<&V> {
        let mut node = &self.root;
        let mut best = node.value.as_ref();
        for bit in bits(address) {
            match &node.children[bit as usize] {
                Some(child) => {
                    node = child;
                    if node.value.is_some() {
                        best = node.value.as_ref();
                    }
                }
                None => break,
            }
        }
        best
    }
}

fn bits(address: &[u8]) -> impl Iterator<Item = u8> + '_ {
    address
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1))
}
