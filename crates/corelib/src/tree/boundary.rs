//! Arena-backed B-tree mapping LocalID boundaries to owners.
//!
//! Nodes live in a flat vector and reference their children by index; freed
//! nodes are recycled through a free list. Every node except the root holds
//! between `order` and `2 * order` keys. Operations are top-down, so no parent
//! links are stored.
//!
//! # Performance
//!
//! - **Point queries** (`get`, `ceiling`, `successor`, `predecessor`): O(log n)
//! - **Insert / remove**: O(order * log n)
//! - **Space**: O(n) where n = number of stored boundaries

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Node {
    keys: Vec<u64>,
    vals: Vec<NodeId>,
    children: Vec<usize>,
}

impl Node {
    fn leaf(key: u64, val: NodeId) -> Self {
        Self {
            keys: vec![key],
            vals: vec![val],
            children: Vec::new(),
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Ordered map `u64 -> NodeId` stored as a B-tree of configurable order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundaryTree {
    order: usize,
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Option<usize>,
    len: usize,
}

type Split = (u64, NodeId, usize);

impl BoundaryTree {
    /// Create an empty tree.
    ///
    /// # Arguments
    /// * `order` - Minimum number of keys per non-root node (clamped to at least 1);
    ///   nodes split above `2 * order` keys
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(1),
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// Order the tree was built with.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn max_keys(&self) -> usize {
        2 * self.order
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.nodes[idx] = Node::default();
        self.free.push(idx);
    }

    /// Value stored at exactly `key`.
    pub fn get(&self, key: u64) -> Option<NodeId> {
        let mut idx = self.root?;
        loop {
            let node = &self.nodes[idx];
            match node.keys.binary_search(&key) {
                Ok(i) => return Some(node.vals[i]),
                Err(i) => {
                    if node.is_leaf() {
                        return None;
                    }
                    idx = node.children[i];
                }
            }
        }
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Smallest entry with key `>= key`.
    pub fn ceiling(&self, key: u64) -> Option<(u64, NodeId)> {
        self.descend(|keys| keys.partition_point(|k| *k < key), true)
    }

    /// Smallest entry with key `> key`.
    pub fn successor(&self, key: u64) -> Option<(u64, NodeId)> {
        self.descend(|keys| keys.partition_point(|k| *k <= key), true)
    }

    /// Greatest entry with key `< key`.
    pub fn predecessor(&self, key: u64) -> Option<(u64, NodeId)> {
        self.descend(|keys| keys.partition_point(|k| *k < key), false)
    }

    /// Shared walk for the neighbour queries.
    ///
    /// `position` yields the child slot to descend into; the candidate is the
    /// key right of that slot (upward search) or left of it (downward search).
    /// Deeper candidates are always tighter than shallower ones.
    fn descend<F>(&self, position: F, upward: bool) -> Option<(u64, NodeId)>
    where
        F: Fn(&[u64]) -> usize,
    {
        let mut idx = self.root?;
        let mut best = None;
        loop {
            let node = &self.nodes[idx];
            let i = position(&node.keys);
            if upward {
                if i < node.keys.len() {
                    best = Some((node.keys[i], node.vals[i]));
                }
            } else if i > 0 {
                best = Some((node.keys[i - 1], node.vals[i - 1]));
            }
            if node.is_leaf() {
                return best;
            }
            idx = node.children[i];
        }
    }

    /// Smallest entry.
    pub fn first(&self) -> Option<(u64, NodeId)> {
        let mut idx = self.root?;
        while !self.nodes[idx].is_leaf() {
            idx = self.nodes[idx].children[0];
        }
        let node = &self.nodes[idx];
        Some((node.keys[0], node.vals[0]))
    }

    /// Greatest entry.
    pub fn last(&self) -> Option<(u64, NodeId)> {
        let mut idx = self.root?;
        while !self.nodes[idx].is_leaf() {
            let node = &self.nodes[idx];
            idx = node.children[node.children.len() - 1];
        }
        let node = &self.nodes[idx];
        let last = node.keys.len() - 1;
        Some((node.keys[last], node.vals[last]))
    }

    /// Keys in `[start, end)`, ascending.
    pub fn keys_in(&self, start: u64, end: u64) -> Vec<u64> {
        let mut keys = Vec::new();
        let mut cursor = self.ceiling(start);
        while let Some((key, _)) = cursor {
            if key >= end {
                break;
            }
            keys.push(key);
            cursor = self.successor(key);
        }
        keys
    }

    /// All entries in key order.
    pub fn entries(&self) -> Vec<(u64, NodeId)> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = self.root {
            self.collect(root, &mut out);
        }
        out
    }

    fn collect(&self, idx: usize, out: &mut Vec<(u64, NodeId)>) {
        let node = &self.nodes[idx];
        for i in 0..node.keys.len() {
            if !node.is_leaf() {
                self.collect(node.children[i], out);
            }
            out.push((node.keys[i], node.vals[i]));
        }
        if !node.is_leaf() {
            self.collect(node.children[node.keys.len()], out);
        }
    }

    /// Insert or replace the value at `key`.
    ///
    /// # Returns
    /// The previous value if the key was already present
    pub fn insert(&mut self, key: u64, val: NodeId) -> Option<NodeId> {
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.alloc(Node::leaf(key, val));
                self.root = Some(root);
                self.len = 1;
                return None;
            }
        };

        let (old, split) = self.insert_into(root, key, val);
        if let Some((up_key, up_val, right)) = split {
            let new_root = self.alloc(Node {
                keys: vec![up_key],
                vals: vec![up_val],
                children: vec![root, right],
            });
            self.root = Some(new_root);
        }
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn insert_into(&mut self, idx: usize, key: u64, val: NodeId) -> (Option<NodeId>, Option<Split>) {
        let pos = match self.nodes[idx].keys.binary_search(&key) {
            Ok(i) => {
                let old = std::mem::replace(&mut self.nodes[idx].vals[i], val);
                return (Some(old), None);
            }
            Err(i) => i,
        };

        if self.nodes[idx].is_leaf() {
            let node = &mut self.nodes[idx];
            node.keys.insert(pos, key);
            node.vals.insert(pos, val);
        } else {
            let child = self.nodes[idx].children[pos];
            match self.insert_into(child, key, val) {
                (old, None) => return (old, None),
                (_, Some((up_key, up_val, right))) => {
                    let node = &mut self.nodes[idx];
                    node.keys.insert(pos, up_key);
                    node.vals.insert(pos, up_val);
                    node.children.insert(pos + 1, right);
                }
            }
        }

        if self.nodes[idx].keys.len() > self.max_keys() {
            (None, Some(self.split(idx)))
        } else {
            (None, None)
        }
    }

    /// Split an overfull node around its middle key.
    fn split(&mut self, idx: usize) -> Split {
        let mid = self.order;
        let node = &mut self.nodes[idx];
        let right_keys = node.keys.split_off(mid + 1);
        let right_vals = node.vals.split_off(mid + 1);
        let up_key = node.keys.remove(mid);
        let up_val = node.vals.remove(mid);
        let right_children = if node.is_leaf() {
            Vec::new()
        } else {
            node.children.split_off(mid + 1)
        };
        let right = self.alloc(Node {
            keys: right_keys,
            vals: right_vals,
            children: right_children,
        });
        (up_key, up_val, right)
    }

    /// Remove `key`.
    ///
    /// # Returns
    /// The removed value, `None` if the key was not present
    pub fn remove(&mut self, key: u64) -> Option<NodeId> {
        let root = self.root?;
        let removed = self.remove_from(root, key);
        if removed.is_some() {
            self.len -= 1;
            if self.nodes[root].keys.is_empty() {
                self.root = if self.nodes[root].is_leaf() {
                    None
                } else {
                    Some(self.nodes[root].children[0])
                };
                self.release(root);
            }
        }
        removed
    }

    fn remove_from(&mut self, idx: usize, key: u64) -> Option<NodeId> {
        match self.nodes[idx].keys.binary_search(&key) {
            Ok(i) if self.nodes[idx].is_leaf() => {
                let node = &mut self.nodes[idx];
                node.keys.remove(i);
                Some(node.vals.remove(i))
            }
            Ok(i) => {
                // Replace with the in-order predecessor from the left subtree.
                let child = self.nodes[idx].children[i];
                let (pred_key, pred_val) = self.remove_max(child);
                let node = &mut self.nodes[idx];
                node.keys[i] = pred_key;
                let old = std::mem::replace(&mut node.vals[i], pred_val);
                self.rebalance(idx, i);
                Some(old)
            }
            Err(_) if self.nodes[idx].is_leaf() => None,
            Err(i) => {
                let child = self.nodes[idx].children[i];
                let removed = self.remove_from(child, key);
                if removed.is_some() {
                    self.rebalance(idx, i);
                }
                removed
            }
        }
    }

    fn remove_max(&mut self, idx: usize) -> (u64, NodeId) {
        if self.nodes[idx].is_leaf() {
            let node = &mut self.nodes[idx];
            let last = node.keys.len() - 1;
            (node.keys.remove(last), node.vals.remove(last))
        } else {
            let last = self.nodes[idx].children.len() - 1;
            let child = self.nodes[idx].children[last];
            let max = self.remove_max(child);
            self.rebalance(idx, last);
            max
        }
    }

    /// Restore the minimum fill of child `i` of `parent`.
    fn rebalance(&mut self, parent: usize, i: usize) {
        let child = self.nodes[parent].children[i];
        if self.nodes[child].keys.len() >= self.order {
            return;
        }
        let siblings = self.nodes[parent].children.len();

        if i > 0 {
            let left = self.nodes[parent].children[i - 1];
            if self.nodes[left].keys.len() > self.order {
                self.borrow_from_left(parent, i);
                return;
            }
        }
        if i + 1 < siblings {
            let right = self.nodes[parent].children[i + 1];
            if self.nodes[right].keys.len() > self.order {
                self.borrow_from_right(parent, i);
                return;
            }
        }
        if i > 0 {
            self.merge(parent, i - 1);
        } else if i + 1 < siblings {
            self.merge(parent, i);
        }
    }

    fn borrow_from_left(&mut self, parent: usize, i: usize) {
        let left = self.nodes[parent].children[i - 1];
        let child = self.nodes[parent].children[i];

        let l = &mut self.nodes[left];
        let last = l.keys.len() - 1;
        let (key, val) = (l.keys.remove(last), l.vals.remove(last));
        let moved_child = if l.is_leaf() {
            None
        } else {
            let last = l.children.len() - 1;
            Some(l.children.remove(last))
        };

        let p = &mut self.nodes[parent];
        let sep_key = std::mem::replace(&mut p.keys[i - 1], key);
        let sep_val = std::mem::replace(&mut p.vals[i - 1], val);

        let c = &mut self.nodes[child];
        c.keys.insert(0, sep_key);
        c.vals.insert(0, sep_val);
        if let Some(moved) = moved_child {
            c.children.insert(0, moved);
        }
    }

    fn borrow_from_right(&mut self, parent: usize, i: usize) {
        let right = self.nodes[parent].children[i + 1];
        let child = self.nodes[parent].children[i];

        let r = &mut self.nodes[right];
        let (key, val) = (r.keys.remove(0), r.vals.remove(0));
        let moved_child = if r.is_leaf() {
            None
        } else {
            Some(r.children.remove(0))
        };

        let p = &mut self.nodes[parent];
        let sep_key = std::mem::replace(&mut p.keys[i], key);
        let sep_val = std::mem::replace(&mut p.vals[i], val);

        let c = &mut self.nodes[child];
        c.keys.push(sep_key);
        c.vals.push(sep_val);
        if let Some(moved) = moved_child {
            c.children.push(moved);
        }
    }

    /// Merge child `i + 1` and the separator `i` into child `i`.
    fn merge(&mut self, parent: usize, i: usize) {
        let left = self.nodes[parent].children[i];
        let right = self.nodes[parent].children[i + 1];

        let p = &mut self.nodes[parent];
        let sep_key = p.keys.remove(i);
        let sep_val = p.vals.remove(i);
        p.children.remove(i + 1);

        let r = std::mem::take(&mut self.nodes[right]);
        let l = &mut self.nodes[left];
        l.keys.push(sep_key);
        l.vals.push(sep_val);
        l.keys.extend(r.keys);
        l.vals.extend(r.vals);
        l.children.extend(r.children);
        self.release(right);
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
    }

    /// Check the structural B-tree invariants.
    ///
    /// Verifies key order across the whole tree, per-node fill bounds, child
    /// counts, uniform leaf depth and the cached length.
    pub fn validate(&self) -> Result<(), String> {
        let root = match self.root {
            Some(root) => root,
            None if self.len == 0 => return Ok(()),
            None => return Err(format!("empty tree reports {} entries", self.len)),
        };
        let mut leaf_depth = None;
        let mut count = 0;
        self.validate_node(root, true, None, None, 0, &mut leaf_depth, &mut count)?;
        if count != self.len {
            return Err(format!("counted {} entries, len is {}", count, self.len));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_node(
        &self,
        idx: usize,
        is_root: bool,
        lower: Option<u64>,
        upper: Option<u64>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        count: &mut usize,
    ) -> Result<(), String> {
        let node = &self.nodes[idx];
        let n = node.keys.len();
        if node.vals.len() != n {
            return Err(format!("node {} has {} keys but {} values", idx, n, node.vals.len()));
        }
        if n > self.max_keys() || n == 0 || (!is_root && n < self.order) {
            return Err(format!("node {} holds {} keys", idx, n));
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("node {} keys out of order", idx));
        }
        if lower.map_or(false, |lo| node.keys[0] <= lo) || upper.map_or(false, |hi| node.keys[n - 1] >= hi) {
            return Err(format!("node {} keys escape separator bounds", idx));
        }
        *count += n;

        if node.is_leaf() {
            match *leaf_depth {
                Some(d) if d != depth => return Err(format!("leaf {} at depth {}, expected {}", idx, depth, d)),
                Some(_) => {}
                None => *leaf_depth = Some(depth),
            }
            return Ok(());
        }
        if node.children.len() != n + 1 {
            return Err(format!("node {} has {} keys but {} children", idx, n, node.children.len()));
        }
        for (c, &child) in node.children.iter().enumerate() {
            let lo = if c == 0 { lower } else { Some(node.keys[c - 1]) };
            let hi = if c == n { upper } else { Some(node.keys[c]) };
            self.validate_node(child, false, lo, hi, depth + 1, leaf_depth, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(v: u16) -> NodeId {
        NodeId(v)
    }

    #[test]
    fn test_insert_get_replace() {
        let mut tree = BoundaryTree::new(2);
        assert_eq!(tree.insert(10, owner(1)), None);
        assert_eq!(tree.insert(10, owner(2)), Some(owner(1)));
        assert_eq!(tree.get(10), Some(owner(2)));
        assert_eq!(tree.get(11), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_neighbour_queries() {
        let mut tree = BoundaryTree::new(2);
        for k in (0..100u64).map(|i| i * 10) {
            tree.insert(k, owner(k as u16));
        }
        assert!(tree.validate().is_ok());
        assert_eq!(tree.ceiling(15), Some((20, owner(20))));
        assert_eq!(tree.ceiling(20), Some((20, owner(20))));
        assert_eq!(tree.successor(20), Some((30, owner(30))));
        assert_eq!(tree.predecessor(20), Some((10, owner(10))));
        assert_eq!(tree.predecessor(0), None);
        assert_eq!(tree.ceiling(991), None);
        assert_eq!(tree.first(), Some((0, owner(0))));
        assert_eq!(tree.last(), Some((990, owner(990))));
        assert_eq!(tree.keys_in(25, 60), vec![30, 40, 50]);
    }

    #[test]
    fn test_remove_rebalances() {
        let mut tree = BoundaryTree::new(2);
        for k in 0..200u64 {
            tree.insert(k, owner(1));
        }
        for k in (0..200u64).filter(|k| k % 3 != 0) {
            assert_eq!(tree.remove(k), Some(owner(1)), "key {} should be removable", k);
            assert!(tree.validate().is_ok(), "invariants broken after removing {}", k);
        }
        assert_eq!(tree.len(), 67);
        assert_eq!(tree.remove(1), None);
        for k in (0..200u64).filter(|k| k % 3 == 0) {
            tree.remove(k);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.first(), None);
    }

    #[test]
    fn test_freed_nodes_are_recycled() {
        let mut tree = BoundaryTree::new(2);
        for k in 0..50u64 {
            tree.insert(k, owner(1));
        }
        let allocated = tree.nodes.len();
        for k in 0..50u64 {
            tree.remove(k);
        }
        for k in 0..50u64 {
            tree.insert(k, owner(2));
        }
        assert_eq!(tree.nodes.len(), allocated);
        assert!(tree.validate().is_ok());
    }
}
