//! Responsibility arithmetic for the superpeer ring.
//!
//! A superpeer is primary for every creator between its predecessor and
//! itself, and stores backups for the areas of its three predecessors. The
//! helpers here derive both from a sorted superpeer list.

use crate::node::NodeId;

/// Number of backup superpeers each superpeer replicates to.
pub const BACKUP_SUPERPEERS: usize = 3;

/// Responsible area `(start, end)` of `node` (open interval).
///
/// With more than three other superpeers the area starts at the superpeer three
/// positions before `predecessor`, otherwise the node is responsible for the
/// whole ring and `(node, node)` is returned.
///
/// # Arguments
/// * `node` - Superpeer whose area is computed
/// * `predecessor` - Its current predecessor
/// * `superpeers` - Sorted list of the other superpeers
///
/// # Example
/// ```rust
/// use corelib::node::NodeId;
/// use corelib::ring::responsible_area;
///
/// let others: Vec<NodeId> = [10, 20, 30, 40, 50].into_iter().map(NodeId).collect();
/// // predecessor 50 -> three before it is 20
/// assert_eq!(responsible_area(NodeId(60), Some(NodeId(50)), &others), (NodeId(20), NodeId(60)));
/// ```
pub fn responsible_area(
    node: NodeId,
    predecessor: Option<NodeId>,
    superpeers: &[NodeId],
) -> (NodeId, NodeId) {
    let size = superpeers.len();
    let predecessor = match predecessor {
        Some(p) if size > BACKUP_SUPERPEERS => p,
        _ => return (node, node),
    };
    let index = match superpeers.binary_search(&predecessor) {
        Ok(i) | Err(i) => i,
    };
    let start = if index >= BACKUP_SUPERPEERS {
        index - BACKUP_SUPERPEERS
    } else {
        size - (BACKUP_SUPERPEERS - index)
    };
    (superpeers[start], node)
}

/// Superpeer responsible for `key`: the first superpeer `>= key`, wrapping.
///
/// Returns `None` when no superpeer is known.
pub fn responsible_superpeer(key: NodeId, superpeers: &[NodeId]) -> Option<NodeId> {
    if superpeers.is_empty() {
        return None;
    }
    let index = match superpeers.binary_search(&key) {
        Ok(i) => i,
        Err(i) if i == superpeers.len() => 0,
        Err(i) => i,
    };
    Some(superpeers[index])
}

/// Up to three superpeers strictly after `node`, walking clockwise.
pub fn backup_superpeers(node: NodeId, superpeers: &[NodeId]) -> Vec<NodeId> {
    if superpeers.is_empty() {
        return Vec::new();
    }
    let count = superpeers.len().min(BACKUP_SUPERPEERS);
    let mut index = match superpeers.binary_search(&node) {
        Ok(i) => i + 1,
        Err(i) => i,
    };
    let mut backups = Vec::with_capacity(count);
    for _ in 0..count {
        if index == superpeers.len() {
            index = 0;
        }
        backups.push(superpeers[index]);
        index += 1;
    }
    backups
}
