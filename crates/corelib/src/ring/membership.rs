//! Sorted membership lists.
//!
//! Superpeers keep both the superpeer list and their assigned-peer list sorted
//! by `NodeId` so that ring successor queries are binary searches.

use crate::node::NodeId;

/// Insert `node` into the sorted list if it is not already present.
///
/// # Returns
/// `true` if the list changed
pub fn insert_sorted(list: &mut Vec<NodeId>, node: NodeId) -> bool {
    match list.binary_search(&node) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, node);
            true
        }
    }
}

/// Remove `node` from the sorted list.
///
/// # Returns
/// The index the node occupied, `None` if it was not present
pub fn remove_sorted(list: &mut Vec<NodeId>, node: NodeId) -> Option<usize> {
    match list.binary_search(&node) {
        Ok(pos) => {
            list.remove(pos);
            Some(pos)
        }
        Err(_) => None,
    }
}

/// Binary search membership test.
#[inline]
pub fn contains_sorted(list: &[NodeId], node: NodeId) -> bool {
    list.binary_search(&node).is_ok()
}

/// Element preceding `node`'s position in the circular list.
///
/// `node` does not need to be a member; the predecessor of a gap is the element
/// just before the insertion point, wrapping to the last element.
pub fn predecessor_in(list: &[NodeId], node: NodeId) -> Option<NodeId> {
    if list.is_empty() {
        return None;
    }
    let idx = match list.binary_search(&node) {
        Ok(pos) | Err(pos) => pos,
    };
    let idx = if idx == 0 { list.len() - 1 } else { idx - 1 };
    Some(list[idx])
}

/// Element following `node` in the circular list, strictly after it.
pub fn successor_in(list: &[NodeId], node: NodeId) -> Option<NodeId> {
    if list.is_empty() {
        return None;
    }
    let idx = match list.binary_search(&node) {
        Ok(pos) => pos + 1,
        Err(pos) => pos,
    };
    Some(list[idx % list.len()])
}
