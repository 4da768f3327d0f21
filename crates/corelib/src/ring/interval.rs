//! Circular interval tests on the 16-bit ring.
//!
//! All superpeer responsibility decisions reduce to "is this id between those
//! two ids, walking clockwise". When `start >= end` the interval is the long
//! arc through the wrap point, so `start == end` covers the whole ring for
//! closed and upper-closed intervals and everything but `start` for open ones.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Which bounds of an interval are included.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum IntervalKind {
    /// `[start, end]`
    Closed,
    /// `(start, end]`
    UpperClosed,
    /// `(start, end)`
    Open,
}

/// Check whether `node` lies in the circular interval from `start` to `end`.
///
/// # Arguments
/// * `node` - Id to test (a NodeId or a CRC16 placement)
/// * `start` - First bound, walking clockwise
/// * `end` - Second bound
/// * `kind` - Which bounds are included
///
/// # Example
/// ```rust
/// use corelib::node::NodeId;
/// use corelib::ring::{is_node_in_range, IntervalKind};
///
/// // start = 6, end = 2 covers 6, 7, 0, 1, 2
/// assert!(is_node_in_range(NodeId(1), NodeId(6), NodeId(2), IntervalKind::Closed));
/// assert!(!is_node_in_range(NodeId(4), NodeId(6), NodeId(2), IntervalKind::Closed));
/// ```
pub fn is_node_in_range(node: NodeId, start: NodeId, end: NodeId, kind: IntervalKind) -> bool {
    let (n, s, e) = (node.0, start.0, end.0);
    match kind {
        IntervalKind::Closed => {
            if s < e {
                n >= s && n <= e
            } else {
                n >= s || n <= e
            }
        }
        IntervalKind::UpperClosed => {
            if s < e {
                n > s && n <= e
            } else {
                n > s || n <= e
            }
        }
        IntervalKind::Open => {
            if s < e {
                n > s && n < e
            } else {
                n > s || n < e
            }
        }
    }
}

/// Upper-closed membership of a peer in the area `(first, last]` of a superpeer.
///
/// A missing bound or `first == last` (single superpeer) matches everything.
pub fn is_peer_in_superpeer_range(peer: NodeId, first: Option<NodeId>, last: Option<NodeId>) -> bool {
    is_id_in_superpeer_range(peer.0, first, last)
}

/// Upper-closed membership of a CRC16 placement in the area `(first, last]`.
pub fn is_hash_in_superpeer_range(hash: u16, first: Option<NodeId>, last: Option<NodeId>) -> bool {
    is_id_in_superpeer_range(hash, first, last)
}

fn is_id_in_superpeer_range(id: u16, first: Option<NodeId>, last: Option<NodeId>) -> bool {
    match (first, last) {
        (Some(first), Some(last)) if first != last => {
            is_node_in_range(NodeId(id), first, last, IntervalKind::UpperClosed)
        }
        _ => true,
    }
}

/// Open membership of a superpeer strictly between `start` and `end`.
///
/// With a missing bound or `start == end` every node except the bounds matches.
pub fn is_superpeer_in_range(node: NodeId, start: Option<NodeId>, end: Option<NodeId>) -> bool {
    match (start, end) {
        (Some(s), Some(e)) if s != e => is_node_in_range(node, s, e, IntervalKind::Open),
        _ => Some(node) != start && Some(node) != end,
    }
}

/// True while the number of known superpeers still equals the configured one.
#[inline]
pub fn is_overlay_stable(initial_superpeers: usize, current_superpeers: usize) -> bool {
    initial_superpeers == current_superpeers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: u16) -> NodeId {
        NodeId(v)
    }

    #[test]
    fn test_closed_interval() {
        assert!(is_node_in_range(n(4), n(2), n(6), IntervalKind::Closed));
        assert!(is_node_in_range(n(2), n(2), n(6), IntervalKind::Closed));
        assert!(is_node_in_range(n(6), n(2), n(6), IntervalKind::Closed));
        assert!(!is_node_in_range(n(7), n(2), n(6), IntervalKind::Closed));
        assert!(is_node_in_range(n(1), n(6), n(2), IntervalKind::Closed));
        assert!(!is_node_in_range(n(4), n(6), n(2), IntervalKind::Closed));
    }

    #[test]
    fn test_upper_closed_interval() {
        assert!(is_node_in_range(n(6), n(2), n(6), IntervalKind::UpperClosed));
        assert!(!is_node_in_range(n(2), n(2), n(6), IntervalKind::UpperClosed));
        assert!(is_node_in_range(n(0), n(6), n(2), IntervalKind::UpperClosed));
        assert!(!is_node_in_range(n(6), n(6), n(2), IntervalKind::UpperClosed));
    }

    #[test]
    fn test_open_interval() {
        assert!(is_node_in_range(n(3), n(2), n(6), IntervalKind::Open));
        assert!(!is_node_in_range(n(2), n(2), n(6), IntervalKind::Open));
        assert!(!is_node_in_range(n(6), n(2), n(6), IntervalKind::Open));
        assert!(is_node_in_range(n(7), n(6), n(2), IntervalKind::Open));
        assert!(!is_node_in_range(n(2), n(6), n(2), IntervalKind::Open));
    }

    #[test]
    fn test_degenerate_interval_covers_ring() {
        for v in [0u16, 5, 0x8000, 0xFFFF] {
            assert!(is_node_in_range(n(v), n(5), n(5), IntervalKind::Closed));
            assert!(is_node_in_range(n(v), n(5), n(5), IntervalKind::UpperClosed));
        }
        assert!(!is_node_in_range(n(5), n(5), n(5), IntervalKind::Open));
        assert!(is_node_in_range(n(6), n(5), n(5), IntervalKind::Open));
    }

    #[test]
    fn test_superpeer_range_helpers() {
        assert!(is_peer_in_superpeer_range(n(3), None, Some(n(9))));
        assert!(is_peer_in_superpeer_range(n(3), Some(n(9)), Some(n(9))));
        assert!(is_peer_in_superpeer_range(n(9), Some(n(2)), Some(n(9))));
        assert!(!is_peer_in_superpeer_range(n(2), Some(n(2)), Some(n(9))));
        assert!(is_hash_in_superpeer_range(0xFFF0, Some(n(0xF000)), Some(n(0x0010))));

        assert!(is_superpeer_in_range(n(4), Some(n(2)), Some(n(6))));
        assert!(!is_superpeer_in_range(n(6), Some(n(2)), Some(n(6))));
        assert!(is_superpeer_in_range(n(4), Some(n(2)), Some(n(2))));
        assert!(!is_superpeer_in_range(n(2), Some(n(2)), None));
    }
}
