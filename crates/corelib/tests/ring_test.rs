//! Tests for the superpeer ring arithmetic.
//!
//! # Test Strategy
//!
//! 1. **Intervals**: closed, upper-closed and open ranges with wraparound
//! 2. **Responsibility**: every key has exactly one primary superpeer
//! 3. **Membership**: sorted lists under random inserts and removals (proptest)
//! 4. **Backups**: placement on small and large rings

use corelib::hash::nameservice_position;
use corelib::node::NodeId;
use corelib::ring::{
    backup_superpeers, contains_sorted, insert_sorted, is_hash_in_superpeer_range, is_node_in_range,
    predecessor_in, remove_sorted, responsible_area, responsible_superpeer, successor_in, IntervalKind,
};
use proptest::prelude::*;

fn ids(raw: &[u16]) -> Vec<NodeId> {
    raw.iter().copied().map(NodeId).collect()
}

// ============================================================================
// Interval Tests
// ============================================================================

#[test]
fn test_interval_kinds() {
    let n = NodeId;
    assert!(is_node_in_range(n(4), n(2), n(6), IntervalKind::Closed));
    assert!(!is_node_in_range(n(7), n(2), n(6), IntervalKind::Closed));
    assert!(is_node_in_range(n(1), n(6), n(2), IntervalKind::Closed), "closed range should wrap");
    assert!(is_node_in_range(n(6), n(2), n(6), IntervalKind::UpperClosed));
    assert!(!is_node_in_range(n(2), n(2), n(6), IntervalKind::UpperClosed));
    assert!(!is_node_in_range(n(6), n(2), n(6), IntervalKind::Open));
    assert!(is_node_in_range(n(0xFFFF), n(0xF000), n(0x0010), IntervalKind::Open));
}

// ============================================================================
// Responsibility Tests
// ============================================================================

#[test]
fn test_every_key_has_one_primary() {
    let ring = ids(&[0x1000, 0x4000, 0x9000, 0xE000]);
    for key in (0..=u16::MAX).step_by(97) {
        let key = NodeId(key);
        let primary = responsible_superpeer(key, &ring).unwrap();
        let owners: Vec<NodeId> = ring
            .iter()
            .copied()
            .filter(|sp| {
                let predecessor = predecessor_in(&ring, *sp).unwrap();
                is_node_in_range(key, predecessor, *sp, IntervalKind::UpperClosed)
            })
            .collect();
        assert_eq!(owners, vec![primary], "key {} should have exactly one primary", key);
    }
}

#[test]
fn test_nameservice_areas_partition_the_ring() {
    let ring = ids(&[0x1000, 0x4000, 0x9000, 0xE000]);
    for id in 0..500 {
        let hash = nameservice_position(id).0;
        let holders = ring
            .iter()
            .filter(|sp| {
                let predecessor = predecessor_in(&ring, **sp);
                is_hash_in_superpeer_range(hash, predecessor, Some(**sp))
            })
            .count();
        assert_eq!(holders, 1, "id {} should be placed on exactly one superpeer", id);
    }
}

#[test]
fn test_responsible_area_covers_backups() {
    let others = ids(&[0x1000, 0x2000, 0x3000, 0x4000, 0x5000]);
    let me = NodeId(0x6000);
    let (start, end) = responsible_area(me, Some(NodeId(0x5000)), &others);
    assert_eq!((start, end), (NodeId(0x2000), me));

    // Every superpeer that lists `me` as a backup lies in the area.
    let mut ring = others.clone();
    insert_sorted(&mut ring, me);
    for sp in &others {
        let rest: Vec<NodeId> = ring.iter().copied().filter(|n| n != sp).collect();
        if backup_superpeers(*sp, &rest).contains(&me) {
            assert!(
                is_node_in_range(*sp, start, end, IntervalKind::UpperClosed),
                "{} backs up to {} but lies outside its area",
                sp,
                me
            );
        }
    }
}

// ============================================================================
// Membership Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_sorted_membership(ops in prop::collection::vec((any::<bool>(), any::<u16>()), 0..200)) {
        let mut list: Vec<NodeId> = Vec::new();
        let mut model = std::collections::BTreeSet::new();
        for (insert, raw) in ops {
            let node = NodeId(raw);
            if insert {
                prop_assert_eq!(insert_sorted(&mut list, node), model.insert(node));
            } else {
                prop_assert_eq!(remove_sorted(&mut list, node).is_some(), model.remove(&node));
            }
        }
        prop_assert!(list.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(list.clone(), model.iter().copied().collect::<Vec<_>>());
        for node in &list {
            prop_assert!(contains_sorted(&list, *node));
            let next = successor_in(&list, *node).unwrap();
            prop_assert_eq!(predecessor_in(&list, next), Some(*node));
        }
    }
}

// ============================================================================
// Backup Placement Tests
// ============================================================================

#[test]
fn test_backup_placement() {
    let ring = ids(&[0x1000, 0x2000, 0x3000, 0x4000, 0x5000]);
    assert_eq!(backup_superpeers(NodeId(0x4000), &ring), ids(&[0x5000, 0x1000, 0x2000]));
    assert_eq!(backup_superpeers(NodeId(0x1000), &ids(&[0x2000])), ids(&[0x2000]));
    assert!(backup_superpeers(NodeId(0x1000), &[]).is_empty());
}
