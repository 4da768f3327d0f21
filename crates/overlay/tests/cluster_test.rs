//! End-to-end tests of superpeers and peers on an in-process network.
//!
//! # Test Strategy
//!
//! 1. **Membership**: ring formation, join redirection, superpeer failure
//! 2. **Lookup**: range initialization, migration, removal, backup ranges
//! 3. **Nameservice**: insert, get, count, listing
//! 4. **Failures**: peer failure with recovery hand-off, bootstrap failure

mod common;

use common::{Cluster, RecordingRecovery, S1, S2, S3};
use corelib::{ChunkId, LookupResult, NodeId, RangeId};
use overlay::{BootDirectory, ChannelListener, OverlayError, OverlayEvent, OverlayHooks, Peer, Status, Superpeer};
use std::sync::Arc;
use std::time::Duration;

const P: NodeId = NodeId(0x2500);
const P2: NodeId = NodeId(0x2800);

fn cid(creator: NodeId, lid: u64) -> ChunkId {
    ChunkId::new(creator, lid)
}

// ============================================================================
// Membership Tests
// ============================================================================

#[test]
fn test_ring_formation() {
    let cluster = Cluster::ring(&[S1, S2, S3]);

    let s1 = cluster.superpeer(S1);
    assert_eq!(s1.status(), Status::Stable);
    assert_eq!(s1.superpeers(), vec![S2, S3]);
    assert_eq!(s1.predecessor(), Some(S3), "S1 should follow S3 on the ring");
    assert_eq!(s1.successor(), Some(S2));

    let s2 = cluster.superpeer(S2);
    assert_eq!(s2.predecessor(), Some(S1));
    assert_eq!(s2.successor(), Some(S3));

    let s3 = cluster.superpeer(S3);
    assert_eq!(s3.predecessor(), Some(S2));
    assert_eq!(s3.successor(), Some(S1));
}

#[test]
fn test_peer_joins_responsible_superpeer() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);

    assert_eq!(peer.my_superpeer(), Some(S3), "0x2500 lies between S2 and S3");
    assert_eq!(peer.superpeers(), vec![S1, S2, S3]);
    assert_eq!(cluster.superpeer(S3).peers(), vec![P]);
    assert!(cluster.superpeer(S1).peers().is_empty(), "the bootstrap only redirected");
}

#[test]
fn test_lookup_survives_superpeer_failure() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);

    peer.init_range(P, RangeId::Local(1), &[NodeId(0x4000), NodeId(0x5000)])
        .expect("init range");
    for sp in [S1, S2, S3] {
        assert!(
            cluster.superpeer(sp).tree(P).is_some(),
            "tree of P should be stored on {}",
            sp
        );
    }

    match peer.get_lookup_range(cid(P, 50)).expect("lookup before failure") {
        LookupResult::Found { owner, range } => {
            assert_eq!(owner, P);
            assert!(range.contains(50));
        }
        LookupResult::NotFound => panic!("chunk of an initialized range not found"),
    }

    cluster.kill(S3);
    cluster.stabilize_nodes(&[S1, S2]);

    let s1 = cluster.superpeer(S1);
    assert_eq!(s1.superpeers(), vec![S2], "S3 should be removed from S1's list");
    assert_eq!(s1.predecessor(), Some(S2));
    assert_eq!(s1.peers(), vec![P], "S1 should take over the peers of its failed predecessor");
    assert_eq!(cluster.superpeer(S2).successor(), Some(S1));
    assert_eq!(peer.my_superpeer(), Some(S1), "the heartbeat should reassign the peer");

    let result = peer.get_lookup_range(cid(P, 50)).expect("lookup after failure");
    assert_eq!(result.owner(), Some(P));
    assert!(cluster.boot.failed_nodes().contains(&S3));
}

#[test]
fn test_invalid_config_is_rejected() {
    let cluster = Cluster::new(common::test_config(1));
    let mut config = common::test_config(1);
    config.nameservice_load_factor = 0.0;

    let transport = cluster.network.register(S1).expect("register superpeer");
    let superpeer = Superpeer::new(config.clone(), transport, cluster.boot.clone(), OverlayHooks::default());
    assert!(
        matches!(superpeer, Err(OverlayError::Core(corelib::Error::InvalidConfig(_)))),
        "a zero load factor should be rejected"
    );

    let transport = cluster.network.register(P).expect("register peer");
    let peer = Peer::new(config, transport, cluster.boot.clone(), OverlayHooks::default());
    assert!(matches!(peer, Err(OverlayError::Core(corelib::Error::InvalidConfig(_)))));
}

// ============================================================================
// Lookup Tests
// ============================================================================

#[test]
fn test_migrate_and_remove() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);
    cluster.add_peer(P2);
    peer.init_range(P, RangeId::Local(1), &[P2]).expect("init range");

    peer.migrate_range(cid(P, 10), cid(P, 20), P2).expect("migrate range");
    assert_eq!(peer.get_lookup_range(cid(P, 15)).unwrap().owner(), Some(P2));
    assert_eq!(peer.get_lookup_range(cid(P, 9)).unwrap().owner(), Some(P));
    assert_eq!(peer.get_lookup_range(cid(P, 21)).unwrap().owner(), Some(P));

    let backup_tree = cluster.superpeer(S1).tree(P).expect("backup tree on S1");
    assert_eq!(
        backup_tree.get_primary_peer(cid(P, 15)),
        Some(P2),
        "migration should be forwarded to the backups"
    );

    peer.migrate(cid(P, 50), P2).expect("migrate single chunk");
    assert_eq!(peer.get_lookup_range(cid(P, 50)).unwrap().owner(), Some(P2));

    peer.remove_chunk_ids(&[cid(P, 15), cid(P, 50)]).expect("remove");
    assert_eq!(peer.get_lookup_range(cid(P, 15)).unwrap().owner(), Some(P));
    assert_eq!(peer.get_lookup_range(cid(P, 50)).unwrap().owner(), Some(P));
    assert_eq!(
        cluster.superpeer(S2).tree(P).unwrap().get_primary_peer(cid(P, 50)),
        Some(P),
        "removal should reach the backups"
    );
}

#[test]
fn test_migrate_range_rejects_bad_bounds() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);

    let mixed = peer.migrate_range(cid(P, 1), cid(P2, 1), P2);
    assert!(matches!(mixed, Err(OverlayError::Core(corelib::Error::MixedCreators { .. }))));

    let reversed = peer.migrate_range(cid(P, 9), cid(P, 1), P2);
    assert!(matches!(reversed, Err(OverlayError::Core(corelib::Error::InvalidRange { .. }))));
}

#[test]
fn test_write_to_uninitialized_tree_fails_fast() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);

    let migrate = peer.migrate(cid(P2, 5), P);
    assert!(
        matches!(migrate, Err(OverlayError::UninitializedTree(c)) if c == P2),
        "migrating a chunk of an unknown creator should not be retried, got {:?}",
        migrate
    );

    let range = peer.migrate_range(cid(P2, 1), cid(P2, 9), P);
    assert!(matches!(range, Err(OverlayError::UninitializedTree(c)) if c == P2));
}

#[test]
fn test_backup_ranges_and_restorer() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);
    let other = cluster.add_peer(P2);
    peer.init_range(P, RangeId::Local(1), &[P2]).expect("init local range");
    peer.init_range(P, RangeId::Migration(0), &[P2]).expect("init migration range");

    let ranges = other.get_all_backup_ranges(P).expect("backup ranges");
    let ids: Vec<RangeId> = ranges.iter().map(|r| r.range_id).collect();
    assert_eq!(ids, vec![RangeId::Local(1), RangeId::Migration(0)]);
    assert!(ranges[0].peers.contains(P2));

    other.set_restorer_after_recovery(P).expect("set restorer");
    assert_eq!(cluster.superpeer(S3).tree(P).unwrap().restorer(), Some(P2));
    assert_eq!(
        cluster.superpeer(S1).tree(P).unwrap().restorer(),
        Some(P2),
        "restorer should be replicated with its identity"
    );
}

// ============================================================================
// Nameservice Tests
// ============================================================================

#[test]
fn test_nameservice_roundtrip() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);

    for id in 0..20 {
        peer.insert_nameservice_entry(id, cid(P, id as u64 + 1)).expect("insert");
    }
    for id in 0..20 {
        assert_eq!(
            peer.get_chunk_id_for_nameservice_entry(id, None).unwrap(),
            Some(cid(P, id as u64 + 1)),
            "id {} should resolve",
            id
        );
    }

    assert_eq!(peer.get_chunk_id_for_nameservice_entry(999, None).unwrap(), None);
    assert_eq!(
        peer.get_chunk_id_for_nameservice_entry(999, Some(Duration::from_millis(30)))
            .unwrap(),
        None,
        "a missing entry should time out"
    );

    assert_eq!(peer.get_nameservice_entry_count().unwrap(), 20, "primary areas partition the ring");
    let entries = peer.get_nameservice_entries().unwrap();
    assert_eq!(entries.len(), 20, "backup copies should be deduplicated");
    assert_eq!(entries[0], (0, cid(P, 1)));
}

#[test]
fn test_nameservice_rejects_negative_id() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);

    let err = peer.insert_nameservice_entry(-5, cid(P, 1)).unwrap_err();
    assert!(matches!(err, OverlayError::Core(corelib::Error::InvalidNameserviceId(-5))));
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_peer_failure_hands_off_recovery() {
    let mut cluster = Cluster::new(common::test_config(3));
    let recovery = Arc::new(RecordingRecovery::default());
    let (listener, events) = ChannelListener::new();
    cluster.add_superpeer(S1, OverlayHooks::default());
    cluster.add_superpeer(S2, OverlayHooks::default());
    cluster.add_superpeer(
        S3,
        OverlayHooks::default()
            .with_listener(Arc::new(listener))
            .with_recovery(recovery.clone()),
    );
    cluster.stabilize(2);

    let failing = cluster.add_peer(P);
    let survivor = cluster.add_peer(P2);
    failing.init_range(P, RangeId::Local(1), &[P2]).expect("init P");
    survivor.init_range(P2, RangeId::Local(1), &[P]).expect("init P2");

    cluster.kill(P);
    cluster.stabilize_nodes(&[S3]);

    let s3 = cluster.superpeer(S3);
    assert_eq!(s3.peers(), vec![P2], "failed peer should be removed");
    assert!(!s3.tree(P).unwrap().is_online(), "tree of the failed peer goes offline");
    for sp in [S1, S3] {
        let tree = cluster.superpeer(sp).tree(P2).unwrap();
        assert!(
            tree.all_backup_ranges().iter().all(|r| !r.peers.contains(P)),
            "failed peer should no longer back up P2 on {}",
            sp
        );
    }

    let calls = recovery.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, P);
    assert_eq!(calls[0].1.len(), 1, "one local range to recover");

    let received: Vec<OverlayEvent> = events.try_iter().collect();
    assert!(received.contains(&OverlayEvent::NodeFailure {
        node: P,
        role: corelib::NodeRole::Peer
    }));
    assert!(cluster.boot.failed_nodes().contains(&P));
}

#[test]
fn test_bootstrap_failure_elects_new_bootstrap() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    assert_eq!(cluster.boot.bootstrap(), Some(S1));

    cluster.kill(S1);
    cluster.stabilize_nodes(&[S2, S3]);

    let bootstrap = cluster.boot.bootstrap();
    assert!(
        bootstrap == Some(S2) || bootstrap == Some(S3),
        "a surviving superpeer should become bootstrap, got {:?}",
        bootstrap
    );
    assert_eq!(cluster.superpeer(S2).predecessor(), Some(S3));
    assert_eq!(cluster.superpeer(S3).successor(), Some(S2));
}

#[test]
fn test_all_superpeers_down() {
    let mut cluster = Cluster::ring(&[S1, S2, S3]);
    let peer = cluster.add_peer(P);
    assert!(!peer.all_superpeers_down());

    for sp in [S1, S2, S3] {
        cluster.kill(sp);
    }
    assert!(peer.all_superpeers_down());
}
