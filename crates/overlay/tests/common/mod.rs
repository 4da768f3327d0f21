//! Shared helpers for overlay integration tests.
//!
//! Builds rings of superpeers and peers on an in-process network. Superpeers
//! join without a background thread; tests drive stabilization rounds by hand.

#![allow(dead_code)]

use corelib::{BackupRange, NodeId, NodeRole, OverlayConfig, RetryConfig};
use overlay::{OverlayHooks, Peer, RecoveryHandler, Stabilizer, StaticBootDirectory, Superpeer};
use parking_lot::Mutex;
use protocol::LocalNetwork;
use std::sync::Arc;

pub const S1: NodeId = NodeId(0x1000);
pub const S2: NodeId = NodeId(0x2000);
pub const S3: NodeId = NodeId(0x3000);

/// Small delays and a bounded retry budget so failing tests end quickly.
pub fn test_config(initial_superpeers: usize) -> OverlayConfig {
    OverlayConfig {
        tree_order: 4,
        stabilization_interval_ms: 20,
        initial_superpeers,
        request_timeout_ms: 2000,
        dispatch_threads: 4,
        retry: RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 20,
            max_attempts: Some(50),
            deadline_ms: None,
        },
        ..OverlayConfig::default()
    }
}

/// Recovery handler that records every hand-off.
#[derive(Default)]
pub struct RecordingRecovery {
    pub calls: Mutex<Vec<(NodeId, Vec<BackupRange>)>>,
}

impl RecoveryHandler for RecordingRecovery {
    fn recover(&self, failed: NodeId, ranges: &[BackupRange]) {
        self.calls.lock().push((failed, ranges.to_vec()));
    }
}

pub struct Cluster {
    pub network: LocalNetwork,
    pub boot: Arc<StaticBootDirectory>,
    pub config: OverlayConfig,
    superpeers: Vec<(Arc<Superpeer>, Stabilizer)>,
    peers: Vec<Arc<Peer>>,
}

impl Cluster {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            network: LocalNetwork::new(config.request_timeout(), config.dispatch_threads),
            boot: Arc::new(StaticBootDirectory::new()),
            config,
            superpeers: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// Ring of `ids` joined in order and stabilized for two rounds.
    pub fn ring(ids: &[NodeId]) -> Self {
        let mut cluster = Self::new(test_config(ids.len()));
        for id in ids {
            cluster.add_superpeer(*id, OverlayHooks::default());
        }
        cluster.stabilize(2);
        cluster
    }

    pub fn add_superpeer(&mut self, id: NodeId, hooks: OverlayHooks) -> Arc<Superpeer> {
        self.boot.register(id, NodeRole::Superpeer);
        let transport = self.network.register(id).expect("register superpeer");
        let superpeer =
            Superpeer::new(self.config.clone(), transport, self.boot.clone(), hooks).expect("valid config");
        superpeer.join().expect("superpeer join");
        let stabilizer = superpeer.stabilizer();
        self.superpeers.push((superpeer.clone(), stabilizer));
        superpeer
    }

    pub fn add_peer(&mut self, id: NodeId) -> Arc<Peer> {
        self.boot.register(id, NodeRole::Peer);
        let transport = self.network.register(id).expect("register peer");
        let peer = Peer::new(self.config.clone(), transport, self.boot.clone(), OverlayHooks::default())
            .expect("valid config");
        peer.join().expect("peer join");
        self.peers.push(peer.clone());
        peer
    }

    pub fn superpeer(&self, id: NodeId) -> Arc<Superpeer> {
        self.superpeers
            .iter()
            .find(|(sp, _)| sp.node_id() == id)
            .map(|(sp, _)| sp.clone())
            .expect("unknown superpeer")
    }

    /// Run `rounds` stabilization rounds on every connected superpeer, in join order.
    pub fn stabilize(&mut self, rounds: usize) {
        for _ in 0..rounds {
            for (superpeer, stabilizer) in self.superpeers.iter_mut() {
                if self.network.is_connected(superpeer.node_id()) {
                    stabilizer.run_round();
                }
            }
        }
    }

    /// Run rounds on the given superpeers only.
    pub fn stabilize_nodes(&mut self, ids: &[NodeId]) {
        for id in ids {
            if let Some((_, stabilizer)) = self.superpeers.iter_mut().find(|(sp, _)| sp.node_id() == *id) {
                stabilizer.run_round();
            }
        }
    }

    /// Crash `id`: it stops receiving and sending.
    pub fn kill(&self, id: NodeId) {
        self.network.disconnect(id);
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for peer in &self.peers {
            peer.shutdown();
        }
        for (superpeer, _) in &self.superpeers {
            superpeer.shutdown();
        }
        self.network.shutdown();
    }
}
