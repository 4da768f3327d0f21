//! Node failure handling.
//!
//! Only one failure is handled at a time. A failure reported while another
//! one is being handled is queued and picked up by the thread that holds the
//! failure lock, in the same pass.

use super::Superpeer;
use crate::events::OverlayEvent;
use corelib::ring::{
    contains_sorted, is_node_in_range, remove_sorted, responsible_superpeer, successor_in, IntervalKind,
    BACKUP_SUPERPEERS,
};
use corelib::{BackupRange, LookupTree, NodeId, NodeRole};
use protocol::{BackupShard, Message};
use tracing::{error, info, warn};

impl Superpeer {
    /// Handle the failure of `failed`, a superpeer or an assigned peer.
    ///
    /// Unknown nodes are ignored. Returns once the queue is drained or another
    /// thread is already draining it.
    pub fn failure_handling(&self, failed: NodeId) {
        {
            let mut pending = self.pending_failures.lock();
            if !pending.contains(&failed) {
                pending.push_back(failed);
            }
        }
        loop {
            let guard = match self.failure_lock.try_lock() {
                Some(guard) => guard,
                None => return,
            };
            while let Some(node) = self.next_pending_failure() {
                self.handle_failure(node);
            }
            drop(guard);
            if self.pending_failures.lock().is_empty() {
                return;
            }
        }
    }

    fn next_pending_failure(&self) -> Option<NodeId> {
        self.pending_failures.lock().pop_front()
    }

    fn handle_failure(&self, failed: NodeId) {
        let (is_superpeer, is_peer) = {
            let ring = self.ring.lock();
            (
                contains_sorted(&ring.superpeers, failed),
                contains_sorted(&ring.peers, failed),
            )
        };
        if is_superpeer {
            metrics::counter!("lookup_failure_handling_total", "role" => "superpeer").increment(1);
            self.handle_superpeer_failure(failed);
        } else if is_peer {
            if self.boot.is_node_available(failed) {
                metrics::counter!("lookup_failure_handling_total", "role" => "peer").increment(1);
                self.handle_peer_failure(failed);
            } else {
                metrics::counter!("lookup_failure_handling_total", "role" => "terminal").increment(1);
                self.handle_terminal_failure(failed);
            }
        }
    }

    fn handle_superpeer_failure(&self, failed: NodeId) {
        error!(node = %self.node, failed = %failed, "superpeer failure");
        self.hooks.listener.on_event(&OverlayEvent::NodeFailure {
            node: failed,
            role: NodeRole::Superpeer,
        });

        let (bootstrap, predecessor) = {
            let ring = self.ring.lock();
            (ring.bootstrap, ring.predecessor)
        };
        if bootstrap == Some(failed) {
            self.determine_new_bootstrap(failed);
        }
        if predecessor == Some(failed) {
            info!(node = %self.node, failed = %failed, "failed predecessor, taking over its peers and data");
            self.take_over_peers_and_trees(failed);
        }

        let (area, superpeers) = {
            let ring = self.ring.lock();
            (ring.responsible_area(), ring.superpeers.clone())
        };
        if superpeers.len() > BACKUP_SUPERPEERS
            && responsible_superpeer(area.0.next(), &superpeers) == Some(failed)
        {
            info!(node = %self.node, failed = %failed, "failed node was first in my area, spreading its data");
            self.spread_data_of_failed_superpeer(failed, area.0);
        }
        let backups = self.backup_superpeers();
        if superpeers.len() > BACKUP_SUPERPEERS && backups.contains(&failed) {
            info!(node = %self.node, failed = %failed, "failed node was one of my backups, spreading my data");
            self.spread_backups_of_this_superpeer(&backups);
        }

        {
            let mut ring = self.ring.lock();
            ring.remove_superpeer(failed);
        }
        self.boot.report_failure(failed, true);
    }

    fn handle_terminal_failure(&self, failed: NodeId) {
        error!(node = %self.node, failed = %failed, "terminal failure, no further actions required");
        remove_sorted(&mut self.ring.lock().peers, failed);
        self.hooks.listener.on_event(&OverlayEvent::NodeFailure {
            node: failed,
            role: NodeRole::Terminal,
        });
        self.boot.report_failure(failed, false);
    }

    fn handle_peer_failure(&self, failed: NodeId) {
        error!(node = %self.node, failed = %failed, "peer failure");
        self.hooks.listener.on_event(&OverlayEvent::NodeFailure {
            node: failed,
            role: NodeRole::Peer,
        });

        self.remove_failed_peer(failed);
        for superpeer in self.superpeers() {
            info!(node = %self.node, target = %superpeer, failed = %failed, "informing superpeer about failed peer");
            if let Err(e) = self
                .transport
                .send(superpeer, Message::NotifyAboutFailedPeer { node: failed })
            {
                error!(node = %self.node, target = %superpeer, error = %e, "superpeer failed, too");
                self.queue_failure(superpeer);
            }
        }

        let ranges: Vec<BackupRange> = self
            .trees
            .lock()
            .get(&failed)
            .map(LookupTree::all_backup_ranges)
            .unwrap_or_default();
        info!(node = %self.node, failed = %failed, ranges = ranges.len(), "starting recovery");
        self.hooks.recovery.recover(failed, &ranges);

        remove_sorted(&mut self.ring.lock().peers, failed);
        self.boot.report_failure(failed, false);
        info!(node = %self.node, failed = %failed, "recovery handed off");
    }

    fn determine_new_bootstrap(&self, failed: NodeId) {
        let bootstrap = self.boot.elect_bootstrap(failed, self.node);
        self.ring.lock().bootstrap = Some(bootstrap);
        info!(node = %self.node, failed = %failed, bootstrap = %bootstrap, "failed node was bootstrap");
        if bootstrap != self.node {
            if let Err(e) = self.transport.send(bootstrap, Message::PingSuperpeer) {
                error!(node = %self.node, bootstrap = %bootstrap, error = %e, "new bootstrap failed, too");
                self.queue_failure(bootstrap);
            }
        }
    }

    /// Forward the failed superpeer's shards to this node's successor.
    fn spread_data_of_failed_superpeer(&self, failed: NodeId, area_start: NodeId) {
        let shard = self.shard_between(area_start, failed);
        let mut skipped = vec![failed];
        loop {
            let target = match self.live_successor(&skipped) {
                Some(target) => target,
                None => return,
            };
            info!(node = %self.node, target = %target, "spreading failed superpeer's data");
            match self.transport.send(target, Message::SendBackups(shard.clone())) {
                Ok(()) => return,
                Err(e) => {
                    error!(node = %self.node, target = %target, error = %e, "successor failed, too");
                    self.queue_failure(target);
                    skipped.push(target);
                }
            }
        }
    }

    /// Send this node's own shards to the superpeer following its last backup.
    fn spread_backups_of_this_superpeer(&self, backups: &[NodeId]) {
        let lower = self.ring.lock().predecessor.unwrap_or(self.node);
        let shard = self.shard_between(lower, self.node);
        let last = match backups.last() {
            Some(last) => *last,
            None => return,
        };
        let mut skipped: Vec<NodeId> = backups.to_vec();
        loop {
            let candidates: Vec<NodeId> = self
                .superpeers()
                .into_iter()
                .filter(|sp| !skipped.contains(sp))
                .collect();
            let target = match responsible_superpeer(last.next(), &candidates) {
                Some(target) => target,
                None => return,
            };
            match self.transport.send(target, Message::SendBackups(shard.clone())) {
                Ok(()) => {
                    info!(node = %self.node, target = %target, creators = ?shard.creators(), "spread own data");
                    return;
                }
                Err(e) => {
                    error!(node = %self.node, target = %target, error = %e, "new backup superpeer failed, too");
                    self.queue_failure(target);
                    skipped.push(target);
                }
            }
        }
    }

    /// Trees of creators in `(start, end)` plus nameservice entries in `(start, end]`.
    fn shard_between(&self, start: NodeId, end: NodeId) -> BackupShard {
        let trees: Vec<LookupTree> = self
            .trees
            .lock()
            .iter()
            .filter(|(c, _)| is_node_in_range(**c, start, end, IntervalKind::Open))
            .map(|(_, tree)| tree.clone())
            .collect();
        let mappings = self.mappings.lock().export_range(Some(start), Some(end));
        BackupShard::new(trees, mappings.to_vec())
    }

    fn live_successor(&self, skipped: &[NodeId]) -> Option<NodeId> {
        let ring = self.ring.lock();
        let candidates: Vec<NodeId> = ring
            .superpeers
            .iter()
            .copied()
            .filter(|sp| !skipped.contains(sp))
            .collect();
        successor_in(&candidates, self.node)
    }

    /// Record a failure discovered while another one is handled.
    fn queue_failure(&self, node: NodeId) {
        let mut pending = self.pending_failures.lock();
        if !pending.contains(&node) {
            warn!(node = %self.node, failed = %node, "queueing nested failure");
            pending.push_back(node);
        }
    }
}
