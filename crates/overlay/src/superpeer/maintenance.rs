//! Shard bookkeeping shared by stabilization and failure handling.

use super::Superpeer;
use corelib::ring::{contains_sorted, insert_sorted, is_node_in_range, predecessor_in, IntervalKind};
use corelib::{LookupTree, NodeId};
use protocol::BackupShard;
use tracing::{debug, error, info};

impl Superpeer {
    /// Creators with a stored tree in the open interval `(old, current)`.
    pub fn peers_in_responsible_area(&self, old: NodeId, current: NodeId) -> Vec<NodeId> {
        self.trees
            .lock()
            .keys()
            .copied()
            .filter(|c| is_node_in_range(*c, old, current, IntervalKind::Open))
            .collect()
    }

    /// Drop `peer` as backup from every tree and mark its own tree offline.
    pub fn remove_failed_peer(&self, peer: NodeId) {
        let mut trees = self.trees.lock();
        for tree in trees.values_mut() {
            tree.remove_backup_peer(peer, None);
        }
        if let Some(tree) = trees.get_mut(&peer) {
            tree.set_online(false);
        }
        debug!(node = %self.node, peer = %peer, "removed failed peer from lookup trees");
    }

    /// Shard of this node's own area without the creators the caller already holds.
    ///
    /// # Arguments
    /// * `held` - Sorted creators the requesting superpeer stores
    pub fn compare_and_return_backups(&self, held: &[NodeId]) -> BackupShard {
        let lower = self.ring.lock().predecessor.unwrap_or(self.node);
        let trees: Vec<LookupTree> = {
            let trees = self.trees.lock();
            trees
                .iter()
                .filter(|(c, _)| is_node_in_range(**c, lower, self.node, IntervalKind::Open))
                .filter(|(c, _)| !held.contains(c))
                .map(|(_, tree)| tree.clone())
                .collect()
        };
        let mappings = self.mappings.lock().export_range(Some(lower), Some(self.node));
        BackupShard::new(trees, mappings.to_vec())
    }

    /// Store trees and nameservice entries received from another superpeer.
    pub fn store_incoming_backups(&self, shard: BackupShard) {
        if shard.is_empty() {
            return;
        }
        let creators = shard.creators();
        {
            let mut trees = self.trees.lock();
            for tree in shard.trees {
                trees.insert(tree.creator(), tree);
            }
        }
        if let Err(e) = self.mappings.lock().put_all(&shard.mappings) {
            error!(node = %self.node, error = %e, "dropping malformed nameservice backup");
        }
        debug!(node = %self.node, creators = ?creators, "stored incoming backups");
    }

    /// Delete trees and nameservice entries outside `area`.
    ///
    /// A degenerate area (`start == end`) covers the whole ring.
    pub fn delete_unnecessary_backups(&self, area: (NodeId, NodeId)) {
        let (start, end) = area;
        if start == end {
            return;
        }
        let removed: Vec<NodeId> = {
            let mut trees = self.trees.lock();
            let doomed: Vec<NodeId> = trees
                .keys()
                .copied()
                .filter(|c| is_node_in_range(*c, end, start, IntervalKind::Open))
                .collect();
            for creator in &doomed {
                trees.remove(creator);
            }
            doomed
        };
        let dropped = self.mappings.lock().remove_outside_range(Some(start), Some(end));
        if !removed.is_empty() || dropped > 0 {
            debug!(node = %self.node, trees = ?removed, mappings = dropped, "deleted unnecessary backups");
        }
    }

    /// Adopt the online peers between the superpeer before `failed` and `failed`.
    ///
    /// Called with the failed predecessor, and with this node's own id to pick
    /// up peers of its own area that are not assigned yet.
    pub fn take_over_peers_and_trees(&self, failed: NodeId) {
        let (first, known_peers, superpeers) = {
            let ring = self.ring.lock();
            let first = match predecessor_in(&ring.superpeers, failed) {
                Some(p) if p != failed => p,
                _ => self.node.next(),
            };
            (first, ring.peers.clone(), ring.superpeers.clone())
        };

        let adopt: Vec<NodeId> = self
            .trees
            .lock()
            .iter()
            .filter(|(c, tree)| tree.is_online() && is_node_in_range(**c, first, failed, IntervalKind::Closed))
            .map(|(c, _)| *c)
            .filter(|c| !contains_sorted(&known_peers, *c) && !contains_sorted(&superpeers, *c))
            .collect();
        if adopt.is_empty() {
            return;
        }

        let mut ring = self.ring.lock();
        for peer in adopt {
            if insert_sorted(&mut ring.peers, peer) {
                info!(node = %self.node, peer = %peer, "taking over peer");
            }
        }
    }
}
