//! Request handlers.
//!
//! A handler applies a write locally when this superpeer is primary for the
//! key or when the request is flagged as a backup write. Primaries then
//! forward migrations and range initializations to their backup superpeers;
//! removals and nameservice inserts return the backup list to the caller
//! instead. Non-primaries answer with a negative response so the caller
//! re-resolves.

use super::{unexpected, Superpeer};
use corelib::hash::crc16;
use corelib::ring::{insert_sorted, is_node_in_range, responsible_area, responsible_superpeer, IntervalKind};
use corelib::{BackupPeers, ChunkId, LookupResult, LookupTree, NodeId};
use protocol::{BackupShard, InitRangeRequest, JoinRequest, JoinResponse, Message, WriteStatus};
use tracing::{debug, error, info, trace, warn};

/// Whether a request is applied here and in which role.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Role {
    Primary,
    Backup,
    NotResponsible,
}

impl Role {
    /// Backup writes are applied locally only, also on a node that is primary.
    fn of(responsible: bool, is_backup: bool) -> Self {
        if is_backup {
            Role::Backup
        } else if responsible {
            Role::Primary
        } else {
            Role::NotResponsible
        }
    }
}

impl Superpeer {
    pub(super) fn incoming_join(&self, req: JoinRequest) -> JoinResponse {
        let joiner = req.node;
        let mut ring = self.ring.lock();
        let accept = ring.is_alone()
            || ring
                .predecessor
                .map_or(true, |p| is_node_in_range(joiner, p, self.node, IntervalKind::Open));

        if !accept {
            let contact = responsible_superpeer(joiner, &ring.superpeers).unwrap_or(self.node);
            trace!(node = %self.node, joiner = %joiner, contact = %contact, "redirecting join");
            return JoinResponse::redirect(contact);
        }

        if !req.is_superpeer {
            insert_sorted(&mut ring.peers, joiner);
            info!(node = %self.node, peer = %joiner, "peer joined");
            return JoinResponse {
                superpeers: ring.superpeers.clone(),
                ..JoinResponse::default()
            };
        }

        let joiners_predecessor = ring.predecessor.unwrap_or(self.node);
        let handed_over: Vec<NodeId> = ring
            .peers
            .iter()
            .copied()
            .filter(|p| is_node_in_range(*p, joiners_predecessor, joiner, IntervalKind::Open))
            .collect();
        let (area_start, area_end) = responsible_area(joiner, ring.predecessor, &ring.superpeers);

        let trees: Vec<LookupTree> = {
            let trees = self.trees.lock();
            trees
                .iter()
                .filter(|(creator, _)| is_node_in_range(**creator, area_start, area_end, IntervalKind::Open))
                .map(|(_, tree)| tree.clone())
                .collect()
        };
        let mappings = self.mappings.lock().export_range(Some(area_start), Some(area_end));

        let response = JoinResponse {
            new_contact: None,
            predecessor: Some(joiners_predecessor),
            successor: Some(self.node),
            superpeers: ring.superpeers.clone(),
            peers: handed_over.clone(),
            shard: BackupShard::new(trees, mappings.to_vec()),
        };

        ring.peers.retain(|p| !handed_over.contains(p));
        let notify = if ring.is_alone() {
            ring.set_successor(Some(joiner));
            ring.set_predecessor(Some(joiner));
            None
        } else {
            ring.set_predecessor(Some(joiner));
            Some(joiners_predecessor)
        };
        info!(node = %self.node, superpeer = %joiner, handed_over = handed_over.len(), "superpeer joined");
        drop(ring);

        if let Some(old_predecessor) = notify {
            if let Err(e) = self
                .transport
                .send(old_predecessor, Message::NotifyAboutNewSuccessor { node: joiner })
            {
                warn!(node = %self.node, target = %old_predecessor, error = %e, "failed to notify old predecessor");
            }
        }
        response
    }

    pub(super) fn incoming_get_lookup_range(&self, chunk_id: ChunkId) -> Message {
        let result = match self.trees.lock().get(&chunk_id.creator()) {
            Some(tree) => tree.get_metadata(chunk_id),
            None => LookupResult::NotFound,
        };
        trace!(node = %self.node, chunk = %chunk_id, ?result, "lookup range");
        Message::GetLookupRangeResponse { result }
    }

    pub(super) fn incoming_remove_chunk_ids(&self, chunk_ids: &[ChunkId], is_backup: bool) -> Message {
        let roles: Vec<Role> = {
            let ring = self.ring.lock();
            chunk_ids
                .iter()
                .map(|c| Role::of(ring.is_responsible_for(c.creator()), is_backup))
                .collect()
        };
        if roles.contains(&Role::NotResponsible) {
            return Message::RemoveChunkIdsResponse { backup_superpeers: None };
        }

        {
            let mut trees = self.trees.lock();
            for (chunk_id, role) in chunk_ids.iter().zip(&roles) {
                match trees.get_mut(&chunk_id.creator()) {
                    Some(tree) => tree.remove_object(*chunk_id),
                    None => self.log_uninitialized(chunk_id.creator(), *role),
                }
            }
        }

        if is_backup {
            Message::RemoveChunkIdsResponse { backup_superpeers: None }
        } else {
            Message::RemoveChunkIdsResponse {
                backup_superpeers: Some(self.backup_superpeers()),
            }
        }
    }

    pub(super) fn incoming_insert_nameservice_entry(&self, id: i32, chunk_id: ChunkId, is_backup: bool) -> Message {
        let (role, peers) = {
            let ring = self.ring.lock();
            (Role::of(ring.is_responsible_for_hash(crc16(id)), is_backup), ring.peers.clone())
        };
        if role == Role::NotResponsible {
            return Message::InsertNameserviceEntriesResponse { backup_superpeers: None };
        }

        if let Err(e) = self.mappings.lock().put(id, chunk_id) {
            error!(node = %self.node, id, error = %e, "rejected nameservice entry");
            return Message::InsertNameserviceEntriesResponse { backup_superpeers: None };
        }
        if role == Role::Backup {
            return Message::InsertNameserviceEntriesResponse { backup_superpeers: None };
        }

        for peer in peers {
            if let Err(e) = self
                .transport
                .send(peer, Message::NameserviceUpdatePeerCaches { id, chunk_id })
            {
                debug!(node = %self.node, peer = %peer, error = %e, "failed to update peer cache");
            }
        }
        Message::InsertNameserviceEntriesResponse {
            backup_superpeers: Some(self.backup_superpeers()),
        }
    }

    pub(super) fn incoming_get_chunk_id(&self, id: i32) -> Message {
        let responsible = self.ring.lock().is_responsible_for_hash(crc16(id));
        let chunk_id = if responsible { self.mappings.lock().get(id) } else { None };
        Message::GetChunkIdForNameserviceEntryResponse { chunk_id }
    }

    pub(super) fn incoming_get_nameservice_entry_count(&self) -> Message {
        let predecessor = {
            let ring = self.ring.lock();
            if ring.is_alone() {
                None
            } else {
                ring.predecessor
            }
        };
        let count = self.mappings.lock().count_in_range(predecessor, Some(self.node));
        Message::GetNameserviceEntryCountResponse { count: count as u64 }
    }

    pub(super) fn incoming_get_nameservice_entries(&self) -> Message {
        Message::GetNameserviceEntriesResponse {
            entries: self.mappings.lock().export_all().to_vec(),
        }
    }

    pub(super) fn incoming_migrate(&self, msg: Message) -> Message {
        let (chunk_id, owner, is_backup) = match msg {
            Message::MigrateRequest { chunk_id, owner, is_backup } => (chunk_id, owner, is_backup),
            other => {
                error!(node = %self.node, "{}", unexpected("migrate_request", &other));
                return Message::MigrateResponse {
                    status: WriteStatus::Rejected,
                };
            }
        };
        let creator = chunk_id.creator();
        let role = Role::of(self.ring.lock().is_responsible_for(creator), is_backup);
        if role == Role::NotResponsible {
            return Message::MigrateResponse {
                status: WriteStatus::NotResponsible,
            };
        }

        let applied = match self.trees.lock().get_mut(&creator) {
            Some(tree) => tree.migrate_object(chunk_id, owner),
            None => {
                self.log_uninitialized(creator, role);
                return Message::MigrateResponse {
                    status: WriteStatus::Uninitialized,
                };
            }
        };
        if !applied {
            warn!(node = %self.node, chunk = %chunk_id, "migration rejected by lookup tree");
            return Message::MigrateResponse {
                status: WriteStatus::Rejected,
            };
        }
        if role == Role::Primary {
            self.forward_to_backups(&Message::MigrateRequest { chunk_id, owner, is_backup });
        }
        Message::MigrateResponse {
            status: WriteStatus::Applied,
        }
    }

    pub(super) fn incoming_migrate_range(&self, msg: Message) -> Message {
        let (start, end, owner, is_backup) = match msg {
            Message::MigrateRangeRequest {
                start,
                end,
                owner,
                is_backup,
            } => (start, end, owner, is_backup),
            other => {
                error!(node = %self.node, "{}", unexpected("migrate_range_request", &other));
                return Message::MigrateRangeResponse {
                    status: WriteStatus::Rejected,
                };
            }
        };
        let creator = start.creator();
        if creator != end.creator() {
            error!(node = %self.node, start = %start, end = %end, "start and end creators differ");
            return Message::MigrateRangeResponse {
                status: WriteStatus::Rejected,
            };
        }
        let role = Role::of(self.ring.lock().is_responsible_for(creator), is_backup);
        if role == Role::NotResponsible {
            return Message::MigrateRangeResponse {
                status: WriteStatus::NotResponsible,
            };
        }

        let applied = match self.trees.lock().get_mut(&creator) {
            Some(tree) => tree.migrate_range(start, end, owner),
            None => {
                self.log_uninitialized(creator, role);
                return Message::MigrateRangeResponse {
                    status: WriteStatus::Uninitialized,
                };
            }
        };
        if !applied {
            warn!(node = %self.node, start = %start, end = %end, "range migration rejected by lookup tree");
            return Message::MigrateRangeResponse {
                status: WriteStatus::Rejected,
            };
        }
        if role == Role::Primary {
            self.forward_to_backups(&Message::MigrateRangeRequest {
                start,
                end,
                owner,
                is_backup,
            });
        }
        Message::MigrateRangeResponse {
            status: WriteStatus::Applied,
        }
    }

    pub(super) fn incoming_init_range(&self, req: InitRangeRequest) -> Message {
        let role = Role::of(self.ring.lock().is_responsible_for(req.owner), req.is_backup);
        if role == Role::NotResponsible {
            return Message::InitRangeResponse {
                status: WriteStatus::NotResponsible,
            };
        }

        {
            let order = self.config.tree_order;
            let mut trees = self.trees.lock();
            let tree = trees.entry(req.owner).or_insert_with(|| {
                debug!(node = %self.node, creator = %req.owner, "creating lookup tree");
                LookupTree::new(order, req.owner)
            });
            tree.init_range(req.range_id, BackupPeers::from_slice(&req.backups));
        }
        trace!(node = %self.node, owner = %req.owner, range = %req.range_id, ?role, "initialized range");

        if role == Role::Primary {
            self.forward_to_backups(&Message::InitRangeRequest(req));
        }
        Message::InitRangeResponse {
            status: WriteStatus::Applied,
        }
    }

    pub(super) fn incoming_get_all_backup_ranges(&self, node: NodeId) -> Message {
        let ranges = self.trees.lock().get(&node).map(LookupTree::all_backup_ranges);
        Message::GetAllBackupRangesResponse { ranges }
    }

    pub(super) fn incoming_set_restorer(&self, msg: Message) {
        let (owner, restorer, is_backup) = match msg {
            Message::SetRestorerAfterRecovery {
                owner,
                restorer,
                is_backup,
            } => (owner, restorer, is_backup),
            _ => return,
        };
        let role = Role::of(self.ring.lock().is_responsible_for(owner), is_backup);
        if role == Role::NotResponsible {
            debug!(node = %self.node, owner = %owner, "ignoring restorer update for foreign creator");
            return;
        }

        match self.trees.lock().get_mut(&owner) {
            Some(tree) => tree.set_restorer(restorer),
            None => {
                self.log_uninitialized(owner, role);
                return;
            }
        }
        info!(node = %self.node, owner = %owner, restorer = %restorer, "restorer set");
        if role == Role::Primary {
            self.forward_to_backups(&Message::SetRestorerAfterRecovery {
                owner,
                restorer,
                is_backup,
            });
        }
    }

    /// Best-effort copy of a primary write to the backup superpeers.
    fn forward_to_backups(&self, msg: &Message) {
        let backups = self.backup_superpeers();
        let report = replication::fan_out(self.transport(), &backups, msg);
        if !report.all_delivered() {
            debug!(node = %self.node, msg = msg.name(), failed = ?report.failed, "backup fan-out incomplete");
        }
    }

    fn log_uninitialized(&self, creator: NodeId, role: Role) {
        match role {
            Role::Primary => {
                error!(node = %self.node, creator = %creator, "lookup tree not initialized on responsible superpeer")
            }
            _ => warn!(node = %self.node, creator = %creator, "lookup tree not initialized on backup superpeer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role() {
        assert_eq!(Role::of(true, true), Role::Backup);
        assert_eq!(Role::of(true, false), Role::Primary);
        assert_eq!(Role::of(false, true), Role::Backup);
        assert_eq!(Role::of(false, false), Role::NotResponsible);
    }
}
