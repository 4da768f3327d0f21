//! Lookup message set.
//!
//! Every message carries the fixed lookup message type and a subtype per
//! variant. Most messages come in request/response pairs; a few are one-way
//! notifications that are only acknowledged by the transport.

use crate::snapshot::BackupShard;
use corelib::{BackupRange, ChunkId, LookupResult, NodeId, RangeId};
use serde::{Deserialize, Serialize};

/// Message type shared by all lookup messages.
pub const LOOKUP_MESSAGE_TYPE: u8 = 20;

/// Join a superpeer or peer into the overlay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node: NodeId,
    pub is_superpeer: bool,
}

/// Answer to a join.
///
/// A set `new_contact` means the contacted superpeer is not responsible and
/// the joiner should retry there; all other fields are then empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JoinResponse {
    pub new_contact: Option<NodeId>,
    pub predecessor: Option<NodeId>,
    pub successor: Option<NodeId>,
    pub superpeers: Vec<NodeId>,
    pub peers: Vec<NodeId>,
    pub shard: BackupShard,
}

impl JoinResponse {
    pub fn redirect(contact: NodeId) -> Self {
        Self {
            new_contact: Some(contact),
            ..Self::default()
        }
    }
}

/// Register a new range of a peer (or a migration range).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitRangeRequest {
    pub owner: NodeId,
    pub range_id: RangeId,
    pub backups: Vec<NodeId>,
    pub is_backup: bool,
}

/// Outcome of a tree write on the contacted superpeer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteStatus {
    Applied,
    /// The contacted superpeer is not responsible; re-resolve and retry.
    NotResponsible,
    /// The creator's lookup tree was never initialized.
    Uninitialized,
    /// The request itself is invalid (mixed creators, reversed range).
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    JoinRequest(JoinRequest),
    JoinResponse(JoinResponse),
    InitRangeRequest(InitRangeRequest),
    InitRangeResponse { status: WriteStatus },
    GetLookupRangeRequest { chunk_id: ChunkId },
    GetLookupRangeResponse { result: LookupResult },
    MigrateRequest { chunk_id: ChunkId, owner: NodeId, is_backup: bool },
    MigrateResponse { status: WriteStatus },
    MigrateRangeRequest { start: ChunkId, end: ChunkId, owner: NodeId, is_backup: bool },
    MigrateRangeResponse { status: WriteStatus },
    RemoveChunkIdsRequest { chunk_ids: Vec<ChunkId>, is_backup: bool },
    /// `None` if the superpeer was not responsible.
    RemoveChunkIdsResponse { backup_superpeers: Option<Vec<NodeId>> },
    SendBackups(BackupShard),
    SendSuperpeers { superpeers: Vec<NodeId> },
    /// Ask for shards the sender is missing; `creators` lists what it already holds.
    AskAboutBackupsRequest { creators: Vec<NodeId> },
    AskAboutBackupsResponse(BackupShard),
    AskAboutSuccessorRequest,
    AskAboutSuccessorResponse { successor: Option<NodeId> },
    NotifyAboutNewPredecessor { node: NodeId },
    NotifyAboutNewSuccessor { node: NodeId },
    PingSuperpeer,
    NotifyAboutFailedPeer { node: NodeId },
    InsertNameserviceEntriesRequest { id: i32, chunk_id: ChunkId, is_backup: bool },
    InsertNameserviceEntriesResponse { backup_superpeers: Option<Vec<NodeId>> },
    GetChunkIdForNameserviceEntryRequest { id: i32 },
    GetChunkIdForNameserviceEntryResponse { chunk_id: Option<ChunkId> },
    GetNameserviceEntryCountRequest,
    GetNameserviceEntryCountResponse { count: u64 },
    GetNameserviceEntriesRequest,
    GetNameserviceEntriesResponse { entries: Vec<u8> },
    NameserviceUpdatePeerCaches { id: i32, chunk_id: ChunkId },
    GetAllBackupRangesRequest { node: NodeId },
    /// `None` if the superpeer was not responsible or does not know the node.
    GetAllBackupRangesResponse { ranges: Option<Vec<BackupRange>> },
    /// `restorer` took over the chunks of the failed `owner`.
    SetRestorerAfterRecovery { owner: NodeId, restorer: NodeId, is_backup: bool },
}

impl Message {
    /// Message type of every lookup message.
    pub const fn message_type(&self) -> u8 {
        LOOKUP_MESSAGE_TYPE
    }

    /// Subtype identifying the variant on the wire.
    pub fn subtype(&self) -> u8 {
        match self {
            Message::JoinRequest(_) => 1,
            Message::JoinResponse(_) => 2,
            Message::InitRangeRequest(_) => 3,
            Message::InitRangeResponse { .. } => 4,
            Message::GetLookupRangeRequest { .. } => 5,
            Message::GetLookupRangeResponse { .. } => 6,
            Message::MigrateRequest { .. } => 7,
            Message::MigrateResponse { .. } => 8,
            Message::MigrateRangeRequest { .. } => 9,
            Message::MigrateRangeResponse { .. } => 10,
            Message::RemoveChunkIdsRequest { .. } => 11,
            Message::RemoveChunkIdsResponse { .. } => 12,
            Message::SendBackups(_) => 13,
            Message::SendSuperpeers { .. } => 14,
            Message::AskAboutBackupsRequest { .. } => 15,
            Message::AskAboutBackupsResponse(_) => 16,
            Message::AskAboutSuccessorRequest => 17,
            Message::AskAboutSuccessorResponse { .. } => 18,
            Message::NotifyAboutNewPredecessor { .. } => 19,
            Message::NotifyAboutNewSuccessor { .. } => 20,
            Message::PingSuperpeer => 21,
            Message::NotifyAboutFailedPeer { .. } => 22,
            Message::InsertNameserviceEntriesRequest { .. } => 23,
            Message::InsertNameserviceEntriesResponse { .. } => 24,
            Message::GetChunkIdForNameserviceEntryRequest { .. } => 25,
            Message::GetChunkIdForNameserviceEntryResponse { .. } => 26,
            Message::GetNameserviceEntryCountRequest => 27,
            Message::GetNameserviceEntryCountResponse { .. } => 28,
            Message::GetNameserviceEntriesRequest => 29,
            Message::GetNameserviceEntriesResponse { .. } => 30,
            Message::NameserviceUpdatePeerCaches { .. } => 31,
            Message::GetAllBackupRangesRequest { .. } => 32,
            Message::GetAllBackupRangesResponse { .. } => 33,
            Message::SetRestorerAfterRecovery { .. } => 34,
        }
    }

    /// Short name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Message::JoinRequest(_) => "join_request",
            Message::JoinResponse(_) => "join_response",
            Message::InitRangeRequest(_) => "init_range_request",
            Message::InitRangeResponse { .. } => "init_range_response",
            Message::GetLookupRangeRequest { .. } => "get_lookup_range_request",
            Message::GetLookupRangeResponse { .. } => "get_lookup_range_response",
            Message::MigrateRequest { .. } => "migrate_request",
            Message::MigrateResponse { .. } => "migrate_response",
            Message::MigrateRangeRequest { .. } => "migrate_range_request",
            Message::MigrateRangeResponse { .. } => "migrate_range_response",
            Message::RemoveChunkIdsRequest { .. } => "remove_chunk_ids_request",
            Message::RemoveChunkIdsResponse { .. } => "remove_chunk_ids_response",
            Message::SendBackups(_) => "send_backups",
            Message::SendSuperpeers { .. } => "send_superpeers",
            Message::AskAboutBackupsRequest { .. } => "ask_about_backups_request",
            Message::AskAboutBackupsResponse(_) => "ask_about_backups_response",
            Message::AskAboutSuccessorRequest => "ask_about_successor_request",
            Message::AskAboutSuccessorResponse { .. } => "ask_about_successor_response",
            Message::NotifyAboutNewPredecessor { .. } => "notify_about_new_predecessor",
            Message::NotifyAboutNewSuccessor { .. } => "notify_about_new_successor",
            Message::PingSuperpeer => "ping_superpeer",
            Message::NotifyAboutFailedPeer { .. } => "notify_about_failed_peer",
            Message::InsertNameserviceEntriesRequest { .. } => "insert_nameservice_entries_request",
            Message::InsertNameserviceEntriesResponse { .. } => "insert_nameservice_entries_response",
            Message::GetChunkIdForNameserviceEntryRequest { .. } => "get_chunk_id_for_nameservice_entry_request",
            Message::GetChunkIdForNameserviceEntryResponse { .. } => {
                "get_chunk_id_for_nameservice_entry_response"
            }
            Message::GetNameserviceEntryCountRequest => "get_nameservice_entry_count_request",
            Message::GetNameserviceEntryCountResponse { .. } => "get_nameservice_entry_count_response",
            Message::GetNameserviceEntriesRequest => "get_nameservice_entries_request",
            Message::GetNameserviceEntriesResponse { .. } => "get_nameservice_entries_response",
            Message::NameserviceUpdatePeerCaches { .. } => "nameservice_update_peer_caches",
            Message::GetAllBackupRangesRequest { .. } => "get_all_backup_ranges_request",
            Message::GetAllBackupRangesResponse { .. } => "get_all_backup_ranges_response",
            Message::SetRestorerAfterRecovery { .. } => "set_restorer_after_recovery",
        }
    }

    /// Copy of a primary write flagged for application on a backup superpeer.
    ///
    /// Returns `None` for messages that are never forwarded to backups.
    pub fn to_backup(&self) -> Option<Message> {
        let forwarded = match self {
            Message::InitRangeRequest(req) => Message::InitRangeRequest(InitRangeRequest {
                is_backup: true,
                ..req.clone()
            }),
            Message::MigrateRequest { chunk_id, owner, .. } => Message::MigrateRequest {
                chunk_id: *chunk_id,
                owner: *owner,
                is_backup: true,
            },
            Message::MigrateRangeRequest { start, end, owner, .. } => Message::MigrateRangeRequest {
                start: *start,
                end: *end,
                owner: *owner,
                is_backup: true,
            },
            Message::RemoveChunkIdsRequest { chunk_ids, .. } => Message::RemoveChunkIdsRequest {
                chunk_ids: chunk_ids.clone(),
                is_backup: true,
            },
            Message::InsertNameserviceEntriesRequest { id, chunk_id, .. } => {
                Message::InsertNameserviceEntriesRequest {
                    id: *id,
                    chunk_id: *chunk_id,
                    is_backup: true,
                }
            }
            Message::SetRestorerAfterRecovery { owner, restorer, .. } => Message::SetRestorerAfterRecovery {
                owner: *owner,
                restorer: *restorer,
                is_backup: true,
            },
            _ => return None,
        };
        Some(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtypes_are_distinct() {
        let samples = vec![
            Message::PingSuperpeer,
            Message::AskAboutSuccessorRequest,
            Message::GetNameserviceEntryCountRequest,
            Message::GetNameserviceEntriesRequest,
            Message::NotifyAboutFailedPeer { node: NodeId(1) },
            Message::SendSuperpeers { superpeers: vec![] },
        ];
        let mut subtypes: Vec<u8> = samples.iter().map(Message::subtype).collect();
        subtypes.sort_unstable();
        subtypes.dedup();
        assert_eq!(subtypes.len(), samples.len());
        assert!(samples.iter().all(|m| m.message_type() == LOOKUP_MESSAGE_TYPE));
    }

    #[test]
    fn test_to_backup_flags_writes_only() {
        let migrate = Message::MigrateRequest {
            chunk_id: ChunkId(5),
            owner: NodeId(2),
            is_backup: false,
        };
        assert!(matches!(migrate.to_backup(), Some(Message::MigrateRequest { is_backup: true, .. })));
        assert!(Message::PingSuperpeer.to_backup().is_none());
        assert!(Message::GetLookupRangeRequest { chunk_id: ChunkId(1) }.to_backup().is_none());
    }
}
