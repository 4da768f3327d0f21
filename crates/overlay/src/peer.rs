//! Peer side of the overlay.
//!
//! A peer is a storage node attached to one superpeer. It does not store any
//! lookup metadata itself; every operation is a request to the superpeer
//! responsible for the key, retried with backoff until a superpeer gives a
//! definitive answer.
//!
//! # Resolution
//!
//! The responsible superpeer is the first known superpeer at or after the key
//! on the ring. While the known superpeer list may be stale (after a failed
//! request, or while the number of superpeers differs from the configured
//! one) resolution asks the predecessor of the candidate for its successor
//! and follows the answer.

use crate::backoff::{Backoff, CancellationToken};
use crate::boot::BootDirectory;
use crate::error::{OverlayError, Result};
use crate::events::{OverlayEvent, OverlayHooks};
use crate::superpeer::unexpected;
use corelib::hash::nameservice_position;
use corelib::ring::{
    insert_sorted, is_node_in_range, is_overlay_stable, predecessor_in, responsible_superpeer, IntervalKind,
};
use corelib::{BackupRange, ChunkId, LookupResult, NameserviceTable, NodeId, OverlayConfig, RangeId};
use parking_lot::Mutex;
use protocol::{InitRangeRequest, JoinRequest, Message, MessageHandler, Transport, WriteStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Clone, Debug, Default)]
struct PeerState {
    my_superpeer: Option<NodeId>,
    superpeers: Vec<NodeId>,
}

pub struct Peer {
    node: NodeId,
    config: OverlayConfig,
    transport: Arc<dyn Transport>,
    boot: Arc<dyn BootDirectory>,
    hooks: OverlayHooks,
    state: Mutex<PeerState>,
    cancel: CancellationToken,
}

impl Peer {
    pub fn new(
        config: OverlayConfig,
        transport: Arc<dyn Transport>,
        boot: Arc<dyn BootDirectory>,
        hooks: OverlayHooks,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            node: transport.local_node(),
            config,
            transport,
            boot,
            hooks,
            state: Mutex::new(PeerState::default()),
            cancel: CancellationToken::new(),
        }))
    }

    /// Bind the message handler and join the overlay through the bootstrap.
    ///
    /// Follows redirections until a superpeer accepts the peer.
    pub fn join(self: &Arc<Self>) -> Result<()> {
        let handler: Arc<dyn MessageHandler> = self.clone();
        self.transport.bind(Arc::downgrade(&handler));

        let mut contact = self.boot.bootstrap().ok_or(OverlayError::NoSuperpeer)?;
        let mut backoff = Backoff::new(&self.config.retry);
        let superpeers = loop {
            trace!(node = %self.node, contact = %contact, "contacting superpeer to join the overlay");
            let request = Message::JoinRequest(JoinRequest {
                node: self.node,
                is_superpeer: false,
            });
            match self.transport.request(contact, request) {
                Ok(Message::JoinResponse(resp)) => match resp.new_contact {
                    Some(next) => contact = next,
                    None => break resp.superpeers,
                },
                Ok(other) => return Err(unexpected("join_request", &other)),
                Err(e) => {
                    warn!(node = %self.node, contact = %contact, error = %e, "join request failed");
                    backoff.wait(&self.cancel)?;
                    contact = self.boot.bootstrap().ok_or(OverlayError::NoSuperpeer)?;
                }
            }
        };

        let mut state = self.state.lock();
        state.superpeers = superpeers;
        insert_sorted(&mut state.superpeers, contact);
        state.my_superpeer = Some(contact);
        info!(node = %self.node, superpeer = %contact, "peer joined the overlay");
        Ok(())
    }

    /// Interrupt pending retries.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Superpeer this peer is assigned to.
    pub fn my_superpeer(&self) -> Option<NodeId> {
        self.state.lock().my_superpeer
    }

    pub fn superpeers(&self) -> Vec<NodeId> {
        self.state.lock().superpeers.clone()
    }

    /// Owner and range of `chunk_id`.
    ///
    /// A `NotFound` answer is only trusted after the responsible superpeer
    /// has been confirmed; otherwise the lookup is repeated with a verified
    /// resolution.
    pub fn get_lookup_range(&self, chunk_id: ChunkId) -> Result<LookupResult> {
        self.with_retry("get_lookup_range", |peer, check| {
            let contact = peer.resolve(chunk_id.creator(), check)?;
            match peer.transport.request(contact, Message::GetLookupRangeRequest { chunk_id })? {
                Message::GetLookupRangeResponse {
                    result: LookupResult::NotFound,
                } if !check => Ok(None),
                Message::GetLookupRangeResponse { result } => Ok(Some(result)),
                other => Err(unexpected("get_lookup_range_request", &other)),
            }
        })
    }

    /// Remove lookup metadata of `chunk_ids`, grouped by creator.
    pub fn remove_chunk_ids(&self, chunk_ids: &[ChunkId]) -> Result<()> {
        let mut by_creator: BTreeMap<NodeId, Vec<ChunkId>> = BTreeMap::new();
        for chunk_id in chunk_ids {
            by_creator.entry(chunk_id.creator()).or_default().push(*chunk_id);
        }

        for (creator, chunk_ids) in by_creator {
            let msg = Message::RemoveChunkIdsRequest {
                chunk_ids,
                is_backup: false,
            };
            let backups = self.with_retry("remove_chunk_ids", |peer, check| {
                let contact = peer.resolve(creator, check)?;
                match peer.transport.request(contact, msg.clone())? {
                    Message::RemoveChunkIdsResponse { backup_superpeers } => Ok(backup_superpeers),
                    other => Err(unexpected("remove_chunk_ids_request", &other)),
                }
            })?;
            self.replicate(&backups, &msg);
        }
        Ok(())
    }

    /// Register `id -> chunk_id` in the nameservice.
    ///
    /// # Errors
    /// `InvalidNameserviceId` if `id` is negative
    pub fn insert_nameservice_entry(&self, id: i32, chunk_id: ChunkId) -> Result<()> {
        check_nameservice_id(id)?;
        let msg = Message::InsertNameserviceEntriesRequest {
            id,
            chunk_id,
            is_backup: false,
        };
        let position = nameservice_position(id);
        let backups = self.with_retry("insert_nameservice_entry", |peer, check| {
            let contact = peer.resolve(position, check)?;
            match peer.transport.request(contact, msg.clone())? {
                Message::InsertNameserviceEntriesResponse { backup_superpeers } => Ok(backup_superpeers),
                other => Err(unexpected("insert_nameservice_entries_request", &other)),
            }
        })?;
        self.replicate(&backups, &msg);
        Ok(())
    }

    /// Chunk registered under `id`.
    ///
    /// Without a timeout the first definitive answer is returned. With a
    /// timeout the lookup is repeated until the entry shows up or the timeout
    /// expires.
    pub fn get_chunk_id_for_nameservice_entry(&self, id: i32, timeout: Option<Duration>) -> Result<Option<ChunkId>> {
        check_nameservice_id(id)?;
        let position = nameservice_position(id);
        let started = Instant::now();
        let poll = self.config.retry.base_delay();

        loop {
            let chunk_id = self.with_retry("get_chunk_id_for_nameservice_entry", |peer, check| {
                let contact = peer.resolve(position, check)?;
                match peer
                    .transport
                    .request(contact, Message::GetChunkIdForNameserviceEntryRequest { id })?
                {
                    Message::GetChunkIdForNameserviceEntryResponse { chunk_id } => Ok(Some(chunk_id)),
                    other => Err(unexpected("get_chunk_id_for_nameservice_entry_request", &other)),
                }
            })?;

            let timeout = match (chunk_id, timeout) {
                (Some(_), _) | (None, None) => return Ok(chunk_id),
                (None, Some(timeout)) => timeout,
            };
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            if self.cancel.wait_timeout(poll.min(timeout - elapsed)) {
                return Err(OverlayError::Cancelled);
            }
        }
    }

    /// Number of nameservice entries, summed over the primary areas of all superpeers.
    pub fn get_nameservice_entry_count(&self) -> Result<u64> {
        let mut count = 0;
        for superpeer in self.superpeers() {
            match self
                .transport
                .request(superpeer, Message::GetNameserviceEntryCountRequest)?
            {
                Message::GetNameserviceEntryCountResponse { count: c } => count += c,
                other => return Err(unexpected("get_nameservice_entry_count_request", &other)),
            }
        }
        Ok(count)
    }

    /// All nameservice entries known to the reachable superpeers, sorted by id.
    pub fn get_nameservice_entries(&self) -> Result<Vec<(i32, ChunkId)>> {
        let mut entries = Vec::new();
        for superpeer in self.superpeers() {
            match self.transport.request(superpeer, Message::GetNameserviceEntriesRequest) {
                Ok(Message::GetNameserviceEntriesResponse { entries: data }) => {
                    entries.extend(NameserviceTable::decode(&data)?);
                }
                Ok(other) => return Err(unexpected("get_nameservice_entries_request", &other)),
                Err(e) => warn!(node = %self.node, superpeer = %superpeer, error = %e, "skipping unreachable superpeer"),
            }
        }
        entries.sort_unstable();
        entries.dedup();
        Ok(entries)
    }

    /// Move ownership of a single chunk to `target`.
    pub fn migrate(&self, chunk_id: ChunkId, target: NodeId) -> Result<()> {
        let msg = Message::MigrateRequest {
            chunk_id,
            owner: target,
            is_backup: false,
        };
        self.with_retry("migrate", |peer, check| {
            let contact = peer.resolve(chunk_id.creator(), check)?;
            match peer.transport.request(contact, msg.clone())? {
                Message::MigrateResponse { status } => write_outcome(status, chunk_id.creator(), contact),
                other => Err(unexpected("migrate_request", &other)),
            }
        })
    }

    /// Move ownership of `[start, end]` to `target`.
    ///
    /// # Errors
    /// `MixedCreators` if the bounds have different creators, `InvalidRange`
    /// if `start` lies after `end`
    pub fn migrate_range(&self, start: ChunkId, end: ChunkId, target: NodeId) -> Result<()> {
        if start.creator() != end.creator() {
            return Err(corelib::Error::MixedCreators {
                start: start.0,
                end: end.0,
            }
            .into());
        }
        if start.local_id() > end.local_id() {
            return Err(corelib::Error::InvalidRange {
                start: start.0,
                end: end.0,
            }
            .into());
        }

        let msg = Message::MigrateRangeRequest {
            start,
            end,
            owner: target,
            is_backup: false,
        };
        self.with_retry("migrate_range", |peer, check| {
            let contact = peer.resolve(start.creator(), check)?;
            match peer.transport.request(contact, msg.clone())? {
                Message::MigrateRangeResponse { status } => write_outcome(status, start.creator(), contact),
                other => Err(unexpected("migrate_range_request", &other)),
            }
        })
    }

    /// Register a new backup range of `owner`.
    pub fn init_range(&self, owner: NodeId, range_id: RangeId, backups: &[NodeId]) -> Result<()> {
        let msg = Message::InitRangeRequest(InitRangeRequest {
            owner,
            range_id,
            backups: backups.to_vec(),
            is_backup: false,
        });
        self.with_retry("init_range", |peer, check| {
            let contact = peer.resolve(owner, check)?;
            match peer.transport.request(contact, msg.clone())? {
                Message::InitRangeResponse { status } => write_outcome(status, owner, contact),
                other => Err(unexpected("init_range_request", &other)),
            }
        })
    }

    /// Backup ranges of `node`; empty if the verified responsible superpeer does not know it.
    pub fn get_all_backup_ranges(&self, node: NodeId) -> Result<Vec<BackupRange>> {
        self.with_retry("get_all_backup_ranges", |peer, check| {
            let contact = peer.resolve(node, check)?;
            match peer
                .transport
                .request(contact, Message::GetAllBackupRangesRequest { node })?
            {
                Message::GetAllBackupRangesResponse { ranges: None } if check => Ok(Some(Vec::new())),
                Message::GetAllBackupRangesResponse { ranges } => Ok(ranges),
                other => Err(unexpected("get_all_backup_ranges_request", &other)),
            }
        })
    }

    /// Record this peer as restorer of the chunks of the failed `owner`.
    pub fn set_restorer_after_recovery(&self, owner: NodeId) -> Result<()> {
        let msg = Message::SetRestorerAfterRecovery {
            owner,
            restorer: self.node,
            is_backup: false,
        };
        self.with_retry("set_restorer_after_recovery", |peer, check| {
            let contact = peer.resolve(owner, check)?;
            peer.transport.send(contact, msg.clone())?;
            Ok(Some(()))
        })
    }

    /// True if neither the assigned superpeer nor any other known superpeer answers.
    pub fn all_superpeers_down(&self) -> bool {
        let (mine, superpeers) = {
            let state = self.state.lock();
            (state.my_superpeer, state.superpeers.clone())
        };
        let candidates = mine.into_iter().chain(superpeers.into_iter().filter(|s| Some(*s) != mine));
        for superpeer in candidates {
            if self.transport.send(superpeer, Message::PingSuperpeer).is_ok() {
                return false;
            }
        }
        true
    }

    /// Superpeer responsible for `key`.
    ///
    /// With `check` set the candidate is confirmed by asking its predecessor
    /// for its successor; unreachable or silent predecessors end the walk with
    /// the best candidate so far.
    fn resolve(&self, key: NodeId, check: bool) -> Result<NodeId> {
        let superpeers = self.superpeers();
        let mut responsible = responsible_superpeer(key, &superpeers).ok_or(OverlayError::NoSuperpeer)?;
        if !check || superpeers.len() < 2 {
            return Ok(responsible);
        }

        let mut predecessor = match predecessor_in(&superpeers, responsible) {
            Some(p) => p,
            None => return Ok(responsible),
        };
        for _ in 0..superpeers.len() {
            let his_successor = match self.transport.request(predecessor, Message::AskAboutSuccessorRequest) {
                Ok(Message::AskAboutSuccessorResponse { successor: Some(s) }) => s,
                Ok(_) => break,
                Err(e) => {
                    trace!(node = %self.node, superpeer = %predecessor, error = %e, "confirmation hop failed");
                    break;
                }
            };
            if his_successor == responsible {
                break;
            }
            if is_node_in_range(key, predecessor, his_successor, IntervalKind::UpperClosed) {
                responsible = his_successor;
                break;
            }
            predecessor = his_successor;
        }
        Ok(responsible)
    }

    /// Repeat `attempt` until it yields a value.
    ///
    /// `Ok(None)` (not responsible) and connection failures switch to verified
    /// resolution and back off; every other error is returned as is.
    fn with_retry<T>(&self, op: &'static str, mut attempt: impl FnMut(&Self, bool) -> Result<Option<T>>) -> Result<T> {
        let mut backoff = Backoff::new(&self.config.retry);
        let mut check = !self.is_overlay_stable();
        loop {
            match attempt(self, check) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!(node = %self.node, op, "superpeer not responsible, retrying"),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!(node = %self.node, op, error = %e, "request failed, retrying"),
            }
            check = true;
            metrics::counter!("lookup_peer_retries_total", "op" => op).increment(1);
            backoff.wait(&self.cancel)?;
        }
    }

    fn is_overlay_stable(&self) -> bool {
        is_overlay_stable(self.config.initial_superpeers, self.state.lock().superpeers.len())
    }

    fn replicate(&self, backups: &[NodeId], msg: &Message) {
        let report = replication::fan_out(self.transport.as_ref(), backups, msg);
        if !report.all_delivered() {
            debug!(node = %self.node, msg = msg.name(), failed = ?report.failed, "backup fan-out incomplete");
        }
    }
}

impl MessageHandler for Peer {
    fn on_message(&self, source: NodeId, msg: Message) -> Option<Message> {
        trace!(node = %self.node, source = %source, msg = msg.name(), "incoming");
        match msg {
            Message::SendSuperpeers { superpeers } => {
                let mut state = self.state.lock();
                state.superpeers = superpeers;
                insert_sorted(&mut state.superpeers, source);
                state.superpeers.retain(|s| *s != self.node);
                if state.my_superpeer != Some(source)
                    && responsible_superpeer(self.node, &state.superpeers) == Some(source)
                {
                    info!(node = %self.node, superpeer = %source, "switching superpeer");
                    state.my_superpeer = Some(source);
                }
            }
            Message::NameserviceUpdatePeerCaches { id, chunk_id } => {
                self.hooks
                    .listener
                    .on_event(&OverlayEvent::NameserviceCacheUpdate { id, chunk_id });
            }
            other => warn!(node = %self.node, source = %source, msg = other.name(), "unexpected message"),
        }
        None
    }
}

fn check_nameservice_id(id: i32) -> Result<()> {
    if id < 0 {
        return Err(corelib::Error::InvalidNameserviceId(i64::from(id)).into());
    }
    Ok(())
}

/// Map a superpeer's write status to a retry decision.
fn write_outcome(status: WriteStatus, creator: NodeId, contact: NodeId) -> Result<Option<()>> {
    match status {
        WriteStatus::Applied => Ok(Some(())),
        WriteStatus::NotResponsible => Ok(None),
        WriteStatus::Uninitialized => Err(OverlayError::UninitializedTree(creator)),
        WriteStatus::Rejected => Err(OverlayError::Rejected(contact)),
    }
}
