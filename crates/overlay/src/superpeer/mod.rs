//! Superpeer node.
//!
//! A superpeer owns the lookup trees and nameservice entries of the creators
//! between its predecessor and itself and keeps backup copies for the areas of
//! its predecessors.
//!
//! # Locking
//!
//! Three locks guard the state: `ring` (membership), `trees` (lookup trees by
//! creator) and `mappings` (nameservice). They are always taken in that order
//! and never held across a network call. Failure handling is additionally
//! serialized by a try-lock.
//!
//! # Module layout
//!
//! - `state`: ring membership and responsibility checks
//! - `handlers`: request handlers
//! - `maintenance`: shard transfer helpers used by stabilization and failure handling
//! - `failure`: superpeer and peer failure handling

mod failure;
mod handlers;
mod maintenance;
pub mod state;

pub use state::{RingState, Status};

use crate::backoff::{Backoff, CancellationToken};
use crate::boot::BootDirectory;
use crate::error::{OverlayError, Result};
use crate::events::OverlayHooks;
use crate::stabilization::{self, Stabilizer};
use corelib::{LookupTree, NameserviceTable, NodeId, OverlayConfig};
use parking_lot::{Mutex, MutexGuard};
use protocol::{JoinRequest, JoinResponse, Message, MessageHandler, Transport};
use replication::{BackupStrategy, SuccessorStrategy};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

pub struct Superpeer {
    node: NodeId,
    config: OverlayConfig,
    transport: Arc<dyn Transport>,
    boot: Arc<dyn BootDirectory>,
    hooks: OverlayHooks,
    strategy: Arc<dyn BackupStrategy>,
    ring: Mutex<RingState>,
    trees: Mutex<BTreeMap<NodeId, LookupTree>>,
    mappings: Mutex<NameserviceTable>,
    failure_lock: Mutex<()>,
    pending_failures: Mutex<VecDeque<NodeId>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Superpeer {
    /// Create a superpeer; call [`Superpeer::start`] or [`Superpeer::join`] to enter the ring.
    ///
    /// # Errors
    /// `Core(InvalidConfig)` if `config` does not validate
    pub fn new(
        config: OverlayConfig,
        transport: Arc<dyn Transport>,
        boot: Arc<dyn BootDirectory>,
        hooks: OverlayHooks,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let node = transport.local_node();
        let mappings = NameserviceTable::new(config.nameservice_capacity, config.nameservice_load_factor);
        Ok(Arc::new(Self {
            node,
            transport,
            boot,
            hooks,
            strategy: Arc::new(SuccessorStrategy::default()),
            ring: Mutex::new(RingState::new(node)),
            trees: Mutex::new(BTreeMap::new()),
            mappings: Mutex::new(mappings),
            failure_lock: Mutex::new(()),
            pending_failures: Mutex::new(VecDeque::new()),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            config,
        }))
    }

    /// Join the ring and start the stabilization thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.join()?;
        let handle = stabilization::spawn(self.stabilizer(), self.config.stabilization_interval(), self.cancel.clone())?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Bind the message handler and join the ring without a stabilization thread.
    ///
    /// Rounds can then be driven through [`Superpeer::stabilizer`].
    pub fn join(self: &Arc<Self>) -> Result<()> {
        let handler: Arc<dyn MessageHandler> = self.clone();
        self.transport.bind(Arc::downgrade(&handler));
        self.create_or_join()?;
        self.ring.lock().status = Status::Stable;
        info!(node = %self.node, "superpeer joined the overlay");
        Ok(())
    }

    /// Stabilization driver for this superpeer.
    pub fn stabilizer(self: &Arc<Self>) -> Stabilizer {
        Stabilizer::new(Arc::clone(self))
    }

    /// Stop the stabilization thread and interrupt pending waits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(node = %self.node, "stabilization thread panicked");
            }
        }
    }

    fn create_or_join(&self) -> Result<()> {
        let mut contact = self.boot.bootstrap().ok_or(OverlayError::NoSuperpeer)?;
        self.ring.lock().bootstrap = Some(contact);
        if contact == self.node {
            info!(node = %self.node, "setting up new ring");
            return Ok(());
        }

        let mut backoff = Backoff::new(&self.config.retry);
        let response = loop {
            trace!(node = %self.node, contact = %contact, "contacting superpeer to join the ring");
            let request = Message::JoinRequest(JoinRequest {
                node: self.node,
                is_superpeer: true,
            });
            match self.transport.request(contact, request) {
                Ok(Message::JoinResponse(resp)) => match resp.new_contact {
                    Some(next) => contact = next,
                    None => break resp,
                },
                Ok(other) => return Err(unexpected("join_request", &other)),
                Err(e) => {
                    warn!(node = %self.node, contact = %contact, error = %e, "join request failed");
                    backoff.wait(&self.cancel)?;
                    contact = self.boot.bootstrap().ok_or(OverlayError::NoSuperpeer)?;
                    if contact == self.node {
                        return Err(OverlayError::JoinFailed("bootstrap points at the joining node".into()));
                    }
                }
            }
        };
        self.apply_join_response(response);
        Ok(())
    }

    fn apply_join_response(&self, resp: JoinResponse) {
        {
            let mut ring = self.ring.lock();
            ring.superpeers = resp.superpeers.into_iter().filter(|sp| *sp != self.node).collect();
            ring.peers = resp.peers;
            ring.set_successor(resp.successor);
            ring.set_predecessor(resp.predecessor);
            debug!(node = %self.node, ring = %*ring, "applied join response");
        }
        self.store_incoming_backups(resp.shard);
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn status(&self) -> Status {
        self.ring.lock().status
    }

    /// Copy of the current membership.
    pub fn ring_snapshot(&self) -> RingState {
        self.ring.lock().clone()
    }

    pub fn predecessor(&self) -> Option<NodeId> {
        self.ring.lock().predecessor
    }

    pub fn successor(&self) -> Option<NodeId> {
        self.ring.lock().successor
    }

    pub fn superpeers(&self) -> Vec<NodeId> {
        self.ring.lock().superpeers.clone()
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.ring.lock().peers.clone()
    }

    /// True if no other superpeer is known.
    pub fn is_last_superpeer(&self) -> bool {
        self.ring.lock().is_alone()
    }

    /// Creators whose trees are stored here, primary or backup.
    pub fn creators(&self) -> Vec<NodeId> {
        self.trees.lock().keys().copied().collect()
    }

    /// Copy of the tree of `creator`.
    pub fn tree(&self, creator: NodeId) -> Option<LookupTree> {
        self.trees.lock().get(&creator).cloned()
    }

    /// Number of locally stored nameservice entries.
    pub fn nameservice_len(&self) -> usize {
        self.mappings.lock().len()
    }

    pub(crate) fn ring_lock(&self) -> MutexGuard<'_, RingState> {
        self.ring.lock()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Backup superpeers of this node's own area.
    pub(crate) fn backup_superpeers(&self) -> Vec<NodeId> {
        let ring = self.ring.lock();
        self.strategy.backups_for(self.node, &ring.superpeers)
    }
}

impl MessageHandler for Superpeer {
    fn on_message(&self, source: NodeId, msg: Message) -> Option<Message> {
        trace!(node = %self.node, source = %source, msg = msg.name(), "incoming");
        metrics::counter!("lookup_superpeer_messages_total", "msg" => msg.name()).increment(1);

        match msg {
            Message::JoinRequest(req) => Some(Message::JoinResponse(self.incoming_join(req))),
            Message::GetLookupRangeRequest { chunk_id } => Some(self.incoming_get_lookup_range(chunk_id)),
            Message::RemoveChunkIdsRequest { chunk_ids, is_backup } => {
                Some(self.incoming_remove_chunk_ids(&chunk_ids, is_backup))
            }
            Message::InsertNameserviceEntriesRequest { id, chunk_id, is_backup } => {
                Some(self.incoming_insert_nameservice_entry(id, chunk_id, is_backup))
            }
            Message::GetChunkIdForNameserviceEntryRequest { id } => Some(self.incoming_get_chunk_id(id)),
            Message::GetNameserviceEntryCountRequest => Some(self.incoming_get_nameservice_entry_count()),
            Message::GetNameserviceEntriesRequest => Some(self.incoming_get_nameservice_entries()),
            msg @ Message::MigrateRequest { .. } => Some(self.incoming_migrate(msg)),
            msg @ Message::MigrateRangeRequest { .. } => Some(self.incoming_migrate_range(msg)),
            Message::InitRangeRequest(req) => Some(self.incoming_init_range(req)),
            Message::GetAllBackupRangesRequest { node } => Some(self.incoming_get_all_backup_ranges(node)),
            msg @ Message::SetRestorerAfterRecovery { .. } => {
                self.incoming_set_restorer(msg);
                None
            }
            Message::SendBackups(shard) => {
                self.store_incoming_backups(shard);
                None
            }
            Message::AskAboutBackupsRequest { creators } => {
                Some(Message::AskAboutBackupsResponse(self.compare_and_return_backups(&creators)))
            }
            Message::AskAboutSuccessorRequest => Some(Message::AskAboutSuccessorResponse {
                successor: self.successor(),
            }),
            Message::NotifyAboutNewPredecessor { node } => {
                if self.ring.lock().offer_predecessor(node) {
                    info!(node = %self.node, predecessor = %node, "new predecessor");
                }
                None
            }
            Message::NotifyAboutNewSuccessor { node } => {
                if self.ring.lock().offer_successor(node) {
                    info!(node = %self.node, successor = %node, "new successor");
                }
                None
            }
            Message::NotifyAboutFailedPeer { node } => {
                self.remove_failed_peer(node);
                None
            }
            Message::PingSuperpeer => None,
            other => {
                warn!(node = %self.node, source = %source, msg = other.name(), "unexpected message");
                None
            }
        }
    }
}

pub(crate) fn unexpected(request: &'static str, got: &Message) -> OverlayError {
    OverlayError::UnexpectedResponse {
        request,
        got: got.name(),
    }
}
