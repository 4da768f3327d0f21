//! Collaborator hooks.
//!
//! The overlay reports node failures and nameservice updates to an
//! [`OverlayListener`] and hands the backup ranges of a failed peer to a
//! [`RecoveryHandler`]. Both default to no-ops.

use corelib::{BackupRange, ChunkId, NodeId, NodeRole};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverlayEvent {
    NodeFailure { node: NodeId, role: NodeRole },
    NameserviceCacheUpdate { id: i32, chunk_id: ChunkId },
}

/// Receives overlay events; called from handler and stabilization threads.
pub trait OverlayListener: Send + Sync + 'static {
    fn on_event(&self, event: &OverlayEvent);
}

/// Starts recovery of a failed peer's data.
pub trait RecoveryHandler: Send + Sync + 'static {
    /// # Arguments
    /// * `failed` - The failed peer
    /// * `ranges` - Its own and migration backup ranges
    fn recover(&self, failed: NodeId, ranges: &[BackupRange]);
}

#[derive(Debug, Default)]
pub struct NoopListener;

impl OverlayListener for NoopListener {
    fn on_event(&self, _event: &OverlayEvent) {}
}

#[derive(Debug, Default)]
pub struct NoopRecovery;

impl RecoveryHandler for NoopRecovery {
    fn recover(&self, _failed: NodeId, _ranges: &[BackupRange]) {}
}

/// Listener forwarding every event into a channel.
#[derive(Clone)]
pub struct ChannelListener {
    tx: Sender<OverlayEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<OverlayEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl OverlayListener for ChannelListener {
    fn on_event(&self, event: &OverlayEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

/// Listener and recovery handler shared by a node.
#[derive(Clone)]
pub struct OverlayHooks {
    pub listener: Arc<dyn OverlayListener>,
    pub recovery: Arc<dyn RecoveryHandler>,
}

impl Default for OverlayHooks {
    fn default() -> Self {
        Self {
            listener: Arc::new(NoopListener),
            recovery: Arc::new(NoopRecovery),
        }
    }
}

impl OverlayHooks {
    pub fn with_listener(mut self, listener: Arc<dyn OverlayListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = recovery;
        self
    }
}
