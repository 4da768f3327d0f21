//! Stabilization loop of a superpeer.
//!
//! Every round:
//! 1. Notify predecessor and successor about this node
//! 2. Ask one other superpeer for its successor to find missing superpeers
//! 3. Pull missing shards from the superpeers of the responsible area and
//!    drop shards outside of it
//! 4. Send the superpeer list to every assigned peer (heartbeat)
//! 5. Log the overlay when it changed
//!
//! Unreachable nodes found on the way are handed to failure handling.

use crate::backoff::CancellationToken;
use crate::error::Result;
use crate::superpeer::{unexpected, Superpeer};
use corelib::ring::{insert_sorted, is_superpeer_in_range, responsible_superpeer, BACKUP_SUPERPEERS};
use corelib::NodeId;
use protocol::Message;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Superpeers per `fix_superpeers` call in large rings.
const FIX_SUPERPEERS_DIVISOR: usize = 300;

/// Drives stabilization rounds of one superpeer.
pub struct Stabilizer {
    superpeer: Arc<Superpeer>,
    next: usize,
    overlay_figure: String,
}

impl Stabilizer {
    pub fn new(superpeer: Arc<Superpeer>) -> Self {
        Self {
            superpeer,
            next: 0,
            overlay_figure: String::new(),
        }
    }

    /// Run one stabilization round.
    pub fn run_round(&mut self) {
        let sp = Arc::clone(&self.superpeer);
        debug!(node = %sp.node_id(), "stabilization round start");

        self.perform_stabilization();
        let repeats = (sp.config().initial_superpeers / FIX_SUPERPEERS_DIVISOR).max(1);
        for _ in 0..repeats {
            self.fix_superpeers();
        }
        if !sp.is_last_superpeer() {
            self.backup_maintenance();
            sp.take_over_peers_and_trees(sp.node_id());
        }
        self.ping_peers();
        self.print_overlay();

        debug!(node = %sp.node_id(), "stabilization round end");
    }

    /// Notify both neighbours; an unreachable neighbour is replaced and retried.
    pub fn perform_stabilization(&self) {
        let sp = &self.superpeer;
        let me = sp.node_id();

        while let Some(predecessor) = sp.predecessor() {
            trace!(node = %me, predecessor = %predecessor, "notifying predecessor");
            match sp.transport().send(predecessor, Message::NotifyAboutNewSuccessor { node: me }) {
                Ok(()) => break,
                Err(e) => {
                    warn!(node = %me, predecessor = %predecessor, error = %e, "predecessor unreachable");
                    sp.failure_handling(predecessor);
                    if sp.predecessor() == Some(predecessor) {
                        break;
                    }
                }
            }
        }

        while let Some(successor) = sp.successor() {
            trace!(node = %me, successor = %successor, "notifying successor");
            match sp.transport().send(successor, Message::NotifyAboutNewPredecessor { node: me }) {
                Ok(()) => break,
                Err(e) => {
                    warn!(node = %me, successor = %successor, error = %e, "successor unreachable");
                    sp.failure_handling(successor);
                    if sp.successor() == Some(successor) {
                        break;
                    }
                }
            }
        }
    }

    /// Ask the superpeer at the round-robin cursor for its successor and
    /// learn it if the local list does not know it.
    pub fn fix_superpeers(&mut self) {
        let sp = Arc::clone(&self.superpeer);
        let me = sp.node_id();
        let attempts = sp.superpeers().len() + 1;

        for _ in 0..attempts {
            let (contact, possible_successor) = {
                let ring = sp.ring_snapshot();
                let list = &ring.superpeers;
                if list.len() < 2 {
                    return;
                }
                if self.next >= list.len() {
                    self.next = 0;
                }
                let contact = list[self.next];
                let possible = list[(self.next + 1) % list.len()];
                self.next += 1;
                if Some(contact) == ring.predecessor {
                    continue;
                }
                (contact, possible)
            };

            trace!(node = %me, contact = %contact, "asking about successor");
            match sp.transport().request(contact, Message::AskAboutSuccessorRequest) {
                Ok(Message::AskAboutSuccessorResponse { successor }) => {
                    if let Some(his) = successor {
                        if his != possible_successor && his != me {
                            self.learn_superpeer(his);
                        }
                    }
                    return;
                }
                Ok(other) => {
                    error!(node = %me, "{}", unexpected("ask_about_successor_request", &other));
                    return;
                }
                Err(e) => {
                    warn!(node = %me, contact = %contact, error = %e, "superpeer unreachable");
                    sp.failure_handling(contact);
                    self.next = self.next.saturating_sub(1);
                }
            }
        }
    }

    fn learn_superpeer(&self, node: NodeId) {
        let sp = &self.superpeer;
        let mut ring = sp.ring_lock();
        if insert_sorted(&mut ring.superpeers, node) {
            info!(node = %sp.node_id(), superpeer = %node, "learned superpeer");
        }
    }

    /// Gather missing shards of the responsible area and delete the rest.
    pub fn backup_maintenance(&self) {
        let area = self.superpeer.ring_snapshot().responsible_area();
        trace!(node = %self.superpeer.node_id(), start = %area.0, end = %area.1, "responsible backup area");
        self.gather_backups(area);
        self.superpeer.delete_unnecessary_backups(area);
    }

    fn gather_backups(&self, area: (NodeId, NodeId)) {
        let sp = &self.superpeer;
        let me = sp.node_id();
        let ring = sp.ring_snapshot();
        if ring.superpeers.is_empty() {
            return;
        }

        let mut skipped: Vec<NodeId> = Vec::new();
        let live = |skipped: &[NodeId]| -> Vec<NodeId> {
            sp.superpeers().into_iter().filter(|s| !skipped.contains(s)).collect()
        };
        let (mut old, mut current) = if ring.superpeers.len() <= BACKUP_SUPERPEERS {
            (me, ring.successor)
        } else {
            (area.0, responsible_superpeer(area.0.next(), &ring.superpeers))
        };

        for _ in 0..=ring.superpeers.len() {
            let target = match gather_target(current, me, area.0) {
                Some(target) => target,
                None => return,
            };
            let held = sp.peers_in_responsible_area(old, target);
            trace!(node = %me, target = %target, "gathering backups");
            match sp.transport().request(target, Message::AskAboutBackupsRequest { creators: held }) {
                Ok(Message::AskAboutBackupsResponse(shard)) => sp.store_incoming_backups(shard),
                Ok(other) => {
                    error!(node = %me, "{}", unexpected("ask_about_backups_request", &other));
                    return;
                }
                Err(e) => {
                    warn!(node = %me, target = %target, error = %e, "superpeer unreachable");
                    sp.failure_handling(target);
                    skipped.push(target);
                    current = responsible_superpeer(old.next(), &live(&skipped));
                    continue;
                }
            }
            if Some(target) == sp.predecessor() {
                return;
            }
            old = target;
            current = responsible_superpeer(target.next(), &live(&skipped));
        }
    }

    /// Heartbeat: send the superpeer list to every assigned peer.
    pub fn ping_peers(&self) {
        let sp = &self.superpeer;
        let ring = sp.ring_snapshot();
        for peer in ring.peers {
            trace!(node = %sp.node_id(), peer = %peer, "pinging peer");
            let msg = Message::SendSuperpeers {
                superpeers: ring.superpeers.clone(),
            };
            if let Err(e) = sp.transport().send(peer, msg) {
                warn!(node = %sp.node_id(), peer = %peer, error = %e, "peer unreachable");
                sp.failure_handling(peer);
            }
        }
    }

    fn print_overlay(&mut self) {
        let figure = self.superpeer.ring_snapshot().to_string();
        if figure != self.overlay_figure {
            info!(node = %self.superpeer.node_id(), "{}", figure);
            self.overlay_figure = figure;
        }
    }
}

/// Next superpeer to ask for backups; `None` once the walk leaves `(area_start, me)`.
fn gather_target(current: Option<NodeId>, me: NodeId, area_start: NodeId) -> Option<NodeId> {
    current.filter(|target| *target != me && is_superpeer_in_range(*target, Some(area_start), Some(me)))
}

/// Run `stabilizer` every `interval` on a dedicated thread until `cancel` fires.
pub fn spawn(mut stabilizer: Stabilizer, interval: Duration, cancel: CancellationToken) -> Result<JoinHandle<()>> {
    let name = format!("stabilization-{:04X}", stabilizer.superpeer.node_id().raw());
    let handle = std::thread::Builder::new().name(name).spawn(move || {
        while !cancel.wait_timeout(interval) {
            stabilizer.run_round();
        }
        debug!(node = %stabilizer.superpeer.node_id(), "stabilization thread exiting");
    })?;
    Ok(handle)
}
