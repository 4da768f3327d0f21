//! In-process network.
//!
//! Every registered node gets a mailbox served by a small pool of dispatch
//! threads. Messages are encoded into frames on the way in and decoded by the
//! receiving worker, so the full codec path is exercised. Each delivery waits
//! for the handler to finish: requests get the handler's response, one-way
//! messages an empty acknowledgement.
//!
//! `disconnect` simulates a crash: the node stops receiving and its own
//! outgoing messages fail as well.

use crate::codec;
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::transport::{MessageHandler, Transport};
use bytes::Bytes;
use corelib::NodeId;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

type HandlerSlot = Arc<RwLock<Option<Weak<dyn MessageHandler>>>>;

struct Envelope {
    source: NodeId,
    frame: Bytes,
    reply: Sender<Option<Bytes>>,
}

struct Mailbox {
    queue: Sender<Envelope>,
    handler: HandlerSlot,
}

struct NetworkInner {
    mailboxes: DashMap<NodeId, Arc<Mailbox>>,
    down: DashSet<NodeId>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    timeout: Duration,
    dispatch_threads: usize,
}

/// Shared in-process network; cheap to clone.
#[derive(Clone)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

impl LocalNetwork {
    /// Create a network.
    ///
    /// # Arguments
    /// * `timeout` - How long a sender waits for the handler to finish
    /// * `dispatch_threads` - Handler threads per registered node
    pub fn new(timeout: Duration, dispatch_threads: usize) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                mailboxes: DashMap::new(),
                down: DashSet::new(),
                workers: Mutex::new(Vec::new()),
                timeout,
                dispatch_threads: dispatch_threads.max(1),
            }),
        }
    }

    /// Register `node` and start its dispatch threads.
    ///
    /// Re-registering a disconnected node brings it back with an empty handler slot.
    pub fn register(&self, node: NodeId) -> Result<Arc<LocalTransport>> {
        let (queue, inbox) = channel::unbounded::<Envelope>();
        let handler: HandlerSlot = Arc::new(RwLock::new(None));

        let mut spawned = Vec::with_capacity(self.inner.dispatch_threads);
        for i in 0..self.inner.dispatch_threads {
            let inbox = inbox.clone();
            let handler = Arc::clone(&handler);
            let network = Arc::downgrade(&self.inner);
            let worker = std::thread::Builder::new()
                .name(format!("dispatch-{:04X}-{}", node.0, i))
                .spawn(move || dispatch_loop(node, inbox, handler, network))?;
            spawned.push(worker);
        }
        self.inner.workers.lock().extend(spawned);

        self.inner.down.remove(&node);
        self.inner.mailboxes.insert(node, Arc::new(Mailbox { queue, handler }));
        debug!(node = %node, "registered endpoint");

        Ok(Arc::new(LocalTransport {
            node,
            network: Arc::clone(&self.inner),
        }))
    }

    /// Crash `node`: drop its mailbox and fail all its traffic.
    pub fn disconnect(&self, node: NodeId) {
        self.inner.down.insert(node);
        self.inner.mailboxes.remove(&node);
        debug!(node = %node, "disconnected endpoint");
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        !self.inner.down.contains(&node) && self.inner.mailboxes.contains_key(&node)
    }

    /// Disconnect every node and wait for the dispatch threads to exit.
    pub fn shutdown(&self) {
        let nodes: Vec<NodeId> = self.inner.mailboxes.iter().map(|e| *e.key()).collect();
        for node in nodes {
            self.disconnect(node);
        }
        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
    }
}

fn dispatch_loop(node: NodeId, inbox: Receiver<Envelope>, handler: HandlerSlot, network: Weak<NetworkInner>) {
    for envelope in inbox.iter() {
        let alive = network.upgrade().map_or(false, |n| !n.down.contains(&node));
        if !alive {
            // Dropping the reply sender reports the node as unreachable.
            continue;
        }
        let msg = match codec::decode(&envelope.frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(node = %node, source = %envelope.source, error = %e, "dropping undecodable frame");
                continue;
            }
        };
        let target = handler.read().as_ref().and_then(Weak::upgrade);
        let target = match target {
            Some(target) => target,
            None => continue,
        };

        let response = match target.on_message(envelope.source, msg) {
            Some(resp) => match codec::encode(&resp) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!(node = %node, error = %e, "failed to encode response");
                    continue;
                }
            },
            None => None,
        };
        let _ = envelope.reply.send(response);
    }
    trace!(node = %node, "dispatch thread exiting");
}

/// Endpoint of one node on a [`LocalNetwork`].
pub struct LocalTransport {
    node: NodeId,
    network: Arc<NetworkInner>,
}

impl LocalTransport {
    fn deliver(&self, dest: NodeId, msg: &Message) -> Result<Option<Message>> {
        let inner = &self.network;
        if inner.down.contains(&self.node) || inner.down.contains(&dest) {
            return Err(TransportError::Unreachable(dest));
        }
        let mailbox = inner
            .mailboxes
            .get(&dest)
            .map(|m| Arc::clone(m.value()))
            .ok_or(TransportError::Unreachable(dest))?;

        trace!(source = %self.node, dest = %dest, msg = msg.name(), "delivering");
        let frame = codec::encode(msg)?;
        let (reply, answer) = channel::bounded(1);
        mailbox
            .queue
            .send(Envelope {
                source: self.node,
                frame,
                reply,
            })
            .map_err(|_| TransportError::Unreachable(dest))?;
        drop(mailbox);

        match answer.recv_timeout(inner.timeout) {
            Ok(Some(frame)) => Ok(Some(codec::decode(&frame)?)),
            Ok(None) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(dest)),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Unreachable(dest)),
        }
    }
}

impl Transport for LocalTransport {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn request(&self, dest: NodeId, msg: Message) -> Result<Message> {
        self.deliver(dest, &msg)?.ok_or(TransportError::NoResponse(dest))
    }

    fn send(&self, dest: NodeId, msg: Message) -> Result<()> {
        self.deliver(dest, &msg).map(|_| ())
    }

    fn bind(&self, handler: Weak<dyn MessageHandler>) {
        if let Some(mailbox) = self.network.mailboxes.get(&self.node) {
            *mailbox.handler.write() = Some(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl MessageHandler for Echo {
        fn on_message(&self, source: NodeId, msg: Message) -> Option<Message> {
            match msg {
                Message::AskAboutSuccessorRequest => {
                    Some(Message::AskAboutSuccessorResponse { successor: Some(source) })
                }
                _ => None,
            }
        }
    }

    fn network() -> LocalNetwork {
        LocalNetwork::new(Duration::from_millis(500), 2)
    }

    #[test]
    fn test_request_response() {
        let net = network();
        let a = net.register(NodeId(1)).unwrap();
        let b = net.register(NodeId(2)).unwrap();
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo);
        b.bind(Arc::downgrade(&echo));

        let resp = a.request(NodeId(2), Message::AskAboutSuccessorRequest).unwrap();
        assert!(matches!(resp, Message::AskAboutSuccessorResponse { successor: Some(n) } if n == NodeId(1)));
        assert!(a.send(NodeId(2), Message::PingSuperpeer).is_ok());
        assert!(matches!(
            a.request(NodeId(2), Message::PingSuperpeer),
            Err(TransportError::NoResponse(_))
        ));
        net.shutdown();
    }

    #[test]
    fn test_disconnect_fails_both_directions() {
        let net = network();
        let a = net.register(NodeId(1)).unwrap();
        let b = net.register(NodeId(2)).unwrap();
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo);
        a.bind(Arc::downgrade(&echo));
        b.bind(Arc::downgrade(&echo));

        net.disconnect(NodeId(2));
        assert!(!net.is_connected(NodeId(2)));
        assert!(matches!(a.send(NodeId(2), Message::PingSuperpeer), Err(TransportError::Unreachable(_))));
        assert!(matches!(b.send(NodeId(1), Message::PingSuperpeer), Err(TransportError::Unreachable(_))));
        assert!(matches!(a.send(NodeId(9), Message::PingSuperpeer), Err(TransportError::Unreachable(_))));
        net.shutdown();
    }

    #[test]
    fn test_unbound_handler_is_unreachable() {
        let net = network();
        let a = net.register(NodeId(1)).unwrap();
        let _b = net.register(NodeId(2)).unwrap();
        let err = a.request(NodeId(2), Message::PingSuperpeer).unwrap_err();
        assert!(err.is_connection_failure());
        net.shutdown();
    }
}
