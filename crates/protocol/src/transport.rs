//! Transport abstractions.
//!
//! The overlay only needs two primitives: a synchronous request that blocks
//! until the response arrives (or the node is declared unreachable), and a
//! one-way send that reports whether the message was delivered. Timeouts are
//! reported as connection failures.

use crate::error::Result;
use crate::message::Message;
use corelib::NodeId;
use std::sync::Weak;

/// Receiver side of a node.
///
/// Handlers are invoked concurrently from the transport's dispatch threads.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle an incoming message.
    ///
    /// # Returns
    /// The response for requests, `None` for one-way messages
    fn on_message(&self, source: NodeId, msg: Message) -> Option<Message>;
}

/// Sender side of a node.
pub trait Transport: Send + Sync + 'static {
    /// Id of the node this transport belongs to.
    fn local_node(&self) -> NodeId;

    /// Send a request and wait for its response.
    ///
    /// # Errors
    /// `Unreachable`, `Timeout` or `NoResponse` if the node could not answer
    fn request(&self, dest: NodeId, msg: Message) -> Result<Message>;

    /// Deliver a one-way message.
    fn send(&self, dest: NodeId, msg: Message) -> Result<()>;

    /// Install the handler for incoming messages.
    ///
    /// Only a weak reference is kept so the handler can own its transport.
    fn bind(&self, handler: Weak<dyn MessageHandler>);
}
