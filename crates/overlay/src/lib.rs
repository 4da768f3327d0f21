//! Superpeer overlay and lookup service.
//!
//! This crate provides:
//! - Superpeers that form the ring, store lookup trees and nameservice
//!   entries, and replicate them to their successors
//! - The stabilization loop that repairs the ring and its backups
//! - Peers, the client side used by storage nodes
//! - Failure handling for superpeers, peers and terminals
//!
//! # Example
//!
//! ```rust,no_run
//! use corelib::{NodeId, NodeRole, OverlayConfig};
//! use overlay::{OverlayHooks, StaticBootDirectory, Superpeer};
//! use protocol::LocalNetwork;
//! use std::sync::Arc;
//!
//! let config = OverlayConfig::default();
//! let network = LocalNetwork::new(config.request_timeout(), config.dispatch_threads);
//! let boot = Arc::new(StaticBootDirectory::new());
//! boot.register(NodeId(0x1000), NodeRole::Superpeer);
//!
//! let transport = network.register(NodeId(0x1000)).unwrap();
//! let superpeer = Superpeer::new(config, transport, boot, OverlayHooks::default()).unwrap();
//! superpeer.start().unwrap();
//! superpeer.shutdown();
//! ```

pub mod backoff;
pub mod boot;
pub mod error;
pub mod events;
pub mod peer;
pub mod stabilization;
pub mod superpeer;

pub use backoff::{Backoff, CancellationToken};
pub use boot::{BootDirectory, StaticBootDirectory};
pub use error::{OverlayError, Result};
pub use events::{ChannelListener, OverlayEvent, OverlayHooks, OverlayListener, RecoveryHandler};
pub use peer::Peer;
pub use stabilization::Stabilizer;
pub use superpeer::{RingState, Status, Superpeer};
