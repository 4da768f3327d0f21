//! Wire protocol of the lookup overlay.
//!
//! This crate provides:
//! - The lookup message set and its (type, subtype) numbering
//! - A frame codec (header + bincode payload)
//! - Transport and handler traits used by superpeers and peers
//! - An in-process network for simulations and tests
//! - Shard snapshots exchanged between superpeers

pub mod codec;
pub mod error;
pub mod local;
pub mod message;
pub mod snapshot;
pub mod transport;

pub use error::{ProtocolError, TransportError};
pub use local::{LocalNetwork, LocalTransport};
pub use message::{InitRangeRequest, JoinRequest, JoinResponse, Message, WriteStatus, LOOKUP_MESSAGE_TYPE};
pub use snapshot::BackupShard;
pub use transport::{MessageHandler, Transport};
