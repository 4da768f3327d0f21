//! Core library for the DXRAM lookup overlay.
//!
//! This crate provides the building blocks shared by superpeers and peers:
//! - Node and chunk identifiers
//! - Ring arithmetic for the superpeer overlay
//! - Range-compressed lookup trees
//! - The nameservice hash table and its ring placement
//! - Overlay configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod nameservice;
pub mod node;
pub mod ring;
pub mod tree;

pub use config::{OverlayConfig, RetryConfig};
pub use error::{Error, Result};
pub use nameservice::NameserviceTable;
pub use node::{ChunkId, NodeId, NodeRole};
pub use tree::{BackupPeers, BackupRange, LocalIdRange, LookupResult, LookupTree, RangeId};
