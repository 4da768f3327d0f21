//! Node and chunk identifiers.
//!
//! Every participant in the overlay (superpeer, peer, terminal) is identified by
//! a compact 16-bit `NodeId`. All superpeers are ordered on a circular 16-bit
//! ring by that id. A `ChunkId` packs the id of the node that created a chunk
//! into its upper 16 bits, the remaining 48 bits are the creator-local id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits of a `ChunkId` reserved for the creator-local id.
pub const LOCAL_ID_BITS: u32 = 48;

/// Mask selecting the creator-local part of a `ChunkId`.
pub const LOCAL_ID_MASK: u64 = (1 << LOCAL_ID_BITS) - 1;

/// Largest valid creator-local id.
pub const MAX_LOCAL_ID: u64 = LOCAL_ID_MASK;

/// Compact identifier for a node in the cluster.
///
/// Newtype over `u16`; the numeric value doubles as the node's position on the
/// superpeer ring.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Raw 16-bit value.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Next position on the ring, wrapping at `0xFFFF`.
    #[inline]
    pub const fn next(self) -> NodeId {
        NodeId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for NodeId {
    fn from(raw: u16) -> Self {
        NodeId(raw)
    }
}

/// Globally unique chunk identifier: creator (16 bit) followed by local id (48 bit).
///
/// The creator part never changes, even after the chunk migrated to another
/// peer. Lookup metadata is therefore partitioned by creator.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl ChunkId {
    /// Build a chunk id from its creator and creator-local id.
    ///
    /// Bits of `local_id` above the 48-bit local part are discarded.
    ///
    /// # Example
    /// ```rust
    /// use corelib::node::{ChunkId, NodeId};
    ///
    /// let cid = ChunkId::new(NodeId(0x2500), 7);
    /// assert_eq!(cid.creator(), NodeId(0x2500));
    /// assert_eq!(cid.local_id(), 7);
    /// ```
    #[inline]
    pub const fn new(creator: NodeId, local_id: u64) -> Self {
        ChunkId(((creator.0 as u64) << LOCAL_ID_BITS) | (local_id & LOCAL_ID_MASK))
    }

    /// Node that created this chunk.
    #[inline]
    pub const fn creator(self) -> NodeId {
        NodeId((self.0 >> LOCAL_ID_BITS) as u16)
    }

    /// Creator-local id (lower 48 bits).
    #[inline]
    pub const fn local_id(self) -> u64 {
        self.0 & LOCAL_ID_MASK
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Role a node plays in the cluster.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum NodeRole {
    /// Metadata node on the overlay ring.
    Superpeer,
    /// Storage node holding chunk payloads.
    Peer,
    /// Client-only node; stores nothing and is never recovered.
    Terminal,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Superpeer => write!(f, "superpeer"),
            NodeRole::Peer => write!(f, "peer"),
            NodeRole::Terminal => write!(f, "terminal"),
        }
    }
}
