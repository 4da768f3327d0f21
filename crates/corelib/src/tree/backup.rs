//! Backup peer bookkeeping for lookup trees.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of backup slots per range.
pub const BACKUP_SLOTS: usize = 3;

/// Identifier of a backup range.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum RangeId {
    /// Range of chunks created by the owner, keyed by its first LocalID.
    Local(u64),
    /// Range holding chunks migrated to the owner, keyed by its range number.
    Migration(u32),
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeId::Local(start) => write!(f, "local:0x{:X}", start),
            RangeId::Migration(id) => write!(f, "migration:{}", id),
        }
    }
}

/// Up to three backup peers; an empty slot means "unassigned backup".
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct BackupPeers([Option<NodeId>; BACKUP_SLOTS]);

impl BackupPeers {
    /// Backup set with all slots unassigned.
    pub const fn empty() -> Self {
        Self([None; BACKUP_SLOTS])
    }

    /// Fill slots in order from `peers`; extra peers are ignored.
    pub fn from_slice(peers: &[NodeId]) -> Self {
        let mut slots = [None; BACKUP_SLOTS];
        for (slot, peer) in slots.iter_mut().zip(peers) {
            *slot = Some(*peer);
        }
        Self(slots)
    }

    pub fn slots(&self) -> [Option<NodeId>; BACKUP_SLOTS] {
        self.0
    }

    /// Assigned peers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().flatten().copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.0.contains(&Some(node))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Drop `failed`, shift the later slots down and put `replacement` last.
    ///
    /// # Returns
    /// `true` if `failed` was one of the backups
    pub fn replace(&mut self, failed: NodeId, replacement: Option<NodeId>) -> bool {
        let pos = match self.0.iter().position(|slot| *slot == Some(failed)) {
            Some(pos) => pos,
            None => return false,
        };
        for i in pos..BACKUP_SLOTS - 1 {
            self.0[i] = self.0[i + 1];
        }
        self.0[BACKUP_SLOTS - 1] = replacement;
        true
    }
}

impl fmt::Display for BackupPeers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, slot) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match slot {
                Some(node) => write!(f, "{}", node)?,
                None => write!(f, "-")?,
            }
        }
        write!(f, "]")
    }
}

/// Backup assignment of one range.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BackupRange {
    pub range_id: RangeId,
    pub peers: BackupPeers,
}

impl BackupRange {
    pub fn new(range_id: RangeId, peers: BackupPeers) -> Self {
        Self { range_id, peers }
    }
}
