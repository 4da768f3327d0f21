//! Successor backup strategy.
//!
//! Places backups on the superpeers following the primary clockwise. This is
//! the placement the overlay's responsibility arithmetic assumes: a superpeer
//! stores backups for exactly the areas of its predecessors, which is what
//! lets a successor take over after a failure without a state transfer.
//!
//! # Algorithm
//!
//! 1. Binary search the primary's position in the sorted superpeer list
//! 2. Walk clockwise, wrapping at the end of the list
//! 3. Stop after N superpeers or when the list is exhausted

use crate::strategy::BackupStrategy;
use corelib::ring::BACKUP_SUPERPEERS;
use corelib::NodeId;

/// N backups on the superpeers directly after the primary.
///
/// # Example
///
/// ```rust
/// use corelib::NodeId;
/// use replication::{BackupStrategy, SuccessorStrategy};
///
/// let strategy = SuccessorStrategy::default();
/// let others = vec![NodeId(10), NodeId(20), NodeId(30), NodeId(40)];
/// assert_eq!(strategy.backups_for(NodeId(35), &others), vec![NodeId(40), NodeId(10), NodeId(20)]);
/// ```
#[derive(Debug, Clone)]
pub struct SuccessorStrategy {
    replication_factor: usize,
}

impl SuccessorStrategy {
    /// Create a strategy with the given number of backups.
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }
}

impl Default for SuccessorStrategy {
    /// Three backups, matching the three predecessors a superpeer stores.
    fn default() -> Self {
        Self::new(BACKUP_SUPERPEERS)
    }
}

impl BackupStrategy for SuccessorStrategy {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn backups_for(&self, primary: NodeId, superpeers: &[NodeId]) -> Vec<NodeId> {
        let candidates: Vec<NodeId> = superpeers.iter().copied().filter(|sp| *sp != primary).collect();
        if self.replication_factor == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let start = candidates.partition_point(|sp| *sp < primary);
        candidates
            .iter()
            .cycle()
            .skip(start)
            .take(self.replication_factor.min(candidates.len()))
            .copied()
            .collect()
    }

    fn name(&self) -> &'static str {
        "SuccessorStrategy"
    }
}
