//! Shard transfer between superpeers.
//!
//! A shard bundles lookup trees and exported nameservice entries. It is what a
//! joining superpeer receives from its successor, what stabilization pulls
//! from neighbours, and what failure handling pushes to new backups.

use corelib::nameservice::ENTRY_SIZE;
use corelib::{LookupTree, NodeId};
use serde::{Deserialize, Serialize};

/// Lookup trees plus nameservice entries (12-byte records).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackupShard {
    pub trees: Vec<LookupTree>,
    pub mappings: Vec<u8>,
}

impl BackupShard {
    pub fn new(trees: Vec<LookupTree>, mappings: Vec<u8>) -> Self {
        Self { trees, mappings }
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty() && self.mappings.is_empty()
    }

    /// Creators whose trees are contained.
    pub fn creators(&self) -> Vec<NodeId> {
        self.trees.iter().map(LookupTree::creator).collect()
    }

    /// Number of nameservice entries contained.
    pub fn mapping_count(&self) -> usize {
        self.mappings.len() / ENTRY_SIZE
    }
}
