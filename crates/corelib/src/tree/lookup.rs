//! Per-creator lookup tree.
//!
//! A `LookupTree` answers "which peer currently stores chunk X" for every
//! chunk ever created by one node. Instead of one entry per chunk it stores
//! only the boundaries where ownership changes: the owner of a LocalID is the
//! owner recorded at the smallest boundary key greater than or equal to it.
//! A sentinel boundary at `2^48` owned by the creator closes the namespace.
//!
//! # Example
//!
//! ```rust
//! use corelib::node::{ChunkId, NodeId};
//! use corelib::tree::{BackupPeers, LookupTree, RangeId};
//!
//! let creator = NodeId(0x2500);
//! let mut tree = LookupTree::new(10, creator);
//! tree.init_range(RangeId::Local(1), BackupPeers::empty());
//!
//! tree.migrate_range(ChunkId::new(creator, 10), ChunkId::new(creator, 19), NodeId(0x4000));
//! assert_eq!(tree.get_primary_peer(ChunkId::new(creator, 15)), Some(NodeId(0x4000)));
//! assert_eq!(tree.get_primary_peer(ChunkId::new(creator, 20)), Some(creator));
//! ```

use super::backup::{BackupPeers, BackupRange, RangeId};
use super::boundary::BoundaryTree;
use crate::node::{ChunkId, NodeId, MAX_LOCAL_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Boundary key closing the LocalID namespace (`2^48`).
pub const SENTINEL_LID: u64 = MAX_LOCAL_ID + 1;

/// Default B-tree order for lookup trees.
pub const DEFAULT_ORDER: usize = 10;

/// Inclusive LocalID interval sharing one owner.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct LocalIdRange {
    pub start: u64,
    pub end: u64,
}

impl LocalIdRange {
    pub fn contains(&self, local_id: u64) -> bool {
        self.start <= local_id && local_id <= self.end
    }
}

/// Answer to a location query.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LookupResult {
    /// Owner and the enclosing range with the same owner.
    Found { owner: NodeId, range: LocalIdRange },
    /// The creator's tree is unknown or was never initialized.
    NotFound,
}

impl LookupResult {
    pub fn owner(&self) -> Option<NodeId> {
        match self {
            LookupResult::Found { owner, .. } => Some(*owner),
            LookupResult::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LookupResult::Found { .. })
    }
}

/// Ownership map and backup assignments of one creator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupTree {
    boundaries: BoundaryTree,
    creator: NodeId,
    restorer: Option<NodeId>,
    online: bool,
    /// Own ranges, sorted by first LocalID.
    backup_ranges: Vec<(u64, BackupPeers)>,
    migration_ranges: BTreeMap<u32, BackupPeers>,
}

impl LookupTree {
    /// Create an empty tree for `creator`.
    ///
    /// The tree answers nothing until the first range is initialized.
    pub fn new(order: usize, creator: NodeId) -> Self {
        Self {
            boundaries: BoundaryTree::new(order),
            creator,
            restorer: None,
            online: true,
            backup_ranges: Vec::new(),
            migration_ranges: BTreeMap::new(),
        }
    }

    pub fn creator(&self) -> NodeId {
        self.creator
    }

    pub fn restorer(&self) -> Option<NodeId> {
        self.restorer
    }

    /// Record the peer that restored the creator's chunks after a failure.
    ///
    /// Removed chunks revert to the restorer from now on.
    pub fn set_restorer(&mut self, node: NodeId) {
        self.restorer = Some(node);
    }

    /// `false` once the creator failed.
    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Number of stored boundaries.
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Boundaries in LocalID order.
    pub fn entries(&self) -> Vec<(u64, NodeId)> {
        self.boundaries.entries()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.boundaries.validate()
    }

    /// Register a new range and its backup peers.
    ///
    /// A `Local` range is keyed by its first LocalID; re-initializing the same
    /// start replaces its backups. The first local range also inserts the
    /// creator-owned sentinel. A `Migration` range only records its backups.
    pub fn init_range(&mut self, range_id: RangeId, backups: BackupPeers) -> bool {
        match range_id {
            RangeId::Local(start) => {
                if self.boundaries.is_empty() {
                    self.boundaries.insert(SENTINEL_LID, self.creator);
                }
                match self.backup_ranges.binary_search_by_key(&start, |(s, _)| *s) {
                    Ok(i) => self.backup_ranges[i].1 = backups,
                    Err(i) => self.backup_ranges.insert(i, (start, backups)),
                }
            }
            RangeId::Migration(id) => {
                self.migration_ranges.insert(id, backups);
            }
        }
        true
    }

    /// Move one chunk to `owner`.
    ///
    /// # Returns
    /// `false` if the tree was never initialized
    pub fn migrate_object(&mut self, chunk_id: ChunkId, owner: NodeId) -> bool {
        if self.boundaries.is_empty() {
            return false;
        }
        let lid = chunk_id.local_id();
        self.assign(lid, lid, owner);
        true
    }

    /// Move all chunks in `[start, end]` to `owner`.
    ///
    /// # Returns
    /// `false` if the tree was never initialized or `start > end`
    pub fn migrate_range(&mut self, start: ChunkId, end: ChunkId, owner: NodeId) -> bool {
        let (start, end) = (start.local_id(), end.local_id());
        if self.boundaries.is_empty() || start > end {
            return false;
        }
        self.assign(start, end, owner);
        true
    }

    /// Current owner of a chunk, `None` for an uninitialized tree.
    pub fn get_primary_peer(&self, chunk_id: ChunkId) -> Option<NodeId> {
        self.boundaries.ceiling(chunk_id.local_id()).map(|(_, owner)| owner)
    }

    /// Owner of a chunk plus the full range of LocalIDs with the same boundary.
    pub fn get_metadata(&self, chunk_id: ChunkId) -> LookupResult {
        let (end, owner) = match self.boundaries.ceiling(chunk_id.local_id()) {
            Some(entry) => entry,
            None => return LookupResult::NotFound,
        };
        let start = self.boundaries.predecessor(end).map_or(0, |(key, _)| key + 1);
        LookupResult::Found {
            owner,
            range: LocalIdRange {
                start,
                end: end.min(MAX_LOCAL_ID),
            },
        }
    }

    /// Revert a deleted chunk to the restorer, or the creator if none is set.
    pub fn remove_object(&mut self, chunk_id: ChunkId) {
        if self.boundaries.is_empty() {
            return;
        }
        let lid = chunk_id.local_id();
        let owner = self.restorer.unwrap_or(self.creator);
        self.assign(lid, lid, owner);
    }

    /// Backup peers responsible for a chunk.
    ///
    /// Migrated chunks have no backups recorded here. Returns `None` for an
    /// uninitialized tree.
    pub fn get_backup_peers(&self, chunk_id: ChunkId, was_migrated: bool) -> Option<BackupPeers> {
        if self.boundaries.is_empty() {
            return None;
        }
        if was_migrated {
            return Some(BackupPeers::empty());
        }
        let lid = chunk_id.local_id();
        let idx = self.backup_ranges.partition_point(|(start, _)| *start <= lid);
        Some(if idx == 0 {
            BackupPeers::empty()
        } else {
            self.backup_ranges[idx - 1].1
        })
    }

    /// Drop `failed` from every backup set, appending `replacement` if given.
    pub fn remove_backup_peer(&mut self, failed: NodeId, replacement: Option<NodeId>) {
        for (_, peers) in self.backup_ranges.iter_mut() {
            peers.replace(failed, replacement);
        }
        for peers in self.migration_ranges.values_mut() {
            peers.replace(failed, replacement);
        }
    }

    /// Own ranges in LocalID order.
    pub fn local_backup_ranges(&self) -> Vec<BackupRange> {
        self.backup_ranges
            .iter()
            .map(|(start, peers)| BackupRange::new(RangeId::Local(*start), *peers))
            .collect()
    }

    /// Ranges holding chunks migrated to the creator.
    pub fn migration_backup_ranges(&self) -> Vec<BackupRange> {
        self.migration_ranges
            .iter()
            .map(|(id, peers)| BackupRange::new(RangeId::Migration(*id), *peers))
            .collect()
    }

    /// Own ranges followed by migration ranges.
    pub fn all_backup_ranges(&self) -> Vec<BackupRange> {
        let mut ranges = self.local_backup_ranges();
        ranges.extend(self.migration_backup_ranges());
        ranges
    }

    /// Make `owner` the owner of every LocalID in `[start, end]`.
    ///
    /// Keeps the boundary set minimal: ownership left of `start` is pinned by a
    /// boundary at `start - 1`, interior boundaries are dropped, and boundaries
    /// whose owner equals their right neighbour's are merged away.
    fn assign(&mut self, start: u64, end: u64, owner: NodeId) {
        if start > 0 && !self.boundaries.contains_key(start - 1) {
            if let Some((_, left_owner)) = self.boundaries.ceiling(start - 1) {
                self.boundaries.insert(start - 1, left_owner);
            }
        }

        for key in self.boundaries.keys_in(start, end) {
            self.boundaries.remove(key);
        }
        self.boundaries.insert(end, owner);

        if let Some((_, next_owner)) = self.boundaries.successor(end) {
            if next_owner == owner {
                self.boundaries.remove(end);
            }
        }
        if start > 0 {
            if let Some(left_owner) = self.boundaries.get(start - 1) {
                if self.boundaries.successor(start - 1).map(|(_, o)| o) == Some(left_owner) {
                    self.boundaries.remove(start - 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATOR: NodeId = NodeId(0x2500);
    const OTHER: NodeId = NodeId(0x4000);

    fn cid(lid: u64) -> ChunkId {
        ChunkId::new(CREATOR, lid)
    }

    fn initialized() -> LookupTree {
        let mut tree = LookupTree::new(DEFAULT_ORDER, CREATOR);
        tree.init_range(RangeId::Local(1), BackupPeers::from_slice(&[NodeId(1), NodeId(2), NodeId(3)]));
        tree
    }

    #[test]
    fn test_uninitialized_tree_answers_nothing() {
        let mut tree = LookupTree::new(DEFAULT_ORDER, CREATOR);
        assert_eq!(tree.get_primary_peer(cid(1)), None);
        assert_eq!(tree.get_metadata(cid(1)), LookupResult::NotFound);
        assert_eq!(tree.get_backup_peers(cid(1), false), None);
        assert!(!tree.migrate_object(cid(1), OTHER));
        assert!(!tree.migrate_range(cid(1), cid(5), OTHER));
    }

    #[test]
    fn test_init_range_owned_by_creator() {
        let tree = initialized();
        assert_eq!(tree.len(), 1, "only the sentinel should be stored");
        for lid in [1, 50, 100, MAX_LOCAL_ID] {
            assert_eq!(tree.get_primary_peer(cid(lid)), Some(CREATOR));
        }
    }

    #[test]
    fn test_migrate_range_edges() {
        let mut tree = initialized();
        assert!(tree.migrate_range(cid(10), cid(19), OTHER));
        assert_eq!(tree.get_primary_peer(cid(9)), Some(CREATOR));
        assert_eq!(tree.get_primary_peer(cid(10)), Some(OTHER));
        assert_eq!(tree.get_primary_peer(cid(19)), Some(OTHER));
        assert_eq!(tree.get_primary_peer(cid(20)), Some(CREATOR));
        assert!(!tree.migrate_range(cid(19), cid(10), OTHER), "reversed range must be rejected");
    }

    #[test]
    fn test_adjacent_migrations_merge() {
        let mut tree = initialized();
        tree.migrate_range(cid(10), cid(19), OTHER);
        let size = tree.len();
        tree.migrate_range(cid(20), cid(29), OTHER);
        assert_eq!(tree.len(), size, "adjacent range with same owner should merge");
        assert_eq!(
            tree.get_metadata(cid(25)),
            LookupResult::Found {
                owner: OTHER,
                range: LocalIdRange { start: 10, end: 29 }
            }
        );
    }

    #[test]
    fn test_migrate_back_restores_sentinel_only() {
        let mut tree = initialized();
        tree.migrate_range(cid(10), cid(19), OTHER);
        tree.migrate_range(cid(10), cid(19), CREATOR);
        assert_eq!(tree.entries(), vec![(SENTINEL_LID, CREATOR)]);
    }

    #[test]
    fn test_remove_object_reverts_to_restorer() {
        let mut tree = initialized();
        tree.migrate_range(cid(1), cid(100), OTHER);
        tree.set_restorer(NodeId(0x7000));
        tree.remove_object(cid(50));
        assert_eq!(tree.get_primary_peer(cid(50)), Some(NodeId(0x7000)));
        assert_eq!(tree.get_primary_peer(cid(49)), Some(OTHER));
        assert_eq!(tree.get_primary_peer(cid(51)), Some(OTHER));
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_metadata_range_of_sentinel() {
        let tree = initialized();
        assert_eq!(
            tree.get_metadata(cid(42)),
            LookupResult::Found {
                owner: CREATOR,
                range: LocalIdRange { start: 0, end: MAX_LOCAL_ID }
            }
        );
    }

    #[test]
    fn test_backup_peers_by_range() {
        let mut tree = initialized();
        tree.init_range(RangeId::Local(1000), BackupPeers::from_slice(&[NodeId(4), NodeId(5), NodeId(6)]));
        tree.init_range(RangeId::Migration(0), BackupPeers::from_slice(&[NodeId(7)]));

        let first = tree.get_backup_peers(cid(999), false);
        assert_eq!(first.map(|p| p.slots()[0]), Some(Some(NodeId(1))));
        let second = tree.get_backup_peers(cid(1000), false);
        assert_eq!(second.map(|p| p.slots()[0]), Some(Some(NodeId(4))));
        assert_eq!(tree.get_backup_peers(cid(0), false), Some(BackupPeers::empty()));
        assert_eq!(tree.get_backup_peers(cid(5000), true), Some(BackupPeers::empty()));

        let ranges = tree.all_backup_ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].range_id, RangeId::Migration(0));
    }

    #[test]
    fn test_remove_backup_peer_everywhere() {
        let mut tree = initialized();
        tree.init_range(RangeId::Migration(3), BackupPeers::from_slice(&[NodeId(2), NodeId(8)]));
        tree.remove_backup_peer(NodeId(2), Some(NodeId(9)));

        for range in tree.all_backup_ranges() {
            assert!(!range.peers.contains(NodeId(2)), "{} still lists the failed peer", range.range_id);
            assert!(range.peers.contains(NodeId(9)));
        }
    }
}
