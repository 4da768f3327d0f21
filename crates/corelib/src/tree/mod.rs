//! Range-compressed ownership trees.
//!
//! - `boundary`: arena B-tree of LocalID boundaries
//! - `lookup`: per-creator lookup tree built on top of it
//! - `backup`: backup peer sets and range identifiers

pub mod backup;
pub mod boundary;
pub mod lookup;

pub use backup::{BackupPeers, BackupRange, RangeId, BACKUP_SLOTS};
pub use boundary::BoundaryTree;
pub use lookup::{LocalIdRange, LookupResult, LookupTree, DEFAULT_ORDER, SENTINEL_LID};
