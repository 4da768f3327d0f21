//! Backup placement strategies.
//!
//! A strategy decides which superpeers hold backup copies of the metadata a
//! superpeer is primary for.
//!
//! - **SuccessorStrategy**: the next N superpeers clockwise on the ring

pub mod successor;

pub use successor::SuccessorStrategy;

use corelib::NodeId;

/// Trait for backup placement strategies.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync) as they are shared
/// between handler threads and the stabilization thread.
pub trait BackupStrategy: Send + Sync + 'static {
    /// Number of backup superpeers this strategy selects.
    fn replication_factor(&self) -> usize;

    /// Backup superpeers for the metadata `primary` is responsible for.
    ///
    /// # Arguments
    /// * `primary` - Superpeer holding the primary copy
    /// * `superpeers` - Sorted list of the other known superpeers
    ///
    /// # Returns
    /// Up to `replication_factor()` distinct superpeers, never `primary` itself
    ///
    /// # Performance
    /// Should be O(log n + r) where n = superpeers, r = replication factor
    fn backups_for(&self, primary: NodeId, superpeers: &[NodeId]) -> Vec<NodeId>;

    /// Strategy name for logging.
    fn name(&self) -> &'static str;
}
