//! Superpeer ring arithmetic.
//!
//! Stateless helpers shared by superpeers and peers:
//! - circular interval tests on 16-bit ids
//! - sorted superpeer/peer membership lists
//! - responsibility areas and backup placement

pub mod interval;
pub mod membership;
pub mod responsibility;

pub use interval::{
    is_hash_in_superpeer_range, is_node_in_range, is_overlay_stable, is_peer_in_superpeer_range,
    is_superpeer_in_range, IntervalKind,
};
pub use membership::{contains_sorted, insert_sorted, predecessor_in, remove_sorted, successor_in};
pub use responsibility::{backup_superpeers, responsible_area, responsible_superpeer, BACKUP_SUPERPEERS};
