//! Metadata replication for the lookup overlay.
//!
//! This crate provides:
//! - Pluggable backup placement strategies
//! - Best-effort fan-out of primary writes to backup superpeers

pub mod fanout;
pub mod strategy;

pub use fanout::{fan_out, FanOutReport};
pub use strategy::{BackupStrategy, SuccessorStrategy};
