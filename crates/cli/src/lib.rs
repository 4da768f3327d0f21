//! Simulation front end for the lookup overlay.
//!
//! Provides commands for:
//! - Printing the effective overlay configuration
//! - Running a ring of superpeers and peers on an in-process network,
//!   crashing a superpeer and checking that lookups still resolve

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult, SimulationReport};
pub use config::CliConfig;
