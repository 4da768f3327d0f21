//! Command-line options.

use crate::commands::Command;
use anyhow::Context;
use clap::Parser;
use corelib::OverlayConfig;
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "lookup-sim")]
#[command(about = "Simulate a DXRAM lookup overlay on an in-process network")]
pub struct CliConfig {
    /// JSON file with overlay settings; missing fields use defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: Level,

    /// Override the lookup tree order
    #[arg(long)]
    pub tree_order: Option<usize>,

    /// Override the request timeout in milliseconds
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Print the report as pretty JSON
    #[arg(long)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Install the log subscriber, run the command and print its result.
    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(self.log_level)
            .init();

        let overlay = self.overlay_config()?;
        let result = self.command.execute(overlay)?;
        let output = if self.pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };
        println!("{}", output);
        Ok(())
    }

    /// Settings from the config file with command-line overrides applied.
    pub fn overlay_config(&self) -> anyhow::Result<OverlayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => OverlayConfig::default(),
        };
        if let Some(order) = self.tree_order {
            config.tree_order = order;
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.request_timeout_ms = timeout;
        }
        config.validate()?;
        Ok(config)
    }
}
