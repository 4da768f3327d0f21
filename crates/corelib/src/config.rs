//! Overlay configuration.
//!
//! Loaded from JSON by the binaries; every field has a default so partial
//! documents are accepted.

use crate::error::{Error, Result};
use crate::nameservice::{DEFAULT_CAPACITY, DEFAULT_LOAD_FACTOR};
use crate::tree::DEFAULT_ORDER;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for peer-side requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff delay.
    pub base_delay_ms: u64,
    /// Upper bound of the exponential backoff.
    pub max_delay_ms: u64,
    /// Give up after this many attempts; unlimited if unset.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed; unlimited if unset.
    pub deadline_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 10,
            max_delay_ms: 1000,
            max_attempts: None,
            deadline_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Settings shared by superpeers and peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// B-tree order of lookup trees.
    pub tree_order: usize,
    /// Initial slot count of the nameservice table.
    pub nameservice_capacity: usize,
    /// Fill ratio that triggers a nameservice rehash.
    pub nameservice_load_factor: f32,
    /// Pause between two stabilization rounds.
    pub stabilization_interval_ms: u64,
    /// Number of superpeers the cluster was configured with.
    pub initial_superpeers: usize,
    /// Time to wait for a response before treating the node as unreachable.
    pub request_timeout_ms: u64,
    /// Handler threads per node in the in-process network.
    pub dispatch_threads: usize,
    pub retry: RetryConfig,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            tree_order: DEFAULT_ORDER,
            nameservice_capacity: DEFAULT_CAPACITY,
            nameservice_load_factor: DEFAULT_LOAD_FACTOR,
            stabilization_interval_ms: 1000,
            initial_superpeers: 1,
            request_timeout_ms: 1000,
            dispatch_threads: 2,
            retry: RetryConfig::default(),
        }
    }
}

impl OverlayConfig {
    pub fn stabilization_interval(&self) -> Duration {
        Duration::from_millis(self.stabilization_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject values the overlay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tree_order == 0 {
            return Err(Error::InvalidConfig("tree_order must be at least 1".into()));
        }
        if !(self.nameservice_load_factor > 0.0 && self.nameservice_load_factor < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "nameservice_load_factor must be in (0, 1), got {}",
                self.nameservice_load_factor
            )));
        }
        if self.dispatch_threads == 0 {
            return Err(Error::InvalidConfig("dispatch_threads must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::InvalidConfig("retry.base_delay_ms exceeds retry.max_delay_ms".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OverlayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tree_order, 10);
        assert_eq!(config.nameservice_capacity, 1000);
    }

    #[test]
    fn test_partial_json() {
        let config: OverlayConfig =
            serde_json::from_str(r#"{"initial_superpeers": 3, "retry": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.initial_superpeers, 3);
        assert_eq!(config.retry.max_attempts, Some(5));
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.stabilization_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_bad_load_factor() {
        let config = OverlayConfig {
            nameservice_load_factor: 1.5,
            ..OverlayConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
