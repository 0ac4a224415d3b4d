//! Configuration management for agora
//!
//! Configuration is always passed explicitly to the hub and the consensus
//! manager; nothing here is process-global. A file at `.agora/config.toml`
//! under a root directory can supply the defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{AgoraError, Result};

/// Top-level agora configuration
///
/// Loaded from `.agora/config.toml` under a root directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgoraConfig {
    /// Message bus settings
    #[serde(default)]
    pub hub: HubConfig,

    /// Consensus engine settings
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

/// Collaboration hub settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// How long the dispatch loop waits on the queue before re-checking its
    /// running flag
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout used by `CollaborationHub::request`
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Default timeout for `delegate`
    #[serde(default = "default_delegation_timeout_ms")]
    pub delegation_timeout_ms: u64,

    /// Maximum messages retained in history (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,

    /// Buffer size of the delivery-failure channel
    #[serde(default = "default_channel_capacity")]
    pub failure_channel_capacity: usize,
}

/// Consensus manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Approval threshold for the default voting strategy
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Whether the default voting strategy waits for every listed voter
    #[serde(default)]
    pub require_all_votes: bool,

    /// Maximum decisions retained (unbounded when absent). Only finished
    /// decisions are ever evicted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_limit: Option<usize>,

    /// Buffer size of the decision-transition channel
    #[serde(default = "default_channel_capacity")]
    pub event_channel_capacity: usize,
}

// Default value providers
fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_delegation_timeout_ms() -> u64 {
    60_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_threshold() -> f64 {
    0.5
}

impl AgoraConfig {
    /// Load configuration from `.agora/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".agora/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| AgoraError::Config(format!("Failed to parse config file: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.agora/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".agora");
        std::fs::create_dir_all(&config_dir)?;

        let content = Self::default().to_toml()?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AgoraError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject values the hub or the manager cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.hub.poll_interval_ms == 0 {
            return Err(AgoraError::Config(
                "hub.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.hub.failure_channel_capacity == 0 || self.consensus.event_channel_capacity == 0 {
            return Err(AgoraError::Config(
                "channel capacities must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus.threshold) {
            return Err(AgoraError::Config(format!(
                "consensus.threshold must be within [0, 1], got {}",
                self.consensus.threshold
            )));
        }
        Ok(())
    }
}

impl HubConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn delegation_timeout(&self) -> Duration {
        Duration::from_millis(self.delegation_timeout_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            delegation_timeout_ms: default_delegation_timeout_ms(),
            history_limit: None,
            failure_channel_capacity: default_channel_capacity(),
        }
    }
}

impl ConsensusConfig {
    pub fn with_decision_limit(mut self, limit: usize) -> Self {
        self.decision_limit = Some(limit);
        self
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            require_all_votes: false,
            decision_limit: None,
            event_channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AgoraConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, AgoraConfig::default());
        assert_eq!(config.hub.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.hub.delegation_timeout(), Duration::from_secs(60));
        assert!(config.hub.history_limit.is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        AgoraConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".agora/config.toml").exists());

        let config = AgoraConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, AgoraConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".agora")).unwrap();
        std::fs::write(
            dir.path().join(".agora/config.toml"),
            "[hub]\nhistory_limit = 50\n\n[consensus]\nthreshold = 0.66\n",
        )
        .unwrap();

        let config = AgoraConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.hub.history_limit, Some(50));
        assert_eq!(config.hub.request_timeout_ms, 30_000);
        assert!((config.consensus.threshold - 0.66).abs() < f64::EPSILON);
        assert!(!config.consensus.require_all_votes);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".agora")).unwrap();
        std::fs::write(
            dir.path().join(".agora/config.toml"),
            "[consensus]\nthreshold = 1.5\n",
        )
        .unwrap();

        let err = AgoraConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, AgoraError::Config(_)));
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".agora")).unwrap();
        std::fs::write(dir.path().join(".agora/config.toml"), "[hub\n").unwrap();

        let err = AgoraConfig::load_or_default(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
