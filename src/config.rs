//! Fabric configuration (§10): development/production/testing presets with validation and a
//! builder, in the style of the teacher's `RouterConfig` (`message_router/config.rs`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    ChannelCapacity, ConsensusThreshold, DedupCacheSize, DispatchWorkerCount, ExplorationRate,
    HeartbeatIntervalSecs, HistoryBufferSize, MaxRounds, PlateauDelta, TaskTimeoutSecs,
};

/// Configuration errors (§7, fatal at startup).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value failed a cross-field consistency check.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Offending field name.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Reading or writing the config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file's contents did not parse as TOML.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The config could not be serialized back to TOML.
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Complete fabric configuration: bus connectivity, agent runtime tuning, orchestrator debate
/// parameters, router exploration, and the gateway's session limits (§10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Redis connection string; `None` selects the in-memory bus (used for `testing()`).
    pub redis_url: Option<String>,
    /// SQLite database path; `None` selects the in-memory outcome store.
    pub sqlite_path: Option<PathBuf>,

    /// Heartbeat emission interval for agents.
    pub heartbeat_interval_secs: HeartbeatIntervalSecs,
    /// Bounded dispatch-worker pool size per agent.
    pub dispatch_worker_count: DispatchWorkerCount,
    /// Per-agent dispatch queue capacity.
    pub dispatch_queue_capacity: ChannelCapacity,
    /// Size of the duplicate-suppression LRU set each agent keeps.
    pub dedup_cache_size: DedupCacheSize,
    /// Size of the per-task conversational history ring buffer.
    pub history_buffer_size: HistoryBufferSize,

    /// Maximum debate rounds before the orchestrator forces a conclusion.
    pub max_rounds: MaxRounds,
    /// Wall-clock budget for a single task before the kill-switch fires.
    pub task_timeout_secs: TaskTimeoutSecs,
    /// Confidence threshold above which a refined response is accepted as consensus.
    pub consensus_threshold: ConsensusThreshold,
    /// Maximum spread between recent confidences still considered a plateau.
    pub plateau_delta: PlateauDelta,

    /// Floor/ceiling bound applied to the router's decayed exploration rate.
    pub exploration_rate_floor: ExplorationRate,
    /// Minimum samples in a cluster cell before it is trusted for scoring.
    pub min_cluster_samples: u64,

    /// Per-client `WebSocket` send-queue capacity.
    pub gateway_session_capacity: ChannelCapacity,

    /// Whether `tracing_subscriber` emits JSON instead of human-readable text.
    pub json_logs: bool,
}

impl FabricConfig {
    /// Development defaults: small queues, verbose logs, in-memory backends.
    ///
    /// # Panics
    ///
    /// Panics if a hardcoded literal is out of range for its domain type.
    #[must_use]
    pub fn development() -> Self {
        Self {
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            sqlite_path: None,
            heartbeat_interval_secs: HeartbeatIntervalSecs::try_new(5).unwrap(),
            dispatch_worker_count: DispatchWorkerCount::try_new(2).unwrap(),
            dispatch_queue_capacity: ChannelCapacity::try_new(256).unwrap(),
            dedup_cache_size: DedupCacheSize::try_new(256).unwrap(),
            history_buffer_size: HistoryBufferSize::try_new(32).unwrap(),
            max_rounds: MaxRounds::try_new(10).unwrap(),
            task_timeout_secs: TaskTimeoutSecs::try_new(120).unwrap(),
            consensus_threshold: ConsensusThreshold::try_new(0.85).unwrap(),
            plateau_delta: PlateauDelta::try_new(0.05).unwrap(),
            exploration_rate_floor: ExplorationRate::try_new(0.05).unwrap(),
            min_cluster_samples: 5,
            gateway_session_capacity: ChannelCapacity::try_new(256).unwrap(),
            json_logs: false,
        }
    }

    /// Production defaults: larger queues, longer timeouts, persistent storage, JSON logs.
    ///
    /// # Panics
    ///
    /// Panics if a hardcoded literal is out of range for its domain type.
    #[must_use]
    pub fn production() -> Self {
        Self {
            redis_url: Some("redis://redis:6379".to_string()),
            sqlite_path: Some(PathBuf::from("/var/lib/switchboard/outcomes.db")),
            heartbeat_interval_secs: HeartbeatIntervalSecs::try_new(10).unwrap(),
            dispatch_worker_count: DispatchWorkerCount::try_new(8).unwrap(),
            dispatch_queue_capacity: ChannelCapacity::try_new(10_000).unwrap(),
            dedup_cache_size: DedupCacheSize::try_new(8192).unwrap(),
            history_buffer_size: HistoryBufferSize::try_new(64).unwrap(),
            max_rounds: MaxRounds::try_new(10).unwrap(),
            task_timeout_secs: TaskTimeoutSecs::try_new(300).unwrap(),
            consensus_threshold: ConsensusThreshold::try_new(0.85).unwrap(),
            plateau_delta: PlateauDelta::try_new(0.05).unwrap(),
            exploration_rate_floor: ExplorationRate::try_new(0.05).unwrap(),
            min_cluster_samples: 20,
            gateway_session_capacity: ChannelCapacity::try_new(1_000).unwrap(),
            json_logs: true,
        }
    }

    /// Minimal-resource defaults for unit/integration tests: in-memory bus and store, short
    /// timeouts, no persistence.
    ///
    /// # Panics
    ///
    /// Panics if a hardcoded literal is out of range for its domain type.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            redis_url: None,
            sqlite_path: None,
            heartbeat_interval_secs: HeartbeatIntervalSecs::try_new(1).unwrap(),
            dispatch_worker_count: DispatchWorkerCount::try_new(1).unwrap(),
            dispatch_queue_capacity: ChannelCapacity::try_new(16).unwrap(),
            dedup_cache_size: DedupCacheSize::try_new(16).unwrap(),
            history_buffer_size: HistoryBufferSize::try_new(8).unwrap(),
            max_rounds: MaxRounds::try_new(3).unwrap(),
            task_timeout_secs: TaskTimeoutSecs::try_new(5).unwrap(),
            consensus_threshold: ConsensusThreshold::try_new(0.85).unwrap(),
            plateau_delta: PlateauDelta::try_new(0.05).unwrap(),
            exploration_rate_floor: ExplorationRate::try_new(0.05).unwrap(),
            min_cluster_samples: 1,
            gateway_session_capacity: ChannelCapacity::try_new(4).unwrap(),
            json_logs: false,
        }
    }

    /// Starts a builder seeded with development defaults.
    #[must_use]
    pub fn builder() -> FabricConfigBuilder {
        FabricConfigBuilder::new()
    }

    /// Validates cross-field consistency beyond what the domain types already enforce (§10).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the kill-switch round budget would exceed the
    /// task timeout's plausible round count, or if persistence is implied without a path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sqlite_path.is_none() && self.redis_url.is_none() && self.json_logs {
            // Plausible production misconfiguration: JSON logs but no real backends wired.
            return Err(ConfigError::Validation {
                field: "redis_url".to_string(),
                reason: "json_logs implies a production deployment, which requires redis_url and sqlite_path".to_string(),
            });
        }
        if self.min_cluster_samples == 0 {
            return Err(ConfigError::Validation {
                field: "min_cluster_samples".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.task_timeout_secs.as_duration() < std::time::Duration::from_secs(self.heartbeat_interval_secs.ttl_secs()) {
            return Err(ConfigError::Validation {
                field: "task_timeout_secs".to_string(),
                reason: "should be at least as long as the heartbeat liveness TTL".to_string(),
            });
        }
        Ok(())
    }

    /// Loads a [`FabricConfig`] from a TOML file, validating it before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Toml`] if it does
    /// not parse, or [`ConfigError::Validation`] if it fails consistency checks.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes this configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TomlSerialize`] or [`ConfigError::Io`] on failure.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder for custom [`FabricConfig`]s, starting from development defaults.
pub struct FabricConfigBuilder {
    config: FabricConfig,
}

impl FabricConfigBuilder {
    /// Starts a new builder seeded with development defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FabricConfig::development(),
        }
    }

    /// Sets the Redis connection string.
    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    /// Sets the SQLite database path.
    #[must_use]
    pub fn sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sqlite_path = Some(path.into());
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval_secs(mut self, interval: HeartbeatIntervalSecs) -> Self {
        self.config.heartbeat_interval_secs = interval;
        self
    }

    /// Sets the orchestrator's max debate rounds.
    #[must_use]
    pub fn max_rounds(mut self, max_rounds: MaxRounds) -> Self {
        self.config.max_rounds = max_rounds;
        self
    }

    /// Sets the per-task timeout.
    #[must_use]
    pub fn task_timeout_secs(mut self, timeout: TaskTimeoutSecs) -> Self {
        self.config.task_timeout_secs = timeout;
        self
    }

    /// Sets the consensus threshold.
    #[must_use]
    pub fn consensus_threshold(mut self, threshold: ConsensusThreshold) -> Self {
        self.config.consensus_threshold = threshold;
        self
    }

    /// Sets whether logs are emitted as JSON.
    #[must_use]
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.json_logs = enabled;
        self
    }

    /// Validates and returns the built configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the assembled configuration is inconsistent.
    pub fn build(self) -> Result<FabricConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for FabricConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_config_is_valid() {
        assert!(FabricConfig::development().validate().is_ok());
    }

    #[test]
    fn production_config_is_valid() {
        assert!(FabricConfig::production().validate().is_ok());
    }

    #[test]
    fn testing_config_is_valid() {
        assert!(FabricConfig::testing().validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_min_cluster_samples() {
        let config = FabricConfig::builder().json_logs(false).build().unwrap();
        assert!(!config.json_logs);
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = FabricConfig::development();
        let toml_text = toml::to_string_pretty(&config).unwrap();
        let restored: FabricConfig = toml::from_str(&toml_text).unwrap();
        assert_eq!(config.max_rounds, restored.max_rounds);
        assert_eq!(config.redis_url, restored.redis_url);
    }
}
