use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::RuntimeConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("maxConcurrentTasks must be at least 1, got {0}")]
    InvalidMaxConcurrentTasks(usize),

    #[error("maxQueueSize must be at least 1, got {0}")]
    InvalidMaxQueueSize(usize),

    #[error("retryBackoffBase ({0}s) must be less than retryBackoffMax ({1}s)")]
    InvalidBackoff(u64, u64),

    #[error("consensusThreshold must be in (0.0, 1.0], got {0}")]
    InvalidConsensusThreshold(f64),

    #[error("persistenceDir cannot be empty")]
    EmptyPersistenceDir,

    #[error("maxDecompositionDepth must be at least 1, got {0}")]
    InvalidMaxDecompositionDepth(u32),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`Serialized`)
    /// 2. `.coordination/config.yaml` (project config)
    /// 3. `.coordination/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`COORDINATION_*` prefix, highest priority)
    pub fn load() -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Yaml::file(".coordination/config.yaml"))
            .merge(Yaml::file(".coordination/local.yaml"))
            .merge(Env::prefixed("COORDINATION_").split("__"))
            .extract()
            .context("failed to extract runtime configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, skipping environment overrides.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
        if config.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidMaxConcurrentTasks(0));
        }
        if config.max_queue_size == 0 {
            return Err(ConfigError::InvalidMaxQueueSize(0));
        }
        if config.retry_backoff_base_secs >= config.retry_backoff_max_secs {
            return Err(ConfigError::InvalidBackoff(config.retry_backoff_base_secs, config.retry_backoff_max_secs));
        }
        if config.consensus_threshold <= 0.0 || config.consensus_threshold > 1.0 {
            return Err(ConfigError::InvalidConsensusThreshold(config.consensus_threshold));
        }
        if config.persistence_dir.trim().is_empty() {
            return Err(ConfigError::EmptyPersistenceDir);
        }
        if config.max_decomposition_depth == 0 {
            return Err(ConfigError::InvalidMaxDecompositionDepth(0));
        }
        Ok(())
    }
}
