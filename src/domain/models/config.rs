//! Runtime configuration domain model.
//!
//! A single flat, serde-deserializable struct, validated after load
//! rather than through a generic builder, loaded by
//! `infrastructure::config::ConfigLoader`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    pub cpu_percent: f64,
    pub disk_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self { memory_mb: 2048, cpu_percent: 80.0, disk_mb: 10_240 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    pub max_concurrent_tasks: usize,
    pub default_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_base_secs: u64,
    pub retry_backoff_max_secs: u64,
    pub resource_limits: ResourceLimits,
    pub max_queue_size: usize,
    pub persistence_dir: String,
    pub enable_persistence: bool,
    pub health_check_interval_secs: u64,
    pub rebalance_interval_secs: u64,
    pub prediction_window: usize,
    pub checkpoint_interval_secs: u64,
    pub kill_timeout_ms: u64,
    pub cleanup_interval_secs: u64,
    pub consensus_threshold: f64,
    pub max_decomposition_depth: u32,
    pub enable_circuit_breaker: bool,
    pub enable_work_stealing: bool,
    pub enable_checkpointing: bool,
    pub enable_topology_awareness: bool,
    pub max_concurrent_workflows: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            default_timeout_ms: 300_000,
            retry_attempts: 3,
            retry_backoff_base_secs: 2,
            retry_backoff_max_secs: 60,
            resource_limits: ResourceLimits::default(),
            max_queue_size: 1000,
            persistence_dir: ".coordination/state".to_string(),
            enable_persistence: true,
            health_check_interval_secs: 30,
            rebalance_interval_secs: 60,
            prediction_window: 10,
            checkpoint_interval_secs: 30,
            kill_timeout_ms: 5_000,
            cleanup_interval_secs: 120,
            consensus_threshold: 0.5,
            max_decomposition_depth: 5,
            enable_circuit_breaker: true,
            enable_work_stealing: true,
            enable_checkpointing: true,
            enable_topology_awareness: true,
            max_concurrent_workflows: 20,
        }
    }
}
