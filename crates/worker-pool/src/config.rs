//! Pool and worker configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub max_missed: u32,
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            timeout_seconds: 60,
            max_missed: 3,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_concurrent_processes: usize,
    pub task_timeout_seconds: u64,
    pub handshake_timeout_seconds: u64,
    pub heartbeat: HeartbeatConfig,
    /// Contains `states/` for persisted worker state and `logs/` for
    /// structured worker logs.
    pub working_dir: PathBuf,
    /// Interpreter used to launch worker modules.
    pub runtime: String,
    pub sweep_interval_seconds: u64,
    /// Grace period after a shutdown message before escalating to SIGTERM.
    pub graceful_shutdown_seconds: u64,
    /// Grace period after SIGTERM before SIGKILL.
    pub term_wait_seconds: u64,
    pub state_file_max_age_days: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: 50,
            task_timeout_seconds: 300,
            handshake_timeout_seconds: 30,
            heartbeat: HeartbeatConfig::default(),
            working_dir: PathBuf::from("."),
            runtime: "python3".to_string(),
            sweep_interval_seconds: 10,
            graceful_shutdown_seconds: 10,
            term_wait_seconds: 5,
            state_file_max_age_days: 7,
        }
    }
}

impl PoolConfig {
    pub fn states_dir(&self) -> PathBuf {
        self.working_dir.join("states")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.working_dir.join("logs")
    }
}

/// Per-worker configuration, serialized into the spawn command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub role: String,
    pub model_tier: String,
    /// Module path override; derived from the role when absent.
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl WorkerConfig {
    pub fn for_role(role: impl Into<String>, model_tier: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            model_tier: model_tier.into(),
            module: None,
            env: HashMap::new(),
            options: serde_json::Map::new(),
        }
    }

    /// Module launched for this worker: explicit override or the role's
    /// conventional agent module.
    pub fn module_path(&self) -> String {
        self.module
            .clone()
            .unwrap_or_else(|| format!("agents.{}", self.role))
    }
}
