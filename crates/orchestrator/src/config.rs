//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use worker_pool::HeartbeatConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    pub ttl_seconds: u64,
    pub max_entries: u64,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub retention_days: u32,
    pub storage_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 365,
            storage_path: PathBuf::from("data/audit_trail/audit.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_concurrent_processes: usize,
    pub heartbeat: HeartbeatConfig,
    pub task_timeout_seconds: u64,
    pub rate_limit_threshold_percent: f64,
    pub response_cache: ResponseCacheConfig,
    pub quality_threshold: f64,
    pub evaluation_window: usize,
    pub daily_budget_usd: Option<f64>,
    pub audit: AuditConfig,
    pub min_confidence_threshold: f64,
    pub max_clarification_attempts: u32,
    pub default_buffer_percentage: f64,
    pub default_approval_timeout_hours: u64,
    pub max_concurrent_per_role: usize,
    pub max_retries: u32,
    /// Plan validation warns when the estimated cost crosses this line.
    pub high_cost_warning_threshold: f64,
    pub max_contexts: usize,
    pub context_ttl_hours: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: 50,
            heartbeat: HeartbeatConfig::default(),
            task_timeout_seconds: 300,
            rate_limit_threshold_percent: 90.0,
            response_cache: ResponseCacheConfig::default(),
            quality_threshold: 0.7,
            evaluation_window: 10,
            daily_budget_usd: None,
            audit: AuditConfig::default(),
            min_confidence_threshold: 0.5,
            max_clarification_attempts: 3,
            default_buffer_percentage: 0.20,
            default_approval_timeout_hours: 24,
            max_concurrent_per_role: 5,
            max_retries: 3,
            high_cost_warning_threshold: 10_000.0,
            max_contexts: 1000,
            context_ttl_hours: 24,
        }
    }
}
