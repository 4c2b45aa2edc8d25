//! Model gateway - registry, cost and performance tracking, rate limiting,
//! quality evaluation, and routing for backend model endpoints
//!
//! The gateway governs every model call the kernel makes: which model serves
//! a request, whether the budget and rate limits allow it, what it cost, how
//! it performed, and whether its quality warrants switching away from it.
//! Actual inference lives behind the [`ModelClient`] capability.

pub mod clock;
pub mod cost_tracker;
pub mod evaluator;
pub mod metrics_exporter;
pub mod models;
pub mod performance_monitor;
pub mod rate_limiter;
pub mod registry;
pub mod response_cache;
pub mod router;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cost_tracker::{CostFilters, CostTracker};
pub use evaluator::ResponseEvaluator;
pub use metrics_exporter::GatewayMetrics;
pub use models::{
    BudgetStatus, CostRecord, CostSummary, HourlyCost, ModelMetadata, ModelPerformance,
    ModelRequest, ModelResponse, ModelTier, PerformanceRecord, QualityScore, RateLimitStatus,
    RateLimits, RequestConstraints, TaskCost,
};
pub use performance_monitor::PerformanceMonitor;
pub use rate_limiter::RateLimiter;
pub use registry::ModelRegistry;
pub use response_cache::ResponseCache;
pub use router::{ModelClient, ModelRouter, RankedModel, RoutedResponse, RouterConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("no available model for request")]
    NoAvailableModel { retry_after_seconds: Option<f64> },

    #[error("rate limited: {model_id}")]
    RateLimited {
        model_id: String,
        retry_after_seconds: Option<f64>,
    },

    #[error("daily budget exceeded: spent {spent:.4} of {budget:.4}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("audit error: {0}")]
    Audit(#[from] audit_trail::AuditError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
