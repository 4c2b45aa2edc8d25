//! Gateway data model: catalog metadata, requests/responses, and the
//! observation records the stores append

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse classification used to pick default models for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Strategic,
    Operational,
    Research,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Strategic => "strategic",
            ModelTier::Operational => "operational",
            ModelTier::Research => "research",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
}

/// Static catalog entry for one backend model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub id: String,
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub cost_per_1k_input_tokens: f64,
    pub cost_per_1k_output_tokens: f64,
    pub rate_limits: RateLimits,
    pub context_window: u32,
    #[serde(default)]
    pub average_response_time_ms: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ModelMetadata {
    /// Price for a call, in USD.
    pub fn cost_for(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1000.0 * self.cost_per_1k_input_tokens
            + output_tokens as f64 / 1000.0 * self.cost_per_1k_output_tokens
    }
}

/// Constraints a caller can attach to a routed request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConstraints {
    pub max_cost_per_call: Option<f64>,
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub preferred_providers: Vec<String>,
}

/// A model call as the router sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub task_id: String,
    pub agent_role: String,
    pub prompt: String,
    pub estimated_tokens: u64,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub constraints: RequestConstraints,
    /// When set, quality evaluation is skipped and all components score 1.0.
    #[serde(default)]
    pub skip_evaluation: bool,
}

impl ModelRequest {
    pub fn new(
        task_id: impl Into<String>,
        agent_role: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let prompt = prompt.into();
        let estimated_tokens = (prompt.len() / 4).max(1) as u64;
        Self {
            task_id: task_id.into(),
            agent_role: agent_role.into(),
            prompt,
            estimated_tokens,
            required_capabilities: Vec::new(),
            constraints: RequestConstraints::default(),
            skip_evaluation: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model_id: String,
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: f64,
}

/// Heuristic quality components, each in [0, 1].
///
/// overall = 0.40 * completeness + 0.35 * relevance + 0.25 * coherence
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f64,
    pub completeness: f64,
    pub relevance: f64,
    pub coherence: f64,
}

impl QualityScore {
    pub fn perfect() -> Self {
        Self {
            overall: 1.0,
            completeness: 1.0,
            relevance: 1.0,
            coherence: 1.0,
        }
    }
}

/// Sliding-window view of a model's rate-limit headroom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub model_id: String,
    pub is_limited: bool,
    pub requests_remaining: u32,
    pub tokens_remaining: u64,
    pub utilization_percent: f64,
    pub reset_time: Option<DateTime<Utc>>,
}

/// One appended cost observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    pub agent_role: String,
    pub task_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// One appended performance observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    pub agent_role: String,
    pub task_id: String,
    pub latency_ms: f64,
    pub success: bool,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyCost {
    pub hour_start: DateTime<Utc>,
    pub cost: f64,
    pub requests: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskCost {
    pub task_id: String,
    pub cost: f64,
}

/// Aggregated spend over a time range.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_cost: f64,
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub average_cost_per_request: f64,
    pub by_model: HashMap<String, f64>,
    pub by_role: HashMap<String, f64>,
    pub by_provider: HashMap<String, f64>,
    pub hourly: Vec<HourlyCost>,
    pub top_tasks: Vec<TaskCost>,
}

/// Current-day budget picture.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetStatus {
    pub daily_budget: f64,
    pub current_spend: f64,
    pub utilization_percent: f64,
    pub is_over_budget: bool,
    pub remaining_budget: f64,
}

/// Windowed performance rollup for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelPerformance {
    pub model_id: String,
    pub window_hours: u32,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub average_quality: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_follows_per_1k_pricing() {
        let model = ModelMetadata {
            id: "m".to_string(),
            provider: "p".to_string(),
            name: "M".to_string(),
            capabilities: vec![],
            cost_per_1k_input_tokens: 0.01,
            cost_per_1k_output_tokens: 0.03,
            rate_limits: RateLimits {
                requests_per_minute: 100,
                tokens_per_minute: 10_000,
            },
            context_window: 128_000,
            average_response_time_ms: 2000.0,
            enabled: true,
        };

        let cost = model.cost_for(1500, 500);
        assert!((cost - (1.5 * 0.01 + 0.5 * 0.03)).abs() < 1e-12);
        assert_eq!(model.cost_for(0, 0), 0.0);
    }

    #[test]
    fn request_estimates_tokens_from_prompt() {
        let request = ModelRequest::new("t1", "research", "word ".repeat(100));
        assert_eq!(request.estimated_tokens, 125);
    }
}
