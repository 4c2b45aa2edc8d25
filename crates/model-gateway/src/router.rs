//! Model selection, dispatch, and failover
//!
//! The router is the single entry point for model calls. It filters the
//! catalog down to viable candidates, ranks them, and walks the ranking
//! until a call succeeds, recording cost, performance, quality, and any
//! failovers along the way. Inference itself is behind [`ModelClient`].

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use audit_trail::{AuditEntry, AuditSink, DatabaseManager};

use crate::clock::Clock;
use crate::cost_tracker::CostTracker;
use crate::evaluator::ResponseEvaluator;
use crate::metrics_exporter::GatewayMetrics;
use crate::models::{ModelMetadata, ModelRequest, ModelResponse, QualityScore};
use crate::performance_monitor::PerformanceMonitor;
use crate::rate_limiter::RateLimiter;
use crate::registry::ModelRegistry;
use crate::response_cache::ResponseCache;
use crate::GatewayError;

/// The inference capability. Providers live outside the kernel.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model: &ModelMetadata,
        request: &ModelRequest,
    ) -> Result<ModelResponse, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub quality_threshold: f64,
    pub evaluation_window: usize,
    pub daily_budget_usd: Option<f64>,
    pub performance_window_hours: u32,
    pub cache_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.7,
            evaluation_window: 10,
            daily_budget_usd: None,
            performance_window_hours: 24,
            cache_enabled: true,
        }
    }
}

/// One candidate in a routing decision, best first.
#[derive(Debug, Clone)]
pub struct RankedModel {
    pub model_id: String,
    pub score: f64,
    pub success_rate: f64,
    pub p95_latency_ms: f64,
    pub cost_per_1k_tokens: f64,
    pub average_quality: f64,
}

/// Outcome of a routed call.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: ModelResponse,
    pub quality: QualityScore,
    pub cost: f64,
    pub from_cache: bool,
    pub failovers: u32,
}

pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    rate_limiter: Arc<RateLimiter>,
    cost_tracker: Arc<CostTracker>,
    performance: Arc<PerformanceMonitor>,
    evaluator: Arc<ResponseEvaluator>,
    cache: Option<Arc<ResponseCache>>,
    client: Arc<dyn ModelClient>,
    audit: Arc<dyn AuditSink>,
    db: Arc<DatabaseManager>,
    clock: Arc<dyn Clock>,
    metrics: GatewayMetrics,
    config: RouterConfig,
}

impl ModelRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ModelRegistry>,
        rate_limiter: Arc<RateLimiter>,
        cost_tracker: Arc<CostTracker>,
        performance: Arc<PerformanceMonitor>,
        evaluator: Arc<ResponseEvaluator>,
        cache: Option<Arc<ResponseCache>>,
        client: Arc<dyn ModelClient>,
        audit: Arc<dyn AuditSink>,
        db: Arc<DatabaseManager>,
        clock: Arc<dyn Clock>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            cost_tracker,
            performance,
            evaluator,
            cache,
            client,
            audit,
            db,
            clock,
            metrics: GatewayMetrics::new(),
            config,
        }
    }

    /// Rank the viable models for a request, best first.
    ///
    /// Disabled, rate-limited, unhealthy, and constraint-violating models
    /// are filtered out. The score combines observed success rate, rolling
    /// p95 latency, price, and rolling quality; preferred providers get a
    /// small boost and ties fall back to catalog order.
    pub async fn route(&self, request: &ModelRequest) -> Result<Vec<RankedModel>, GatewayError> {
        let mut viable = Vec::new();
        let mut earliest_reset: Option<f64> = None;
        let mut limited_count = 0i64;

        for model in self.registry.enabled_models() {
            if !request
                .required_capabilities
                .iter()
                .all(|cap| model.capabilities.contains(cap))
            {
                continue;
            }

            if let Some(max_cost) = request.constraints.max_cost_per_call {
                // Worst case: every estimated token billed at both rates.
                let estimate = model.cost_for(request.estimated_tokens, request.estimated_tokens);
                if estimate > max_cost {
                    continue;
                }
            }

            let status = self
                .rate_limiter
                .check(&model.id, request.estimated_tokens)
                .await?;
            if status.is_limited {
                limited_count += 1;
                let reset = self
                    .rate_limiter
                    .time_until_reset(&model.id)
                    .or_else(|| {
                        status
                            .reset_time
                            .map(|t| ((t - self.clock.now()).num_milliseconds() as f64 / 1000.0).max(0.0))
                    });
                earliest_reset = match (earliest_reset, reset) {
                    (Some(current), Some(candidate)) => Some(current.min(candidate)),
                    (None, candidate) => candidate,
                    (current, None) => current,
                };
                continue;
            }

            if self.performance.last_health(&model.id).await? == Some(false) {
                continue;
            }

            let perf = self
                .performance
                .performance(&model.id, self.config.performance_window_hours)
                .await?;
            if let Some(min_quality) = request.constraints.min_quality {
                if perf.average_quality.unwrap_or(1.0) < min_quality {
                    continue;
                }
            }

            viable.push((model.clone(), perf));
        }

        self.metrics.set_rate_limited_models(limited_count);

        if viable.is_empty() {
            return Err(GatewayError::NoAvailableModel {
                retry_after_seconds: earliest_reset,
            });
        }

        let max_p95 = viable
            .iter()
            .map(|(_, p)| p.latency_p95_ms)
            .fold(0.0_f64, f64::max)
            .max(1.0);
        let max_price = viable
            .iter()
            .map(|(m, _)| m.cost_per_1k_input_tokens + m.cost_per_1k_output_tokens)
            .fold(0.0_f64, f64::max)
            .max(f64::MIN_POSITIVE);

        let mut ranked: Vec<RankedModel> = viable
            .into_iter()
            .map(|(model, perf)| {
                let price = model.cost_per_1k_input_tokens + model.cost_per_1k_output_tokens;
                let quality = perf.average_quality.unwrap_or(0.7);
                let mut score = 0.35 * perf.success_rate
                    + 0.25 * (1.0 - perf.latency_p95_ms / max_p95)
                    + 0.20 * (1.0 - price / max_price)
                    + 0.20 * quality;
                if request
                    .constraints
                    .preferred_providers
                    .contains(&model.provider)
                {
                    score += 0.1;
                }
                RankedModel {
                    model_id: model.id,
                    score,
                    success_rate: perf.success_rate,
                    p95_latency_ms: perf.latency_p95_ms,
                    cost_per_1k_tokens: price,
                    average_quality: quality,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    self.registry
                        .position(&a.model_id)
                        .cmp(&self.registry.position(&b.model_id))
                })
        });

        tracing::debug!(
            task_id = %request.task_id,
            candidates = ranked.len(),
            best = %ranked[0].model_id,
            "request routed"
        );
        Ok(ranked)
    }

    /// Issue a call, walking the ranking on failure.
    pub async fn call(&self, request: &ModelRequest) -> Result<RoutedResponse, GatewayError> {
        if let Some(budget) = self.config.daily_budget_usd {
            let status = self.cost_tracker.budget_status(budget).await?;
            self.metrics.set_budget_utilization(status.utilization_percent);
            if status.is_over_budget {
                return Err(GatewayError::BudgetExceeded {
                    spent: status.current_spend,
                    budget,
                });
            }
        }

        let ranked = self.route(request).await?;
        let mut failovers = 0u32;
        let mut last_error: Option<GatewayError> = None;

        for (index, candidate) in ranked.iter().enumerate() {
            let model = self.registry.require(&candidate.model_id)?.clone();

            if self.config.cache_enabled {
                if let Some(cache) = &self.cache {
                    if let Some(data) = cache.get(&model.id, &request.prompt).await? {
                        if let Ok(response) = serde_json::from_str::<ModelResponse>(&data) {
                            self.metrics.record_cache_hit();
                            tracing::debug!(model_id = %model.id, task_id = %request.task_id, "cache hit");
                            return Ok(RoutedResponse {
                                response,
                                quality: QualityScore::perfect(),
                                cost: 0.0,
                                from_cache: true,
                                failovers,
                            });
                        }
                    }
                }
            }

            match self.client.complete(&model, request).await {
                Ok(response) => {
                    let tokens = response.input_tokens + response.output_tokens;
                    self.rate_limiter
                        .record(&model.id, tokens, false, None)
                        .await?;

                    let cost = model.cost_for(response.input_tokens, response.output_tokens);
                    self.cost_tracker
                        .record_cost(
                            &model.id,
                            &request.agent_role,
                            &request.task_id,
                            response.input_tokens,
                            response.output_tokens,
                            cost,
                        )
                        .await?;

                    let quality = self.evaluator.evaluate(&response, request);
                    self.performance
                        .record_performance(
                            &model.id,
                            &request.agent_role,
                            &request.task_id,
                            response.latency_ms,
                            true,
                            (!request.skip_evaluation).then_some(quality.overall),
                        )
                        .await?;

                    if self.config.cache_enabled {
                        if let Some(cache) = &self.cache {
                            cache
                                .put(&model.id, &request.prompt, &serde_json::to_string(&response)?)
                                .await?;
                        }
                    }

                    self.metrics.record_request(response.latency_ms, cost);
                    return Ok(RoutedResponse {
                        response,
                        quality,
                        cost,
                        from_cache: false,
                        failovers,
                    });
                }
                Err(GatewayError::RateLimited {
                    model_id,
                    retry_after_seconds,
                }) => {
                    let reset = retry_after_seconds
                        .map(|s| self.clock.now() + Duration::milliseconds((s * 1000.0) as i64));
                    self.rate_limiter.record(&model.id, 0, true, reset).await?;
                    self.note_failover(&ranked, index, &request.task_id, "rate_limited")
                        .await?;
                    failovers += 1;
                    last_error = Some(GatewayError::RateLimited {
                        model_id,
                        retry_after_seconds,
                    });
                }
                Err(error) => {
                    self.performance
                        .record_performance(
                            &model.id,
                            &request.agent_role,
                            &request.task_id,
                            0.0,
                            false,
                            None,
                        )
                        .await?;
                    tracing::warn!(model_id = %model.id, error = %error, "model call failed");
                    self.note_failover(&ranked, index, &request.task_id, "call_failed")
                        .await?;
                    failovers += 1;
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NoAvailableModel {
            retry_after_seconds: None,
        }))
    }

    /// Whether quality trends say to stop using this model.
    pub fn should_switch(&self, model_id: &str, recent_scores: Option<&[f64]>) -> bool {
        self.evaluator.should_switch_model(model_id, recent_scores)
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    async fn note_failover(
        &self,
        ranked: &[RankedModel],
        failed_index: usize,
        task_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let Some(next) = ranked.get(failed_index + 1) else {
            return Ok(());
        };
        let failed = &ranked[failed_index];

        sqlx::query(
            "INSERT INTO failover_events (timestamp, original_model, alternative_model, reason, task_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(self.clock.now().timestamp_micros())
        .bind(&failed.model_id)
        .bind(&next.model_id)
        .bind(reason)
        .bind(task_id)
        .execute(self.db.pool())
        .await?;

        self.audit
            .record(
                AuditEntry::agent_event(
                    "model_router",
                    format!("Failover from {} to {}", failed.model_id, next.model_id),
                    "model_failover",
                )
                .with_metadata("reason", serde_json::json!(reason))
                .with_metadata("task_id", serde_json::json!(task_id)),
            )
            .await?;

        self.metrics.record_failover();
        tracing::warn!(
            from = %failed.model_id,
            to = %next.model_id,
            reason = reason,
            "failing over to alternative model"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::RateLimits;
    use audit_trail::InMemoryAuditSink;
    use chrono::TimeZone;
    use chrono::Utc;
    use parking_lot::Mutex;
    use sqlx::Row;
    use std::collections::HashMap;

    fn model(id: &str, provider: &str, in_price: f64, out_price: f64) -> ModelMetadata {
        ModelMetadata {
            id: id.to_string(),
            provider: provider.to_string(),
            name: id.to_string(),
            capabilities: vec!["text-generation".to_string()],
            cost_per_1k_input_tokens: in_price,
            cost_per_1k_output_tokens: out_price,
            rate_limits: RateLimits {
                requests_per_minute: 100,
                tokens_per_minute: 1_000_000,
            },
            context_window: 128_000,
            average_response_time_ms: 1000.0,
            enabled: true,
        }
    }

    /// Scripted client: per-model outcomes, in order.
    struct ScriptedClient {
        failures: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedClient {
        fn failing(models: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(
                    models
                        .iter()
                        .map(|(id, n)| (id.to_string(), *n))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(
            &self,
            model: &ModelMetadata,
            request: &ModelRequest,
        ) -> Result<ModelResponse, GatewayError> {
            {
                let mut failures = self.failures.lock();
                if let Some(remaining) = failures.get_mut(&model.id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(GatewayError::Provider(format!(
                            "{} is unavailable",
                            model.id
                        )));
                    }
                }
            }
            Ok(ModelResponse {
                model_id: model.id.clone(),
                content: format!(
                    "Detailed response to '{}' covering the requested points in full.\n\nDone.",
                    request.prompt
                ),
                input_tokens: 1000,
                output_tokens: 500,
                latency_ms: 42.0,
            })
        }
    }

    struct Fixture {
        router: ModelRouter,
        db: Arc<DatabaseManager>,
        sink: Arc<InMemoryAuditSink>,
        cost_tracker: Arc<CostTracker>,
    }

    async fn fixture(models: Vec<ModelMetadata>, client: ScriptedClient, config: RouterConfig) -> Fixture {
        let registry = Arc::new(ModelRegistry::new(models.clone()));
        let db = Arc::new(DatabaseManager::open_in_memory().await.unwrap());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
        ));
        let sink = Arc::new(InMemoryAuditSink::new());
        let providers = models
            .iter()
            .map(|m| (m.id.clone(), m.provider.clone()))
            .collect();

        let rate_limiter = Arc::new(RateLimiter::new(
            registry.clone(),
            db.clone(),
            sink.clone() as Arc<dyn AuditSink>,
            clock.clone(),
            90.0,
        ));
        let cost_tracker = Arc::new(CostTracker::new(db.clone(), clock.clone(), providers));
        let performance = Arc::new(PerformanceMonitor::new(db.clone(), clock.clone()));
        let evaluator = Arc::new(ResponseEvaluator::new(
            config.quality_threshold,
            config.evaluation_window,
        ));
        let cache = Some(Arc::new(ResponseCache::new(
            db.clone(),
            clock.clone(),
            3600,
            100,
        )));

        let router = ModelRouter::new(
            registry,
            rate_limiter,
            cost_tracker.clone(),
            performance,
            evaluator,
            cache,
            Arc::new(client),
            sink.clone() as Arc<dyn AuditSink>,
            db.clone(),
            clock,
            config,
        );
        Fixture {
            router,
            db,
            sink,
            cost_tracker,
        }
    }

    fn request() -> ModelRequest {
        let mut request = ModelRequest::new("task-1", "research", "Summarize the design goals");
        request.required_capabilities = vec!["text-generation".to_string()];
        request
    }

    #[tokio::test]
    async fn cheaper_model_ranks_first_with_equal_history() {
        let f = fixture(
            vec![
                model("pricey", "openai", 0.01, 0.03),
                model("cheap", "anthropic", 0.003, 0.015),
            ],
            ScriptedClient::failing(&[]),
            RouterConfig::default(),
        )
        .await;

        let ranked = f.router.route(&request()).await.unwrap();
        assert_eq!(ranked[0].model_id, "cheap");
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn call_records_cost_matching_pricing() {
        let f = fixture(
            vec![model("only", "openai", 0.01, 0.03)],
            ScriptedClient::failing(&[]),
            RouterConfig::default(),
        )
        .await;

        let routed = f.router.call(&request()).await.unwrap();
        assert!(!routed.from_cache);
        // 1000 in at 0.01/1k + 500 out at 0.03/1k
        assert!((routed.cost - (0.01 + 0.015)).abs() < 1e-12);

        let summary = f.cost_tracker.recent_summary(1).await.unwrap();
        assert_eq!(summary.total_requests, 1);
        assert!((summary.total_cost - routed.cost).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failover_walks_to_next_model_and_records_event() {
        let f = fixture(
            vec![
                model("flaky", "openai", 0.001, 0.001),
                model("steady", "anthropic", 0.01, 0.03),
            ],
            ScriptedClient::failing(&[("flaky", 5)]),
            RouterConfig::default(),
        )
        .await;

        let routed = f.router.call(&request()).await.unwrap();
        assert_eq!(routed.response.model_id, "steady");
        assert_eq!(routed.failovers, 1);

        let rows = sqlx::query("SELECT original_model, alternative_model FROM failover_events")
            .fetch_all(f.db.pool())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].try_get::<String, _>("original_model").unwrap(),
            "flaky"
        );
        assert!(f
            .sink
            .entries()
            .iter()
            .any(|e| e.category == "model_failover"));
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let f = fixture(
            vec![model("only", "openai", 0.01, 0.03)],
            ScriptedClient::failing(&[]),
            RouterConfig::default(),
        )
        .await;

        let first = f.router.call(&request()).await.unwrap();
        assert!(!first.from_cache);
        let second = f.router.call(&request()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.cost, 0.0);
        assert_eq!(second.response.content, first.response.content);
    }

    #[tokio::test]
    async fn exhausted_ranking_surfaces_last_error() {
        let f = fixture(
            vec![model("only", "openai", 0.01, 0.03)],
            ScriptedClient::failing(&[("only", 5)]),
            RouterConfig {
                cache_enabled: false,
                ..RouterConfig::default()
            },
        )
        .await;

        assert!(matches!(
            f.router.call(&request()).await,
            Err(GatewayError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn over_budget_blocks_new_calls() {
        let f = fixture(
            vec![model("only", "openai", 0.01, 0.03)],
            ScriptedClient::failing(&[]),
            RouterConfig {
                daily_budget_usd: Some(1.0),
                ..RouterConfig::default()
            },
        )
        .await;

        f.cost_tracker
            .record_cost("only", "research", "earlier", 0, 0, 1.5)
            .await
            .unwrap();

        assert!(matches!(
            f.router.call(&request()).await,
            Err(GatewayError::BudgetExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn disabled_and_incapable_models_are_filtered() {
        let mut disabled = model("off", "openai", 0.001, 0.001);
        disabled.enabled = false;
        let mut wrong_caps = model("vision", "openai", 0.001, 0.001);
        wrong_caps.capabilities = vec!["image-understanding".to_string()];

        let f = fixture(
            vec![disabled, wrong_caps, model("good", "anthropic", 0.01, 0.03)],
            ScriptedClient::failing(&[]),
            RouterConfig::default(),
        )
        .await;

        let ranked = f.router.route(&request()).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].model_id, "good");
    }

    #[tokio::test]
    async fn no_viable_model_reports_retry_hint() {
        let f = fixture(
            vec![model("m", "openai", 0.01, 0.03)],
            ScriptedClient::failing(&[]),
            RouterConfig::default(),
        )
        .await;

        // Mark the only model limited via a provider signal.
        f.router
            .rate_limiter
            .record("m", 0, true, None)
            .await
            .unwrap();

        match f.router.route(&request()).await {
            Err(GatewayError::NoAvailableModel {
                retry_after_seconds: Some(seconds),
            }) => assert!(seconds > 0.0 && seconds <= 60.0),
            other => panic!("expected NoAvailableModel with retry hint, got {other:?}"),
        }
    }
}
