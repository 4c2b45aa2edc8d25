//! Prometheus exposition for gateway activity

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_histogram, register_int_counter, register_int_gauge, Counter,
    Encoder, Histogram, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    static ref MODEL_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "gateway_model_requests_total",
        "Total model calls routed through the gateway"
    )
    .expect("metric registration");
    static ref MODEL_FAILOVERS_TOTAL: IntCounter = register_int_counter!(
        "gateway_model_failovers_total",
        "Total failovers to an alternative model"
    )
    .expect("metric registration");
    static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "gateway_cache_hits_total",
        "Model responses served from the cache"
    )
    .expect("metric registration");
    static ref MODEL_COST_TOTAL: Counter = register_counter!(
        "gateway_model_cost_usd_total",
        "Cumulative model spend in USD"
    )
    .expect("metric registration");
    static ref RATE_LIMITED_MODELS: IntGauge = register_int_gauge!(
        "gateway_rate_limited_models",
        "Models currently marked rate limited"
    )
    .expect("metric registration");
    static ref BUDGET_UTILIZATION: prometheus::Gauge = prometheus::register_gauge!(
        "gateway_budget_utilization_percent",
        "Share of the daily budget spent so far"
    )
    .expect("metric registration");
    static ref REQUEST_LATENCY_SECONDS: Histogram = register_histogram!(
        "gateway_request_latency_seconds",
        "Model call latency in seconds"
    )
    .expect("metric registration");
    static ref POOL_ACTIVE_WORKERS: IntGauge = register_int_gauge!(
        "gateway_pool_active_workers",
        "Active worker processes reported by the orchestrator"
    )
    .expect("metric registration");
}

/// Thin handle over process-wide gateway metrics.
#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    _private: (),
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, latency_ms: f64, cost: f64) {
        MODEL_REQUESTS_TOTAL.inc();
        MODEL_COST_TOTAL.inc_by(cost.max(0.0));
        REQUEST_LATENCY_SECONDS.observe(latency_ms / 1000.0);
    }

    pub fn record_failover(&self) {
        MODEL_FAILOVERS_TOTAL.inc();
    }

    pub fn record_cache_hit(&self) {
        CACHE_HITS_TOTAL.inc();
    }

    pub fn set_rate_limited_models(&self, count: i64) {
        RATE_LIMITED_MODELS.set(count);
    }

    pub fn set_budget_utilization(&self, percent: f64) {
        BUDGET_UTILIZATION.set(percent);
    }

    pub fn set_pool_active_workers(&self, count: i64) {
        POOL_ACTIVE_WORKERS.set(count);
    }

    /// Render the process-wide registry in the text exposition format.
    pub fn gather(&self) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_series() {
        let metrics = GatewayMetrics::new();
        metrics.record_request(1500.0, 0.02);
        metrics.record_failover();
        metrics.set_budget_utilization(42.0);

        let text = metrics.gather().unwrap();
        assert!(text.contains("gateway_model_requests_total"));
        assert!(text.contains("gateway_model_failovers_total"));
        assert!(text.contains("gateway_budget_utilization_percent"));
    }
}
