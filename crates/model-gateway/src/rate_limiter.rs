//! Per-model sliding-window rate accounting
//!
//! Each model keeps a FIFO of (timestamp, tokens) observations covering the
//! last 60 seconds plus an optional "limited until" marker. A provider's
//! explicit rate-limit signal is authoritative and marks the model limited
//! regardless of what the window says.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use audit_trail::{AuditEntry, AuditSink, DatabaseManager};

use crate::clock::Clock;
use crate::models::RateLimitStatus;
use crate::registry::ModelRegistry;
use crate::GatewayError;

fn window_length() -> Duration {
    Duration::seconds(60)
}

fn default_reset() -> Duration {
    Duration::seconds(60)
}

#[derive(Debug, Default)]
struct ModelWindow {
    entries: VecDeque<(DateTime<Utc>, u64)>,
    limited_until: Option<DateTime<Utc>>,
}

impl ModelWindow {
    /// Drop entries older than the window. O(expired).
    fn purge(&mut self, now: DateTime<Utc>) {
        let cutoff = now - window_length();
        while matches!(self.entries.front(), Some((ts, _)) if *ts <= cutoff) {
            self.entries.pop_front();
        }
    }

    fn totals(&self) -> (u32, u64) {
        let requests = self.entries.len() as u32;
        let tokens = self.entries.iter().map(|(_, t)| *t).sum();
        (requests, tokens)
    }
}

pub struct RateLimiter {
    registry: Arc<ModelRegistry>,
    db: Arc<DatabaseManager>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    threshold_percent: f64,
    windows: DashMap<String, ModelWindow>,
}

impl RateLimiter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        db: Arc<DatabaseManager>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        threshold_percent: f64,
    ) -> Self {
        Self {
            registry,
            db,
            audit,
            clock,
            threshold_percent,
            windows: DashMap::new(),
        }
    }

    /// Predictive check before a call.
    ///
    /// Utilization is `max(requests/rpm, tokens/tpm) * 100`; detection is
    /// inclusive at the threshold. A "limited until" marker that has passed
    /// is cleared here and a reset event is emitted exactly once.
    pub async fn check(
        &self,
        model_id: &str,
        _estimated_tokens: u64,
    ) -> Result<RateLimitStatus, GatewayError> {
        let limits = self.registry.require(model_id)?.rate_limits;
        let now = self.clock.now();

        let mut emit_reset = false;
        let status = {
            let mut window = self.windows.entry(model_id.to_string()).or_default();
            window.purge(now);

            if matches!(window.limited_until, Some(until) if until <= now) {
                window.limited_until = None;
                emit_reset = true;
            }

            let (requests, tokens) = window.totals();
            let request_utilization = f64::from(requests) / f64::from(limits.requests_per_minute);
            let token_utilization = tokens as f64 / limits.tokens_per_minute as f64;
            let utilization_percent = request_utilization.max(token_utilization) * 100.0;

            let window_limited = utilization_percent >= self.threshold_percent;
            let marker_limited = window.limited_until.is_some();

            let reset_time = if marker_limited {
                window.limited_until
            } else if window_limited {
                // The window frees up when its oldest entry ages out.
                window.entries.front().map(|(ts, _)| *ts + window_length())
            } else {
                None
            };

            RateLimitStatus {
                model_id: model_id.to_string(),
                is_limited: marker_limited || window_limited,
                requests_remaining: limits.requests_per_minute.saturating_sub(requests),
                tokens_remaining: limits.tokens_per_minute.saturating_sub(tokens),
                utilization_percent,
                reset_time,
            }
        };

        if emit_reset {
            self.emit_event(model_id, "reset", None).await?;
        }

        tracing::trace!(
            model_id = model_id,
            is_limited = status.is_limited,
            utilization = status.utilization_percent,
            "rate limit checked"
        );
        Ok(status)
    }

    /// Record an observed call. A provider-reported rate limit marks the
    /// model limited until `provider_reset` (or now + 60 s).
    pub async fn record(
        &self,
        model_id: &str,
        tokens: u64,
        was_rate_limited: bool,
        provider_reset: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        if self.registry.get(model_id).is_none() {
            tracing::warn!(model_id = model_id, "request recorded for unknown model");
            return Ok(());
        }
        let now = self.clock.now();

        let reset_time = {
            let mut window = self.windows.entry(model_id.to_string()).or_default();
            window.entries.push_back((now, tokens));
            window.purge(now);

            if was_rate_limited {
                let until = provider_reset.unwrap_or(now + default_reset());
                window.limited_until = Some(until);
                Some(until)
            } else {
                None
            }
        };

        if let Some(until) = reset_time {
            tracing::warn!(model_id = model_id, reset_at = %until, "model marked rate limited");
            self.emit_event(model_id, "limited", Some(until)).await?;
        }
        Ok(())
    }

    /// Cached limited flag. Clears the marker (and emits the reset event)
    /// once its deadline has passed.
    pub async fn is_limited(&self, model_id: &str) -> Result<bool, GatewayError> {
        let now = self.clock.now();
        let mut emit_reset = false;

        let limited = match self.windows.get_mut(model_id) {
            Some(mut window) => match window.limited_until {
                Some(until) if until <= now => {
                    window.limited_until = None;
                    emit_reset = true;
                    false
                }
                Some(_) => true,
                None => false,
            },
            None => false,
        };

        if emit_reset {
            self.emit_event(model_id, "reset", None).await?;
        }
        Ok(limited)
    }

    /// Seconds until the limited marker expires: 0 if already past,
    /// `None` if the model is not marked limited.
    pub fn time_until_reset(&self, model_id: &str) -> Option<f64> {
        let window = self.windows.get(model_id)?;
        let until = window.limited_until?;
        let remaining = (until - self.clock.now()).num_milliseconds() as f64 / 1000.0;
        Some(remaining.max(0.0))
    }

    async fn emit_event(
        &self,
        model_id: &str,
        event_type: &str,
        reset_time: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO rate_limit_events (timestamp, model_id, event_type, reset_time)
             VALUES (?, ?, ?, ?)",
        )
        .bind(self.clock.now().timestamp_micros())
        .bind(model_id)
        .bind(event_type)
        .bind(reset_time.map(|t| t.timestamp_micros()))
        .execute(self.db.pool())
        .await?;

        self.audit
            .record(
                AuditEntry::agent_event(
                    "rate_limiter",
                    format!("Model {model_id} rate limit {event_type}"),
                    "rate_limiting",
                )
                .with_metadata("model_id", serde_json::json!(model_id))
                .with_metadata("event_type", serde_json::json!(event_type)),
            )
            .await?;
        Ok(())
    }
}
