//! Append-only performance observations with windowed rollups

use chrono::Duration;
use sqlx::Row;
use std::sync::Arc;

use audit_trail::DatabaseManager;

use crate::clock::Clock;
use crate::models::ModelPerformance;
use crate::GatewayError;

#[derive(Clone)]
pub struct PerformanceMonitor {
    db: Arc<DatabaseManager>,
    clock: Arc<dyn Clock>,
}

impl PerformanceMonitor {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn record_performance(
        &self,
        model_id: &str,
        agent_role: &str,
        task_id: &str,
        latency_ms: f64,
        success: bool,
        quality_score: Option<f64>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO performance_records
                (timestamp, model_id, agent_role, task_id, latency_ms, success, quality_score)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.clock.now().timestamp_micros())
        .bind(model_id)
        .bind(agent_role)
        .bind(task_id)
        .bind(latency_ms)
        .bind(success)
        .bind(quality_score)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Availability probe result, kept for health reporting.
    pub async fn record_health_check(
        &self,
        model_id: &str,
        is_available: bool,
        response_time_ms: Option<f64>,
        error_message: Option<&str>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO health_checks (timestamp, model_id, is_available, response_time_ms, error_message)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(self.clock.now().timestamp_micros())
        .bind(model_id)
        .bind(is_available)
        .bind(response_time_ms)
        .bind(error_message)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Most recent availability probe, if any.
    pub async fn last_health(&self, model_id: &str) -> Result<Option<bool>, GatewayError> {
        let row = sqlx::query(
            "SELECT is_available FROM health_checks WHERE model_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(model_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<bool, _>("is_available")?),
            None => None,
        })
    }

    /// Rollup for one model over the trailing window.
    pub async fn performance(
        &self,
        model_id: &str,
        window_hours: u32,
    ) -> Result<ModelPerformance, GatewayError> {
        let since = self.clock.now() - Duration::hours(i64::from(window_hours));
        let rows = sqlx::query(
            "SELECT latency_ms, success, quality_score FROM performance_records
             WHERE model_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(model_id)
        .bind(since.timestamp_micros())
        .fetch_all(self.db.pool())
        .await?;

        let mut latencies: Vec<f64> = Vec::with_capacity(rows.len());
        let mut success_count = 0u64;
        let mut qualities: Vec<f64> = Vec::new();

        for row in &rows {
            latencies.push(row.try_get("latency_ms")?);
            if row.try_get::<bool, _>("success")? {
                success_count += 1;
            }
            if let Some(quality) = row.try_get::<Option<f64>, _>("quality_score")? {
                qualities.push(quality);
            }
        }

        let request_count = latencies.len() as u64;
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ModelPerformance {
            model_id: model_id.to_string(),
            window_hours,
            request_count,
            success_count,
            failure_count: request_count - success_count,
            success_rate: if request_count > 0 {
                success_count as f64 / request_count as f64
            } else {
                1.0
            },
            average_latency_ms,
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p95_ms: percentile(&latencies, 95.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            average_quality: if qualities.is_empty() {
                None
            } else {
                Some(qualities.iter().sum::<f64>() / qualities.len() as f64)
            },
        })
    }

    /// Quality scores for the most recent `limit` records, newest last.
    pub async fn recent_quality_scores(
        &self,
        model_id: &str,
        limit: u32,
    ) -> Result<Vec<f64>, GatewayError> {
        let rows = sqlx::query(
            "SELECT quality_score FROM performance_records
             WHERE model_id = ? AND quality_score IS NOT NULL
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(model_id)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;

        let mut scores: Vec<f64> = rows
            .iter()
            .map(|row| row.try_get::<f64, _>("quality_score"))
            .collect::<Result<_, _>>()?;
        scores.reverse();
        Ok(scores)
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    async fn monitor() -> (PerformanceMonitor, Arc<ManualClock>) {
        let db = Arc::new(DatabaseManager::open_in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
        ));
        (
            PerformanceMonitor::new(db, clock.clone() as Arc<dyn Clock>),
            clock,
        )
    }

    #[test]
    fn nearest_rank_percentiles() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 50.0), 50.0);
        assert_eq!(percentile(&values, 95.0), 95.0);
        assert_eq!(percentile(&values, 99.0), 99.0);
        assert_eq!(percentile(&[42.0], 95.0), 42.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[tokio::test]
    async fn rollup_counts_successes_and_failures() {
        let (monitor, _clock) = monitor().await;
        for i in 0..10 {
            monitor
                .record_performance(
                    "gpt-4-turbo",
                    "research",
                    &format!("t{i}"),
                    100.0 + i as f64,
                    i % 5 != 0,
                    Some(0.8),
                )
                .await
                .unwrap();
        }

        let rollup = monitor.performance("gpt-4-turbo", 24).await.unwrap();
        assert_eq!(rollup.request_count, 10);
        assert_eq!(rollup.success_count, 8);
        assert_eq!(rollup.failure_count, 2);
        assert!((rollup.success_rate - 0.8).abs() < 1e-12);
        assert!((rollup.average_quality.unwrap() - 0.8).abs() < 1e-12);
        assert_eq!(rollup.latency_p50_ms, 104.0);
    }

    #[tokio::test]
    async fn rollup_window_excludes_old_records() {
        let (monitor, clock) = monitor().await;
        monitor
            .record_performance("m", "r", "old", 50.0, true, None)
            .await
            .unwrap();
        clock.advance(Duration::hours(30));
        monitor
            .record_performance("m", "r", "new", 60.0, true, None)
            .await
            .unwrap();

        let rollup = monitor.performance("m", 24).await.unwrap();
        assert_eq!(rollup.request_count, 1);
        assert_eq!(rollup.average_latency_ms, 60.0);
    }

    #[tokio::test]
    async fn recent_quality_scores_come_back_oldest_first() {
        let (monitor, clock) = monitor().await;
        for score in [0.9, 0.5, 0.6] {
            monitor
                .record_performance("m", "r", "t", 10.0, true, Some(score))
                .await
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let scores = monitor.recent_quality_scores("m", 10).await.unwrap();
        assert_eq!(scores, vec![0.9, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn health_checks_roundtrip() {
        let (monitor, _clock) = monitor().await;
        assert_eq!(monitor.last_health("m").await.unwrap(), None);
        monitor
            .record_health_check("m", false, None, Some("connect refused"))
            .await
            .unwrap();
        monitor
            .record_health_check("m", true, Some(120.0), None)
            .await
            .unwrap();
        assert_eq!(monitor.last_health("m").await.unwrap(), Some(true));
    }
}
