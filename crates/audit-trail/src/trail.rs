//! Audit trail persistence and queries

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::entry::{ActorIds, AuditEntry, AuditPayload, EntryFilter, EntryKind, Severity};
use crate::{AuditError, DatabaseManager};

const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// Aggregated error counts over a recent window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorSummary {
    pub total_errors: u64,
    pub by_error_type: HashMap<String, u64>,
    pub by_operation: HashMap<String, u64>,
    pub recent: Vec<RecentError>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RecentError {
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub message: String,
    pub operation: String,
}

/// Per-user activity rollup for compliance queries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserActivitySummary {
    pub user_id: String,
    pub period_days: u32,
    pub total_entries: u64,
    pub entries_by_kind: HashMap<String, u64>,
    pub error_count: u64,
    pub average_operation_duration_ms: f64,
    pub recent_actions: Vec<String>,
}

/// Append-only audit trail over the embedded store.
///
/// Entries are totally ordered by the store's insertion sequence; queries
/// sort by timestamp then sequence so concurrent writers still produce a
/// deterministic read order.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    db: Arc<DatabaseManager>,
}

impl AuditTrail {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    /// Persist one entry. Failures propagate; nothing is dropped silently.
    pub async fn record(&self, entry: AuditEntry) -> Result<Uuid, AuditError> {
        let payload = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = if entry.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entry.metadata)?)
        };

        sqlx::query(
            "INSERT INTO audit_entries (
                id, timestamp, kind, severity,
                user_id, conversation_id, request_id, workflow_id, agent_id,
                action, category, payload, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.timestamp.timestamp_micros())
        .bind(entry.kind.as_str())
        .bind(entry.severity.as_str())
        .bind(&entry.actors.user_id)
        .bind(&entry.actors.conversation_id)
        .bind(&entry.actors.request_id)
        .bind(&entry.actors.workflow_id)
        .bind(&entry.actors.agent_id)
        .bind(&entry.action)
        .bind(&entry.category)
        .bind(payload)
        .bind(metadata)
        .execute(self.db.pool())
        .await?;

        tracing::trace!(entry_id = %entry.id, kind = entry.kind.as_str(), "audit entry persisted");
        Ok(entry.id)
    }

    /// Query entries, newest first.
    pub async fn query(&self, filter: EntryFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, timestamp, kind, severity, user_id, conversation_id, request_id, \
             workflow_id, agent_id, action, category, payload, metadata \
             FROM audit_entries WHERE 1 = 1",
        );

        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(request_id) = &filter.request_id {
            builder
                .push(" AND request_id = ")
                .push_bind(request_id.clone());
        }
        if let Some(workflow_id) = &filter.workflow_id {
            builder
                .push(" AND workflow_id = ")
                .push_bind(workflow_id.clone());
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(category) = &filter.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(severity) = filter.severity {
            builder.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(start) = filter.start_time {
            builder
                .push(" AND timestamp >= ")
                .push_bind(start.timestamp_micros());
        }
        if let Some(end) = filter.end_time {
            builder
                .push(" AND timestamp <= ")
                .push_bind(end.timestamp_micros());
        }

        builder.push(" ORDER BY timestamp DESC, seq DESC LIMIT ");
        builder.push_bind(i64::from(filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT)));

        let rows = builder.build().fetch_all(self.db.pool()).await?;
        rows.iter().map(decode_entry).collect()
    }

    /// Full ordered history for one request.
    pub async fn request_trail(&self, request_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        self.query(EntryFilter::new().request(request_id)).await
    }

    /// Full ordered history for one workflow.
    pub async fn workflow_trail(&self, workflow_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        self.query(EntryFilter::new().workflow(workflow_id)).await
    }

    pub async fn user_activity(
        &self,
        user_id: &str,
        days: u32,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        self.query(EntryFilter::new().user(user_id).since(since))
            .await
    }

    pub async fn user_activity_summary(
        &self,
        user_id: &str,
        days: u32,
    ) -> Result<UserActivitySummary, AuditError> {
        let entries = self.user_activity(user_id, days).await?;

        let mut entries_by_kind: HashMap<String, u64> = HashMap::new();
        let mut error_count = 0;
        let mut durations: Vec<i64> = Vec::new();

        for entry in &entries {
            *entries_by_kind
                .entry(entry.kind.as_str().to_string())
                .or_insert(0) += 1;
            if entry.severity >= Severity::Error {
                error_count += 1;
            }
            if let Some(AuditPayload::Operation { duration_ms, .. }) = &entry.payload {
                durations.push(*duration_ms);
            }
        }

        let average_operation_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };

        Ok(UserActivitySummary {
            user_id: user_id.to_string(),
            period_days: days,
            total_entries: entries.len() as u64,
            entries_by_kind,
            error_count,
            average_operation_duration_ms,
            recent_actions: entries.iter().take(10).map(|e| e.action.clone()).collect(),
        })
    }

    /// Aggregate error counts by type and operation over the last `days`.
    pub async fn error_summary(&self, days: u32) -> Result<ErrorSummary, AuditError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let errors = self
            .query(EntryFilter::new().severity(Severity::Error).since(since))
            .await?;

        let mut by_error_type: HashMap<String, u64> = HashMap::new();
        let mut by_operation: HashMap<String, u64> = HashMap::new();
        let mut recent = Vec::new();

        for entry in &errors {
            let (error_type, message, operation) = match &entry.payload {
                Some(AuditPayload::ErrorDetail {
                    error_type,
                    message,
                    operation,
                    ..
                }) => (error_type.clone(), message.clone(), operation.clone()),
                _ => (
                    "unknown".to_string(),
                    entry.action.clone(),
                    "unknown".to_string(),
                ),
            };

            *by_error_type.entry(error_type.clone()).or_insert(0) += 1;
            *by_operation.entry(operation.clone()).or_insert(0) += 1;

            if recent.len() < 10 {
                recent.push(RecentError {
                    timestamp: entry.timestamp,
                    error_type,
                    message,
                    operation,
                });
            }
        }

        Ok(ErrorSummary {
            total_errors: errors.len() as u64,
            by_error_type,
            by_operation,
            recent,
        })
    }

    /// Delete entries older than the retention period. Idempotent.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64, AuditError> {
        self.db
            .cleanup_old_records("audit_entries", retention_days)
            .await
    }

    /// Run `operation`, bracketing it with a start event and exactly one
    /// terminal event (completion with duration, or the error) regardless of
    /// how the future resolves. Audit write failures inside the bracket are
    /// logged rather than allowed to mask the operation's own outcome.
    pub async fn scoped_operation<F, T, E>(
        &self,
        operation: &str,
        category: &str,
        actors: ActorIds,
        future: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();

        let start_entry = AuditEntry::new(
            EntryKind::AgentEvent,
            format!("Started {operation}"),
            category,
        )
        .with_severity(Severity::Debug)
        .with_actors(actors.clone());
        if let Err(e) = self.record(start_entry).await {
            tracing::error!(operation = operation, error = %e, "failed to record operation start");
        }

        let result = future.await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let terminal = match &result {
            Ok(_) => AuditEntry::new(
                EntryKind::AgentEvent,
                format!("Completed {operation}"),
                category,
            )
            .with_actors(actors)
            .with_payload(AuditPayload::Operation {
                operation: operation.to_string(),
                duration_ms,
                outcome: "success".to_string(),
            }),
            Err(e) => {
                let mut entry = AuditEntry::error(operation, "OperationFailed", e.to_string())
                    .with_actors(actors);
                entry.category = category.to_string();
                entry.with_metadata("duration_ms", serde_json::json!(duration_ms))
            }
        };
        if let Err(e) = self.record(terminal).await {
            tracing::error!(operation = operation, error = %e, "failed to record operation end");
        }

        result
    }
}

fn decode_entry(row: &SqliteRow) -> Result<AuditEntry, AuditError> {
    let id: String = row.try_get("id")?;
    let timestamp_us: i64 = row.try_get("timestamp")?;
    let kind: String = row.try_get("kind")?;
    let severity: String = row.try_get("severity")?;
    let payload: Option<String> = row.try_get("payload")?;
    let metadata: Option<String> = row.try_get("metadata")?;

    Ok(AuditEntry {
        id: Uuid::parse_str(&id).map_err(|e| AuditError::Decode(e.to_string()))?,
        timestamp: DateTime::from_timestamp_micros(timestamp_us)
            .ok_or_else(|| AuditError::Decode(format!("timestamp {timestamp_us}")))?,
        kind: EntryKind::parse(&kind)?,
        severity: Severity::parse(&severity)?,
        actors: ActorIds {
            user_id: row.try_get("user_id")?,
            conversation_id: row.try_get("conversation_id")?,
            request_id: row.try_get("request_id")?,
            workflow_id: row.try_get("workflow_id")?,
            agent_id: row.try_get("agent_id")?,
        },
        action: row.try_get("action")?,
        category: row.try_get("category")?,
        payload: payload.map(|p| serde_json::from_str(&p)).transpose()?,
        metadata: metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()?
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn trail() -> AuditTrail {
        let db = DatabaseManager::open_in_memory().await.unwrap();
        AuditTrail::new(Arc::new(db))
    }

    #[tokio::test]
    async fn record_and_query_roundtrip() {
        let trail = trail().await;

        let entry = AuditEntry::new(EntryKind::Request, "Request received", "user_interaction")
            .with_actors(
                ActorIds::default()
                    .with_user("user-1")
                    .with_request("req-1"),
            )
            .with_metadata("content_length", serde_json::json!(42));
        let id = trail.record(entry).await.unwrap();

        let found = trail.request_trail("req-1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].actors.user_id.as_deref(), Some("user-1"));
        assert_eq!(found[0].metadata["content_length"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn query_filters_combine() {
        let trail = trail().await;

        for i in 0..5 {
            trail
                .record(
                    AuditEntry::agent_event("engine-1", format!("event {i}"), "lifecycle")
                        .with_severity(if i % 2 == 0 {
                            Severity::Info
                        } else {
                            Severity::Warning
                        }),
                )
                .await
                .unwrap();
        }

        let warnings = trail
            .query(
                EntryFilter::new()
                    .kind(EntryKind::AgentEvent)
                    .severity(Severity::Warning),
            )
            .await
            .unwrap();
        assert_eq!(warnings.len(), 2);

        let limited = trail
            .query(EntryFilter::new().kind(EntryKind::AgentEvent).limit(3))
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn queries_return_newest_first() {
        let trail = trail().await;

        let mut early = AuditEntry::agent_event("a", "first", "order");
        early.timestamp = Utc::now() - Duration::minutes(5);
        trail.record(early).await.unwrap();
        trail
            .record(AuditEntry::agent_event("a", "second", "order"))
            .await
            .unwrap();

        let entries = trail.query(EntryFilter::new().category("order")).await.unwrap();
        assert_eq!(entries[0].action, "second");
        assert_eq!(entries[1].action, "first");
    }

    #[tokio::test]
    async fn error_summary_aggregates_by_type_and_operation() {
        let trail = trail().await;

        for _ in 0..3 {
            trail
                .record(AuditEntry::error("dispatch", "Timeout", "worker timed out"))
                .await
                .unwrap();
        }
        trail
            .record(AuditEntry::error("spawn", "SpawnFailed", "binary missing"))
            .await
            .unwrap();

        let summary = trail.error_summary(7).await.unwrap();
        assert_eq!(summary.total_errors, 4);
        assert_eq!(summary.by_error_type["Timeout"], 3);
        assert_eq!(summary.by_operation["spawn"], 1);
        assert_eq!(summary.recent.len(), 4);
    }

    #[tokio::test]
    async fn scoped_operation_records_one_terminal_event_per_path() {
        let trail = trail().await;

        let ok: Result<u32, String> = trail
            .scoped_operation("plan_generation", "planning", ActorIds::default(), async {
                Ok(7)
            })
            .await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, String> = trail
            .scoped_operation("plan_generation", "planning", ActorIds::default(), async {
                Err("bad input".to_string())
            })
            .await;
        assert!(err.is_err());

        let completions = trail
            .query(EntryFilter::new().category("planning"))
            .await
            .unwrap();
        let starts = completions
            .iter()
            .filter(|e| e.action.starts_with("Started"))
            .count();
        let completed = completions
            .iter()
            .filter(|e| e.action.starts_with("Completed"))
            .count();
        let errors = completions
            .iter()
            .filter(|e| e.kind == EntryKind::Error)
            .count();
        assert_eq!(starts, 2);
        assert_eq!(completed, 1);
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let trail = trail().await;

        let mut old = AuditEntry::agent_event("a", "ancient", "retention");
        old.timestamp = Utc::now() - Duration::days(400);
        trail.record(old).await.unwrap();
        trail
            .record(AuditEntry::agent_event("a", "fresh", "retention"))
            .await
            .unwrap();

        let removed = trail.cleanup(365).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = trail
            .query(EntryFilter::new().category("retention"))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "fresh");
    }
}
