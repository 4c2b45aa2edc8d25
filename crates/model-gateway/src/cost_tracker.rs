//! Append-only cost accounting with budget reporting
//!
//! Records are never mutated. Aggregations are computed from the matching
//! records themselves, so a summary always equals the sum of its parts.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

use audit_trail::DatabaseManager;

use crate::clock::Clock;
use crate::models::{BudgetStatus, CostRecord, CostSummary, HourlyCost, TaskCost};
use crate::GatewayError;

const TOP_TASK_COUNT: usize = 5;

/// Optional dimensions for [`CostTracker::cost_summary`].
#[derive(Debug, Clone, Default)]
pub struct CostFilters {
    pub model_id: Option<String>,
    pub agent_role: Option<String>,
}

#[derive(Clone)]
pub struct CostTracker {
    db: Arc<DatabaseManager>,
    clock: Arc<dyn Clock>,
    /// model id -> provider, for provider-level breakdowns.
    providers: HashMap<String, String>,
}

impl CostTracker {
    pub fn new(
        db: Arc<DatabaseManager>,
        clock: Arc<dyn Clock>,
        providers: HashMap<String, String>,
    ) -> Self {
        Self {
            db,
            clock,
            providers,
        }
    }

    /// Append one cost record stamped "now".
    pub async fn record_cost(
        &self,
        model_id: &str,
        agent_role: &str,
        task_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO cost_records
                (timestamp, model_id, agent_role, task_id, input_tokens, output_tokens, cost)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.clock.now().timestamp_micros())
        .bind(model_id)
        .bind(agent_role)
        .bind(task_id)
        .bind(input_tokens as i64)
        .bind(output_tokens as i64)
        .bind(cost)
        .execute(self.db.pool())
        .await?;

        tracing::debug!(
            model_id = model_id,
            agent_role = agent_role,
            task_id = task_id,
            cost = cost,
            "cost recorded"
        );
        Ok(())
    }

    /// Aggregate spend over `[start, end]`, optionally filtered.
    pub async fn cost_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: CostFilters,
    ) -> Result<CostSummary, GatewayError> {
        let records = self.fetch_records(start, end, &filters).await?;

        let mut by_model: HashMap<String, f64> = HashMap::new();
        let mut by_role: HashMap<String, f64> = HashMap::new();
        let mut by_provider: HashMap<String, f64> = HashMap::new();
        let mut by_task: HashMap<String, f64> = HashMap::new();
        let mut hourly: HashMap<i64, (f64, u64)> = HashMap::new();

        let mut total_cost = 0.0;
        let mut total_input = 0;
        let mut total_output = 0;

        for record in &records {
            total_cost += record.cost;
            total_input += record.input_tokens;
            total_output += record.output_tokens;

            *by_model.entry(record.model_id.clone()).or_insert(0.0) += record.cost;
            *by_role.entry(record.agent_role.clone()).or_insert(0.0) += record.cost;
            let provider = self
                .providers
                .get(&record.model_id)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            *by_provider.entry(provider).or_insert(0.0) += record.cost;
            *by_task.entry(record.task_id.clone()).or_insert(0.0) += record.cost;

            let hour = record.timestamp.timestamp() / 3600;
            let bucket = hourly.entry(hour).or_insert((0.0, 0));
            bucket.0 += record.cost;
            bucket.1 += 1;
        }

        let mut hourly: Vec<HourlyCost> = hourly
            .into_iter()
            .map(|(hour, (cost, requests))| HourlyCost {
                hour_start: Utc
                    .timestamp_opt(hour * 3600, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                cost,
                requests,
            })
            .collect();
        hourly.sort_by_key(|h| h.hour_start);

        let mut top_tasks: Vec<TaskCost> = by_task
            .into_iter()
            .map(|(task_id, cost)| TaskCost { task_id, cost })
            .collect();
        top_tasks.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap_or(std::cmp::Ordering::Equal));
        top_tasks.truncate(TOP_TASK_COUNT);

        let total_requests = records.len() as u64;
        Ok(CostSummary {
            start,
            end,
            total_cost,
            total_requests,
            total_input_tokens: total_input,
            total_output_tokens: total_output,
            average_cost_per_request: if total_requests > 0 {
                total_cost / total_requests as f64
            } else {
                0.0
            },
            by_model,
            by_role,
            by_provider,
            hourly,
            top_tasks,
        })
    }

    /// Today's spend against a daily budget.
    ///
    /// Utilization clamps to 0 for a zero budget; the over-budget flag is
    /// strict, so spending exactly the budget is not "over".
    pub async fn budget_status(&self, daily_budget: f64) -> Result<BudgetStatus, GatewayError> {
        let now = self.clock.now();
        let day_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);

        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost), 0.0) AS spend FROM cost_records WHERE timestamp >= ? AND timestamp <= ?",
        )
        .bind(day_start.timestamp_micros())
        .bind(now.timestamp_micros())
        .fetch_one(self.db.pool())
        .await?;
        let current_spend: f64 = row.try_get("spend")?;

        let utilization_percent = if daily_budget > 0.0 {
            current_spend / daily_budget * 100.0
        } else {
            0.0
        };

        Ok(BudgetStatus {
            daily_budget,
            current_spend,
            utilization_percent,
            is_over_budget: current_spend > daily_budget,
            remaining_budget: (daily_budget - current_spend).max(0.0),
        })
    }

    async fn fetch_records(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filters: &CostFilters,
    ) -> Result<Vec<CostRecord>, GatewayError> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT id, timestamp, model_id, agent_role, task_id, input_tokens, output_tokens, cost \
             FROM cost_records WHERE timestamp >= ",
        );
        builder.push_bind(start.timestamp_micros());
        builder.push(" AND timestamp <= ").push_bind(end.timestamp_micros());
        if let Some(model_id) = &filters.model_id {
            builder.push(" AND model_id = ").push_bind(model_id.clone());
        }
        if let Some(role) = &filters.agent_role {
            builder.push(" AND agent_role = ").push_bind(role.clone());
        }
        builder.push(" ORDER BY timestamp ASC");

        let rows = builder.build().fetch_all(self.db.pool()).await?;
        rows.iter()
            .map(|row| {
                let timestamp_us: i64 = row.try_get("timestamp")?;
                Ok(CostRecord {
                    id: row.try_get("id")?,
                    timestamp: DateTime::from_timestamp_micros(timestamp_us)
                        .unwrap_or_else(Utc::now),
                    model_id: row.try_get("model_id")?,
                    agent_role: row.try_get("agent_role")?,
                    task_id: row.try_get("task_id")?,
                    input_tokens: row.try_get::<i64, _>("input_tokens")? as u64,
                    output_tokens: row.try_get::<i64, _>("output_tokens")? as u64,
                    cost: row.try_get("cost")?,
                })
            })
            .collect()
    }

    /// Spend recorded over the trailing `days`, for reporting.
    pub async fn recent_summary(&self, days: u32) -> Result<CostSummary, GatewayError> {
        let end = self.clock.now();
        let start = end - Duration::days(i64::from(days));
        self.cost_summary(start, end, CostFilters::default()).await
    }
}
