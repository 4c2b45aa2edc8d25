//! Per-process runtime metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor for the response-time EMA.
const RESPONSE_TIME_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Exponential moving average of task round-trip time, in seconds.
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub error_count: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl ProcessMetrics {
    pub fn new() -> Self {
        Self {
            success_rate: 1.0,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, response_time_seconds: f64) {
        self.tasks_completed += 1;
        self.update_response_time(response_time_seconds);
        self.update_success_rate();
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.error_count += 1;
        self.update_success_rate();
    }

    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = Some(at);
    }

    fn update_response_time(&mut self, seconds: f64) {
        if self.avg_response_time == 0.0 {
            self.avg_response_time = seconds;
        } else {
            self.avg_response_time =
                RESPONSE_TIME_ALPHA * seconds + (1.0 - RESPONSE_TIME_ALPHA) * self.avg_response_time;
        }
    }

    fn update_success_rate(&mut self) {
        let total = self.tasks_completed + self.tasks_failed;
        if total > 0 {
            self.success_rate = self.tasks_completed as f64 / total as f64;
        }
    }
}
