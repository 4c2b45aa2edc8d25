//! Per-process heartbeat emitter
//!
//! One lightweight task per worker sends a heartbeat on the configured
//! interval and waits for the worker's acknowledgement. Consecutive misses
//! beyond the limit move the worker to `unresponsive`; the reaper takes it
//! from there. Emitters are cancelled when their worker is terminated.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use audit_trail::{AuditEntry, AuditSink, Severity};

use crate::config::HeartbeatConfig;
use crate::process::{HeartbeatOutcome, Worker, WorkerStatus};

pub(crate) fn spawn_heartbeat(
    worker: Arc<Worker>,
    config: HeartbeatConfig,
    audit: Arc<dyn AuditSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.interval_seconds);
        let ack_timeout = Duration::from_secs(config.timeout_seconds);

        loop {
            tokio::time::sleep(interval).await;

            match worker.status() {
                WorkerStatus::Terminated | WorkerStatus::Error | WorkerStatus::Unresponsive => {
                    break;
                }
                WorkerStatus::Busy => continue,
                _ => {}
            }

            match worker.try_heartbeat(ack_timeout).await {
                HeartbeatOutcome::Acked => {
                    worker.missed_heartbeats.store(0, Ordering::Relaxed);
                }
                HeartbeatOutcome::Skipped => {}
                HeartbeatOutcome::Missed => {
                    let missed = worker.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        process_id = %worker.process_id,
                        instance_id = %worker.instance_id,
                        missed = missed,
                        "heartbeat missed"
                    );

                    if missed >= config.max_missed {
                        worker.set_status(WorkerStatus::Unresponsive);
                        let entry = AuditEntry::agent_event(
                            worker.instance_id.clone(),
                            "Worker unresponsive after missed heartbeats",
                            "worker_health",
                        )
                        .with_severity(Severity::Warning)
                        .with_metadata("missed", serde_json::json!(missed))
                        .with_metadata(
                            "process_id",
                            serde_json::json!(worker.process_id.to_string()),
                        );
                        if let Err(e) = audit.record(entry).await {
                            tracing::error!(error = %e, "failed to audit unresponsive worker");
                        }
                        break;
                    }
                }
            }
        }
    })
}
