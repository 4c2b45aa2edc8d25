//! Worker process model: tasks, results, status, and the live worker entity
//!
//! A live [`Worker`] owns one subprocess, its stdio channel, and its
//! metrics. Task I/O is serialized by the per-process lock: at most one
//! in-flight task per worker, and its completion is observed before the
//! next task begins.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicU32;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::metrics::ProcessMetrics;
use crate::protocol::{TaskStatus, WireMessage};
use crate::spawner::ProcessHandle;
use crate::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
    Background,
}

/// A unit of work addressed to a role; the pool assigns it to a concrete
/// worker at dispatch. The payload is opaque to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub priority: TaskPriority,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.into(),
            payload,
            context: serde_json::Value::Null,
            requirements: Vec::new(),
            priority: TaskPriority::Medium,
            deadline: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// What came back from a worker for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub process_id: Uuid,
    pub instance_id: String,
    pub status: TaskStatus,
    pub output: serde_json::Value,
    pub execution_time_seconds: f64,
    pub confidence: f64,
    pub tokens_consumed: u64,
    pub cost: f64,
    pub model_used: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Error,
    Unresponsive,
    Terminated,
}

impl WorkerStatus {
    /// Statuses that count against pool capacity.
    pub fn is_active(&self) -> bool {
        !matches!(self, WorkerStatus::Terminated)
    }
}

/// Passive snapshot of one worker, safe to hand to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub process_id: Uuid,
    pub instance_id: String,
    pub role: String,
    pub model_tier: String,
    pub status: WorkerStatus,
    pub os_pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_load: f64,
    pub current_task: Option<String>,
    pub metrics: ProcessMetrics,
}

struct MutableState {
    status: WorkerStatus,
    last_activity: DateTime<Utc>,
    current_task: Option<String>,
    current_load: f64,
}

pub(crate) struct WorkerIo {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    reader: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl WorkerIo {
    pub fn new(
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Self {
        Self {
            writer,
            reader: BufReader::new(reader).lines(),
        }
    }

    pub async fn write_message(&mut self, message: &WireMessage) -> Result<(), PoolError> {
        let mut line = message.to_line()?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PoolError::CommunicationError(format!("stdin write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| PoolError::CommunicationError(format!("stdin flush failed: {e}")))?;
        Ok(())
    }

    /// Next parseable message, skipping malformed lines.
    pub async fn read_message(&mut self) -> Result<Option<WireMessage>, PoolError> {
        loop {
            match self.reader.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match WireMessage::from_line(&line) {
                        Ok(message) => return Ok(Some(message)),
                        Err(_) => {
                            tracing::debug!(line = %line, "skipping malformed worker output");
                            continue;
                        }
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    return Err(PoolError::CommunicationError(format!(
                        "stdout read failed: {e}"
                    )))
                }
            }
        }
    }
}

pub(crate) enum HeartbeatOutcome {
    Acked,
    /// Task I/O owned the channel; not a miss.
    Skipped,
    Missed,
}

/// One live worker. Field access is governed by the documented locking
/// order: the pool registry lock is always taken before any of these.
pub(crate) struct Worker {
    pub process_id: Uuid,
    pub local_seq: u64,
    pub instance_id: String,
    pub config: WorkerConfig,
    pub os_pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    state: RwLock<MutableState>,
    pub metrics: Mutex<ProcessMetrics>,
    pub io: tokio::sync::Mutex<WorkerIo>,
    pub handle: tokio::sync::Mutex<Box<dyn ProcessHandle>>,
    pub missed_heartbeats: AtomicU32,
    pub heartbeat_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        local_seq: u64,
        instance_id: String,
        config: WorkerConfig,
        os_pid: Option<u32>,
        io: WorkerIo,
        handle: Box<dyn ProcessHandle>,
    ) -> Self {
        let now = Utc::now();
        Self {
            process_id: Uuid::new_v4(),
            local_seq,
            instance_id,
            config,
            os_pid,
            started_at: now,
            state: RwLock::new(MutableState {
                status: WorkerStatus::Starting,
                last_activity: now,
                current_task: None,
                current_load: 0.0,
            }),
            metrics: Mutex::new(ProcessMetrics::new()),
            io: tokio::sync::Mutex::new(io),
            handle: tokio::sync::Mutex::new(handle),
            missed_heartbeats: AtomicU32::new(0),
            heartbeat_task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.read().status
    }

    pub fn set_status(&self, status: WorkerStatus) {
        let mut state = self.state.write();
        state.status = status;
        state.last_activity = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.state.read().last_activity
    }

    pub fn current_task(&self) -> Option<String> {
        self.state.read().current_task.clone()
    }

    fn set_current_task(&self, task: Option<String>) {
        let mut state = self.state.write();
        state.current_load = if task.is_some() { 1.0 } else { 0.0 };
        state.current_task = task;
        state.last_activity = Utc::now();
    }

    pub fn snapshot(&self) -> WorkerRecord {
        let state = self.state.read();
        WorkerRecord {
            process_id: self.process_id,
            instance_id: self.instance_id.clone(),
            role: self.config.role.clone(),
            model_tier: self.config.model_tier.clone(),
            status: state.status,
            os_pid: self.os_pid,
            started_at: self.started_at,
            last_activity: state.last_activity,
            current_load: state.current_load,
            current_task: state.current_task.clone(),
            metrics: self.metrics.lock().clone(),
        }
    }

    /// Send one task and await its result. The per-process I/O lock
    /// serializes concurrent senders; each waits for the previous task's
    /// completion before its own exchange begins.
    pub async fn send_task(&self, task: &Task, timeout: Duration) -> Result<TaskResult, PoolError> {
        let status = self.status();
        if !matches!(status, WorkerStatus::Idle | WorkerStatus::Busy) {
            return Err(PoolError::ProcessNotReady {
                process_id: self.process_id,
                status,
            });
        }

        let mut io = self.io.lock().await;
        self.set_status(WorkerStatus::Busy);
        self.set_current_task(Some(task.task_id.clone()));

        let started = Instant::now();
        let outcome = self.exchange(&mut io, task, timeout).await;
        drop(io);

        match &outcome {
            Ok(result) => {
                let elapsed = started.elapsed().as_secs_f64();
                {
                    let mut metrics = self.metrics.lock();
                    if result.status == TaskStatus::Completed {
                        metrics.record_success(elapsed);
                    } else {
                        metrics.record_failure();
                    }
                }
                self.set_current_task(None);
                self.set_status(WorkerStatus::Idle);
            }
            Err(error) => {
                self.metrics.lock().record_failure();
                self.set_current_task(None);
                self.set_status(WorkerStatus::Error);
                tracing::error!(
                    process_id = %self.process_id,
                    task_id = %task.task_id,
                    error = %error,
                    "task exchange failed"
                );
            }
        }
        outcome
    }

    async fn exchange(
        &self,
        io: &mut WorkerIo,
        task: &Task,
        timeout: Duration,
    ) -> Result<TaskResult, PoolError> {
        let message = WireMessage::Task {
            task_id: task.task_id.clone(),
            task_data: serde_json::to_value(task)?,
        };
        io.write_message(&message).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::TaskTimeout {
                    task_id: task.task_id.clone(),
                    seconds: timeout.as_secs(),
                });
            }

            let next = tokio::time::timeout(remaining, io.read_message()).await;
            match next {
                Err(_) => {
                    return Err(PoolError::TaskTimeout {
                        task_id: task.task_id.clone(),
                        seconds: timeout.as_secs(),
                    })
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => {
                    return Err(PoolError::CommunicationError(
                        "worker closed stdout mid-task".to_string(),
                    ))
                }
                Ok(Ok(Some(WireMessage::Result {
                    task_id,
                    status,
                    output,
                    metadata,
                    confidence,
                    resources_used: _,
                    error,
                }))) if task_id == task.task_id => {
                    return Ok(TaskResult {
                        task_id,
                        process_id: self.process_id,
                        instance_id: self.instance_id.clone(),
                        status,
                        output,
                        execution_time_seconds: metadata.execution_time,
                        confidence,
                        tokens_consumed: metadata.tokens_consumed,
                        cost: metadata.cost,
                        model_used: metadata.model_used,
                        error,
                    });
                }
                // Stale results and unknown chatter are skipped until the
                // expected result arrives.
                Ok(Ok(Some(_))) => continue,
            }
        }
    }

    /// Heartbeat roundtrip requiring an acknowledgement. The missed
    /// counter resets on acknowledgement, not on send.
    pub async fn try_heartbeat(&self, timeout: Duration) -> HeartbeatOutcome {
        let Ok(mut io) = self.io.try_lock() else {
            // A task owns the channel; its completion already proves life.
            return HeartbeatOutcome::Skipped;
        };

        if io.write_message(&WireMessage::Heartbeat).await.is_err() {
            return HeartbeatOutcome::Missed;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return HeartbeatOutcome::Missed;
            }
            match tokio::time::timeout(remaining, io.read_message()).await {
                Ok(Ok(Some(WireMessage::Heartbeat))) => {
                    self.metrics.lock().record_heartbeat(Utc::now());
                    return HeartbeatOutcome::Acked;
                }
                Ok(Ok(Some(_))) => continue,
                _ => return HeartbeatOutcome::Missed,
            }
        }
    }

    /// Best-effort control message; gives up quickly if the channel is
    /// owned by an in-flight task.
    pub async fn send_control(&self, message: &WireMessage) -> Result<(), PoolError> {
        match tokio::time::timeout(Duration::from_secs(1), self.io.lock()).await {
            Ok(mut io) => io.write_message(message).await,
            Err(_) => Err(PoolError::CommunicationError(
                "channel busy; control message not sent".to_string(),
            )),
        }
    }

    pub fn abort_heartbeat(&self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
    }
}
