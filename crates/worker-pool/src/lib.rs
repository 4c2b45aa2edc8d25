//! Worker pool - a fleet of long-lived subprocess workers per agent role
//!
//! The pool owns every worker's OS process, its line-delimited JSON stdio
//! channel, its metrics, and its lifecycle: spawn with handshake, serialized
//! task dispatch, heartbeats with acknowledgement, scaling, persistence of
//! per-process state, and graceful teardown. Locking order is pool registry,
//! then per-process, then metrics; no lock is held across worker I/O waits.

pub mod config;
pub mod heartbeat;
pub mod metrics;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod reaper;
pub mod spawner;
pub mod state;

pub use config::{HeartbeatConfig, PoolConfig, WorkerConfig};
pub use metrics::ProcessMetrics;
pub use pool::{RecoveryReport, WorkerPool};
pub use process::{Task, TaskPriority, TaskResult, WorkerRecord, WorkerStatus};
pub use protocol::{ResultMetadata, TaskStatus, WireMessage};
pub use spawner::{
    CommandSpawner, ProcessHandle, SpawnCommand, SpawnedWorker, Spawner, WorkerBehavior,
    ScriptedSpawner,
};
pub use state::SavedWorkerState;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool at capacity: {active} of {max} workers active")]
    CapacityExceeded { active: usize, max: usize },

    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("worker {instance_id} did not complete handshake in time")]
    HandshakeTimeout { instance_id: String },

    #[error("process not found: {0}")]
    ProcessNotFound(Uuid),

    #[error("process {process_id} not ready: status is {status:?}")]
    ProcessNotReady {
        process_id: Uuid,
        status: process::WorkerStatus,
    },

    #[error("communication error: {0}")]
    CommunicationError(String),

    #[error("task {task_id} timed out after {seconds} seconds")]
    TaskTimeout { task_id: String, seconds: u64 },

    #[error("state persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit error: {0}")]
    Audit(#[from] audit_trail::AuditError),
}
