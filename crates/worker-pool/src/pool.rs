//! The worker pool: spawn, dispatch, scale, terminate, persist, recover
//!
//! Registry mutations happen under the pool registry lock; per-process
//! task I/O happens under that worker's own lock; neither is held across
//! the other's waits. Capacity is enforced with a semaphore whose permits
//! live exactly as long as their workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use uuid::Uuid;

use audit_trail::{AuditEntry, AuditSink, Severity};

use crate::config::{PoolConfig, WorkerConfig};
use crate::heartbeat;
use crate::process::{Task, TaskResult, Worker, WorkerIo, WorkerRecord, WorkerStatus};
use crate::protocol::WireMessage;
use crate::reaper;
use crate::spawner::{SpawnCommand, SpawnedWorker, Spawner};
use crate::state::{SavedWorkerState, StateStore};
use crate::PoolError;

/// Outcome of a best-effort recovery pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct WorkerPool {
    config: PoolConfig,
    spawner: Arc<dyn Spawner>,
    audit: Arc<dyn AuditSink>,
    workers: RwLock<HashMap<Uuid, Arc<Worker>>>,
    capacity: Arc<Semaphore>,
    send_permits: Arc<Semaphore>,
    capacity_permits: parking_lot::Mutex<HashMap<Uuid, OwnedSemaphorePermit>>,
    seq: AtomicU64,
    state_store: StateStore,
    shutting_down: AtomicBool,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool and start its background sweeper.
    pub fn start(
        config: PoolConfig,
        spawner: Arc<dyn Spawner>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        let state_store = StateStore::new(config.states_dir());
        let max = config.max_concurrent_processes;
        let sweep_interval = Duration::from_secs(config.sweep_interval_seconds);

        let pool = Arc::new(Self {
            config,
            spawner,
            audit,
            workers: RwLock::new(HashMap::new()),
            capacity: Arc::new(Semaphore::new(max)),
            send_permits: Arc::new(Semaphore::new(max)),
            capacity_permits: parking_lot::Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
            state_store,
            shutting_down: AtomicBool::new(false),
            sweeper: parking_lot::Mutex::new(None),
        });

        let sweeper = reaper::spawn_sweeper(Arc::downgrade(&pool), sweep_interval);
        *pool.sweeper.lock() = Some(sweeper);
        pool
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Spawn one worker and wait for its ready handshake.
    pub async fn spawn(
        &self,
        worker_config: WorkerConfig,
        instance_id: &str,
    ) -> Result<WorkerRecord, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::SpawnFailed("pool is shutting down".to_string()));
        }

        let max = self.config.max_concurrent_processes;
        let permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| PoolError::CapacityExceeded {
                active: max,
                max,
            })?;

        {
            let workers = self.workers.read().await;
            if workers
                .values()
                .any(|w| w.instance_id == instance_id && w.status().is_active())
            {
                return Err(PoolError::SpawnFailed(format!(
                    "instance id {instance_id} already in use"
                )));
            }
        }

        // Workers expect the conventional layout under the working dir.
        tokio::fs::create_dir_all(self.config.logs_dir()).await?;

        let config_json = serde_json::to_string(&worker_config)?;
        let command = SpawnCommand::worker(
            &self.config.runtime,
            &worker_config.module_path(),
            instance_id,
            &config_json,
            worker_config.env.clone(),
            self.config.working_dir.clone(),
        );

        let SpawnedWorker {
            os_pid,
            stdin,
            stdout,
            mut handle,
        } = self.spawner.spawn(command).await?;
        let mut io = WorkerIo::new(stdin, stdout);

        let handshake_timeout = Duration::from_secs(self.config.handshake_timeout_seconds);
        let handshake = tokio::time::timeout(handshake_timeout, async {
            loop {
                match io.read_message().await? {
                    Some(WireMessage::Ready) => return Ok::<(), PoolError>(()),
                    Some(_) => continue,
                    None => {
                        return Err(PoolError::CommunicationError(
                            "worker closed stdout before handshake".to_string(),
                        ))
                    }
                }
            }
        })
        .await;

        match handshake {
            Err(_) => {
                handle.kill();
                return Err(PoolError::HandshakeTimeout {
                    instance_id: instance_id.to_string(),
                });
            }
            Ok(Err(e)) => {
                handle.kill();
                return Err(e);
            }
            Ok(Ok(())) => {}
        }

        let local_seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(Worker::new(
            local_seq,
            instance_id.to_string(),
            worker_config,
            os_pid,
            io,
            handle,
        ));
        worker.set_status(WorkerStatus::Idle);

        if self.config.heartbeat.enabled {
            let emitter = heartbeat::spawn_heartbeat(
                worker.clone(),
                self.config.heartbeat.clone(),
                self.audit.clone(),
            );
            *worker.heartbeat_task.lock() = Some(emitter);
        }

        let record = worker.snapshot();
        {
            let mut workers = self.workers.write().await;
            workers.insert(worker.process_id, worker.clone());
        }
        self.capacity_permits
            .lock()
            .insert(worker.process_id, permit);

        self.audit
            .record(
                AuditEntry::agent_event(instance_id, "Worker spawned", "worker_lifecycle")
                    .with_metadata("process_id", serde_json::json!(record.process_id.to_string()))
                    .with_metadata("role", serde_json::json!(record.role)),
            )
            .await?;

        tracing::info!(
            process_id = %record.process_id,
            instance_id = instance_id,
            role = %record.role,
            os_pid = ?record.os_pid,
            "worker spawned"
        );
        Ok(record)
    }

    /// Dispatch a task to a specific worker and await its result.
    pub async fn send(&self, process_id: Uuid, task: Task) -> Result<TaskResult, PoolError> {
        let _permit = self
            .send_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::CommunicationError("dispatch executor closed".to_string()))?;

        let worker = {
            let workers = self.workers.read().await;
            workers.get(&process_id).cloned()
        }
        .ok_or(PoolError::ProcessNotFound(process_id))?;

        let timeout = Duration::from_secs(self.config.task_timeout_seconds);
        let result = worker.send_task(&task, timeout).await;

        if let Ok(ref task_result) = result {
            tracing::debug!(
                process_id = %process_id,
                task_id = %task.task_id,
                status = ?task_result.status,
                "task completed"
            );
        }
        result
    }

    /// Workers of a role currently counted against capacity.
    pub async fn active_workers_for_role(&self, role: &str) -> Vec<WorkerRecord> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| w.config.role == role && w.status().is_active())
            .map(|w| w.snapshot())
            .collect()
    }

    /// An idle worker of the role, least loaded first, lowest sequence as
    /// the tie-break.
    pub async fn pick_idle_worker(&self, role: &str) -> Option<WorkerRecord> {
        let workers = self.workers.read().await;
        let mut idle: Vec<&Arc<Worker>> = workers
            .values()
            .filter(|w| w.config.role == role && w.status() == WorkerStatus::Idle)
            .collect();
        idle.sort_by(|a, b| {
            let load_a = a.snapshot().current_load;
            let load_b = b.snapshot().current_load;
            load_a
                .partial_cmp(&load_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.local_seq.cmp(&b.local_seq))
        });
        idle.first().map(|w| w.snapshot())
    }

    /// Bring the role's worker count to `target`. Scaling down terminates
    /// the oldest idle workers first and never pre-empts a busy worker.
    pub async fn scale(
        &self,
        role: &str,
        target: usize,
        template: WorkerConfig,
    ) -> Result<usize, PoolError> {
        let current: Vec<WorkerRecord> = self.active_workers_for_role(role).await;

        if current.len() < target {
            for _ in current.len()..target {
                let instance_id = format!("{role}-{}", self.seq.fetch_add(1, Ordering::Relaxed));
                self.spawn(template.clone(), &instance_id).await?;
            }
        } else if current.len() > target {
            let mut idle: Vec<&WorkerRecord> = current
                .iter()
                .filter(|w| w.status == WorkerStatus::Idle)
                .collect();
            idle.sort_by_key(|w| w.last_activity);

            let excess = current.len() - target;
            for record in idle.into_iter().take(excess) {
                self.terminate(record.process_id).await?;
            }
        }

        Ok(self.active_workers_for_role(role).await.len())
    }

    /// Gracefully stop one worker: shutdown message, then SIGTERM, then
    /// SIGKILL. Idempotent; terminating an unknown process is a no-op.
    pub async fn terminate(&self, process_id: Uuid) -> Result<(), PoolError> {
        let Some(worker) = ({
            let workers = self.workers.read().await;
            workers.get(&process_id).cloned()
        }) else {
            return Ok(());
        };

        worker.abort_heartbeat();
        if let Err(e) = worker.send_control(&WireMessage::Shutdown).await {
            tracing::debug!(process_id = %process_id, error = %e, "shutdown message not delivered");
        }

        {
            let mut handle = worker.handle.lock().await;
            let graceful = Duration::from_secs(self.config.graceful_shutdown_seconds);
            if tokio::time::timeout(graceful, handle.wait()).await.is_err() {
                tracing::warn!(process_id = %process_id, "graceful shutdown expired, sending SIGTERM");
                handle.terminate();
                let term_wait = Duration::from_secs(self.config.term_wait_seconds);
                if tokio::time::timeout(term_wait, handle.wait()).await.is_err() {
                    tracing::warn!(process_id = %process_id, "SIGTERM expired, killing");
                    handle.kill();
                    let _ = tokio::time::timeout(term_wait, handle.wait()).await;
                }
            }
        }

        worker.set_status(WorkerStatus::Terminated);
        self.remove_worker(process_id).await;

        self.audit
            .record(
                AuditEntry::agent_event(
                    worker.instance_id.clone(),
                    "Worker terminated",
                    "worker_lifecycle",
                )
                .with_metadata("process_id", serde_json::json!(process_id.to_string())),
            )
            .await?;

        tracing::info!(process_id = %process_id, instance_id = %worker.instance_id, "worker terminated");
        Ok(())
    }

    async fn remove_worker(&self, process_id: Uuid) {
        self.workers.write().await.remove(&process_id);
        self.capacity_permits.lock().remove(&process_id);
    }

    pub async fn status(&self, process_id: Uuid) -> Result<WorkerRecord, PoolError> {
        let workers = self.workers.read().await;
        workers
            .get(&process_id)
            .map(|w| w.snapshot())
            .ok_or(PoolError::ProcessNotFound(process_id))
    }

    pub async fn status_all(&self) -> Vec<WorkerRecord> {
        let workers = self.workers.read().await;
        let mut records: Vec<WorkerRecord> = workers.values().map(|w| w.snapshot()).collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    pub async fn active_count(&self) -> usize {
        let workers = self.workers.read().await;
        workers.values().filter(|w| w.status().is_active()).count()
    }

    /// Persist one worker's state to `states/<process_id>.json`.
    pub async fn save_state(&self, process_id: Uuid) -> Result<(), PoolError> {
        let worker = {
            let workers = self.workers.read().await;
            workers.get(&process_id).cloned()
        }
        .ok_or(PoolError::ProcessNotFound(process_id))?;

        let state = SavedWorkerState::from_record(&worker.snapshot(), &worker.config);
        self.state_store.save(&state).await
    }

    pub async fn load_state(&self, process_id: Uuid) -> Result<SavedWorkerState, PoolError> {
        self.state_store.load(process_id).await
    }

    /// Respawn workers from persisted state. Best effort: failures are
    /// reported, not fatal.
    pub async fn recover_all(&self) -> Result<RecoveryReport, PoolError> {
        let mut report = RecoveryReport::default();

        for state in self.state_store.list().await? {
            match self.spawn(state.config.clone(), &state.instance_id).await {
                Ok(record) => {
                    // The old state file no longer describes a live process.
                    let _ = self.state_store.remove(state.process_id).await;
                    tracing::info!(
                        instance_id = %state.instance_id,
                        new_process_id = %record.process_id,
                        "worker recovered from saved state"
                    );
                    report.recovered.push(state.instance_id);
                }
                Err(e) => {
                    tracing::warn!(
                        instance_id = %state.instance_id,
                        error = %e,
                        "worker recovery failed"
                    );
                    report.failed.push((state.instance_id, e.to_string()));
                }
            }
        }

        self.audit
            .record(
                AuditEntry::agent_event("worker_pool", "Recovery pass completed", "worker_recovery")
                    .with_metadata("recovered", serde_json::json!(report.recovered.len()))
                    .with_metadata("failed", serde_json::json!(report.failed.len())),
            )
            .await?;
        Ok(report)
    }

    /// Reap workers whose subprocess has exited or that went unresponsive.
    pub async fn cleanup_terminated(&self) -> Result<usize, PoolError> {
        let workers: Vec<Arc<Worker>> = {
            let workers = self.workers.read().await;
            workers.values().cloned().collect()
        };

        let mut reaped = 0;
        for worker in workers {
            let exited = {
                let mut handle = worker.handle.lock().await;
                handle.try_wait().unwrap_or(None).is_some()
            };
            let unresponsive = worker.status() == WorkerStatus::Unresponsive;
            if !exited && !unresponsive {
                continue;
            }

            if unresponsive && !exited {
                let mut handle = worker.handle.lock().await;
                handle.kill();
            }
            worker.abort_heartbeat();
            worker.set_status(WorkerStatus::Terminated);
            self.remove_worker(worker.process_id).await;
            reaped += 1;

            self.audit
                .record(
                    AuditEntry::agent_event(
                        worker.instance_id.clone(),
                        "Worker reaped",
                        "worker_lifecycle",
                    )
                    .with_severity(Severity::Debug)
                    .with_metadata("unresponsive", serde_json::json!(unresponsive)),
                )
                .await?;
        }
        Ok(reaped)
    }

    /// Save state for every worker, terminate them all, and stop the
    /// background sweeper.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        self.shutting_down.store(true, Ordering::Relaxed);
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        let ids: Vec<Uuid> = {
            let workers = self.workers.read().await;
            workers.keys().copied().collect()
        };

        for process_id in ids {
            if let Err(e) = self.save_state(process_id).await {
                tracing::warn!(process_id = %process_id, error = %e, "state save failed during shutdown");
            }
            if let Err(e) = self.terminate(process_id).await {
                tracing::warn!(process_id = %process_id, error = %e, "termination failed during shutdown");
            }
        }

        self.state_store
            .cleanup_old(self.config.state_file_max_age_days)
            .await?;

        self.audit
            .record(AuditEntry::agent_event(
                "worker_pool",
                "Pool shut down",
                "worker_lifecycle",
            ))
            .await?;

        tracing::info!("worker pool shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawner::{ScriptedSpawner, WorkerBehavior};
    use audit_trail::InMemoryAuditSink;

    fn test_config(dir: &std::path::Path, max: usize) -> PoolConfig {
        PoolConfig {
            max_concurrent_processes: max,
            task_timeout_seconds: 5,
            handshake_timeout_seconds: 2,
            heartbeat: crate::config::HeartbeatConfig {
                enabled: false,
                ..Default::default()
            },
            working_dir: dir.to_path_buf(),
            graceful_shutdown_seconds: 2,
            term_wait_seconds: 1,
            ..Default::default()
        }
    }

    fn pool_with(
        dir: &std::path::Path,
        max: usize,
        behavior: WorkerBehavior,
    ) -> (Arc<WorkerPool>, Arc<InMemoryAuditSink>) {
        let sink = Arc::new(InMemoryAuditSink::new());
        let pool = WorkerPool::start(
            test_config(dir, max),
            Arc::new(ScriptedSpawner::new(behavior)),
            sink.clone() as Arc<dyn AuditSink>,
        );
        (pool, sink)
    }

    #[tokio::test]
    async fn spawn_returns_idle_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        assert_eq!(record.status, WorkerStatus::Idle);
        assert_eq!(record.role, "research");
        assert!(sink
            .entries()
            .iter()
            .any(|e| e.action == "Worker spawned"));
    }

    #[tokio::test]
    async fn capacity_of_one_rejects_second_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 1, WorkerBehavior::Echo);

        let first = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        assert_eq!(first.status, WorkerStatus::Idle);

        let second = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-2")
            .await;
        assert!(matches!(second, Err(PoolError::CapacityExceeded { .. })));
    }

    #[tokio::test]
    async fn capacity_frees_after_termination() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 1, WorkerBehavior::Echo);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        pool.terminate(record.process_id).await.unwrap();

        pool.spawn(WorkerConfig::for_role("research", "research"), "research-2")
            .await
            .unwrap();
        assert_eq!(pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_instance_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        pool.spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        assert!(matches!(
            pool.spawn(WorkerConfig::for_role("research", "research"), "research-1")
                .await,
            Err(PoolError::SpawnFailed(_))
        ));
    }

    #[tokio::test]
    async fn process_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 8, WorkerBehavior::Echo);

        let mut ids = std::collections::HashSet::new();
        for i in 0..5 {
            let record = pool
                .spawn(
                    WorkerConfig::for_role("research", "research"),
                    &format!("research-{i}"),
                )
                .await
                .unwrap();
            assert!(ids.insert(record.process_id));
        }
    }

    #[tokio::test]
    async fn send_roundtrips_through_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();

        let task = Task::new("t-1", "analysis", serde_json::json!({"question": "why"}));
        let result = pool.send(record.process_id, task).await.unwrap();

        assert_eq!(result.task_id, "t-1");
        assert_eq!(result.status, crate::protocol::TaskStatus::Completed);
        assert_eq!(result.instance_id, "research-1");
        // The scripted worker echoes the task back.
        assert_eq!(result.output["task_id"], serde_json::json!("t-1"));

        let after = pool.status(record.process_id).await.unwrap();
        assert_eq!(after.status, WorkerStatus::Idle);
        assert_eq!(after.metrics.tasks_completed, 1);
    }

    #[tokio::test]
    async fn concurrent_tasks_route_to_their_own_workers() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let a = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-a")
            .await
            .unwrap();
        let b = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-b")
            .await
            .unwrap();

        let task_a = Task::new("t-a", "analysis", serde_json::json!({"n": 1}));
        let task_b = Task::new("t-b", "analysis", serde_json::json!({"n": 2}));
        let (ra, rb) = tokio::join!(
            pool.send(a.process_id, task_a),
            pool.send(b.process_id, task_b)
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.task_id, "t-a");
        assert_eq!(ra.instance_id, "research-a");
        assert_eq!(rb.task_id, "t-b");
        assert_eq!(rb.instance_id, "research-b");
    }

    #[tokio::test]
    async fn sends_to_one_worker_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();

        let t1 = Task::new("t-1", "analysis", serde_json::json!({}));
        let t2 = Task::new("t-2", "analysis", serde_json::json!({}));
        let (r1, r2) = tokio::join!(
            pool.send(record.process_id, t1),
            pool.send(record.process_id, t2)
        );
        assert_eq!(r1.unwrap().task_id, "t-1");
        assert_eq!(r2.unwrap().task_id, "t-2");

        let after = pool.status(record.process_id).await.unwrap();
        assert_eq!(after.metrics.tasks_completed, 2);
    }

    #[tokio::test]
    async fn failed_tasks_update_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::FailTasks);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        let result = pool
            .send(record.process_id, Task::new("t-1", "analysis", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(result.status, crate::protocol::TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("scripted failure"));

        let after = pool.status(record.process_id).await.unwrap();
        assert_eq!(after.metrics.tasks_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_for_silent_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Silent);

        let result = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await;
        assert!(matches!(result, Err(PoolError::HandshakeTimeout { .. })));
        assert_eq!(pool.active_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_worker_times_out_and_goes_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(
            dir.path(),
            4,
            WorkerBehavior::SlowEcho { delay_ms: 20_000 },
        );

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        let result = pool
            .send(record.process_id, Task::new("t-1", "analysis", serde_json::json!({})))
            .await;
        assert!(matches!(result, Err(PoolError::TaskTimeout { .. })));

        let after = pool.status(record.process_id).await.unwrap();
        assert_eq!(after.status, WorkerStatus::Error);
    }

    #[tokio::test]
    async fn send_to_unknown_process_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let result = pool
            .send(Uuid::new_v4(), Task::new("t", "k", serde_json::json!({})))
            .await;
        assert!(matches!(result, Err(PoolError::ProcessNotFound(_))));
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        pool.terminate(record.process_id).await.unwrap();
        pool.terminate(record.process_id).await.unwrap();

        assert!(matches!(
            pool.status(record.process_id).await,
            Err(PoolError::ProcessNotFound(_))
        ));
    }

    #[tokio::test]
    async fn scale_up_and_down() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 8, WorkerBehavior::Echo);

        let template = WorkerConfig::for_role("implementation", "operational");
        let count = pool.scale("implementation", 3, template.clone()).await.unwrap();
        assert_eq!(count, 3);

        let count = pool.scale("implementation", 1, template).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn save_and_recover_state() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();
        pool.save_state(record.process_id).await.unwrap();

        let loaded = pool.load_state(record.process_id).await.unwrap();
        assert_eq!(loaded.instance_id, "research-1");
        pool.terminate(record.process_id).await.unwrap();

        // A fresh pool over the same working directory picks the state up.
        let (fresh, _sink2) = pool_with(dir.path(), 4, WorkerBehavior::Echo);
        let report = fresh.recover_all().await.unwrap();
        assert_eq!(report.recovered, vec!["research-1".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(fresh.active_count().await, 1);
    }

    #[tokio::test]
    async fn shutdown_terminates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, sink) = pool_with(dir.path(), 4, WorkerBehavior::Echo);

        for i in 0..3 {
            pool.spawn(
                WorkerConfig::for_role("research", "research"),
                &format!("research-{i}"),
            )
            .await
            .unwrap();
        }
        pool.shutdown().await.unwrap();

        assert_eq!(pool.active_count().await, 0);
        assert!(sink.entries().iter().any(|e| e.action == "Pool shut down"));

        let result = pool
            .spawn(WorkerConfig::for_role("research", "research"), "late")
            .await;
        assert!(matches!(result, Err(PoolError::SpawnFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn mute_worker_goes_unresponsive_and_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 4);
        config.heartbeat = crate::config::HeartbeatConfig {
            interval_seconds: 1,
            timeout_seconds: 1,
            max_missed: 2,
            enabled: true,
        };
        let sink = Arc::new(InMemoryAuditSink::new());
        let pool = WorkerPool::start(
            config,
            Arc::new(ScriptedSpawner::new(WorkerBehavior::Mute)),
            sink.clone() as Arc<dyn AuditSink>,
        );

        let record = pool
            .spawn(WorkerConfig::for_role("research", "research"), "research-1")
            .await
            .unwrap();

        // Two missed heartbeats at one-second intervals with one-second
        // ack timeouts: give the emitter a few virtual seconds.
        tokio::time::sleep(Duration::from_secs(6)).await;
        let status = pool.status(record.process_id).await.unwrap().status;
        assert_eq!(status, WorkerStatus::Unresponsive);

        let reaped = pool.cleanup_terminated().await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(pool.active_count().await, 0);
        assert!(sink
            .entries()
            .iter()
            .any(|e| e.action == "Worker unresponsive after missed heartbeats"));
    }
}
