//! Workflow execution: drives a plan's dependency DAG against the worker
//! pool
//!
//! A task becomes ready when its blocking prerequisites are completed;
//! ready siblings dispatch concurrently, each to an idle worker of its
//! role (scaling the pool up within the per-role bound when none is
//! free). Model needs are routed through the gateway before dispatch.
//! Every completion is checkpointed; cancellation lets in-flight tasks
//! drain before the execution settles.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use audit_trail::{ActorIds, AuditEntry, AuditSink, EntryKind, Severity};
use model_gateway::{GatewayError, ModelRequest, ModelRouter};
use worker_pool::{
    PoolError, Task, TaskPriority, TaskResult, TaskStatus, WorkerConfig, WorkerPool, WorkerRecord,
};
use workflow_engine::{AgentRole, WorkflowPlan};

use crate::{ErrorKind, OrchestratorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Enough to resume after a crash: what finished and what was in flight
/// (the in-flight set is re-dispatched on resume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub completed_tasks: Vec<String>,
    pub in_flight_tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub state: ExecutionState,
    pub completed_tasks: HashSet<String>,
    pub in_flight_tasks: HashSet<String>,
    pub results: HashMap<String, TaskResult>,
    pub checkpoints: Vec<Checkpoint>,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// First failing task and its cause.
    pub failure: Option<String>,
}

impl WorkflowExecution {
    fn new(plan_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            state: ExecutionState::Pending,
            completed_tasks: HashSet::new(),
            in_flight_tasks: HashSet::new(),
            results: HashMap::new(),
            checkpoints: Vec::new(),
            cancel_requested: false,
            started_at: None,
            completed_at: None,
            failure: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent_per_role: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_role: 5,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 60_000,
        }
    }
}

pub struct WorkflowExecutor {
    pool: Arc<WorkerPool>,
    router: Arc<ModelRouter>,
    audit: Arc<dyn AuditSink>,
    executions: RwLock<HashMap<Uuid, WorkflowExecution>>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        pool: Arc<WorkerPool>,
        router: Arc<ModelRouter>,
        audit: Arc<dyn AuditSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            router,
            audit,
            executions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a new execution for a plan.
    pub fn start(&self, plan: &WorkflowPlan) -> Uuid {
        let execution = WorkflowExecution::new(plan.id);
        let id = execution.id;
        self.executions.write().insert(id, execution);
        id
    }

    /// Create an execution for the plan and drive it to a terminal state.
    pub async fn execute(&self, plan: &WorkflowPlan) -> Result<Uuid, OrchestratorError> {
        let execution_id = self.start(plan);
        self.run(execution_id, plan).await?;
        Ok(execution_id)
    }

    /// Drive an existing execution until it completes, fails, is
    /// cancelled, or pauses. Resuming re-queues whatever was in flight.
    pub async fn run(
        &self,
        execution_id: Uuid,
        plan: &WorkflowPlan,
    ) -> Result<(), OrchestratorError> {
        {
            let mut executions = self.executions.write();
            let execution = executions.get_mut(&execution_id).ok_or_else(|| {
                OrchestratorError::NotFound(format!("execution {execution_id}"))
            })?;
            execution.state = ExecutionState::Running;
            execution.started_at.get_or_insert_with(Utc::now);
            // Anything left in flight by a previous run is re-dispatched.
            execution.in_flight_tasks.clear();
        }

        self.audit_event(execution_id, plan, "Execution started", Severity::Info)
            .await;
        self.router
            .metrics()
            .set_pool_active_workers(self.pool.active_count().await as i64);

        let all_tasks: Vec<(String, AgentRole, u8)> = plan
            .agents
            .iter()
            .map(|a| {
                (
                    WorkflowPlan::task_id_for_role(a.role),
                    a.role,
                    a.priority,
                )
            })
            .collect();

        let mut blocking: HashMap<String, Vec<String>> = HashMap::new();
        for dependency in plan.dependencies.iter().filter(|d| d.is_blocking) {
            blocking
                .entry(dependency.dependent_task_id.clone())
                .or_default()
                .push(dependency.prerequisite_task_id.clone());
        }

        loop {
            enum Step {
                Finished,
                Cancelled,
                Paused,
                Deadlock,
                Dispatch(Vec<(String, AgentRole, u8)>),
            }

            let step = {
                let mut executions = self.executions.write();
                let execution = executions.get_mut(&execution_id).ok_or_else(|| {
                    OrchestratorError::NotFound(format!("execution {execution_id}"))
                })?;

                if execution.cancel_requested {
                    execution.state = ExecutionState::Cancelled;
                    execution.completed_at = Some(Utc::now());
                    Step::Cancelled
                } else if execution.state == ExecutionState::Paused {
                    Step::Paused
                } else if all_tasks
                    .iter()
                    .all(|(id, _, _)| execution.completed_tasks.contains(id))
                {
                    execution.state = ExecutionState::Completed;
                    execution.completed_at = Some(Utc::now());
                    Step::Finished
                } else {
                    let ready: Vec<(String, AgentRole, u8)> = all_tasks
                        .iter()
                        .filter(|(id, _, _)| {
                            !execution.completed_tasks.contains(id)
                                && !execution.in_flight_tasks.contains(id)
                                && blocking
                                    .get(id)
                                    .map(|prereqs| {
                                        prereqs
                                            .iter()
                                            .all(|p| execution.completed_tasks.contains(p))
                                    })
                                    .unwrap_or(true)
                        })
                        .cloned()
                        .collect();

                    if ready.is_empty() {
                        execution.state = ExecutionState::Failed;
                        execution.completed_at = Some(Utc::now());
                        execution.failure =
                            Some("unsatisfiable dependencies: no task is ready".to_string());
                        Step::Deadlock
                    } else {
                        for (id, _, _) in &ready {
                            execution.in_flight_tasks.insert(id.clone());
                        }
                        Step::Dispatch(ready)
                    }
                }
            };

            match step {
                Step::Finished => {
                    self.audit_event(execution_id, plan, "Execution completed", Severity::Info)
                        .await;
                    tracing::info!(execution_id = %execution_id, "execution completed");
                    return Ok(());
                }
                Step::Cancelled => {
                    self.audit_event(execution_id, plan, "Execution cancelled", Severity::Warning)
                        .await;
                    tracing::info!(execution_id = %execution_id, "execution cancelled");
                    return Ok(());
                }
                Step::Paused => {
                    self.audit_event(execution_id, plan, "Execution paused", Severity::Info)
                        .await;
                    return Ok(());
                }
                Step::Deadlock => {
                    self.audit_event(
                        execution_id,
                        plan,
                        "Execution failed: dependency deadlock",
                        Severity::Error,
                    )
                    .await;
                    return Ok(());
                }
                Step::Dispatch(ready) => {
                    let outcomes = futures::future::join_all(ready.into_iter().map(
                        |(task_id, role, priority)| async move {
                            let outcome = self.run_task(plan, &task_id, role, priority).await;
                            (task_id, outcome)
                        },
                    ))
                    .await;

                    let mut failed: Option<String> = None;
                    {
                        let mut executions = self.executions.write();
                        let execution =
                            executions.get_mut(&execution_id).ok_or_else(|| {
                                OrchestratorError::NotFound(format!("execution {execution_id}"))
                            })?;

                        for (task_id, outcome) in outcomes {
                            execution.in_flight_tasks.remove(&task_id);
                            match outcome {
                                Ok(result) if result.status == TaskStatus::Completed => {
                                    execution.completed_tasks.insert(task_id.clone());
                                    execution.results.insert(task_id.clone(), result);
                                    execution.checkpoints.push(Checkpoint {
                                        id: Uuid::new_v4(),
                                        created_at: Utc::now(),
                                        completed_tasks: execution
                                            .completed_tasks
                                            .iter()
                                            .cloned()
                                            .collect(),
                                        in_flight_tasks: execution
                                            .in_flight_tasks
                                            .iter()
                                            .cloned()
                                            .collect(),
                                    });
                                }
                                Ok(result) => {
                                    let cause = result
                                        .error
                                        .clone()
                                        .unwrap_or_else(|| format!("{:?}", result.status));
                                    execution.results.insert(task_id.clone(), result);
                                    failed.get_or_insert(format!(
                                        "task {task_id} failed: {cause}"
                                    ));
                                }
                                Err(error) => {
                                    failed.get_or_insert(format!(
                                        "task {task_id} failed: {error}"
                                    ));
                                }
                            }
                        }

                        if let Some(failure) = &failed {
                            execution.state = ExecutionState::Failed;
                            execution.completed_at = Some(Utc::now());
                            execution.failure = Some(failure.clone());
                        }
                    }

                    if let Some(failure) = failed {
                        self.audit_event(
                            execution_id,
                            plan,
                            &format!("Execution failed: {failure}"),
                            Severity::Error,
                        )
                        .await;
                        tracing::error!(execution_id = %execution_id, failure = %failure, "execution failed");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One task: route its model, find a worker, dispatch, retry
    /// transient failures with exponential backoff.
    async fn run_task(
        &self,
        plan: &WorkflowPlan,
        task_id: &str,
        role: AgentRole,
        priority: u8,
    ) -> Result<TaskResult, OrchestratorError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let routed_model = match self.route_model(plan, task_id, role).await {
                Ok(model_id) => model_id,
                Err(error) => {
                    if error.is_retryable() && attempt <= self.config.max_retries {
                        self.backoff(attempt, retry_hint(&error)).await;
                        continue;
                    }
                    return Err(error);
                }
            };

            let worker = match self.acquire_worker(role).await {
                Ok(worker) => worker,
                Err(error) => {
                    if error.is_retryable() && attempt <= self.config.max_retries {
                        self.backoff(attempt, None).await;
                        continue;
                    }
                    return Err(error);
                }
            };

            let mut task = Task::new(
                task_id,
                "workflow_task",
                serde_json::json!({
                    "plan_id": plan.id.to_string(),
                    "template_id": plan.template_id,
                    "role": role.as_str(),
                }),
            )
            .with_priority(priority_from(priority));
            task.context = serde_json::json!({ "model_id": routed_model });

            match self.pool.send(worker.process_id, task).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    let error: OrchestratorError = error.into();
                    if error.kind() == ErrorKind::Transient && attempt <= self.config.max_retries {
                        tracing::warn!(
                            task_id = task_id,
                            attempt = attempt,
                            error = %error,
                            "task dispatch failed; retrying"
                        );
                        self.backoff(attempt, None).await;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Pick the model serving this task's calls, by role.
    async fn route_model(
        &self,
        plan: &WorkflowPlan,
        task_id: &str,
        role: AgentRole,
    ) -> Result<String, OrchestratorError> {
        let request = ModelRequest::new(
            task_id,
            role.as_str(),
            format!("{} work for plan {}", role.as_str(), plan.id),
        );
        let ranked = self.router.route(&request).await?;
        Ok(ranked
            .first()
            .map(|m| m.model_id.clone())
            .unwrap_or_default())
    }

    async fn acquire_worker(&self, role: AgentRole) -> Result<WorkerRecord, OrchestratorError> {
        if let Some(worker) = self.pool.pick_idle_worker(role.as_str()).await {
            return Ok(worker);
        }

        let active = self.pool.active_workers_for_role(role.as_str()).await;
        if active.len() < self.config.max_concurrent_per_role {
            let config = WorkerConfig::for_role(role.as_str(), role.default_tier().as_str());
            let instance_id = format!(
                "{}-{}",
                role.as_str(),
                &Uuid::new_v4().to_string()[..8]
            );
            match self.pool.spawn(config, &instance_id).await {
                Ok(worker) => return Ok(worker),
                Err(PoolError::CapacityExceeded { .. }) => {}
                Err(error) => return Err(error.into()),
            }
        }

        // No idle worker and no headroom: queue behind the least loaded
        // active worker; the per-process lock serializes the tasks.
        let active = self.pool.active_workers_for_role(role.as_str()).await;
        active
            .into_iter()
            .min_by(|a, b| {
                a.current_load
                    .partial_cmp(&b.current_load)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| {
                OrchestratorError::CapacityExceeded(format!(
                    "no workers available for role {}",
                    role.as_str()
                ))
            })
    }

    async fn backoff(&self, attempt: u32, hint_seconds: Option<f64>) {
        let exp = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        let mut delay = exp.min(self.config.backoff_cap_ms);
        if let Some(hint) = hint_seconds {
            delay = delay.max((hint * 1000.0) as u64).min(self.config.backoff_cap_ms);
        }
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    /// Request cancellation: no new tasks are dispatched, in-flight tasks
    /// drain, then the execution settles as cancelled.
    pub fn cancel(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("execution {execution_id}")))?;

        execution.cancel_requested = true;
        if execution.state == ExecutionState::Pending {
            execution.state = ExecutionState::Cancelled;
            execution.completed_at = Some(Utc::now());
        }
        tracing::info!(execution_id = %execution_id, "cancellation requested");
        Ok(())
    }

    pub fn pause(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("execution {execution_id}")))?;
        if execution.state == ExecutionState::Running {
            execution.state = ExecutionState::Paused;
        }
        Ok(())
    }

    pub fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.executions.read().get(&execution_id).cloned()
    }

    async fn audit_event(
        &self,
        execution_id: Uuid,
        plan: &WorkflowPlan,
        action: &str,
        severity: Severity,
    ) {
        let entry = AuditEntry::new(EntryKind::Workflow, action, "workflow_execution")
            .with_severity(severity)
            .with_actors(ActorIds::default().with_workflow(plan.id.to_string()))
            .with_metadata("execution_id", serde_json::json!(execution_id.to_string()));
        if let Err(error) = self.audit.record(entry).await {
            tracing::error!(error = %error, "failed to record execution audit event");
        }
    }
}

fn priority_from(priority: u8) -> TaskPriority {
    match priority {
        0 | 1 => TaskPriority::High,
        2 => TaskPriority::Medium,
        3 => TaskPriority::Low,
        _ => TaskPriority::Background,
    }
}

fn retry_hint(error: &OrchestratorError) -> Option<f64> {
    match error {
        OrchestratorError::Gateway(GatewayError::NoAvailableModel {
            retry_after_seconds,
        }) => *retry_after_seconds,
        OrchestratorError::Gateway(GatewayError::RateLimited {
            retry_after_seconds, ..
        }) => *retry_after_seconds,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audit_trail::{AuditSink, DatabaseManager, InMemoryAuditSink};
    use model_gateway::{
        Clock, CostTracker, ManualClock, ModelClient, ModelMetadata, ModelResponse,
        PerformanceMonitor, RateLimiter, RateLimits, ResponseEvaluator, RouterConfig,
        ModelRegistry,
    };
    use worker_pool::{PoolConfig, ScriptedSpawner, WorkerBehavior};
    use workflow_engine::{
        DefaultAvailabilityProbe, EngineConfig, EvaluationContext, EvaluationInput,
        Complexity, WorkflowEngine,
    };

    struct InstantClient;

    #[async_trait]
    impl ModelClient for InstantClient {
        async fn complete(
            &self,
            model: &ModelMetadata,
            request: &ModelRequest,
        ) -> Result<ModelResponse, model_gateway::GatewayError> {
            Ok(ModelResponse {
                model_id: model.id.clone(),
                content: format!("work on {}", request.task_id),
                input_tokens: 100,
                output_tokens: 50,
                latency_ms: 5.0,
            })
        }
    }

    fn test_model() -> ModelMetadata {
        ModelMetadata {
            id: "test-model".to_string(),
            provider: "test".to_string(),
            name: "Test Model".to_string(),
            capabilities: vec![],
            cost_per_1k_input_tokens: 0.001,
            cost_per_1k_output_tokens: 0.002,
            rate_limits: RateLimits {
                requests_per_minute: 10_000,
                tokens_per_minute: 10_000_000,
            },
            context_window: 128_000,
            average_response_time_ms: 5.0,
            enabled: true,
        }
    }

    async fn router(sink: Arc<InMemoryAuditSink>) -> Arc<ModelRouter> {
        let registry = Arc::new(ModelRegistry::new(vec![test_model()]));
        let db = Arc::new(DatabaseManager::open_in_memory().await.unwrap());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let providers = std::collections::HashMap::from([(
            "test-model".to_string(),
            "test".to_string(),
        )]);

        Arc::new(ModelRouter::new(
            registry.clone(),
            Arc::new(RateLimiter::new(
                registry,
                db.clone(),
                sink.clone() as Arc<dyn AuditSink>,
                clock.clone(),
                90.0,
            )),
            Arc::new(CostTracker::new(db.clone(), clock.clone(), providers)),
            Arc::new(PerformanceMonitor::new(db.clone(), clock.clone())),
            Arc::new(ResponseEvaluator::new(0.7, 10)),
            None,
            Arc::new(InstantClient),
            sink as Arc<dyn AuditSink>,
            db,
            clock,
            RouterConfig::default(),
        ))
    }

    async fn executor_with(
        dir: &std::path::Path,
        behavior: WorkerBehavior,
    ) -> (Arc<WorkflowExecutor>, Arc<InMemoryAuditSink>) {
        let sink = Arc::new(InMemoryAuditSink::new());
        let pool = worker_pool::WorkerPool::start(
            PoolConfig {
                max_concurrent_processes: 16,
                task_timeout_seconds: 10,
                handshake_timeout_seconds: 5,
                heartbeat: worker_pool::HeartbeatConfig {
                    enabled: false,
                    ..Default::default()
                },
                working_dir: dir.to_path_buf(),
                graceful_shutdown_seconds: 1,
                term_wait_seconds: 1,
                ..Default::default()
            },
            Arc::new(ScriptedSpawner::new(behavior)),
            sink.clone() as Arc<dyn AuditSink>,
        );
        let router = router(sink.clone()).await;

        let executor = Arc::new(WorkflowExecutor::new(
            pool,
            router,
            sink.clone() as Arc<dyn AuditSink>,
            ExecutorConfig {
                max_retries: 2,
                backoff_base_ms: 10,
                backoff_cap_ms: 50,
                ..Default::default()
            },
        ));
        (executor, sink)
    }

    async fn sequential_plan() -> WorkflowPlan {
        let engine = WorkflowEngine::new(
            EngineConfig::default(),
            Arc::new(DefaultAvailabilityProbe),
            Arc::new(InMemoryAuditSink::new()),
        );
        let input = EvaluationInput {
            request_id: "req-1".to_string(),
            user_id: None,
            intent: "create_project".to_string(),
            content_hash: 1,
            confidence: 0.9,
            complexity: Complexity::High,
            entities: std::collections::HashMap::from([(
                "languages".to_string(),
                vec!["python".to_string()],
            )]),
            requirement_count: 3,
        };
        let matches = engine
            .evaluate(&input, &EvaluationContext::default())
            .await
            .unwrap();
        engine.select(&matches).await.unwrap()
    }

    #[tokio::test]
    async fn sequential_plan_completes_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _sink) = executor_with(dir.path(), WorkerBehavior::Echo).await;
        let plan = sequential_plan().await;

        let execution_id = executor.execute(&plan).await.unwrap();
        let execution = executor.get_execution(execution_id).unwrap();

        assert_eq!(execution.state, ExecutionState::Completed);
        assert_eq!(execution.completed_tasks.len(), 3);
        assert_eq!(execution.results.len(), 3);
        assert_eq!(execution.checkpoints.len(), 3);

        // Sequential pattern: first checkpoint holds only the manager's
        // task, the DAG order is respected.
        assert_eq!(
            execution.checkpoints[0].completed_tasks,
            vec!["task_project_manager".to_string()]
        );
        assert!(execution.checkpoints[1]
            .completed_tasks
            .contains(&"task_business_analyst".to_string()));
    }

    #[tokio::test]
    async fn worker_reported_failure_fails_the_execution() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _sink) = executor_with(dir.path(), WorkerBehavior::FailTasks).await;
        let plan = sequential_plan().await;

        let execution_id = executor.execute(&plan).await.unwrap();
        let execution = executor.get_execution(execution_id).unwrap();

        assert_eq!(execution.state, ExecutionState::Failed);
        let failure = execution.failure.unwrap();
        assert!(failure.contains("task_project_manager"));
        assert!(failure.contains("scripted failure"));
        assert!(execution.completed_tasks.is_empty());
    }

    #[tokio::test]
    async fn cancellation_drains_in_flight_work() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _sink) =
            executor_with(dir.path(), WorkerBehavior::SlowEcho { delay_ms: 500 }).await;
        let plan = sequential_plan().await;

        let execution_id = executor.start(&plan);
        let runner = {
            let executor = executor.clone();
            let plan = plan.clone();
            tokio::spawn(async move { executor.run(execution_id, &plan).await })
        };

        // Let the first wave get in flight, then cancel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.cancel(execution_id).unwrap();
        runner.await.unwrap().unwrap();

        let execution = executor.get_execution(execution_id).unwrap();
        assert_eq!(execution.state, ExecutionState::Cancelled);
        // The in-flight first task finished; nothing new was dispatched.
        assert_eq!(execution.completed_tasks.len(), 1);
        assert!(execution.in_flight_tasks.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_start_settles_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _sink) = executor_with(dir.path(), WorkerBehavior::Echo).await;
        let plan = sequential_plan().await;

        let execution_id = executor.start(&plan);
        executor.cancel(execution_id).unwrap();
        let execution = executor.get_execution(execution_id).unwrap();
        assert_eq!(execution.state, ExecutionState::Cancelled);
    }

    #[tokio::test]
    async fn resume_requeues_the_in_flight_set() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _sink) = executor_with(dir.path(), WorkerBehavior::Echo).await;
        let plan = sequential_plan().await;

        // Simulate a crash: the first task completed, the second was in
        // flight when the process died.
        let execution_id = executor.start(&plan);
        {
            let mut executions = executor.executions.write();
            let execution = executions.get_mut(&execution_id).unwrap();
            execution
                .completed_tasks
                .insert("task_project_manager".to_string());
            execution
                .in_flight_tasks
                .insert("task_business_analyst".to_string());
        }

        executor.run(execution_id, &plan).await.unwrap();
        let execution = executor.get_execution(execution_id).unwrap();
        assert_eq!(execution.state, ExecutionState::Completed);
        assert_eq!(execution.completed_tasks.len(), 3);
    }

    #[tokio::test]
    async fn cancel_of_unknown_execution_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _sink) = executor_with(dir.path(), WorkerBehavior::Echo).await;
        assert!(matches!(
            executor.cancel(Uuid::new_v4()),
            Err(OrchestratorError::NotFound(_))
        ));
    }
}
