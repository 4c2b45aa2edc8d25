//! Orchestrator - turns workflow plans into gated, executed work
//!
//! The planner expands a [`workflow_engine::WorkflowPlan`] into a detailed
//! execution plan with risks, checkpoints, and a timeline; the approval
//! layer walks that plan through verification gates; the executor drives
//! the dependency DAG against the worker pool, routing each task's model
//! needs through the gateway and checkpointing after every completion.

pub mod approval;
pub mod config;
pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod request;
pub mod telemetry;

pub use approval::{
    ApprovalCriteria, ApprovalLevel, ApprovalWorkflow, Decision, ImpactAssessment,
    ModificationType, PlanModification, RiskLevel, UserFeedback, VerificationGate,
    VerificationStatus,
};
pub use config::{AuditConfig, OrchestratorConfig, ResponseCacheConfig};
pub use context::{ContextStore, ConversationContext};
pub use executor::{
    Checkpoint, ExecutionState, ExecutorConfig, WorkflowExecution, WorkflowExecutor,
};
pub use orchestrator::{Orchestrator, PlannedWorkflow};
pub use planner::{
    Contingency, ExecutionPlan, ExecutionPlanner, Mitigation, PlanComplexity, Risk, TaskDetail,
    ValidationLevel,
};
pub use request::{ParsedRequest, RequestParser, UserRequest, WorkflowInitiation};

use thiserror::Error;

/// The error taxonomy callers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or unmet preconditions; not retried.
    Validation,
    /// Referenced entity does not exist; not retried.
    NotFound,
    /// Pool full, model unavailable, budget exceeded; retried with
    /// backoff or failover by the caller.
    CapacityExceeded,
    /// Communication error, timeout, rate limit; retried with backoff.
    Transient,
    /// State corruption or unrecoverable failure; the unit is taken out
    /// of service.
    Fatal,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Pool(#[from] worker_pool::PoolError),

    #[error(transparent)]
    Gateway(#[from] model_gateway::GatewayError),

    #[error(transparent)]
    Engine(#[from] workflow_engine::EngineError),

    #[error(transparent)]
    Audit(#[from] audit_trail::AuditError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        use model_gateway::GatewayError;
        use worker_pool::PoolError;

        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            OrchestratorError::Transient(_) => ErrorKind::Transient,
            OrchestratorError::Fatal(_) => ErrorKind::Fatal,
            OrchestratorError::Pool(e) => match e {
                PoolError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
                PoolError::ProcessNotFound(_) => ErrorKind::NotFound,
                PoolError::ProcessNotReady { .. }
                | PoolError::CommunicationError(_)
                | PoolError::TaskTimeout { .. }
                | PoolError::SpawnFailed(_)
                | PoolError::HandshakeTimeout { .. } => ErrorKind::Transient,
                PoolError::Persistence(_)
                | PoolError::Serialization(_)
                | PoolError::Io(_)
                | PoolError::Audit(_) => ErrorKind::Fatal,
            },
            OrchestratorError::Gateway(e) => match e {
                GatewayError::NoAvailableModel { .. } | GatewayError::BudgetExceeded { .. } => {
                    ErrorKind::CapacityExceeded
                }
                GatewayError::RateLimited { .. }
                | GatewayError::Provider(_)
                | GatewayError::Timeout(_) => ErrorKind::Transient,
                GatewayError::ModelNotFound(_) => ErrorKind::NotFound,
                GatewayError::Config(_) => ErrorKind::Validation,
                GatewayError::Storage(_)
                | GatewayError::Audit(_)
                | GatewayError::Serialization(_)
                | GatewayError::Io(_) => ErrorKind::Fatal,
            },
            OrchestratorError::Engine(e) => match e {
                workflow_engine::EngineError::NoMatches => ErrorKind::Validation,
                workflow_engine::EngineError::TemplateNotFound(_) => ErrorKind::NotFound,
                workflow_engine::EngineError::InvalidPlan(_) => ErrorKind::Validation,
                workflow_engine::EngineError::Audit(_) => ErrorKind::Fatal,
            },
            OrchestratorError::Audit(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::CapacityExceeded
        )
    }
}
