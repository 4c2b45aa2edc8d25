//! Workflow engine - matches parsed requests to workflow templates and
//! expands the winning template into an executable plan
//!
//! Evaluation scores every registered template against the request's
//! intent, entities, and complexity; ranking trades relevance and
//! confidence off against duration, team size, and prerequisites. The
//! selected template becomes a [`WorkflowPlan`] with agent assignments and
//! a dependency graph shaped by the template's orchestration pattern.

pub mod engine;
pub mod evaluator;
pub mod template;
pub mod types;

pub use engine::{
    AvailabilityProbe, DefaultAvailabilityProbe, EngineConfig, EngineMetricsSnapshot,
    WorkflowEngine,
};
pub use evaluator::MatchEvaluator;
pub use template::{default_templates, TemplateCategory, WorkflowTemplate};
pub use types::{
    AgentAssignment, AgentRole, Complexity, DependencyKind, EvaluationContext, EvaluationInput,
    OrchestrationPattern, ResourceRequirement, SkillLevel, TaskDependency, ValidationResult,
    WorkflowMatch, WorkflowPlan,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no workflow matches available for selection")]
    NoMatches,

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("audit error: {0}")]
    Audit(#[from] audit_trail::AuditError),
}
