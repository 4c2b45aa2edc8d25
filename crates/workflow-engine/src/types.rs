//! Shared workflow data model

use chrono::{DateTime, Utc};
use model_gateway::ModelTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    ProjectManager,
    BusinessAnalyst,
    SolutionArchitect,
    Research,
    QualityJudge,
    Implementation,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::ProjectManager => "project_manager",
            AgentRole::BusinessAnalyst => "business_analyst",
            AgentRole::SolutionArchitect => "solution_architect",
            AgentRole::Research => "research",
            AgentRole::QualityJudge => "quality_judge",
            AgentRole::Implementation => "implementation",
        }
    }

    /// Planning-heavy roles get dispatch priority over execution roles.
    pub fn is_planning_role(&self) -> bool {
        matches!(
            self,
            AgentRole::ProjectManager | AgentRole::BusinessAnalyst | AgentRole::SolutionArchitect
        )
    }

    pub fn default_tier(&self) -> ModelTier {
        model_gateway::ModelRegistry::default_tier_for_role(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationPattern {
    Sequential,
    Parallel,
    Hierarchical,
    Dynamic,
}

impl OrchestrationPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationPattern::Sequential => "sequential",
            OrchestrationPattern::Parallel => "parallel",
            OrchestrationPattern::Hierarchical => "hierarchical",
            OrchestrationPattern::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Expert,
}

/// Candidate pairing of one request with one template. Transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMatch {
    pub template_id: String,
    pub relevance_score: f64,
    pub confidence: f64,
    pub pattern: OrchestrationPattern,
    pub estimated_duration_minutes: u32,
    pub required_roles: Vec<AgentRole>,
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub role: AgentRole,
    pub model_tier: ModelTier,
    pub priority: u8,
    pub estimated_duration_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Completion,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub dependent_task_id: String,
    pub prerequisite_task_id: String,
    pub kind: DependencyKind,
    pub is_blocking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_type: String,
    pub amount: f64,
    pub unit: String,
    pub estimated_cost: f64,
    pub is_critical: bool,
}

/// Concrete instantiation of a template: who works, in what order, with
/// what resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub id: Uuid,
    pub template_id: String,
    pub pattern: OrchestrationPattern,
    pub agents: Vec<AgentAssignment>,
    pub dependencies: Vec<TaskDependency>,
    pub estimated_duration_minutes: u32,
    pub required_resources: Vec<ResourceRequirement>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

impl WorkflowPlan {
    /// Task id used for a role's work in dependency declarations.
    pub fn task_id_for_role(role: AgentRole) -> String {
        format!("task_{}", role.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub missing_prerequisites: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_setup_time_minutes: u32,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_missing_prerequisite(&mut self, prerequisite: impl Into<String>) {
        self.is_valid = false;
        self.missing_prerequisites.push(prerequisite.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// What the engine needs to know about a parsed request.
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub request_id: String,
    pub user_id: Option<String>,
    pub intent: String,
    pub content_hash: u64,
    pub confidence: f64,
    pub complexity: Complexity,
    pub entities: HashMap<String, Vec<String>>,
    pub requirement_count: usize,
}

/// Conversation-derived boosts applied during evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub recent_templates: Vec<String>,
    pub preferred_patterns: Vec<OrchestrationPattern>,
    pub skill_level: Option<SkillLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_roles_are_the_strategic_trio() {
        assert!(AgentRole::ProjectManager.is_planning_role());
        assert!(AgentRole::BusinessAnalyst.is_planning_role());
        assert!(AgentRole::SolutionArchitect.is_planning_role());
        assert!(!AgentRole::Research.is_planning_role());
        assert!(!AgentRole::Implementation.is_planning_role());
    }

    #[test]
    fn role_tiers_follow_gateway_defaults() {
        assert_eq!(AgentRole::ProjectManager.default_tier(), ModelTier::Strategic);
        assert_eq!(AgentRole::Research.default_tier(), ModelTier::Research);
        assert_eq!(AgentRole::QualityJudge.default_tier(), ModelTier::Operational);
    }

    #[test]
    fn validation_result_tracks_validity() {
        let mut result = ValidationResult::valid();
        assert!(result.is_valid);
        result.add_warning("resource may be limited");
        assert!(result.is_valid);
        result.add_missing_prerequisite("stakeholder_approval");
        assert!(!result.is_valid);
    }
}
