//! Execution planning: task breakdown, risks, checkpoints, timeline,
//! approval-workflow creation, and plan modification

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use audit_trail::{ActorIds, AuditEntry, AuditSink, EntryKind, Severity};
use workflow_engine::{
    AgentRole, OrchestrationPattern, ValidationResult, WorkflowPlan,
};

use crate::approval::{
    ApprovalCriteria, ApprovalLevel, ApprovalWorkflow, ImpactAssessment, ModificationType,
    PlanModification, RiskLevel, VerificationGate,
};
use crate::OrchestratorError;

const CRITICAL_PATH_LENGTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanComplexity {
    Simple,
    Moderate,
    Complex,
    Enterprise,
}

impl PlanComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanComplexity::Simple => "simple",
            PlanComplexity::Moderate => "moderate",
            PlanComplexity::Complex => "complex",
            PlanComplexity::Enterprise => "enterprise",
        }
    }

    pub fn requires_risk_gate(&self) -> bool {
        matches!(self, PlanComplexity::Complex | PlanComplexity::Enterprise)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Basic,
    Standard,
    Comprehensive,
    Enterprise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub estimated_duration_minutes: u32,
    pub priority: u8,
    pub dependencies: Vec<String>,
    pub deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub id: String,
    pub description: String,
    pub probability: f64,
    pub impact: f64,
    pub category: String,
}

impl Risk {
    pub fn is_high(&self) -> bool {
        self.probability * self.impact > 0.5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mitigation {
    pub risk_id: String,
    pub strategy: String,
    pub owner: String,
    pub timeline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contingency {
    pub trigger: String,
    pub action: String,
    pub resources_required: Vec<String>,
    pub estimated_cost: f64,
}

/// A workflow plan expanded into everything execution and approval need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub complexity: PlanComplexity,
    pub validation_level: ValidationLevel,
    pub task_breakdown: Vec<TaskDetail>,
    pub critical_path_tasks: Vec<String>,
    pub parallel_task_groups: Vec<Vec<String>>,
    pub peak_resource_usage: HashMap<String, f64>,
    pub cost_breakdown: HashMap<String, f64>,
    pub identified_risks: Vec<Risk>,
    pub mitigation_strategies: Vec<Mitigation>,
    pub contingency_plans: Vec<Contingency>,
    pub quality_checkpoints: Vec<String>,
    pub earliest_start: DateTime<Utc>,
    pub latest_finish: DateTime<Utc>,
    pub buffer_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn total_cost(&self) -> f64 {
        self.cost_breakdown.values().sum()
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskDetail> {
        self.task_breakdown.iter().find(|t| t.id == task_id)
    }

    /// Facts the approval predicates evaluate against.
    pub fn approval_context(&self, plan: &WorkflowPlan) -> HashMap<String, f64> {
        HashMap::from([
            ("cost".to_string(), self.total_cost()),
            (
                "duration".to_string(),
                f64::from(plan.estimated_duration_minutes),
            ),
        ])
    }
}

pub struct ExecutionPlanner {
    planner_id: Uuid,
    audit: Arc<dyn AuditSink>,
    plans: RwLock<HashMap<Uuid, ExecutionPlan>>,
    workflows: RwLock<HashMap<Uuid, ApprovalWorkflow>>,
    buffer_percentage: f64,
    approval_timeout_hours: u64,
    high_cost_threshold: f64,
}

impl ExecutionPlanner {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        buffer_percentage: f64,
        approval_timeout_hours: u64,
        high_cost_threshold: f64,
    ) -> Self {
        Self {
            planner_id: Uuid::new_v4(),
            audit,
            plans: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            buffer_percentage,
            approval_timeout_hours,
            high_cost_threshold,
        }
    }

    /// Expand a workflow plan into a detailed execution plan.
    pub async fn generate(
        &self,
        plan: &WorkflowPlan,
        validation_level: ValidationLevel,
    ) -> Result<ExecutionPlan, OrchestratorError> {
        let complexity = assess_complexity(plan);
        let task_breakdown = build_task_breakdown(plan);
        let critical_path_tasks = critical_path(&task_breakdown);
        let parallel_task_groups = parallel_groups(&task_breakdown);

        let mut peak_resource_usage = HashMap::new();
        let mut cost_breakdown = HashMap::new();
        for resource in &plan.required_resources {
            peak_resource_usage.insert(resource.resource_type.clone(), resource.amount);
            cost_breakdown.insert(resource.resource_type.clone(), resource.estimated_cost);
        }

        let identified_risks = assess_risks(plan);
        let mitigation_strategies = identified_risks
            .iter()
            .map(|risk| Mitigation {
                risk_id: risk.id.clone(),
                strategy: mitigation_strategy(&risk.id),
                owner: "project_manager".to_string(),
                timeline: "before_execution".to_string(),
            })
            .collect();

        let total_cost: f64 = cost_breakdown.values().sum();
        let contingency_plans = if complexity.requires_risk_gate() {
            vec![Contingency {
                trigger: "critical_path_delay".to_string(),
                action: "activate_backup_agents".to_string(),
                resources_required: vec![
                    "additional_compute".to_string(),
                    "backup_agents".to_string(),
                ],
                estimated_cost: total_cost * 0.2,
            }]
        } else {
            Vec::new()
        };

        let buffer_minutes =
            (f64::from(plan.estimated_duration_minutes) * self.buffer_percentage) as u32;
        let earliest_start = Utc::now();
        let latest_finish = earliest_start
            + Duration::minutes(i64::from(plan.estimated_duration_minutes + buffer_minutes));

        let execution_plan = ExecutionPlan {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            complexity,
            validation_level,
            task_breakdown,
            critical_path_tasks,
            parallel_task_groups,
            peak_resource_usage,
            cost_breakdown,
            identified_risks,
            mitigation_strategies,
            contingency_plans,
            quality_checkpoints: quality_checkpoints(plan.pattern),
            earliest_start,
            latest_finish,
            buffer_minutes,
            created_at: Utc::now(),
        };

        self.plans
            .write()
            .insert(execution_plan.id, execution_plan.clone());

        self.audit
            .record(
                AuditEntry::new(EntryKind::Workflow, "Execution plan generated", "plan_generation")
                    .with_actors(
                        ActorIds::agent(self.planner_id.to_string())
                            .with_workflow(plan.id.to_string()),
                    )
                    .with_metadata("execution_plan_id", serde_json::json!(execution_plan.id))
                    .with_metadata("complexity", serde_json::json!(complexity.as_str()))
                    .with_metadata(
                        "total_tasks",
                        serde_json::json!(execution_plan.task_breakdown.len()),
                    ),
            )
            .await?;

        tracing::info!(
            plan_id = %plan.id,
            execution_plan_id = %execution_plan.id,
            complexity = complexity.as_str(),
            total_tasks = execution_plan.task_breakdown.len(),
            "execution plan generated"
        );
        Ok(execution_plan)
    }

    /// Check the expanded plan for completeness and feasibility.
    pub async fn validate(
        &self,
        execution_plan: &ExecutionPlan,
        plan: &WorkflowPlan,
    ) -> Result<ValidationResult, OrchestratorError> {
        let mut result = ValidationResult::valid();

        if execution_plan.task_breakdown.is_empty() {
            result.add_missing_prerequisite("No tasks defined in execution plan");
        }

        let covered: std::collections::HashSet<AgentRole> = execution_plan
            .task_breakdown
            .iter()
            .map(|t| t.role)
            .collect();
        for assignment in &plan.agents {
            if !covered.contains(&assignment.role) {
                result.add_warning(format!(
                    "No tasks defined for agent role: {}",
                    assignment.role.as_str()
                ));
            }
        }

        let total_cost = execution_plan.total_cost();
        if total_cost > self.high_cost_threshold {
            result.add_warning(format!("High estimated cost: ${total_cost:.2}"));
        }

        if execution_plan.critical_path_tasks.is_empty() {
            result.add_warning("Critical path not identified");
        }

        for task in &execution_plan.task_breakdown {
            if task.dependencies.contains(&task.id) {
                result.add_missing_prerequisite(format!(
                    "Self-dependency detected in task: {}",
                    task.id
                ));
            }
        }

        if execution_plan.latest_finish <= execution_plan.earliest_start {
            result.add_missing_prerequisite("Timeline not calculated");
        }
        if execution_plan.buffer_minutes < 30 {
            result.add_warning("Very low buffer time may lead to timeline issues");
        }

        let high_risks = execution_plan
            .identified_risks
            .iter()
            .filter(|r| r.is_high())
            .count();
        if high_risks > execution_plan.mitigation_strategies.len() {
            result.add_warning("Not all high-risk items have mitigation strategies");
        }

        self.audit
            .record(
                AuditEntry::new(EntryKind::Workflow, "Execution plan validated", "plan_validation")
                    .with_severity(if result.is_valid {
                        Severity::Info
                    } else {
                        Severity::Warning
                    })
                    .with_actors(
                        ActorIds::agent(self.planner_id.to_string())
                            .with_workflow(plan.id.to_string()),
                    )
                    .with_metadata("is_valid", serde_json::json!(result.is_valid))
                    .with_metadata("warnings", serde_json::json!(result.warnings.len())),
            )
            .await?;

        Ok(result)
    }

    /// Build the gate sequence for a plan: Plan Review, a Risk Assessment
    /// gate for complex and enterprise plans, and Execution Authorization.
    pub async fn create_approval_workflow(
        &self,
        execution_plan: &ExecutionPlan,
        plan: &WorkflowPlan,
        approval_level: ApprovalLevel,
    ) -> Result<ApprovalWorkflow, OrchestratorError> {
        let mut workflow = ApprovalWorkflow::new(plan.id);
        let expires_at = Utc::now() + Duration::hours(self.approval_timeout_hours as i64);

        let mut plan_review = VerificationGate::new(
            "Plan Review",
            "Review and approve the detailed execution plan",
            plan.id,
        )
        .with_expiry(expires_at)
        .with_criteria(
            ApprovalCriteria::new(
                "Resource and Timeline Approval",
                "Approve resource allocation, costs, and timeline",
            )
            .with_level(ApprovalLevel::ProjectManager)
            .with_conditions(&["cost < 1000", "duration <= 480"]),
        );
        plan_review.approval_level = approval_level;
        workflow.add_gate(plan_review);

        if execution_plan.complexity.requires_risk_gate() {
            let mut risk_gate = VerificationGate::new(
                "Risk Assessment",
                "Review identified risks and mitigation strategies",
                plan.id,
            )
            .with_expiry(expires_at)
            .with_criteria(
                ApprovalCriteria::new("Risk Mitigation", "Approve risk mitigation strategies")
                    .with_level(ApprovalLevel::TechnicalLead),
            );
            risk_gate.approval_level = approval_level;
            workflow.add_gate(risk_gate);
        }

        let mut authorization = VerificationGate::new(
            "Execution Authorization",
            "Final approval to proceed with execution",
            plan.id,
        )
        .with_expiry(expires_at)
        .with_criteria(ApprovalCriteria::new(
            "Execution Authorization",
            "Authorize plan execution",
        ));
        authorization.approval_level = approval_level;
        workflow.add_gate(authorization);

        self.workflows.write().insert(workflow.id, workflow.clone());

        self.audit
            .record(
                AuditEntry::new(EntryKind::Workflow, "Approval workflow created", "approval_workflow")
                    .with_actors(
                        ActorIds::agent(self.planner_id.to_string())
                            .with_workflow(plan.id.to_string()),
                    )
                    .with_metadata("approval_workflow_id", serde_json::json!(workflow.id))
                    .with_metadata("gate_count", serde_json::json!(workflow.gates.len())),
            )
            .await?;

        Ok(workflow)
    }

    pub fn get_plan(&self, execution_plan_id: Uuid) -> Option<ExecutionPlan> {
        self.plans.read().get(&execution_plan_id).cloned()
    }

    pub fn get_workflow(&self, workflow_id: Uuid) -> Option<ApprovalWorkflow> {
        self.workflows.read().get(&workflow_id).cloned()
    }

    pub fn store_workflow(&self, workflow: ApprovalWorkflow) {
        self.workflows.write().insert(workflow.id, workflow);
    }

    /// Apply a modification to a stored execution plan, assess its impact,
    /// and notify the plan's approval workflow.
    pub async fn apply_modification(
        &self,
        execution_plan_id: Uuid,
        mut modification: PlanModification,
        requester: &str,
    ) -> Result<ExecutionPlan, OrchestratorError> {
        let mut plans = self.plans.write();
        let plan = plans.get_mut(&execution_plan_id).ok_or_else(|| {
            OrchestratorError::NotFound(format!("execution plan {execution_plan_id}"))
        })?;

        modification.requested_by = requester.to_string();
        modification.impact_assessment = assess_impact(plan, &modification);

        match modification.modification_type {
            ModificationType::TimelineChange => {
                if let Some(minutes) = modification.new_value.as_ref().and_then(|v| v.as_u64()) {
                    plan.buffer_minutes = minutes as u32;
                    plan.latest_finish =
                        plan.earliest_start + Duration::minutes(minutes as i64);
                }
            }
            ModificationType::ResourceAdjustment => {
                if let Some(updates) = modification
                    .new_value
                    .as_ref()
                    .and_then(|v| v.as_object())
                {
                    for (resource, amount) in updates {
                        if let Some(amount) = amount.as_f64() {
                            plan.peak_resource_usage.insert(resource.clone(), amount);
                        }
                    }
                }
            }
            ModificationType::ScopeModification => {
                if let Some(new_value) = modification.new_value.clone() {
                    if let Ok(tasks) = serde_json::from_value::<Vec<TaskDetail>>(new_value) {
                        for task in tasks {
                            match plan.task_breakdown.iter_mut().find(|t| t.id == task.id) {
                                Some(existing) => *existing = task,
                                None => plan.task_breakdown.push(task),
                            }
                        }
                    }
                }
            }
            // Agent, dependency, and priority changes touch the workflow
            // plan itself and only need impact bookkeeping here.
            _ => {}
        }

        let updated = plan.clone();
        drop(plans);

        {
            let mut workflows = self.workflows.write();
            if let Some(workflow) = workflows
                .values_mut()
                .find(|w| w.plan_id == updated.plan_id)
            {
                workflow.apply_modification(modification.clone());
            }
        }

        self.audit
            .record(
                AuditEntry::new(EntryKind::Workflow, "Plan modification applied", "plan_modification")
                    .with_actors(
                        ActorIds::agent(self.planner_id.to_string())
                            .with_workflow(updated.plan_id.to_string()),
                    )
                    .with_metadata("modification_id", serde_json::json!(modification.id))
                    .with_metadata(
                        "modification_type",
                        serde_json::json!(modification.modification_type),
                    )
                    .with_metadata("requester", serde_json::json!(requester)),
            )
            .await?;

        Ok(updated)
    }
}

/// score = |agents| + 0.5 * |deps| + 0.3 * |resources|, cut at 3/6/10.
fn assess_complexity(plan: &WorkflowPlan) -> PlanComplexity {
    let score = plan.agents.len() as f64
        + plan.dependencies.len() as f64 * 0.5
        + plan.required_resources.len() as f64 * 0.3;

    if score <= 3.0 {
        PlanComplexity::Simple
    } else if score <= 6.0 {
        PlanComplexity::Moderate
    } else if score <= 10.0 {
        PlanComplexity::Complex
    } else {
        PlanComplexity::Enterprise
    }
}

fn canonical_tasks(role: AgentRole) -> &'static [&'static str] {
    match role {
        AgentRole::ProjectManager => &[
            "Requirements Analysis",
            "Stakeholder Communication",
            "Project Planning",
            "Risk Assessment",
        ],
        AgentRole::BusinessAnalyst => &[
            "Business Process Analysis",
            "Requirements Documentation",
            "Stakeholder Impact Analysis",
            "Business Rules Definition",
        ],
        AgentRole::SolutionArchitect => &[
            "Architecture Design",
            "Component Specification",
            "Integration Planning",
            "Technical Documentation",
        ],
        AgentRole::Research => &[
            "Information Gathering",
            "Technology Research",
            "Best Practices Analysis",
            "Recommendation Generation",
        ],
        AgentRole::QualityJudge => &[
            "Quality Assessment",
            "Code Review",
            "Test Planning",
            "Performance Evaluation",
        ],
        AgentRole::Implementation => &[
            "Code Development",
            "Unit Testing",
            "Integration Testing",
            "Documentation Updates",
        ],
    }
}

fn deliverables_for(task_name: &str) -> Vec<String> {
    let items: &[&str] = if task_name.contains("Analysis") {
        &["Analysis Report", "Recommendations"]
    } else if task_name.contains("Design") {
        &["Design Document", "Architecture Diagrams"]
    } else if task_name.contains("Development") || task_name.contains("Implementation") {
        &["Source Code", "Unit Tests"]
    } else if task_name.contains("Testing") {
        &["Test Results", "Test Report"]
    } else {
        &["Task Output", "Documentation"]
    };
    items.iter().map(|i| i.to_string()).collect()
}

fn build_task_breakdown(plan: &WorkflowPlan) -> Vec<TaskDetail> {
    let mut breakdown = Vec::new();
    let mut counter = 1u32;

    for assignment in &plan.agents {
        let names = canonical_tasks(assignment.role);
        let per_task_minutes = assignment.estimated_duration_minutes / names.len() as u32;

        for name in names {
            let id = format!(
                "task_{counter:03}_{}_{}",
                assignment.role.as_str(),
                name.to_lowercase().replace(' ', "_")
            );
            breakdown.push(TaskDetail {
                id,
                name: name.to_string(),
                role: assignment.role,
                estimated_duration_minutes: per_task_minutes,
                priority: assignment.priority,
                dependencies: Vec::new(),
                deliverables: deliverables_for(name),
                success_criteria: vec![
                    "Task completed within estimated time".to_string(),
                    "Deliverables meet quality standards".to_string(),
                    "All requirements addressed".to_string(),
                ],
            });
            counter += 1;
        }
    }
    breakdown
}

/// Longest tasks dominate the finish time.
fn critical_path(breakdown: &[TaskDetail]) -> Vec<String> {
    let mut by_duration: Vec<&TaskDetail> = breakdown.iter().collect();
    by_duration.sort_by(|a, b| b.estimated_duration_minutes.cmp(&a.estimated_duration_minutes));
    by_duration
        .into_iter()
        .take(CRITICAL_PATH_LENGTH)
        .map(|t| t.id.clone())
        .collect()
}

/// Same-role tasks with more than one member can run as a group.
fn parallel_groups(breakdown: &[TaskDetail]) -> Vec<Vec<String>> {
    let mut by_role: HashMap<AgentRole, Vec<String>> = HashMap::new();
    for task in breakdown {
        by_role.entry(task.role).or_default().push(task.id.clone());
    }
    let mut groups: Vec<Vec<String>> = by_role
        .into_values()
        .filter(|tasks| tasks.len() > 1)
        .collect();
    groups.sort();
    groups
}

fn assess_risks(plan: &WorkflowPlan) -> Vec<Risk> {
    let mut risks = Vec::new();

    if plan.required_resources.len() > 3 {
        risks.push(Risk {
            id: "resource_availability".to_string(),
            description: "High resource requirements may lead to availability issues".to_string(),
            probability: 0.3,
            impact: 0.7,
            category: "resource".to_string(),
        });
    }
    if plan.agents.len() > 3 {
        risks.push(Risk {
            id: "agent_coordination".to_string(),
            description: "Multiple agents may have coordination challenges".to_string(),
            probability: 0.4,
            impact: 0.6,
            category: "coordination".to_string(),
        });
    }
    if plan.estimated_duration_minutes > 480 {
        risks.push(Risk {
            id: "timeline_overrun".to_string(),
            description: "Long duration increases risk of timeline overrun".to_string(),
            probability: 0.5,
            impact: 0.5,
            category: "timeline".to_string(),
        });
    }
    risks
}

fn mitigation_strategy(risk_id: &str) -> String {
    match risk_id {
        "resource_availability" => "Pre-allocate resources and maintain backup options",
        "agent_coordination" => {
            "Implement regular sync meetings and clear communication protocols"
        }
        "timeline_overrun" => "Add buffer time and implement milestone tracking",
        _ => "Monitor risk and implement corrective actions as needed",
    }
    .to_string()
}

fn quality_checkpoints(pattern: OrchestrationPattern) -> Vec<String> {
    let checkpoints: &[&str] = match pattern {
        OrchestrationPattern::Sequential => &[
            "agent_handoff_validation",
            "intermediate_deliverable_review",
            "final_output_validation",
        ],
        OrchestrationPattern::Parallel => &[
            "parallel_task_synchronization",
            "output_integration_validation",
            "final_quality_review",
        ],
        OrchestrationPattern::Hierarchical => &[
            "agent_handoff_validation",
            "intermediate_deliverable_review",
            "delegation_consistency_review",
            "final_output_validation",
        ],
        OrchestrationPattern::Dynamic => &[
            "agent_handoff_validation",
            "intermediate_deliverable_review",
            "routing_decision_review",
            "final_output_validation",
        ],
    };
    checkpoints.iter().map(|c| c.to_string()).collect()
}

fn assess_impact(plan: &ExecutionPlan, modification: &PlanModification) -> ImpactAssessment {
    let mut impact = ImpactAssessment::default();

    match modification.modification_type {
        ModificationType::TimelineChange => {
            let old = modification
                .old_value
                .as_ref()
                .and_then(|v| v.as_i64())
                .unwrap_or(i64::from(plan.buffer_minutes));
            let new = modification
                .new_value
                .as_ref()
                .and_then(|v| v.as_i64())
                .unwrap_or(old);
            impact.duration_change_minutes = new - old;
        }
        ModificationType::ResourceAdjustment => {
            impact.cost_change = plan.total_cost() * 0.1;
        }
        _ => {}
    }

    impact.risk_level = Some(match modification.modification_type {
        ModificationType::ScopeModification | ModificationType::AgentChange => RiskLevel::Medium,
        _ => RiskLevel::Low,
    });
    impact
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_trail::InMemoryAuditSink;
    use workflow_engine::{
        default_templates, EvaluationContext, EvaluationInput, Complexity as RequestComplexity,
        DefaultAvailabilityProbe, EngineConfig, WorkflowEngine,
    };

    fn planner() -> ExecutionPlanner {
        ExecutionPlanner::new(Arc::new(InMemoryAuditSink::new()), 0.20, 24, 10_000.0)
    }

    async fn project_plan() -> WorkflowPlan {
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
            complexity: RequestComplexity::High,
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

    fn simple_plan() -> WorkflowPlan {
        let template = default_templates()
            .into_iter()
            .find(|t| t.id == "code_review")
            .unwrap();
        WorkflowPlan {
            id: Uuid::new_v4(),
            template_id: template.id.clone(),
            pattern: template.pattern,
            agents: vec![workflow_engine::AgentAssignment {
                role: AgentRole::QualityJudge,
                model_tier: model_gateway::ModelTier::Operational,
                priority: 2,
                estimated_duration_minutes: 240,
            }],
            dependencies: vec![],
            estimated_duration_minutes: 240,
            required_resources: vec![],
            priority: 2,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn complexity_thresholds_partition_the_tiers() {
        let mut plan = simple_plan();
        assert_eq!(assess_complexity(&plan), PlanComplexity::Simple);

        // 3 agents + 2 deps * 0.5 + 3 resources * 0.3 = 4.9 -> moderate
        plan.agents = vec![
            workflow_engine::AgentAssignment {
                role: AgentRole::ProjectManager,
                model_tier: model_gateway::ModelTier::Strategic,
                priority: 1,
                estimated_duration_minutes: 320,
            };
            3
        ];
        plan.dependencies = vec![
            workflow_engine::TaskDependency {
                dependent_task_id: "b".to_string(),
                prerequisite_task_id: "a".to_string(),
                kind: workflow_engine::DependencyKind::Completion,
                is_blocking: true,
            };
            2
        ];
        plan.required_resources = vec![
            workflow_engine::ResourceRequirement {
                resource_type: "cpu_cores".to_string(),
                amount: 1.0,
                unit: "cores".to_string(),
                estimated_cost: 0.1,
                is_critical: true,
            };
            3
        ];
        assert_eq!(assess_complexity(&plan), PlanComplexity::Moderate);
    }

    #[tokio::test]
    async fn generate_expands_roles_into_canonical_tasks() {
        let planner = planner();
        let plan = project_plan().await;
        let execution_plan = planner
            .generate(&plan, ValidationLevel::Standard)
            .await
            .unwrap();

        // Three roles, four canonical tasks each.
        assert_eq!(execution_plan.task_breakdown.len(), 12);
        assert_eq!(execution_plan.critical_path_tasks.len(), 3);
        assert_eq!(execution_plan.parallel_task_groups.len(), 3);
        assert_eq!(execution_plan.buffer_minutes, 192);
        assert!(execution_plan
            .quality_checkpoints
            .contains(&"agent_handoff_validation".to_string()));

        let pm_task = &execution_plan.task_breakdown[0];
        assert_eq!(pm_task.role, AgentRole::ProjectManager);
        assert_eq!(pm_task.name, "Requirements Analysis");
        assert_eq!(pm_task.estimated_duration_minutes, 80);
        assert!(pm_task.deliverables.contains(&"Analysis Report".to_string()));
    }

    #[tokio::test]
    async fn long_plans_carry_timeline_risk() {
        let planner = planner();
        let plan = project_plan().await;
        let execution_plan = planner
            .generate(&plan, ValidationLevel::Standard)
            .await
            .unwrap();

        assert!(execution_plan
            .identified_risks
            .iter()
            .any(|r| r.id == "timeline_overrun"));
        assert_eq!(
            execution_plan.identified_risks.len(),
            execution_plan.mitigation_strategies.len()
        );
    }

    #[tokio::test]
    async fn simple_plans_get_two_gates_complex_get_three() {
        let planner = planner();

        let simple = simple_plan();
        let simple_exec = planner
            .generate(&simple, ValidationLevel::Basic)
            .await
            .unwrap();
        assert_eq!(simple_exec.complexity, PlanComplexity::Simple);
        let simple_workflow = planner
            .create_approval_workflow(&simple_exec, &simple, ApprovalLevel::User)
            .await
            .unwrap();
        let names: Vec<&str> = simple_workflow
            .gates
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(names, vec!["Plan Review", "Execution Authorization"]);

        // Five agents, four dependencies, and four resources score past the
        // complex threshold.
        let mut complex = project_plan().await;
        complex.agents = vec![
            workflow_engine::AgentAssignment {
                role: AgentRole::Implementation,
                model_tier: model_gateway::ModelTier::Operational,
                priority: 2,
                estimated_duration_minutes: 120,
            };
            5
        ];
        complex.dependencies = vec![
            workflow_engine::TaskDependency {
                dependent_task_id: "b".to_string(),
                prerequisite_task_id: "a".to_string(),
                kind: workflow_engine::DependencyKind::Completion,
                is_blocking: true,
            };
            4
        ];
        complex.required_resources = vec![
            workflow_engine::ResourceRequirement {
                resource_type: "cpu_cores".to_string(),
                amount: 2.0,
                unit: "cores".to_string(),
                estimated_cost: 0.2,
                is_critical: true,
            };
            4
        ];
        let complex_exec = planner
            .generate(&complex, ValidationLevel::Standard)
            .await
            .unwrap();
        assert!(complex_exec.complexity.requires_risk_gate());
        let complex_workflow = planner
            .create_approval_workflow(&complex_exec, &complex, ApprovalLevel::User)
            .await
            .unwrap();
        let names: Vec<&str> = complex_workflow
            .gates
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["Plan Review", "Risk Assessment", "Execution Authorization"]
        );
    }

    #[tokio::test]
    async fn plan_review_auto_approves_under_the_thresholds() {
        let planner = planner();
        let plan = simple_plan();
        let execution_plan = planner
            .generate(&plan, ValidationLevel::Basic)
            .await
            .unwrap();
        let workflow = planner
            .create_approval_workflow(&execution_plan, &plan, ApprovalLevel::User)
            .await
            .unwrap();

        // cost 0 < 1000 and duration 240 <= 480.
        let context = execution_plan.approval_context(&plan);
        assert!(workflow.gates[0].can_auto_approve(&context));
        // The authorization gate has no predicates and needs a human.
        assert!(!workflow.gates[1].can_auto_approve(&context));
    }

    #[tokio::test]
    async fn validation_warns_on_thin_buffers() {
        let planner = ExecutionPlanner::new(Arc::new(InMemoryAuditSink::new()), 0.05, 24, 10_000.0);
        let plan = simple_plan();
        let execution_plan = planner
            .generate(&plan, ValidationLevel::Basic)
            .await
            .unwrap();

        // 5% of 240 minutes is 12 minutes of buffer.
        assert_eq!(execution_plan.buffer_minutes, 12);
        let result = planner.validate(&execution_plan, &plan).await.unwrap();
        assert!(result.is_valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("buffer")));
    }

    #[tokio::test]
    async fn timeline_modification_updates_buffer_and_impact() {
        let planner = planner();
        let plan = simple_plan();
        let execution_plan = planner
            .generate(&plan, ValidationLevel::Basic)
            .await
            .unwrap();
        let original_buffer = execution_plan.buffer_minutes;

        let modification = PlanModification::new(
            plan.id,
            ModificationType::TimelineChange,
            "stretch the buffer",
            "user-1",
        )
        .with_change(
            serde_json::json!(original_buffer),
            serde_json::json!(original_buffer + 60),
        );

        let updated = planner
            .apply_modification(execution_plan.id, modification, "user-1")
            .await
            .unwrap();
        assert_eq!(updated.buffer_minutes, original_buffer + 60);

        let stored = planner.get_plan(execution_plan.id).unwrap();
        assert_eq!(stored.buffer_minutes, original_buffer + 60);
    }

    #[tokio::test]
    async fn modification_of_missing_plan_is_not_found() {
        let planner = planner();
        let modification = PlanModification::new(
            Uuid::new_v4(),
            ModificationType::PriorityChange,
            "r",
            "u",
        );
        let result = planner
            .apply_modification(Uuid::new_v4(), modification, "u")
            .await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }
}
