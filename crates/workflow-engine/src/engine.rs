//! The workflow engine: evaluation, selection, and prerequisite validation

use chrono::Utc;
use moka::sync::Cache;
use parking_lot::{Mutex, RwLock};
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use audit_trail::{ActorIds, AuditEntry, AuditSink, Severity};

use crate::evaluator::MatchEvaluator;
use crate::template::{default_templates, WorkflowTemplate};
use crate::types::{
    AgentAssignment, AgentRole, DependencyKind, EvaluationContext, EvaluationInput,
    OrchestrationPattern, TaskDependency, ValidationResult, WorkflowMatch, WorkflowPlan,
};
use crate::EngineError;

/// External checks the engine consults during prerequisite validation.
/// The orchestrator backs these with the worker pool and the cost store.
pub trait AvailabilityProbe: Send + Sync {
    fn prerequisite_met(&self, name: &str) -> bool;

    fn role_available(&self, _role: AgentRole) -> bool {
        true
    }

    fn resource_available(&self, _resource_type: &str, _amount: f64) -> bool {
        true
    }
}

/// Accepts the prerequisite names the built-in templates declare.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAvailabilityProbe;

impl AvailabilityProbe for DefaultAvailabilityProbe {
    fn prerequisite_met(&self, name: &str) -> bool {
        const KNOWN: &[&str] = &[
            "project_requirements",
            "stakeholder_approval",
            "feature_requirements",
            "existing_codebase",
            "stakeholder_access",
            "business_context",
            "requirements_document",
            "technical_constraints",
            "research_scope",
            "information_sources",
            "testable_code",
            "test_requirements",
            "source_code",
            "review_criteria",
            "project_artifacts",
            "documentation_requirements",
        ];
        KNOWN.contains(&name)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 1800,
            cache_max_entries: 1000,
        }
    }
}

#[derive(Debug, Default)]
struct EngineMetrics {
    total_evaluations: u64,
    successful_matches: u64,
    total_evaluation_time_ms: f64,
    cache_lookups: u64,
    cache_hits: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineMetricsSnapshot {
    pub total_evaluations: u64,
    pub successful_matches: u64,
    pub success_rate: f64,
    pub average_evaluation_time_ms: f64,
    pub cache_hit_rate: f64,
    pub cache_size: u64,
    pub template_count: usize,
}

pub struct WorkflowEngine {
    engine_id: Uuid,
    templates: RwLock<Vec<WorkflowTemplate>>,
    evaluator: MatchEvaluator,
    probe: Arc<dyn AvailabilityProbe>,
    audit: Arc<dyn AuditSink>,
    cache: Cache<String, Vec<WorkflowMatch>>,
    metrics: Mutex<EngineMetrics>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        probe: Arc<dyn AvailabilityProbe>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_max_entries)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
            .build();

        let engine = Self {
            engine_id: Uuid::new_v4(),
            templates: RwLock::new(default_templates()),
            evaluator: MatchEvaluator::new(),
            probe,
            audit,
            cache,
            metrics: Mutex::new(EngineMetrics::default()),
        };
        tracing::info!(
            engine_id = %engine.engine_id,
            template_count = engine.templates.read().len(),
            "workflow engine initialized"
        );
        engine
    }

    /// Evaluate a request against every registered template and return the
    /// ranked matches, best first. Results are cached by a request
    /// fingerprint until a template mutation invalidates them.
    pub async fn evaluate(
        &self,
        input: &EvaluationInput,
        context: &EvaluationContext,
    ) -> Result<Vec<WorkflowMatch>, EngineError> {
        let started = Instant::now();
        let fingerprint = fingerprint(input);

        {
            let mut metrics = self.metrics.lock();
            metrics.cache_lookups += 1;
        }
        if let Some(cached) = self.cache.get(&fingerprint) {
            self.metrics.lock().cache_hits += 1;
            tracing::debug!(request_id = %input.request_id, "evaluation served from cache");
            return Ok(cached);
        }

        let matches: Vec<WorkflowMatch> = {
            let templates = self.templates.read();
            templates
                .iter()
                .filter_map(|t| self.evaluator.evaluate_match(t, input, context))
                .collect()
        };
        let ranked = self.evaluator.rank_matches(matches);
        self.cache.insert(fingerprint, ranked.clone());

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut metrics = self.metrics.lock();
            metrics.total_evaluations += 1;
            if !ranked.is_empty() {
                metrics.successful_matches += 1;
            }
            metrics.total_evaluation_time_ms += elapsed_ms;
        }

        self.audit
            .record(
                AuditEntry::new(
                    audit_trail::EntryKind::Workflow,
                    "Request evaluated against templates",
                    "workflow_evaluation",
                )
                .with_actors({
                    let mut actors = ActorIds::agent(self.engine_id.to_string())
                        .with_request(input.request_id.clone());
                    actors.user_id = input.user_id.clone();
                    actors
                })
                .with_metadata("matches_found", serde_json::json!(ranked.len()))
                .with_metadata(
                    "top_match",
                    serde_json::json!(ranked.first().map(|m| m.template_id.clone())),
                ),
            )
            .await?;

        tracing::info!(
            request_id = %input.request_id,
            matches = ranked.len(),
            elapsed_ms = elapsed_ms,
            "request evaluated"
        );
        Ok(ranked)
    }

    /// Expand the top-ranked match into a concrete plan.
    pub async fn select(&self, matches: &[WorkflowMatch]) -> Result<WorkflowPlan, EngineError> {
        let best = matches.first().ok_or(EngineError::NoMatches)?;
        let template = {
            let templates = self.templates.read();
            templates
                .iter()
                .find(|t| t.id == best.template_id)
                .cloned()
                .ok_or_else(|| EngineError::TemplateNotFound(best.template_id.clone()))?
        };

        let role_count = template.required_roles.len().max(1) as u32;
        let per_role_minutes = template.estimated_duration_minutes() / role_count;

        let agents: Vec<AgentAssignment> = template
            .required_roles
            .iter()
            .map(|role| AgentAssignment {
                role: *role,
                model_tier: role.default_tier(),
                priority: if role.is_planning_role() { 1 } else { 2 },
                estimated_duration_minutes: per_role_minutes,
            })
            .collect();

        let dependencies = build_dependencies(template.pattern, &template.required_roles);
        let complexity = template
            .complexity_levels
            .last()
            .copied()
            .unwrap_or(crate::types::Complexity::Medium);

        let plan = WorkflowPlan {
            id: Uuid::new_v4(),
            template_id: template.id.clone(),
            pattern: template.pattern,
            agents,
            dependencies,
            estimated_duration_minutes: template.estimated_duration_minutes(),
            required_resources: template.resource_requirements(complexity),
            priority: if best.relevance_score > 0.8 { 1 } else { 2 },
            created_at: Utc::now(),
        };

        self.audit
            .record(
                AuditEntry::new(
                    audit_trail::EntryKind::Decision,
                    "Optimal workflow selected",
                    "workflow_selection",
                )
                .with_actors(
                    ActorIds::agent(self.engine_id.to_string())
                        .with_workflow(plan.id.to_string()),
                )
                .with_metadata("template_id", serde_json::json!(template.id))
                .with_metadata("relevance", serde_json::json!(best.relevance_score))
                .with_metadata("agent_count", serde_json::json!(plan.agents.len())),
            )
            .await?;

        tracing::info!(
            plan_id = %plan.id,
            template_id = %template.id,
            agents = plan.agents.len(),
            "workflow plan created"
        );
        Ok(plan)
    }

    /// Validate a plan's prerequisites, agent availability, resources, and
    /// dependency structure.
    pub async fn validate_prerequisites(
        &self,
        plan: &WorkflowPlan,
    ) -> Result<ValidationResult, EngineError> {
        let mut result = ValidationResult::valid();

        let template = {
            let templates = self.templates.read();
            templates.iter().find(|t| t.id == plan.template_id).cloned()
        };
        if let Some(template) = &template {
            for prerequisite in &template.prerequisites {
                if !self.probe.prerequisite_met(prerequisite) {
                    result.add_missing_prerequisite(prerequisite.clone());
                }
            }
        }

        for assignment in &plan.agents {
            if !self.probe.role_available(assignment.role) {
                result.add_missing_prerequisite(format!(
                    "Agent {} not available",
                    assignment.role.as_str()
                ));
            }
        }

        for resource in &plan.required_resources {
            if !self
                .probe
                .resource_available(&resource.resource_type, resource.amount)
            {
                result.add_warning(format!(
                    "Resource {} may be limited",
                    resource.resource_type
                ));
            }
        }

        for dependency in &plan.dependencies {
            if dependency.dependent_task_id == dependency.prerequisite_task_id {
                result.add_warning(format!(
                    "Self-dependency detected: {}",
                    dependency.dependent_task_id
                ));
            }
        }
        if has_cycle(&plan.dependencies) {
            result.add_missing_prerequisite("Dependency graph contains a cycle".to_string());
        }

        result.estimated_setup_time_minutes = setup_time_minutes(plan, &result);

        self.audit
            .record(
                AuditEntry::new(
                    audit_trail::EntryKind::Workflow,
                    "Prerequisites validated",
                    "workflow_validation",
                )
                .with_severity(if result.is_valid {
                    Severity::Info
                } else {
                    Severity::Warning
                })
                .with_actors(
                    ActorIds::agent(self.engine_id.to_string())
                        .with_workflow(plan.id.to_string()),
                )
                .with_metadata("is_valid", serde_json::json!(result.is_valid))
                .with_metadata(
                    "missing_prerequisites",
                    serde_json::json!(result.missing_prerequisites.len()),
                ),
            )
            .await?;

        Ok(result)
    }

    pub fn add_template(&self, template: WorkflowTemplate) {
        let mut templates = self.templates.write();
        tracing::info!(template_id = %template.id, name = %template.name, "template added");
        templates.push(template);
        drop(templates);
        self.cache.invalidate_all();
    }

    pub fn remove_template(&self, template_id: &str) -> bool {
        let mut templates = self.templates.write();
        let before = templates.len();
        templates.retain(|t| t.id != template_id);
        let removed = templates.len() < before;
        drop(templates);
        if removed {
            tracing::info!(template_id = template_id, "template removed");
            self.cache.invalidate_all();
        }
        removed
    }

    pub fn get_template(&self, template_id: &str) -> Option<WorkflowTemplate> {
        self.templates
            .read()
            .iter()
            .find(|t| t.id == template_id)
            .cloned()
    }

    pub fn list_templates(&self) -> Vec<WorkflowTemplate> {
        self.templates.read().clone()
    }

    pub fn get_metrics(&self) -> EngineMetricsSnapshot {
        let metrics = self.metrics.lock();
        self.cache.run_pending_tasks();
        EngineMetricsSnapshot {
            total_evaluations: metrics.total_evaluations,
            successful_matches: metrics.successful_matches,
            success_rate: if metrics.total_evaluations > 0 {
                metrics.successful_matches as f64 / metrics.total_evaluations as f64
            } else {
                0.0
            },
            average_evaluation_time_ms: if metrics.total_evaluations > 0 {
                metrics.total_evaluation_time_ms / metrics.total_evaluations as f64
            } else {
                0.0
            },
            cache_hit_rate: if metrics.cache_lookups > 0 {
                metrics.cache_hits as f64 / metrics.cache_lookups as f64
            } else {
                0.0
            },
            cache_size: self.cache.entry_count(),
            template_count: self.templates.read().len(),
        }
    }
}

/// Fingerprint of the evaluation-relevant request fields.
fn fingerprint(input: &EvaluationInput) -> String {
    let mut entities: Vec<(&String, &Vec<String>)> = input.entities.iter().collect();
    entities.sort_by(|a, b| a.0.cmp(b.0));
    format!(
        "{}|{}|{}|{:?}",
        input.intent,
        input.content_hash,
        input.complexity.as_str(),
        entities
    )
}

/// Dependency edges implied by the orchestration pattern.
fn build_dependencies(
    pattern: OrchestrationPattern,
    roles: &[AgentRole],
) -> Vec<TaskDependency> {
    let task = WorkflowPlan::task_id_for_role;
    let mut dependencies = Vec::new();

    match pattern {
        OrchestrationPattern::Sequential => {
            for pair in roles.windows(2) {
                dependencies.push(TaskDependency {
                    dependent_task_id: task(pair[1]),
                    prerequisite_task_id: task(pair[0]),
                    kind: DependencyKind::Completion,
                    is_blocking: true,
                });
            }
        }
        OrchestrationPattern::Parallel => {
            // Fan out from the coordinating manager; everything else runs
            // side by side once its data arrives.
            let coordinator = roles
                .iter()
                .find(|r| **r == AgentRole::ProjectManager)
                .copied();
            if let Some(coordinator) = coordinator {
                for role in roles.iter().filter(|r| **r != coordinator) {
                    dependencies.push(TaskDependency {
                        dependent_task_id: task(*role),
                        prerequisite_task_id: task(coordinator),
                        kind: DependencyKind::Data,
                        is_blocking: false,
                    });
                }
            }
        }
        OrchestrationPattern::Hierarchical => {
            // Delegation tree: each role reports to the one above it.
            for (index, role) in roles.iter().enumerate().skip(1) {
                let parent = roles[(index - 1) / 2];
                dependencies.push(TaskDependency {
                    dependent_task_id: task(*role),
                    prerequisite_task_id: task(parent),
                    kind: DependencyKind::Completion,
                    is_blocking: true,
                });
            }
        }
        OrchestrationPattern::Dynamic => {
            // Research first; analysis roles consume its findings.
            let research: Vec<AgentRole> = roles
                .iter()
                .filter(|r| **r == AgentRole::Research)
                .copied()
                .collect();
            let analysis: Vec<AgentRole> = roles
                .iter()
                .filter(|r| {
                    matches!(r, AgentRole::BusinessAnalyst | AgentRole::ProjectManager)
                })
                .copied()
                .collect();
            for research_role in &research {
                for analysis_role in &analysis {
                    dependencies.push(TaskDependency {
                        dependent_task_id: task(*analysis_role),
                        prerequisite_task_id: task(*research_role),
                        kind: DependencyKind::Data,
                        is_blocking: false,
                    });
                }
            }
        }
    }
    dependencies
}

fn has_cycle(dependencies: &[TaskDependency]) -> bool {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices = HashMap::new();

    for dependency in dependencies {
        for task in [
            dependency.prerequisite_task_id.as_str(),
            dependency.dependent_task_id.as_str(),
        ] {
            indices
                .entry(task)
                .or_insert_with(|| graph.add_node(task));
        }
        graph.add_edge(
            indices[dependency.prerequisite_task_id.as_str()],
            indices[dependency.dependent_task_id.as_str()],
            (),
        );
    }
    petgraph::algo::is_cyclic_directed(&graph)
}

fn setup_time_minutes(plan: &WorkflowPlan, result: &ValidationResult) -> u32 {
    let mut minutes = 15;
    minutes += result.missing_prerequisites.len() as u32 * 30;
    minutes += match plan.pattern {
        OrchestrationPattern::Hierarchical => 20,
        OrchestrationPattern::Dynamic => 15,
        _ => 0,
    };
    if plan.agents.len() > 3 {
        minutes += (plan.agents.len() as u32 - 3) * 10;
    }
    minutes
}
