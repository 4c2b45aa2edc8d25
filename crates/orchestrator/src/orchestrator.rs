//! The orchestrator facade: request ingress to executed workflow
//!
//! Wires the externally-supplied parser, the workflow engine, the
//! execution planner, and the executor into one flow:
//! parse -> clarify -> match -> plan -> approve -> execute,
//! with the audit trail recording every step.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

use audit_trail::{ActorIds, AuditEntry, AuditPayload, AuditSink, EntryKind};
use workflow_engine::{
    Complexity, EvaluationContext, EvaluationInput, OrchestrationPattern, SkillLevel,
    ValidationResult, WorkflowEngine, WorkflowPlan,
};

use crate::approval::{ApprovalLevel, ApprovalWorkflow, Decision, PlanModification};
use crate::config::OrchestratorConfig;
use crate::context::{ContextStore, ConversationContext};
use crate::executor::WorkflowExecutor;
use crate::planner::{ExecutionPlan, ExecutionPlanner, ValidationLevel};
use crate::request::{
    map_intent_to_workflow_type, ParsedRequest, RequestParser, UserRequest, WorkflowInitiation,
};
use crate::OrchestratorError;

/// Everything produced by planning one request.
#[derive(Debug, Clone)]
pub struct PlannedWorkflow {
    pub plan: WorkflowPlan,
    pub execution_plan: ExecutionPlan,
    pub approval: ApprovalWorkflow,
    pub validation: ValidationResult,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    parser: Arc<dyn RequestParser>,
    contexts: ContextStore,
    engine: Arc<WorkflowEngine>,
    planner: Arc<ExecutionPlanner>,
    executor: Arc<WorkflowExecutor>,
    audit: Arc<dyn AuditSink>,
    plans: RwLock<HashMap<Uuid, WorkflowPlan>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        parser: Arc<dyn RequestParser>,
        engine: Arc<WorkflowEngine>,
        planner: Arc<ExecutionPlanner>,
        executor: Arc<WorkflowExecutor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let contexts = ContextStore::new(config.max_contexts, config.context_ttl_hours);
        Self {
            config,
            parser,
            contexts,
            engine,
            planner,
            executor,
            audit,
            plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn planner(&self) -> &Arc<ExecutionPlanner> {
        &self.planner
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Ingest a request: parse it, decide whether to proceed or go back
    /// for clarification, and update the conversation context either way.
    pub async fn process_request(
        &self,
        request: &mut UserRequest,
    ) -> Result<WorkflowInitiation, OrchestratorError> {
        let mut context = self.get_or_create_context(request);
        context.update_interaction();

        self.audit
            .record(
                AuditEntry::new(EntryKind::Request, "Request received", "user_interaction")
                    .with_actors(self.actors_for(request, &context))
                    .with_metadata("content_length", serde_json::json!(request.content.len()))
                    .with_metadata(
                        "interaction_count",
                        serde_json::json!(context.interaction_count),
                    ),
            )
            .await?;

        let parsed = self.parser.parse(&request.content).await?;
        request.intent = Some(parsed.intent.clone());
        request.confidence = parsed.confidence;
        request.entities = parsed.entities.clone();
        request.keywords = parsed.keywords.clone();
        request.complexity = parsed.complexity;

        self.audit
            .record(
                AuditEntry::new(EntryKind::Processing, "Request parsed", "request_processing")
                    .with_actors(self.actors_for(request, &context))
                    .with_payload(AuditPayload::RequestParsed {
                        intent: parsed.intent.clone(),
                        confidence: parsed.confidence,
                        complexity: parsed.complexity.as_str().to_string(),
                        entities: parsed.entities.clone(),
                        keywords: parsed.keywords.clone(),
                        duration_ms: None,
                    }),
            )
            .await?;

        let needs_clarification = parsed.requires_clarification
            || parsed.confidence < self.config.min_confidence_threshold;

        let initiation = if needs_clarification {
            let attempts = context.clarification_attempts();
            if attempts >= self.config.max_clarification_attempts {
                tracing::warn!(
                    request_id = %request.id,
                    attempts = attempts,
                    "clarification attempts exhausted; proceeding best effort"
                );
                WorkflowInitiation {
                    request_id: request.id.clone(),
                    should_proceed: true,
                    workflow_type: map_intent_to_workflow_type(&parsed.intent)
                        .map(|t| t.to_string()),
                    estimated_complexity: parsed.complexity,
                    required_clarifications: Vec::new(),
                    suggested_next_steps: vec![
                        "Proceed with available information".to_string(),
                        "Request additional details during execution".to_string(),
                    ],
                }
            } else {
                context.record_clarification_attempt();
                let questions = if parsed.clarification_questions.is_empty() {
                    vec!["Please provide more specific details about your request.".to_string()]
                } else {
                    parsed.clarification_questions.clone()
                };
                WorkflowInitiation {
                    request_id: request.id.clone(),
                    should_proceed: false,
                    workflow_type: None,
                    estimated_complexity: parsed.complexity,
                    required_clarifications: questions,
                    suggested_next_steps: vec![
                        "Please provide the requested clarifications".to_string(),
                        "Resubmit your request with more details".to_string(),
                    ],
                }
            }
        } else {
            let workflow_type = map_intent_to_workflow_type(&parsed.intent).map(|t| t.to_string());
            WorkflowInitiation {
                request_id: request.id.clone(),
                should_proceed: workflow_type.is_some(),
                workflow_type,
                estimated_complexity: parsed.complexity,
                required_clarifications: Vec::new(),
                suggested_next_steps: vec![
                    "Create execution plan".to_string(),
                    "Begin workflow execution".to_string(),
                ],
            }
        };

        self.audit
            .record(
                AuditEntry::new(EntryKind::Decision, "Workflow decision made", "workflow_orchestration")
                    .with_actors(self.actors_for(request, &context))
                    .with_payload(AuditPayload::WorkflowDecision {
                        decision: if initiation.should_proceed {
                            "proceed".to_string()
                        } else {
                            "clarification_needed".to_string()
                        },
                        workflow_type: initiation.workflow_type.clone(),
                        clarifications: initiation.required_clarifications.clone(),
                        next_steps: initiation.suggested_next_steps.clone(),
                    }),
            )
            .await?;

        context.add_context("last_request_id", serde_json::json!(request.id));
        context.add_context("last_intent", serde_json::json!(parsed.intent));
        context.add_context(
            "last_workflow_type",
            serde_json::json!(initiation.workflow_type),
        );
        context.add_context(
            "last_complexity",
            serde_json::json!(parsed.complexity.as_str()),
        );
        context.accumulate_keywords(&parsed.keywords);
        request.conversation_id = Some(context.conversation_id.clone());
        self.contexts.store(context);

        tracing::info!(
            request_id = %request.id,
            should_proceed = initiation.should_proceed,
            workflow_type = ?initiation.workflow_type,
            "request processed"
        );
        Ok(initiation)
    }

    /// Match the request, expand the winning template, generate the
    /// detailed plan, and gate it behind an approval workflow.
    pub async fn plan_workflow(
        &self,
        request: &UserRequest,
        parsed: &ParsedRequest,
    ) -> Result<PlannedWorkflow, OrchestratorError> {
        let input = EvaluationInput {
            request_id: request.id.clone(),
            user_id: Some(request.user_id.clone()),
            intent: parsed.intent.clone(),
            content_hash: content_hash(&request.content),
            confidence: parsed.confidence,
            complexity: parsed.complexity,
            entities: parsed.entities.clone(),
            requirement_count: parsed.extracted_requirements.len(),
        };
        let context = self.evaluation_context(request);

        let matches = self.engine.evaluate(&input, &context).await?;
        let plan = self.engine.select(&matches).await?;

        let prerequisite_check = self.engine.validate_prerequisites(&plan).await?;
        if !prerequisite_check.is_valid {
            tracing::warn!(
                plan_id = %plan.id,
                missing = ?prerequisite_check.missing_prerequisites,
                "plan has unmet prerequisites"
            );
        }

        let validation_level = match parsed.complexity {
            Complexity::Low => ValidationLevel::Basic,
            Complexity::Medium => ValidationLevel::Standard,
            Complexity::High => ValidationLevel::Comprehensive,
        };
        let execution_plan = self.planner.generate(&plan, validation_level).await?;
        let validation = self.planner.validate(&execution_plan, &plan).await?;
        let approval = self
            .planner
            .create_approval_workflow(&execution_plan, &plan, ApprovalLevel::User)
            .await?;

        self.plans.write().insert(plan.id, plan.clone());

        Ok(PlannedWorkflow {
            plan,
            execution_plan,
            approval,
            validation,
        })
    }

    /// Apply a gate decision to a stored approval workflow.
    pub async fn decide(
        &self,
        approval_workflow_id: Uuid,
        gate_id: Uuid,
        decision: Decision,
        user: &str,
        reason: &str,
    ) -> Result<ApprovalWorkflow, OrchestratorError> {
        let mut workflow = self.planner.get_workflow(approval_workflow_id).ok_or_else(|| {
            OrchestratorError::NotFound(format!("approval workflow {approval_workflow_id}"))
        })?;

        let context = self.approval_context(workflow.plan_id);
        workflow.process_gate_decision(gate_id, decision, user, reason, &context)?;
        self.planner.store_workflow(workflow.clone());

        self.audit
            .record(
                AuditEntry::new(EntryKind::Decision, "Gate decision processed", "approval_workflow")
                    .with_actors(ActorIds::default().with_workflow(workflow.plan_id.to_string()))
                    .with_metadata("gate_id", serde_json::json!(gate_id.to_string()))
                    .with_metadata("decision", serde_json::json!(decision))
                    .with_metadata("user", serde_json::json!(user))
                    .with_metadata("status", serde_json::json!(workflow.status)),
            )
            .await?;

        Ok(workflow)
    }

    /// Apply a plan modification and reopen the approval workflow if it
    /// was waiting on one.
    pub async fn apply_modification(
        &self,
        execution_plan_id: Uuid,
        modification: PlanModification,
        requester: &str,
    ) -> Result<ExecutionPlan, OrchestratorError> {
        self.planner
            .apply_modification(execution_plan_id, modification, requester)
            .await
    }

    /// Execute a fully-approved plan. Returns the execution id.
    pub async fn execute_approved(
        &self,
        approval_workflow_id: Uuid,
    ) -> Result<Uuid, OrchestratorError> {
        let workflow = self.planner.get_workflow(approval_workflow_id).ok_or_else(|| {
            OrchestratorError::NotFound(format!("approval workflow {approval_workflow_id}"))
        })?;
        if !workflow.can_proceed_to_execution() {
            return Err(OrchestratorError::Validation(format!(
                "approval workflow is {:?}, not approved",
                workflow.status
            )));
        }

        let plan = self
            .plans
            .read()
            .get(&workflow.plan_id)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("workflow plan {}", workflow.plan_id))
            })?;

        self.executor.execute(&plan).await
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<ConversationContext> {
        self.contexts.get(conversation_id)
    }

    fn get_or_create_context(&self, request: &UserRequest) -> ConversationContext {
        request
            .conversation_id
            .as_deref()
            .and_then(|id| self.contexts.get(id))
            .unwrap_or_else(|| ConversationContext::new(request.user_id.clone()))
    }

    fn evaluation_context(&self, request: &UserRequest) -> EvaluationContext {
        let Some(context) = request
            .conversation_id
            .as_deref()
            .and_then(|id| self.contexts.get(id))
        else {
            return EvaluationContext::default();
        };

        let recent_templates = context
            .context_data
            .get("last_workflow_type")
            .and_then(|v| v.as_str())
            .map(|t| vec![t.to_string()])
            .unwrap_or_default();

        let preferred_patterns = context
            .preferences
            .get("preferred_pattern")
            .and_then(|p| match p.as_str() {
                "sequential" => Some(OrchestrationPattern::Sequential),
                "parallel" => Some(OrchestrationPattern::Parallel),
                "hierarchical" => Some(OrchestrationPattern::Hierarchical),
                "dynamic" => Some(OrchestrationPattern::Dynamic),
                _ => None,
            })
            .map(|p| vec![p])
            .unwrap_or_default();

        let skill_level = context
            .preferences
            .get("skill_level")
            .and_then(|s| match s.as_str() {
                "beginner" => Some(SkillLevel::Beginner),
                "intermediate" => Some(SkillLevel::Intermediate),
                "expert" => Some(SkillLevel::Expert),
                _ => None,
            });

        EvaluationContext {
            recent_templates,
            preferred_patterns,
            skill_level,
        }
    }

    fn approval_context(&self, plan_id: Uuid) -> HashMap<String, f64> {
        let plans = self.plans.read();
        let Some(plan) = plans.get(&plan_id) else {
            return HashMap::new();
        };
        let total_cost: f64 = plan
            .required_resources
            .iter()
            .map(|r| r.estimated_cost)
            .sum();
        HashMap::from([
            ("cost".to_string(), total_cost),
            (
                "duration".to_string(),
                f64::from(plan.estimated_duration_minutes),
            ),
        ])
    }

    fn actors_for(&self, request: &UserRequest, context: &ConversationContext) -> ActorIds {
        ActorIds {
            user_id: Some(request.user_id.clone()),
            conversation_id: Some(context.conversation_id.clone()),
            request_id: Some(request.id.clone()),
            workflow_id: None,
            agent_id: None,
        }
    }
}


fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
