//! Verification gates and approval workflows
//!
//! An approval workflow is an ordered list of gates; each gate carries
//! criteria that either auto-approve from plan facts (`field op value`
//! predicates) or require an explicit human decision. Once a gate reaches
//! a terminal status it stays there; only an applied plan modification
//! reopens the workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    RequiresModification,
    Expired,
}

impl VerificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Approved | VerificationStatus::Rejected | VerificationStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    User,
    Stakeholder,
    TechnicalLead,
    ProjectManager,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationType {
    AgentChange,
    ResourceAdjustment,
    TimelineChange,
    ScopeModification,
    DependencyUpdate,
    PriorityChange,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub cost_change: f64,
    pub duration_change_minutes: i64,
    pub risk_level: Option<RiskLevel>,
}

/// A requested change to an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanModification {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub modification_type: ModificationType,
    pub description: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub reason: String,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub impact_assessment: ImpactAssessment,
}

impl PlanModification {
    pub fn new(
        plan_id: Uuid,
        modification_type: ModificationType,
        reason: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            modification_type,
            description: String::new(),
            old_value: None,
            new_value: None,
            reason: reason.into(),
            requested_by: requested_by.into(),
            approved_by: None,
            created_at: Utc::now(),
            impact_assessment: ImpactAssessment::default(),
        }
    }

    pub fn with_change(
        mut self,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        self.old_value = Some(old_value);
        self.new_value = Some(new_value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedback {
    pub id: Uuid,
    pub user_id: String,
    pub content: String,
    pub priority: u8,
    pub addressed: bool,
    pub created_at: DateTime<Utc>,
}

/// One criterion inside a gate. Criteria with auto-approve predicates are
/// satisfied by plan facts; criteria without predicates are satisfied by
/// the explicit approve decision itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalCriteria {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub is_required: bool,
    pub approval_level: ApprovalLevel,
    pub auto_approve_conditions: Vec<String>,
}

impl ApprovalCriteria {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            is_required: true,
            approval_level: ApprovalLevel::User,
            auto_approve_conditions: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: ApprovalLevel) -> Self {
        self.approval_level = level;
        self
    }

    pub fn with_conditions(mut self, conditions: &[&str]) -> Self {
        self.auto_approve_conditions = conditions.iter().map(|c| c.to_string()).collect();
        self
    }

    /// True iff every predicate holds against the context. Criteria
    /// without predicates never auto-approve.
    pub fn can_auto_approve(&self, context: &HashMap<String, f64>) -> bool {
        if self.auto_approve_conditions.is_empty() {
            return false;
        }
        self.auto_approve_conditions
            .iter()
            .all(|condition| evaluate_condition(condition, context))
    }

    /// Satisfied for an approve decision: predicates must hold when
    /// defined; otherwise the decision itself is the approval.
    fn is_satisfied(&self, context: &HashMap<String, f64>) -> bool {
        if !self.is_required {
            return true;
        }
        if self.auto_approve_conditions.is_empty() {
            return true;
        }
        self.can_auto_approve(context)
    }
}

/// `field op value` with numeric comparison.
fn evaluate_condition(condition: &str, context: &HashMap<String, f64>) -> bool {
    let parts: Vec<&str> = condition.split_whitespace().collect();
    let &[field, operator, value] = parts.as_slice() else {
        return false;
    };
    let Some(actual) = context.get(field) else {
        return false;
    };
    let Ok(expected) = value.parse::<f64>() else {
        return false;
    };

    match operator {
        "==" => (actual - expected).abs() < f64::EPSILON,
        "!=" => (actual - expected).abs() >= f64::EPSILON,
        "<" => *actual < expected,
        "<=" => *actual <= expected,
        ">" => *actual > expected,
        ">=" => *actual >= expected,
        _ => false,
    }
}

/// A named approval checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationGate {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub plan_id: Uuid,
    pub status: VerificationStatus,
    pub approval_level: ApprovalLevel,
    pub criteria: Vec<ApprovalCriteria>,
    pub feedback: Vec<UserFeedback>,
    pub modifications: Vec<PlanModification>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
}

impl VerificationGate {
    pub fn new(name: impl Into<String>, description: impl Into<String>, plan_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            plan_id,
            status: VerificationStatus::Pending,
            approval_level: ApprovalLevel::User,
            criteria: Vec::new(),
            feedback: Vec::new(),
            modifications: Vec::new(),
            created_at: Utc::now(),
            expires_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
        }
    }

    pub fn with_criteria(mut self, criteria: ApprovalCriteria) -> Self {
        self.criteria.push(criteria);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn approve(
        &mut self,
        approver: &str,
        context: &HashMap<String, f64>,
    ) -> Result<(), OrchestratorError> {
        if self.status != VerificationStatus::Pending {
            return Err(OrchestratorError::Validation(format!(
                "cannot approve gate {} in status {:?}",
                self.name, self.status
            )));
        }
        if !self.criteria.iter().all(|c| c.is_satisfied(context)) {
            return Err(OrchestratorError::Validation(format!(
                "required criteria not met for gate {}",
                self.name
            )));
        }

        self.status = VerificationStatus::Approved;
        self.approved_by = Some(approver.to_string());
        self.approved_at = Some(Utc::now());
        Ok(())
    }

    pub fn reject(&mut self, rejector: &str, reason: &str) -> Result<(), OrchestratorError> {
        if self.status != VerificationStatus::Pending {
            return Err(OrchestratorError::Validation(format!(
                "cannot reject gate {} in status {:?}",
                self.name, self.status
            )));
        }
        self.status = VerificationStatus::Rejected;
        self.approved_by = Some(rejector.to_string());
        self.approved_at = Some(Utc::now());
        self.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn request_modification(&mut self, requester: &str, reason: &str) {
        self.status = VerificationStatus::RequiresModification;
        self.approved_by = Some(requester.to_string());
        self.rejection_reason = Some(reason.to_string());
    }

    /// Flip a pending gate to expired once its deadline passes.
    pub fn check_expiration(&mut self, now: DateTime<Utc>) {
        if self.status == VerificationStatus::Pending {
            if let Some(expires_at) = self.expires_at {
                if now > expires_at {
                    self.status = VerificationStatus::Expired;
                }
            }
        }
    }

    /// All required predicate-bearing criteria hold, so the gate can pass
    /// without a human in the loop.
    pub fn can_auto_approve(&self, context: &HashMap<String, f64>) -> bool {
        !self.criteria.is_empty()
            && self
                .criteria
                .iter()
                .filter(|c| c.is_required)
                .all(|c| c.can_auto_approve(context))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub gate_id: Uuid,
    pub gate_name: String,
    pub decision: Decision,
    pub user: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Modify,
}

/// Ordered gates that must all approve before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub gates: Vec<VerificationGate>,
    pub current_gate_index: usize,
    pub status: VerificationStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_modifications: u32,
    pub history: Vec<DecisionRecord>,
}

impl ApprovalWorkflow {
    pub fn new(plan_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id,
            gates: Vec::new(),
            current_gate_index: 0,
            status: VerificationStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            total_modifications: 0,
            history: Vec::new(),
        }
    }

    pub fn add_gate(&mut self, gate: VerificationGate) {
        self.gates.push(gate);
    }

    pub fn current_gate(&self) -> Option<&VerificationGate> {
        self.gates.get(self.current_gate_index)
    }

    pub fn gate_by_id(&self, gate_id: Uuid) -> Option<&VerificationGate> {
        self.gates.iter().find(|g| g.id == gate_id)
    }

    /// Apply a decision to a gate. Approval advances the workflow; passing
    /// the final gate approves the whole workflow. Rejection is terminal.
    pub fn process_gate_decision(
        &mut self,
        gate_id: Uuid,
        decision: Decision,
        user: &str,
        reason: &str,
        context: &HashMap<String, f64>,
    ) -> Result<(), OrchestratorError> {
        let gate_index = self
            .gates
            .iter()
            .position(|g| g.id == gate_id)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("gate {gate_id} not in workflow"))
            })?;

        self.history.push(DecisionRecord {
            gate_id,
            gate_name: self.gates[gate_index].name.clone(),
            decision,
            user: user.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        match decision {
            Decision::Approve => {
                self.gates[gate_index].approve(user, context)?;
                if gate_index == self.current_gate_index {
                    self.advance();
                }
            }
            Decision::Reject => {
                self.gates[gate_index].reject(user, reason)?;
                self.status = VerificationStatus::Rejected;
                self.completed_at = Some(Utc::now());
            }
            Decision::Modify => {
                self.gates[gate_index].request_modification(user, reason);
                self.status = VerificationStatus::RequiresModification;
            }
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.current_gate_index += 1;
        if self.current_gate_index >= self.gates.len() {
            self.status = VerificationStatus::Approved;
            self.completed_at = Some(Utc::now());
        }
    }

    /// Record an applied modification and reopen the workflow if it was
    /// waiting on one.
    pub fn apply_modification(&mut self, modification: PlanModification) {
        self.total_modifications += 1;

        if let Some(gate) = self.gates.get_mut(self.current_gate_index) {
            if matches!(
                gate.status,
                VerificationStatus::RequiresModification | VerificationStatus::Expired
            ) {
                gate.status = VerificationStatus::Pending;
            }
            gate.modifications.push(modification);
        }

        if self.status == VerificationStatus::RequiresModification {
            self.status = VerificationStatus::Pending;
        }
    }

    pub fn can_proceed_to_execution(&self) -> bool {
        self.status == VerificationStatus::Approved
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            VerificationStatus::Approved | VerificationStatus::Rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(cost: f64, duration: f64) -> HashMap<String, f64> {
        HashMap::from([("cost".to_string(), cost), ("duration".to_string(), duration)])
    }

    #[test]
    fn predicates_evaluate_numeric_comparisons() {
        let ctx = context(500.0, 240.0);
        assert!(evaluate_condition("cost < 1000", &ctx));
        assert!(evaluate_condition("duration <= 480", &ctx));
        assert!(!evaluate_condition("cost > 1000", &ctx));
        assert!(!evaluate_condition("missing < 5", &ctx));
        assert!(!evaluate_condition("malformed", &ctx));
    }

    #[test]
    fn criteria_without_predicates_never_auto_approve() {
        let manual = ApprovalCriteria::new("Execution Authorization", "authorize");
        assert!(!manual.can_auto_approve(&context(1.0, 1.0)));
        // But an explicit approve decision satisfies them.
        assert!(manual.is_satisfied(&context(1.0, 1.0)));
    }

    #[test]
    fn gate_auto_approves_when_predicates_hold() {
        let gate = VerificationGate::new("Plan Review", "review", Uuid::new_v4()).with_criteria(
            ApprovalCriteria::new("Resource Approval", "costs")
                .with_conditions(&["cost < 1000", "duration <= 480"]),
        );

        assert!(gate.can_auto_approve(&context(500.0, 240.0)));
        assert!(!gate.can_auto_approve(&context(1500.0, 240.0)));
    }

    #[test]
    fn approve_fails_when_predicates_do_not_hold() {
        let mut gate = VerificationGate::new("Plan Review", "review", Uuid::new_v4())
            .with_criteria(
                ApprovalCriteria::new("Resource Approval", "costs").with_conditions(&["cost < 1000"]),
            );

        assert!(gate.approve("user-1", &context(5000.0, 100.0)).is_err());
        assert_eq!(gate.status, VerificationStatus::Pending);
        gate.approve("user-1", &context(500.0, 100.0)).unwrap();
        assert_eq!(gate.status, VerificationStatus::Approved);
    }

    #[test]
    fn terminal_gates_do_not_reopen() {
        let mut gate = VerificationGate::new("Plan Review", "review", Uuid::new_v4());
        gate.approve("user-1", &HashMap::new()).unwrap();

        assert!(gate.approve("user-2", &HashMap::new()).is_err());
        assert!(gate.reject("user-2", "changed my mind").is_err());
        assert_eq!(gate.status, VerificationStatus::Approved);
    }

    #[test]
    fn pending_gates_expire() {
        let mut gate = VerificationGate::new("Plan Review", "review", Uuid::new_v4())
            .with_expiry(Utc::now() - chrono::Duration::hours(1));
        gate.check_expiration(Utc::now());
        assert_eq!(gate.status, VerificationStatus::Expired);

        // Approved gates are unaffected by expiry checks.
        let mut approved = VerificationGate::new("g", "d", Uuid::new_v4());
        approved.approve("u", &HashMap::new()).unwrap();
        approved.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        approved.check_expiration(Utc::now());
        assert_eq!(approved.status, VerificationStatus::Approved);
    }

    fn three_gate_workflow() -> ApprovalWorkflow {
        let plan_id = Uuid::new_v4();
        let mut workflow = ApprovalWorkflow::new(plan_id);
        workflow.add_gate(VerificationGate::new("Plan Review", "review", plan_id));
        workflow.add_gate(VerificationGate::new("Risk Assessment", "risks", plan_id));
        workflow.add_gate(VerificationGate::new(
            "Execution Authorization",
            "authorize",
            plan_id,
        ));
        workflow
    }

    #[test]
    fn workflow_advances_through_gates_to_approved() {
        let mut workflow = three_gate_workflow();
        let ctx = HashMap::new();

        for i in 0..3 {
            let gate_id = workflow.gates[i].id;
            workflow
                .process_gate_decision(gate_id, Decision::Approve, "user-1", "", &ctx)
                .unwrap();
        }

        assert_eq!(workflow.status, VerificationStatus::Approved);
        assert!(workflow.can_proceed_to_execution());
        assert_eq!(workflow.history.len(), 3);
    }

    #[test]
    fn rejection_on_final_gate_is_terminal() {
        let mut workflow = three_gate_workflow();
        let ctx = HashMap::new();

        for i in 0..2 {
            let gate_id = workflow.gates[i].id;
            workflow
                .process_gate_decision(gate_id, Decision::Approve, "user-1", "", &ctx)
                .unwrap();
        }
        let final_gate = workflow.gates[2].id;
        workflow
            .process_gate_decision(final_gate, Decision::Reject, "user-1", "too risky", &ctx)
            .unwrap();

        assert_eq!(workflow.status, VerificationStatus::Rejected);
        assert!(!workflow.can_proceed_to_execution());
        assert!(workflow.is_complete());
    }

    #[test]
    fn modification_reopens_a_waiting_workflow() {
        let mut workflow = three_gate_workflow();
        let first_gate = workflow.gates[0].id;
        workflow
            .process_gate_decision(
                first_gate,
                Decision::Modify,
                "user-1",
                "needs a smaller budget",
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(workflow.status, VerificationStatus::RequiresModification);

        let modification = PlanModification::new(
            workflow.plan_id,
            ModificationType::ResourceAdjustment,
            "reduced budget",
            "user-1",
        );
        workflow.apply_modification(modification);

        assert_eq!(workflow.status, VerificationStatus::Pending);
        assert_eq!(workflow.gates[0].status, VerificationStatus::Pending);
        assert_eq!(workflow.total_modifications, 1);
    }
}
