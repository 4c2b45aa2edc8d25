//! Audit entry model and query filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::AuditError;

/// Kind of audit entry, mirrored to a dedicated index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Request,
    Processing,
    Workflow,
    Decision,
    AgentEvent,
    Error,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Request => "request",
            EntryKind::Processing => "processing",
            EntryKind::Workflow => "workflow",
            EntryKind::Decision => "decision",
            EntryKind::AgentEvent => "agent_event",
            EntryKind::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AuditError> {
        match value {
            "request" => Ok(EntryKind::Request),
            "processing" => Ok(EntryKind::Processing),
            "workflow" => Ok(EntryKind::Workflow),
            "decision" => Ok(EntryKind::Decision),
            "agent_event" => Ok(EntryKind::AgentEvent),
            "error" => Ok(EntryKind::Error),
            other => Err(AuditError::Decode(format!("entry kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AuditError> {
        match value {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(AuditError::Decode(format!("severity {other}"))),
        }
    }
}

/// Typed payloads for well-known entry shapes.
///
/// The free-form `metadata` map on [`AuditEntry`] remains available for
/// extension, but anything the system itself reads back goes through one of
/// these variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum AuditPayload {
    RequestParsed {
        intent: String,
        confidence: f64,
        complexity: String,
        entities: HashMap<String, Vec<String>>,
        keywords: Vec<String>,
        duration_ms: Option<i64>,
    },
    WorkflowDecision {
        decision: String,
        workflow_type: Option<String>,
        clarifications: Vec<String>,
        next_steps: Vec<String>,
    },
    Operation {
        operation: String,
        duration_ms: i64,
        outcome: String,
    },
    ErrorDetail {
        error_type: String,
        message: String,
        operation: String,
        stack_trace: Option<String>,
    },
}

/// Identifiers tying an entry back to the actors involved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorIds {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<String>,
}

impl ActorIds {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A single audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub severity: Severity,
    pub actors: ActorIds,
    pub action: String,
    pub category: String,
    pub payload: Option<AuditPayload>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEntry {
    pub fn new(kind: EntryKind, action: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            severity: Severity::Info,
            actors: ActorIds::default(),
            action: action.into(),
            category: category.into(),
            payload: None,
            metadata: HashMap::new(),
        }
    }

    /// Shorthand for the most common entry shape: an agent lifecycle event.
    pub fn agent_event(
        agent_id: impl Into<String>,
        action: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self::new(EntryKind::AgentEvent, action, category).with_actors(ActorIds::agent(agent_id))
    }

    pub fn error(
        operation: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        Self::new(EntryKind::Error, format!("Error in {operation}"), "error")
            .with_severity(Severity::Error)
            .with_payload(AuditPayload::ErrorDetail {
                error_type: error_type.into(),
                message: message.into(),
                operation,
                stack_trace: None,
            })
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_actors(mut self, actors: ActorIds) -> Self {
        self.actors = actors;
        self
    }

    pub fn with_payload(mut self, payload: AuditPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Filter for [`crate::AuditTrail::query`]. All fields are optional and
/// combined with AND.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub workflow_id: Option<String>,
    pub kind: Option<EntryKind>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
