//! Request ingress types and the external parser capability
//!
//! The NLP that turns raw text into an intent lives outside the kernel;
//! it arrives here as a [`RequestParser`] implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use workflow_engine::Complexity;

use crate::OrchestratorError;

/// A user request as submitted. Immutable after parsing except for the
/// parsed fields themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub intent: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub entities: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub complexity: Complexity,
}

impl UserRequest {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            conversation_id: None,
            intent: None,
            confidence: 0.0,
            entities: HashMap::new(),
            keywords: Vec::new(),
            complexity: Complexity::Medium,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// What the external parser extracted from raw text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRequest {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub complexity: Complexity,
    #[serde(default)]
    pub requires_clarification: bool,
    #[serde(default)]
    pub clarification_questions: Vec<String>,
    #[serde(default)]
    pub extracted_requirements: Vec<String>,
}

/// The intent-extraction capability. Consumed opaquely.
#[async_trait]
pub trait RequestParser: Send + Sync {
    async fn parse(&self, content: &str) -> Result<ParsedRequest, OrchestratorError>;
}

/// Outcome of request processing: either proceed into a workflow or go
/// back to the user for clarification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInitiation {
    pub request_id: String,
    pub should_proceed: bool,
    pub workflow_type: Option<String>,
    pub estimated_complexity: Complexity,
    pub required_clarifications: Vec<String>,
    pub suggested_next_steps: Vec<String>,
}

/// Intent tag to workflow template id.
pub fn map_intent_to_workflow_type(intent: &str) -> Option<&'static str> {
    match intent {
        "create_project" => Some("project_creation"),
        "analyze_requirements" => Some("requirements_analysis"),
        "design_architecture" => Some("architecture_design"),
        "implement_feature" => Some("feature_implementation"),
        "test_system" => Some("testing_workflow"),
        "research_topic" => Some("research_workflow"),
        "review_code" => Some("code_review"),
        "generate_documentation" => Some("documentation_generation"),
        _ => None,
    }
}
