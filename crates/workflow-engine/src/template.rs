//! Workflow templates and the built-in catalog

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{AgentRole, Complexity, OrchestrationPattern, ResourceRequirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    ProjectManagement,
    Development,
    Analysis,
    Testing,
    Research,
    Documentation,
    Maintenance,
}

/// Reusable recipe mapping an intent/entity pattern to roles, a dependency
/// pattern, and estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: TemplateCategory,
    pub pattern: OrchestrationPattern,
    pub required_roles: Vec<AgentRole>,
    pub optional_roles: Vec<AgentRole>,
    pub prerequisites: Vec<String>,
    pub estimated_duration_hours: u32,
    pub complexity_levels: Vec<Complexity>,
    pub intent_keywords: Vec<String>,
    pub entity_requirements: HashMap<String, Vec<String>>,
    pub success_criteria: Vec<String>,
}

impl WorkflowTemplate {
    pub fn estimated_duration_minutes(&self) -> u32 {
        self.estimated_duration_hours * 60
    }

    /// How much of the intent this template's keywords cover: matched
    /// keywords over the intent's token count, clamped to 1. An intent the
    /// keywords fully cover scores 1.0 regardless of how many other
    /// keywords the template lists.
    pub fn matches_intent(&self, intent: &str) -> f64 {
        if self.intent_keywords.is_empty() {
            return 0.0;
        }
        let intent_lower = intent.to_lowercase();
        let token_count = intent_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .count()
            .max(1);

        let matched = self
            .intent_keywords
            .iter()
            .filter(|keyword| intent_lower.contains(&keyword.to_lowercase()))
            .count();

        (matched as f64 / token_count as f64).min(1.0)
    }

    /// Fraction of required entity slots satisfied. A slot is satisfied
    /// when the request carries that entity kind and one of its values is
    /// acceptable ("any" accepts everything). A template with no entity
    /// requirements is a perfect entity match.
    pub fn matches_entities(&self, entities: &HashMap<String, Vec<String>>) -> f64 {
        if self.entity_requirements.is_empty() {
            return 1.0;
        }

        let satisfied = self
            .entity_requirements
            .iter()
            .filter(|(slot, accepted)| {
                entities.get(*slot).is_some_and(|values| {
                    accepted.iter().any(|a| a == "any")
                        || values.iter().any(|v| {
                            accepted
                                .iter()
                                .any(|a| a.eq_ignore_ascii_case(v))
                        })
                })
            })
            .count();

        satisfied as f64 / self.entity_requirements.len() as f64
    }

    pub fn supports_complexity(&self, complexity: Complexity) -> bool {
        self.complexity_levels.contains(&complexity)
    }

    /// Resource envelope scaled by team size and complexity.
    pub fn resource_requirements(&self, complexity: Complexity) -> Vec<ResourceRequirement> {
        let role_count = self.required_roles.len() as f64;

        let mut cpu_cores = role_count * 0.5;
        match complexity {
            Complexity::High => cpu_cores *= 2.0,
            Complexity::Low => cpu_cores *= 0.5,
            Complexity::Medium => {}
        }

        let mut memory_gb = role_count * 2.0;
        if complexity == Complexity::High {
            memory_gb *= 1.5;
        }

        let model_cost: f64 = self
            .required_roles
            .iter()
            .map(|role| {
                let tokens_per_hour = match role.default_tier() {
                    model_gateway::ModelTier::Strategic => 1000.0,
                    _ => 500.0,
                };
                // Nominal blended price per token for estimation purposes.
                tokens_per_hour * self.estimated_duration_hours as f64 * 0.00002
            })
            .sum();

        vec![
            ResourceRequirement {
                resource_type: "cpu_cores".to_string(),
                amount: cpu_cores,
                unit: "cores".to_string(),
                estimated_cost: cpu_cores * 0.1,
                is_critical: true,
            },
            ResourceRequirement {
                resource_type: "memory".to_string(),
                amount: memory_gb,
                unit: "GB".to_string(),
                estimated_cost: memory_gb * 0.05,
                is_critical: true,
            },
            ResourceRequirement {
                resource_type: "model_tokens".to_string(),
                amount: model_cost,
                unit: "USD".to_string(),
                estimated_cost: model_cost,
                is_critical: true,
            },
        ]
    }
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn criteria(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| l.to_string()).collect()
}

/// The built-in template catalog.
pub fn default_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            id: "project_creation".to_string(),
            name: "Project Creation Workflow".to_string(),
            description: "Complete project setup with requirements analysis, architecture design, and initial implementation".to_string(),
            category: TemplateCategory::ProjectManagement,
            pattern: OrchestrationPattern::Sequential,
            required_roles: vec![
                AgentRole::ProjectManager,
                AgentRole::BusinessAnalyst,
                AgentRole::SolutionArchitect,
            ],
            optional_roles: vec![AgentRole::Implementation],
            prerequisites: vec![
                "project_requirements".to_string(),
                "stakeholder_approval".to_string(),
            ],
            estimated_duration_hours: 16,
            complexity_levels: vec![Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["create", "project", "new", "start", "initialize", "setup"]),
            entity_requirements: HashMap::from([
                ("project_names".to_string(), vec!["any".to_string()]),
                (
                    "languages".to_string(),
                    keywords(&["python", "javascript", "java", "go", "rust"]),
                ),
            ]),
            success_criteria: criteria(&[
                "Project structure created",
                "Requirements documented",
                "Architecture designed",
                "Initial implementation started",
            ]),
        },
        WorkflowTemplate {
            id: "feature_implementation".to_string(),
            name: "Feature Implementation Workflow".to_string(),
            description: "Implement a specific feature with testing and documentation".to_string(),
            category: TemplateCategory::Development,
            pattern: OrchestrationPattern::Parallel,
            required_roles: vec![AgentRole::Implementation, AgentRole::QualityJudge],
            optional_roles: vec![AgentRole::BusinessAnalyst],
            prerequisites: vec![
                "feature_requirements".to_string(),
                "existing_codebase".to_string(),
            ],
            estimated_duration_hours: 8,
            complexity_levels: vec![Complexity::Low, Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["implement", "feature", "build", "develop", "code", "add"]),
            entity_requirements: HashMap::from([
                (
                    "languages".to_string(),
                    keywords(&["python", "javascript", "typescript", "java"]),
                ),
                (
                    "frameworks".to_string(),
                    keywords(&["react", "django", "flask", "spring", "express"]),
                ),
            ]),
            success_criteria: criteria(&[
                "Feature implemented",
                "Tests written and passing",
                "Code reviewed",
                "Documentation updated",
            ]),
        },
        WorkflowTemplate {
            id: "requirements_analysis".to_string(),
            name: "Requirements Analysis Workflow".to_string(),
            description: "Comprehensive business and technical requirements analysis".to_string(),
            category: TemplateCategory::Analysis,
            pattern: OrchestrationPattern::Sequential,
            required_roles: vec![AgentRole::BusinessAnalyst, AgentRole::ProjectManager],
            optional_roles: vec![AgentRole::Research],
            prerequisites: vec![
                "stakeholder_access".to_string(),
                "business_context".to_string(),
            ],
            estimated_duration_hours: 12,
            complexity_levels: vec![Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["analyze", "requirements", "review", "understand", "gather"]),
            entity_requirements: HashMap::new(),
            success_criteria: criteria(&[
                "Requirements documented",
                "User stories created",
                "Acceptance criteria defined",
                "Stakeholder approval obtained",
            ]),
        },
        WorkflowTemplate {
            id: "architecture_design".to_string(),
            name: "Architecture Design Workflow".to_string(),
            description: "System architecture design with scalability and performance considerations".to_string(),
            category: TemplateCategory::Development,
            pattern: OrchestrationPattern::Sequential,
            required_roles: vec![AgentRole::SolutionArchitect, AgentRole::BusinessAnalyst],
            optional_roles: vec![AgentRole::Research],
            prerequisites: vec![
                "requirements_document".to_string(),
                "technical_constraints".to_string(),
            ],
            estimated_duration_hours: 20,
            complexity_levels: vec![Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["design", "architecture", "system", "scalable", "microservices"]),
            entity_requirements: HashMap::from([
                (
                    "platforms".to_string(),
                    keywords(&["aws", "azure", "gcp", "docker", "kubernetes"]),
                ),
                (
                    "databases".to_string(),
                    keywords(&["mysql", "postgresql", "mongodb", "redis"]),
                ),
            ]),
            success_criteria: criteria(&[
                "Architecture designed",
                "Component interactions defined",
                "Technology stack selected",
                "Scalability plan created",
            ]),
        },
        WorkflowTemplate {
            id: "research_workflow".to_string(),
            name: "Research and Investigation Workflow".to_string(),
            description: "Research topics, technologies, or solutions with comprehensive analysis".to_string(),
            category: TemplateCategory::Research,
            pattern: OrchestrationPattern::Dynamic,
            required_roles: vec![AgentRole::Research],
            optional_roles: vec![AgentRole::QualityJudge, AgentRole::BusinessAnalyst],
            prerequisites: vec![
                "research_scope".to_string(),
                "information_sources".to_string(),
            ],
            estimated_duration_hours: 6,
            complexity_levels: vec![Complexity::Low, Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["research", "investigate", "find", "analyze", "study", "explore"]),
            entity_requirements: HashMap::new(),
            success_criteria: criteria(&[
                "Research completed",
                "Findings documented",
                "Recommendations provided",
                "Sources cited",
            ]),
        },
        WorkflowTemplate {
            id: "testing_workflow".to_string(),
            name: "Comprehensive Testing Workflow".to_string(),
            description: "Complete testing including unit, integration, and quality assurance".to_string(),
            category: TemplateCategory::Testing,
            pattern: OrchestrationPattern::Parallel,
            required_roles: vec![AgentRole::QualityJudge, AgentRole::Implementation],
            optional_roles: vec![],
            prerequisites: vec![
                "testable_code".to_string(),
                "test_requirements".to_string(),
            ],
            estimated_duration_hours: 10,
            complexity_levels: vec![Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["test", "testing", "quality", "assurance", "validate"]),
            entity_requirements: HashMap::new(),
            success_criteria: criteria(&[
                "Test suite created",
                "All tests passing",
                "Quality metrics met",
                "Test report generated",
            ]),
        },
        WorkflowTemplate {
            id: "code_review".to_string(),
            name: "Code Review and Quality Assessment".to_string(),
            description: "Comprehensive code review with quality assessment and recommendations".to_string(),
            category: TemplateCategory::Testing,
            pattern: OrchestrationPattern::Sequential,
            required_roles: vec![AgentRole::QualityJudge],
            optional_roles: vec![AgentRole::SolutionArchitect, AgentRole::Implementation],
            prerequisites: vec!["source_code".to_string(), "review_criteria".to_string()],
            estimated_duration_hours: 4,
            complexity_levels: vec![Complexity::Low, Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["review", "code", "audit", "check", "quality"]),
            entity_requirements: HashMap::new(),
            success_criteria: criteria(&[
                "Code reviewed",
                "Issues identified",
                "Recommendations provided",
                "Quality score assigned",
            ]),
        },
        WorkflowTemplate {
            id: "documentation_generation".to_string(),
            name: "Documentation Generation Workflow".to_string(),
            description: "Generate comprehensive project documentation".to_string(),
            category: TemplateCategory::Documentation,
            pattern: OrchestrationPattern::Sequential,
            required_roles: vec![AgentRole::BusinessAnalyst, AgentRole::Implementation],
            optional_roles: vec![AgentRole::ProjectManager, AgentRole::SolutionArchitect],
            prerequisites: vec![
                "project_artifacts".to_string(),
                "documentation_requirements".to_string(),
            ],
            estimated_duration_hours: 8,
            complexity_levels: vec![Complexity::Low, Complexity::Medium, Complexity::High],
            intent_keywords: keywords(&["document", "documentation", "generate", "create", "write"]),
            entity_requirements: HashMap::new(),
            success_criteria: criteria(&[
                "Documentation generated",
                "Content reviewed",
                "Format standardized",
                "Accessibility verified",
            ]),
        },
    ]
}
