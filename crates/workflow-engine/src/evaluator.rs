//! Match evaluation and ranking

use crate::template::WorkflowTemplate;
use crate::types::{
    Complexity, EvaluationContext, EvaluationInput, SkillLevel, WorkflowMatch,
};

const MIN_RELEVANCE: f64 = 0.1;

/// Scores templates against requests and ranks the resulting matches.
#[derive(Debug, Default, Clone)]
pub struct MatchEvaluator {
    _private: (),
}

impl MatchEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one template against one request. `None` when the template
    /// cannot serve the request's complexity or is simply irrelevant.
    pub fn evaluate_match(
        &self,
        template: &WorkflowTemplate,
        input: &EvaluationInput,
        context: &EvaluationContext,
    ) -> Option<WorkflowMatch> {
        if !template.supports_complexity(input.complexity) {
            return None;
        }

        let intent_score = template.matches_intent(&input.intent);
        let entity_score = template.matches_entities(&input.entities);

        let mut relevance = intent_score * 0.6 + entity_score * 0.4;
        relevance = self.apply_context_adjustments(relevance, template, context);

        if relevance < MIN_RELEVANCE {
            return None;
        }

        let confidence = self.calculate_confidence(input, intent_score, entity_score, relevance);

        Some(WorkflowMatch {
            template_id: template.id.clone(),
            relevance_score: relevance,
            confidence,
            pattern: template.pattern,
            estimated_duration_minutes: template.estimated_duration_minutes(),
            required_roles: template.required_roles.clone(),
            prerequisites: template.prerequisites.clone(),
        })
    }

    fn apply_context_adjustments(
        &self,
        base: f64,
        template: &WorkflowTemplate,
        context: &EvaluationContext,
    ) -> f64 {
        let mut score = base;

        if context.recent_templates.contains(&template.id) {
            score += 0.1;
        }
        if context.preferred_patterns.contains(&template.pattern) {
            score += 0.15;
        }
        match context.skill_level {
            Some(SkillLevel::Beginner) if template.complexity_levels == [Complexity::Low] => {
                score += 0.1;
            }
            Some(SkillLevel::Expert) if template.supports_complexity(Complexity::High) => {
                score += 0.05;
            }
            _ => {}
        }

        score.min(1.0)
    }

    fn calculate_confidence(
        &self,
        input: &EvaluationInput,
        intent_score: f64,
        entity_score: f64,
        relevance: f64,
    ) -> f64 {
        let mut confidence = relevance;
        if intent_score >= 0.8 {
            confidence += 0.1;
        }
        if entity_score >= 0.8 {
            confidence += 0.1;
        }
        if input.requirement_count >= 3 {
            confidence += 0.05;
        }
        if input.confidence < 0.7 {
            confidence -= 0.1;
        }
        confidence.clamp(0.0, 1.0)
    }

    /// Rank matches best-first. The compound score discounts relevance and
    /// confidence by duration, team size, and prerequisite count; the sort
    /// is stable, so equal scores keep their evaluation order.
    pub fn rank_matches(&self, mut matches: Vec<WorkflowMatch>) -> Vec<WorkflowMatch> {
        matches.sort_by(|a, b| {
            ranking_score(b)
                .partial_cmp(&ranking_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }
}

fn ranking_score(m: &WorkflowMatch) -> f64 {
    let base = m.relevance_score * 0.7 + m.confidence * 0.3;
    let duration_penalty = (m.estimated_duration_minutes as f64 / 1440.0).min(0.1);
    let agent_penalty = (m.required_roles.len() as f64 * 0.01).min(0.05);
    let prereq_penalty = (m.prerequisites.len() as f64 * 0.01).min(0.05);
    (base - duration_penalty - agent_penalty - prereq_penalty).max(0.0)
}
