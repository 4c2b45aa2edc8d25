//! Heuristic response quality evaluation
//!
//! Three component scores in [0, 1] - completeness, relevance, coherence -
//! combine into an overall score with fixed weights. A model that keeps
//! producing low-quality responses earns a switch recommendation.

use dashmap::DashMap;
use std::collections::VecDeque;

use crate::models::{ModelRequest, ModelResponse, QualityScore};

const COMPLETENESS_WEIGHT: f64 = 0.40;
const RELEVANCE_WEIGHT: f64 = 0.35;
const COHERENCE_WEIGHT: f64 = 0.25;

const ERROR_INDICATORS: &[&str] = &[
    "i cannot",
    "i can't",
    "unable to",
    "error",
    "sorry",
    "apologize",
    "don't have access",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "must", "can", "this",
    "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
];

pub struct ResponseEvaluator {
    quality_threshold: f64,
    evaluation_window: usize,
    history: DashMap<String, VecDeque<f64>>,
}

impl ResponseEvaluator {
    pub fn new(quality_threshold: f64, evaluation_window: usize) -> Self {
        Self {
            quality_threshold,
            evaluation_window,
            history: DashMap::new(),
        }
    }

    /// Score a response. With `skip_evaluation` set on the request, every
    /// component is 1.0 and nothing is recorded in the trend history.
    pub fn evaluate(&self, response: &ModelResponse, request: &ModelRequest) -> QualityScore {
        if request.skip_evaluation {
            return QualityScore::perfect();
        }

        let completeness = self.completeness(response);
        let relevance = self.relevance(response, request);
        let coherence = self.coherence(response);
        let overall = completeness * COMPLETENESS_WEIGHT
            + relevance * RELEVANCE_WEIGHT
            + coherence * COHERENCE_WEIGHT;

        let score = QualityScore {
            overall,
            completeness,
            relevance,
            coherence,
        };

        let mut history = self.history.entry(response.model_id.clone()).or_default();
        if history.len() == self.evaluation_window {
            history.pop_front();
        }
        history.push_back(overall);

        if overall < self.quality_threshold {
            tracing::warn!(
                model_id = %response.model_id,
                overall = overall,
                completeness = completeness,
                relevance = relevance,
                coherence = coherence,
                "low-quality response"
            );
        }
        score
    }

    fn completeness(&self, response: &ModelResponse) -> f64 {
        let content = response.content.trim();
        if content.is_empty() {
            return 0.0;
        }

        let mut score: f64 = 1.0;
        if content.len() < 50 {
            score *= 0.5;
        }

        let lower = content.to_lowercase();
        if ERROR_INDICATORS.iter().any(|phrase| lower.contains(phrase)) {
            score *= 0.6;
        }
        if content.ends_with("...") || content.ends_with('\u{2026}') {
            score *= 0.8;
        }
        score.clamp(0.0, 1.0)
    }

    fn relevance(&self, response: &ModelResponse, request: &ModelRequest) -> f64 {
        let content = response.content.trim().to_lowercase();
        let prompt = request.prompt.trim().to_lowercase();
        if content.is_empty() || prompt.is_empty() {
            return 0.0;
        }

        let key_terms: Vec<&str> = prompt
            .split_whitespace()
            .filter(|word| word.len() > 3 && !STOP_WORDS.contains(word))
            .collect();
        if key_terms.is_empty() {
            return 1.0;
        }

        let matches = key_terms
            .iter()
            .filter(|word| content.contains(*word))
            .count();
        let mut score = matches as f64 / key_terms.len() as f64;
        if content.len() > 200 {
            score = (score * 1.1).min(1.0);
        }
        score.clamp(0.0, 1.0)
    }

    fn coherence(&self, response: &ModelResponse) -> f64 {
        let content = response.content.trim();
        if content.is_empty() {
            return 0.0;
        }

        let mut score: f64 = 1.0;
        if !content.contains(['.', '!', '?']) {
            score *= 0.7;
        }

        let words: Vec<&str> = content.split_whitespace().collect();
        let lower = content.to_lowercase();
        let lower_words: Vec<&str> = lower.split_whitespace().collect();
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for word in &lower_words {
            if word.len() > 3 {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        if let Some(max_count) = counts.values().max() {
            if *max_count as f64 > words.len() as f64 * 0.2 {
                score *= 0.6;
            }
        }

        let sentences: Vec<&str> = content
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if !sentences.is_empty() {
            let avg_len = sentences
                .iter()
                .map(|s| s.split_whitespace().count())
                .sum::<usize>() as f64
                / sentences.len() as f64;
            if avg_len < 3.0 {
                score *= 0.7;
            }
            if avg_len > 50.0 {
                score *= 0.8;
            }
        }

        if content.contains("```") || content.contains("\n\n") {
            score = (score * 1.1).min(1.0);
        }
        score.clamp(0.0, 1.0)
    }

    /// A switch is recommended when three or more of the last ten scores
    /// sit below the quality threshold.
    pub fn should_switch_model(&self, model_id: &str, recent_scores: Option<&[f64]>) -> bool {
        let low_count = match recent_scores {
            Some(scores) => scores
                .iter()
                .filter(|s| **s < self.quality_threshold)
                .count(),
            None => match self.history.get(model_id) {
                Some(history) => history
                    .iter()
                    .filter(|s| **s < self.quality_threshold)
                    .count(),
                None => return false,
            },
        };

        let should_switch = low_count >= 3;
        if should_switch {
            tracing::warn!(
                model_id = model_id,
                low_quality_count = low_count,
                "model switch recommended"
            );
        }
        should_switch
    }

    pub fn quality_history(&self, model_id: &str) -> Vec<f64> {
        self.history
            .get(model_id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, model_id: Option<&str>) {
        match model_id {
            Some(id) => {
                self.history.remove(id);
            }
            None => self.history.clear(),
        }
    }
}
