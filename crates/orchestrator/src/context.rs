//! Conversation context and its bounded store
//!
//! One context per conversation, touched on every interaction. The store
//! evicts by last-interaction age first and then trims the oldest
//! conversations when over capacity.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const CLARIFICATION_ATTEMPTS_KEY: &str = "clarification_attempts";
const ACCUMULATED_KEYWORDS_KEY: &str = "accumulated_keywords";
const MAX_ACCUMULATED_KEYWORDS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub user_id: String,
    pub session_start: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    pub interaction_count: u32,
    pub context_data: HashMap<String, serde_json::Value>,
    pub preferences: HashMap<String, String>,
}

impl ConversationContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_start: now,
            last_interaction: now,
            interaction_count: 0,
            context_data: HashMap::new(),
            preferences: HashMap::new(),
        }
    }

    pub fn update_interaction(&mut self) {
        self.interaction_count += 1;
        self.last_interaction = Utc::now();
    }

    pub fn add_context(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context_data.insert(key.into(), value);
    }

    pub fn clarification_attempts(&self) -> u32 {
        self.context_data
            .get(CLARIFICATION_ATTEMPTS_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }

    pub fn record_clarification_attempt(&mut self) {
        let attempts = self.clarification_attempts() + 1;
        self.add_context(CLARIFICATION_ATTEMPTS_KEY, serde_json::json!(attempts));
    }

    /// Keep the most recent keywords, capped so long conversations do not
    /// grow without bound.
    pub fn accumulate_keywords(&mut self, new_keywords: &[String]) {
        let mut all: Vec<String> = self
            .context_data
            .get(ACCUMULATED_KEYWORDS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        all.extend(new_keywords.iter().cloned());
        if all.len() > MAX_ACCUMULATED_KEYWORDS {
            all.drain(..all.len() - MAX_ACCUMULATED_KEYWORDS);
        }
        self.add_context(ACCUMULATED_KEYWORDS_KEY, serde_json::json!(all));
    }

    pub fn accumulated_keywords(&self) -> Vec<String> {
        self.context_data
            .get(ACCUMULATED_KEYWORDS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

pub struct ContextStore {
    contexts: RwLock<HashMap<String, ConversationContext>>,
    max_contexts: usize,
    ttl: Duration,
}

impl ContextStore {
    pub fn new(max_contexts: usize, ttl_hours: u32) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            max_contexts,
            ttl: Duration::hours(i64::from(ttl_hours)),
        }
    }

    pub fn store(&self, context: ConversationContext) {
        let mut contexts = self.contexts.write();
        contexts.insert(context.conversation_id.clone(), context);
        self.evict_locked(&mut contexts);
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationContext> {
        self.contexts.read().get(conversation_id).cloned()
    }

    /// Apply `update` to a stored context in place.
    pub fn update<F>(&self, conversation_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut ConversationContext),
    {
        let mut contexts = self.contexts.write();
        match contexts.get_mut(conversation_id) {
            Some(context) => {
                update(context);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }

    fn evict_locked(&self, contexts: &mut HashMap<String, ConversationContext>) {
        let cutoff = Utc::now() - self.ttl;
        contexts.retain(|_, context| context.last_interaction >= cutoff);

        if contexts.len() > self.max_contexts {
            let mut by_age: Vec<(String, DateTime<Utc>)> = contexts
                .iter()
                .map(|(id, context)| (id.clone(), context.last_interaction))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);

            let excess = contexts.len() - self.max_contexts;
            for (id, _) in by_age.into_iter().take(excess) {
                contexts.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactions_touch_the_context() {
        let mut context = ConversationContext::new("user-1");
        assert_eq!(context.interaction_count, 0);
        context.update_interaction();
        context.update_interaction();
        assert_eq!(context.interaction_count, 2);
    }

    #[test]
    fn clarification_attempts_count_up() {
        let mut context = ConversationContext::new("user-1");
        assert_eq!(context.clarification_attempts(), 0);
        context.record_clarification_attempt();
        context.record_clarification_attempt();
        assert_eq!(context.clarification_attempts(), 2);
    }

    #[test]
    fn keywords_are_capped_at_fifty() {
        let mut context = ConversationContext::new("user-1");
        let first: Vec<String> = (0..40).map(|i| format!("kw{i}")).collect();
        let second: Vec<String> = (40..70).map(|i| format!("kw{i}")).collect();
        context.accumulate_keywords(&first);
        context.accumulate_keywords(&second);

        let kept = context.accumulated_keywords();
        assert_eq!(kept.len(), 50);
        assert_eq!(kept[0], "kw20");
        assert_eq!(kept[49], "kw69");
    }

    #[test]
    fn store_evicts_oldest_beyond_capacity() {
        let store = ContextStore::new(2, 24);
        let mut a = ConversationContext::new("u");
        a.conversation_id = "a".to_string();
        a.last_interaction = Utc::now() - Duration::minutes(30);
        let mut b = ConversationContext::new("u");
        b.conversation_id = "b".to_string();
        b.last_interaction = Utc::now() - Duration::minutes(20);
        let mut c = ConversationContext::new("u");
        c.conversation_id = "c".to_string();

        store.store(a);
        store.store(b);
        store.store(c);

        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn store_evicts_expired_contexts() {
        let store = ContextStore::new(10, 1);
        let mut stale = ConversationContext::new("u");
        stale.conversation_id = "stale".to_string();
        stale.last_interaction = Utc::now() - Duration::hours(2);
        store.store(stale);

        // Any store triggers the sweep.
        store.store(ConversationContext::new("u"));
        assert!(store.get("stale").is_none());
    }

    #[test]
    fn update_mutates_in_place() {
        let store = ContextStore::new(10, 24);
        let context = ConversationContext::new("u");
        let id = context.conversation_id.clone();
        store.store(context);

        assert!(store.update(&id, |c| c.update_interaction()));
        assert_eq!(store.get(&id).unwrap().interaction_count, 1);
        assert!(!store.update("missing", |_| {}));
    }
}
