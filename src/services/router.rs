//! Keyword-based routing provider.
//!
//! The default routing heuristic: classifies task intent from keyword
//! tables and recommends a driver per intent. Deterministic, so tests
//! can rely on it; a model-backed provider can replace it behind the
//! same trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RoutingPlan, TaskIntent};
use crate::domain::ports::RoutingProvider;

/// Keywords per intent, checked in priority order (more specific
/// intents first).
const INTENT_RULES: &[(TaskIntent, &[&str])] = &[
    (
        TaskIntent::Code,
        &["code", "program", "function", "debug", "refactor", "implement"],
    ),
    (
        TaskIntent::Terminal,
        &["terminal", "command", "shell", "bash", "run"],
    ),
    (
        TaskIntent::Research,
        &["research", "find", "search", "learn", "discover"],
    ),
    (
        TaskIntent::Creative,
        &["create", "imagine", "brainstorm", "design", "generate"],
    ),
    (
        TaskIntent::Analysis,
        &["analyze", "explain", "why does", "how does", "how can", "understand"],
    ),
];

/// Phrases that suggest the user wants several independent attempts.
const MULTI_HINTS: &[&str] = &[
    "compare",
    "side by side",
    "alternatives",
    "different approaches",
    "multiple versions",
];

/// Rule-based router selecting drivers by task keywords.
pub struct KeywordRouter {
    default_driver: String,
    preferences: HashMap<TaskIntent, String>,
}

impl KeywordRouter {
    pub fn new(default_driver: impl Into<String>) -> Self {
        Self {
            default_driver: default_driver.into(),
            preferences: HashMap::new(),
        }
    }

    /// Prefer a specific driver for one intent.
    pub fn with_preference(mut self, intent: TaskIntent, driver: impl Into<String>) -> Self {
        self.preferences.insert(intent, driver.into());
        self
    }

    /// Classify task intent from keywords; `General` when nothing
    /// matches.
    pub fn classify_intent(&self, task: &str) -> TaskIntent {
        let task_lower = task.to_lowercase();
        for (intent, keywords) in INTENT_RULES {
            if keywords.iter().any(|kw| task_lower.contains(kw)) {
                return *intent;
            }
        }
        TaskIntent::General
    }

    fn preferred_driver(&self, intent: TaskIntent, available: &[String]) -> String {
        let preferred = self
            .preferences
            .get(&intent)
            .unwrap_or(&self.default_driver);
        if available.is_empty() || available.iter().any(|d| d == preferred) {
            return preferred.clone();
        }
        available[0].clone()
    }
}

#[async_trait]
impl RoutingProvider for KeywordRouter {
    async fn plan(
        &self,
        task: &str,
        available_drivers: &[String],
        _context: &Value,
    ) -> DomainResult<RoutingPlan> {
        let intent = self.classify_intent(task);
        let task_lower = task.to_lowercase();
        let requires_multiple = MULTI_HINTS.iter().any(|hint| task_lower.contains(hint));

        let word_count = task.split_whitespace().count() as u64;
        let complexity = (word_count as f64 / 50.0).min(1.0);
        let driver = self.preferred_driver(intent, available_drivers);

        let recommended_agents = if requires_multiple {
            vec![driver.clone(), driver]
        } else {
            vec![driver]
        };

        Ok(RoutingPlan {
            intent,
            complexity,
            requires_multiple,
            recommended_agents,
            parallel: requires_multiple,
            estimated_tokens: word_count * 4,
        })
    }
}
