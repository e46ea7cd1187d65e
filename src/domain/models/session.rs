//! Session domain model.
//!
//! A session is the per-workspace persistent conversation state: an
//! ordered sequence of turns plus running token/cost totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One role-tagged message in a session's conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    /// Which driver produced this turn (empty for user turns).
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub tokens: u64,
    pub cost: f64,
}

impl Turn {
    pub fn assistant(content: impl Into<String>, agent: impl Into<String>, tokens: u64, cost: f64) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            agent: agent.into(),
            timestamp: Utc::now(),
            tokens,
            cost,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            agent: String::new(),
            timestamp: Utc::now(),
            tokens: 0,
            cost: 0.0,
        }
    }
}

/// Persistent conversation state for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace: String,
    pub primary_driver: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub conversation: Vec<Turn>,
    /// Free-form context carried between turns.
    #[serde(default)]
    pub context: Value,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl Session {
    pub fn new(workspace: impl Into<String>, primary_driver: impl Into<String>) -> Self {
        let workspace = workspace.into();
        let now = Utc::now();
        Self {
            id: format!("{}_{}", workspace, now.format("%Y%m%d_%H%M%S")),
            workspace,
            primary_driver: primary_driver.into(),
            created_at: now,
            last_active: now,
            conversation: Vec::new(),
            context: Value::Null,
            total_tokens: 0,
            total_cost: 0.0,
        }
    }

    /// Append a turn and update running totals.
    pub fn add_turn(&mut self, turn: Turn) {
        self.total_tokens += turn.tokens;
        self.total_cost += turn.cost;
        self.last_active = Utc::now();
        self.conversation.push(turn);
    }

    /// A JSON snapshot of the most recent turns, handed to drivers and
    /// routing providers as conversation context.
    pub fn context_snapshot(&self, last_turns: usize) -> Value {
        let conversation: Vec<Value> = self
            .conversation
            .iter()
            .rev()
            .take(last_turns)
            .rev()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role,
                    "content": turn.content,
                    "agent": turn.agent,
                })
            })
            .collect();

        serde_json::json!({
            "workspace": self.workspace,
            "conversation": conversation,
            "session_context": self.context,
        })
    }
}
