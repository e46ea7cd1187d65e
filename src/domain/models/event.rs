//! Observability event model.
//!
//! Every lifecycle occurrence in the system is recorded as an immutable
//! `Event`: a fixed kind, a wall-clock timestamp, the project grouping
//! key, a kind-specific payload, and an open metadata map kept as JSON
//! for forward compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The fixed set of observable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentSpawned,
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    ToolUsed,
    WorktreeCreated,
    WorktreeRemoved,
    SessionUpdated,
}

impl EventKind {
    /// All kinds, in declaration order. Used to register catch-all
    /// subscribers.
    pub const ALL: [EventKind; 8] = [
        Self::AgentSpawned,
        Self::AgentStarted,
        Self::AgentCompleted,
        Self::AgentFailed,
        Self::ToolUsed,
        Self::WorktreeCreated,
        Self::WorktreeRemoved,
        Self::SessionUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentSpawned => "agent_spawned",
            Self::AgentStarted => "agent_started",
            Self::AgentCompleted => "agent_completed",
            Self::AgentFailed => "agent_failed",
            Self::ToolUsed => "tool_used",
            Self::WorktreeCreated => "worktree_created",
            Self::WorktreeRemoved => "worktree_removed",
            Self::SessionUpdated => "session_updated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "agent_spawned" => Some(Self::AgentSpawned),
            "agent_started" => Some(Self::AgentStarted),
            "agent_completed" => Some(Self::AgentCompleted),
            "agent_failed" => Some(Self::AgentFailed),
            "tool_used" => Some(Self::ToolUsed),
            "worktree_created" => Some(Self::WorktreeCreated),
            "worktree_removed" => Some(Self::WorktreeRemoved),
            "session_updated" => Some(Self::SessionUpdated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agent lifecycle event fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventBody {
    pub agent_id: String,
    pub driver: String,
    pub task: String,
    pub workspace_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tool usage event fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEventBody {
    pub agent_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Worktree lifecycle event fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeEventBody {
    pub agent_id: String,
    pub worktree_path: String,
    pub repo_path: String,
    pub branch: String,
}

/// Session update event fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventBody {
    pub workspace: String,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub conversation_turns: u64,
}

/// Kind-specific event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Agent(AgentEventBody),
    Tool(ToolEventBody),
    Worktree(WorktreeEventBody),
    Session(SessionEventBody),
}

/// Immutable record of a lifecycle occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub payload: EventPayload,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Event {
    fn agent_event(kind: EventKind, project: &str, body: AgentEventBody) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            project: project.to_string(),
            payload: EventPayload::Agent(body),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn agent_spawned(
        agent_id: &str,
        driver: &str,
        task: &str,
        workspace_path: &str,
        project: &str,
    ) -> Self {
        Self::agent_event(
            EventKind::AgentSpawned,
            project,
            AgentEventBody {
                agent_id: agent_id.to_string(),
                driver: driver.to_string(),
                task: task.to_string(),
                workspace_path: workspace_path.to_string(),
                tokens_used: None,
                cost: None,
                duration_seconds: None,
                response: None,
                error: None,
            },
        )
    }

    pub fn agent_started(
        agent_id: &str,
        driver: &str,
        task: &str,
        workspace_path: &str,
        project: &str,
    ) -> Self {
        let mut event = Self::agent_spawned(agent_id, driver, task, workspace_path, project);
        event.kind = EventKind::AgentStarted;
        event
    }

    #[allow(clippy::too_many_arguments)]
    pub fn agent_completed(
        agent_id: &str,
        driver: &str,
        task: &str,
        workspace_path: &str,
        project: &str,
        tokens_used: u64,
        cost: f64,
        duration_seconds: f64,
        response: &str,
    ) -> Self {
        Self::agent_event(
            EventKind::AgentCompleted,
            project,
            AgentEventBody {
                agent_id: agent_id.to_string(),
                driver: driver.to_string(),
                task: task.to_string(),
                workspace_path: workspace_path.to_string(),
                tokens_used: Some(tokens_used),
                cost: Some(cost),
                duration_seconds: Some(duration_seconds),
                response: Some(response.to_string()),
                error: None,
            },
        )
    }

    pub fn agent_failed(
        agent_id: &str,
        driver: &str,
        task: &str,
        workspace_path: &str,
        project: &str,
        error: &str,
    ) -> Self {
        Self::agent_event(
            EventKind::AgentFailed,
            project,
            AgentEventBody {
                agent_id: agent_id.to_string(),
                driver: driver.to_string(),
                task: task.to_string(),
                workspace_path: workspace_path.to_string(),
                tokens_used: None,
                cost: None,
                duration_seconds: None,
                response: None,
                error: Some(error.to_string()),
            },
        )
    }

    pub fn tool_used(
        agent_id: &str,
        tool_name: &str,
        tool_input: Value,
        success: bool,
        error: Option<String>,
        project: &str,
    ) -> Self {
        Self {
            kind: EventKind::ToolUsed,
            timestamp: Utc::now(),
            project: project.to_string(),
            payload: EventPayload::Tool(ToolEventBody {
                agent_id: agent_id.to_string(),
                tool_name: tool_name.to_string(),
                tool_input,
                success,
                error,
            }),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn worktree_created(
        agent_id: &str,
        worktree_path: &str,
        repo_path: &str,
        branch: &str,
        project: &str,
    ) -> Self {
        Self {
            kind: EventKind::WorktreeCreated,
            timestamp: Utc::now(),
            project: project.to_string(),
            payload: EventPayload::Worktree(WorktreeEventBody {
                agent_id: agent_id.to_string(),
                worktree_path: worktree_path.to_string(),
                repo_path: repo_path.to_string(),
                branch: branch.to_string(),
            }),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn worktree_removed(
        agent_id: &str,
        worktree_path: &str,
        repo_path: &str,
        branch: &str,
        project: &str,
    ) -> Self {
        let mut event = Self::worktree_created(agent_id, worktree_path, repo_path, branch, project);
        event.kind = EventKind::WorktreeRemoved;
        event
    }

    pub fn session_updated(
        workspace: &str,
        total_tokens: u64,
        total_cost: f64,
        conversation_turns: u64,
        project: &str,
    ) -> Self {
        Self {
            kind: EventKind::SessionUpdated,
            timestamp: Utc::now(),
            project: project.to_string(),
            payload: EventPayload::Session(SessionEventBody {
                workspace: workspace.to_string(),
                total_tokens,
                total_cost,
                conversation_turns,
            }),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The agent this event concerns, when it has one.
    pub fn agent_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Agent(body) => Some(&body.agent_id),
            EventPayload::Tool(body) => Some(&body.agent_id),
            EventPayload::Worktree(body) => Some(&body.agent_id),
            EventPayload::Session(_) => None,
        }
    }
}
