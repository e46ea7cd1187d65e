//! Agent instance domain model.
//!
//! An `AgentInstance` is one scheduled execution of an agent driver,
//! tracked through a monotonic lifecycle state machine by the fleet
//! scheduler and persisted to the registry on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent instance, of the form `<driver>-<8 hex>`.
///
/// Assigned once at submission time and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Generate a fresh id for the given driver kind.
    pub fn generate(driver_kind: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", driver_kind, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an agent instance.
///
/// Transitions are monotonic along Spawning → Running → {Completed,
/// Failed}; Shutdown may be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Spawning,
    Running,
    Completed,
    Failed,
    Shutdown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Shutdown => "shutdown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spawning" => Some(Self::Spawning),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Shutdown)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a completed agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Final response text.
    pub response: String,
    /// Total tokens consumed (input + output).
    pub tokens_used: u64,
    /// Cost in USD.
    pub cost: f64,
    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
    /// Number of tool invocations during the run.
    pub tool_use_count: u32,
}

/// One spawned agent worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: AgentId,
    /// Which external driver backs this instance.
    pub driver: String,
    /// User-supplied grouping key.
    pub project: String,
    pub task: String,
    pub state: AgentState,
    /// Isolated working directory, if any.
    pub worktree_path: Option<String>,
    pub spawned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Populated iff state is Completed.
    pub result: Option<AgentResult>,
    /// Populated iff state is Failed.
    pub error: Option<String>,
}

impl AgentInstance {
    pub fn new(
        id: AgentId,
        driver: impl Into<String>,
        project: impl Into<String>,
        task: impl Into<String>,
        worktree_path: Option<String>,
    ) -> Self {
        Self {
            id,
            driver: driver.into(),
            project: project.into(),
            task: task.into(),
            state: AgentState::Spawning,
            worktree_path,
            spawned_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Transition Spawning → Running. No-op if already terminal.
    pub fn mark_running(&mut self) {
        if !self.state.is_terminal() {
            self.state = AgentState::Running;
        }
    }

    /// Transition to Completed with the driver's result.
    pub fn mark_completed(&mut self, result: AgentResult) {
        if !self.state.is_terminal() {
            self.state = AgentState::Completed;
            self.result = Some(result);
            self.completed_at = Some(Utc::now());
        }
    }

    /// Transition to Failed with the captured error string.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = AgentState::Failed;
            self.error = Some(error.into());
            self.completed_at = Some(Utc::now());
        }
    }

    /// Transition to Shutdown from any non-terminal state.
    pub fn mark_shutdown(&mut self) {
        if !self.state.is_terminal() {
            self.state = AgentState::Shutdown;
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
