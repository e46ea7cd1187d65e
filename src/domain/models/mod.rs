//! Domain models for the hivemind orchestration system.

pub mod agent;
pub mod config;
pub mod event;
pub mod routing;
pub mod session;
pub mod worktree;

pub use agent::{AgentId, AgentInstance, AgentResult, AgentState};
pub use config::{
    Config, DatabaseConfig, DriverSettings, LogConfig, LogFormat, OrchestratorSettings,
    ServerConfig, SessionConfig, WorktreeSettings,
};
pub use event::{
    AgentEventBody, Event, EventKind, EventPayload, SessionEventBody, ToolEventBody,
    WorktreeEventBody,
};
pub use routing::{RoutingPlan, TaskIntent};
pub use session::{Session, Turn};
pub use worktree::{Worktree, WorktreeListEntry};
