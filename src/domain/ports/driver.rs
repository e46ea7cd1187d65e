//! Agent driver port - interface for external agent backends.
//!
//! A driver is the opaque callable that executes a natural-language
//! task against some model or toolchain. The core never knows which
//! protocol backs it; it only sees the request/reply shapes below.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::DomainResult;

/// One tool invocation surfaced by a driver mid-run.
#[derive(Debug, Clone)]
pub struct ToolUse {
    pub tool_name: String,
    pub input: Value,
    pub success: bool,
    pub error: Option<String>,
}

/// Everything a driver needs to execute one task.
#[derive(Debug)]
pub struct DriverRequest {
    pub task: String,
    /// Directory the driver works in (worktree or plain workspace).
    pub workspace_dir: PathBuf,
    /// Conversation context snapshot from the session.
    pub context: Value,
    /// Cooperative cancellation; drivers should stop promptly when fired.
    pub cancel: CancellationToken,
    /// Channel for intermediate tool-use events, forwarded to the bus
    /// as they occur.
    pub tool_events: Option<mpsc::UnboundedSender<ToolUse>>,
}

impl DriverRequest {
    pub fn new(task: impl Into<String>, workspace_dir: PathBuf) -> Self {
        Self {
            task: task.into(),
            workspace_dir,
            context: Value::Null,
            cancel: CancellationToken::new(),
            tool_events: None,
        }
    }

    /// Report a tool use, ignoring a closed channel.
    pub fn report_tool_use(&self, tool_use: ToolUse) {
        if let Some(sender) = &self.tool_events {
            let _ = sender.send(tool_use);
        }
    }
}

/// Structured result of a successful driver run.
#[derive(Debug, Clone)]
pub struct DriverReply {
    pub text: String,
    pub tool_uses: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration: Duration,
    pub cost: f64,
}

impl DriverReply {
    pub fn tokens_total(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// Trait for agent driver implementations.
///
/// Errors are returned as the `Err` variant and captured into Failed
/// state by the scheduler; drivers never panic through that boundary.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// The driver kind tag recorded on instances and events.
    fn kind(&self) -> &str;

    /// Execute a task to completion.
    async fn execute(&self, request: DriverRequest) -> DomainResult<DriverReply>;

    /// Health check.
    async fn ping(&self) -> bool {
        true
    }

    /// Export conversation context for orchestrator switching.
    async fn export_context(&self) -> Value {
        Value::Null
    }

    /// Import conversation context from a previous primary driver.
    async fn import_context(&self, _context: Value) {}
}
