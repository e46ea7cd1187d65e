//! Command-line agent driver.
//!
//! Runs a configured external binary with the task appended to its
//! arguments, cwd set to the working directory, and the whole stdout
//! treated as the reply text. Token counts are estimated from byte
//! lengths when the tool does not report them; cost derives from the
//! configured per-1k-token rate.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{AgentDriver, DriverReply, DriverRequest};

/// Configuration for a command-backed driver.
#[derive(Debug, Clone)]
pub struct CommandDriverConfig {
    /// Driver kind tag recorded on instances and events.
    pub kind: String,
    /// Binary to execute.
    pub command: String,
    /// Arguments placed before the task.
    pub args: Vec<String>,
    /// USD per 1000 tokens, used to estimate cost.
    pub cost_per_1k_tokens: f64,
}

/// Driver that shells out to an agent CLI.
pub struct CommandDriver {
    config: CommandDriverConfig,
    context: RwLock<serde_json::Value>,
}

impl CommandDriver {
    pub fn new(config: CommandDriverConfig) -> Self {
        Self {
            config,
            context: RwLock::new(serde_json::Value::Null),
        }
    }

    /// Rough token estimate when the underlying tool reports none.
    fn estimate_tokens(text: &str) -> u64 {
        (text.len() as u64).div_ceil(4)
    }
}

#[async_trait]
impl AgentDriver for CommandDriver {
    fn kind(&self) -> &str {
        &self.config.kind
    }

    async fn ping(&self) -> bool {
        Command::new(&self.config.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn execute(&self, request: DriverRequest) -> DomainResult<DriverReply> {
        let started = Instant::now();

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(&request.task)
            .current_dir(&request.workspace_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %self.config.command, workdir = %request.workspace_dir.display(), "running command driver");

        let child = command
            .spawn()
            .map_err(|e| DomainError::DriverFailed(format!("failed to spawn {}: {e}", self.config.command)))?;

        // kill_on_drop tears the child down when cancellation wins.
        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| DomainError::DriverFailed(e.to_string()))?
            }
            () = request.cancel.cancelled() => {
                return Err(DomainError::DriverFailed("canceled".to_string()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::DriverFailed(format!(
                "{} exited with {}: {}",
                self.config.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let tokens_in = Self::estimate_tokens(&request.task);
        let tokens_out = Self::estimate_tokens(&text);
        let cost = (tokens_in + tokens_out) as f64 * self.config.cost_per_1k_tokens / 1000.0;

        Ok(DriverReply {
            text,
            tool_uses: 0,
            tokens_in,
            tokens_out,
            duration: started.elapsed(),
            cost,
        })
    }

    async fn export_context(&self) -> serde_json::Value {
        self.context.read().await.clone()
    }

    async fn import_context(&self, context: serde_json::Value) {
        *self.context.write().await = context;
    }
}
