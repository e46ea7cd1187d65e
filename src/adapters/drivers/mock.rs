//! Mock agent driver for testing.
//!
//! Responds with scripted replies: configurable text, token counts,
//! cost, delay, tool-use events, deliberate failures, and an optional
//! file write into the working directory (to exercise worktree
//! isolation).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{AgentDriver, DriverReply, DriverRequest, ToolUse};

/// One scripted response.
#[derive(Debug, Clone)]
pub struct MockScript {
    pub response: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub delay: Duration,
    pub fail: bool,
    pub error_message: Option<String>,
    /// Tool uses reported through the request channel before replying.
    pub tool_uses: Vec<(String, Value)>,
    /// Relative path and contents written into the workspace dir.
    pub write_file: Option<(String, String)>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            response: "Mock task completed successfully.".to_string(),
            tokens_in: 100,
            tokens_out: 50,
            cost: 0.0005,
            delay: Duration::ZERO,
            fail: false,
            error_message: None,
            tool_uses: Vec::new(),
            write_file: None,
        }
    }
}

impl MockScript {
    pub fn success(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_tool_use(mut self, tool_name: impl Into<String>, input: Value) -> Self {
        self.tool_uses.push((tool_name.into(), input));
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.write_file = Some((path.into(), contents.into()));
        self
    }
}

/// Scripted driver: pops per-call scripts in order, falling back to a
/// default response when the queue is empty.
pub struct MockDriver {
    kind: String,
    default_script: MockScript,
    scripts: StdMutex<VecDeque<MockScript>>,
    calls: AtomicUsize,
    context: RwLock<Value>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            kind: "mock".to_string(),
            default_script: MockScript::default(),
            scripts: StdMutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            context: RwLock::new(Value::Null),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_default(mut self, script: MockScript) -> Self {
        self.default_script = script;
        self
    }

    /// Queue a script for the next unconsumed call.
    pub fn push_script(&self, script: MockScript) {
        self.scripts
            .lock()
            .expect("mock script queue poisoned")
            .push_back(script);
    }

    /// How many times `execute` has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> MockScript {
        self.scripts
            .lock()
            .expect("mock script queue poisoned")
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentDriver for MockDriver {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, request: DriverRequest) -> DomainResult<DriverReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.next_script();
        let started = Instant::now();

        if !script.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(script.delay) => {}
                () = request.cancel.cancelled() => {
                    return Err(DomainError::DriverFailed("canceled".to_string()));
                }
            }
        }

        for (tool_name, input) in &script.tool_uses {
            request.report_tool_use(ToolUse {
                tool_name: tool_name.clone(),
                input: input.clone(),
                success: true,
                error: None,
            });
        }

        if let Some((path, contents)) = &script.write_file {
            tokio::fs::write(request.workspace_dir.join(path), contents)
                .await
                .map_err(|e| DomainError::DriverFailed(e.to_string()))?;
        }

        if script.fail {
            return Err(DomainError::DriverFailed(
                script
                    .error_message
                    .unwrap_or_else(|| "mock failure".to_string()),
            ));
        }

        Ok(DriverReply {
            text: script.response,
            tool_uses: script.tool_uses.len() as u32,
            tokens_in: script.tokens_in,
            tokens_out: script.tokens_out,
            duration: started.elapsed(),
            cost: script.cost,
        })
    }

    async fn export_context(&self) -> Value {
        self.context.read().await.clone()
    }

    async fn import_context(&self, context: Value) {
        *self.context.write().await = context;
    }
}
