//! Fleet scheduler: bounded-concurrency agent worker pool.
//!
//! Admits up to `max_concurrent` workers at once and queues the
//! overflow in FIFO order. Every instance is persisted to the registry
//! on each state change (write-before-emit), and every lifecycle
//! transition is emitted through the event bus as
//! `spawned → started → (tool_used*) → (completed|failed)`.
//!
//! Completion is signalled per id through `tokio::sync::Notify`, so
//! waiters park instead of polling; multiple waiters on the same id
//! all observe the same terminal outcome.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{AgentId, AgentInstance, AgentResult, AgentState, Event};
use crate::domain::ports::{AgentDriver, AgentRegistry, DriverRequest, ProjectTotals, ToolUse};
use crate::services::event_bus::EventBus;

/// Error type for fleet operations.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Agent {id} failed: {error}")]
    AgentFailed { id: AgentId, error: String },

    #[error("Timed out waiting for agent {0}")]
    WaitTimeout(AgentId),

    #[error("Agent {0} was shut down")]
    ShutDown(AgentId),

    #[error("Registry error: {0}")]
    Registry(#[from] DomainError),
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Hard ceiling on simultaneously admitted workers.
    pub max_concurrent: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

/// One unit of work handed to the scheduler.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Pre-assigned id; generated from the driver kind when absent.
    pub agent_id: Option<AgentId>,
    pub task: String,
    pub project: String,
    /// Directory the driver runs in (worktree or plain workspace).
    pub workdir: PathBuf,
    /// Recorded on the instance when the workdir is an isolated
    /// worktree.
    pub worktree_path: Option<String>,
    /// Conversation context snapshot passed through to the driver.
    pub context: Value,
}

impl Submission {
    pub fn new(task: impl Into<String>, project: impl Into<String>, workdir: PathBuf) -> Self {
        Self {
            agent_id: None,
            task: task.into(),
            project: project.into(),
            workdir,
            worktree_path: None,
            context: Value::Null,
        }
    }

    pub fn with_agent_id(mut self, id: AgentId) -> Self {
        self.agent_id = Some(id);
        self
    }

    pub fn with_worktree_path(mut self, path: impl Into<String>) -> Self {
        self.worktree_path = Some(path.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Outcome of `submit`: the id is observable either way, so queued
/// work stays traceable and waitable.
#[derive(Debug, Clone)]
pub enum Submitted {
    /// A worker was launched immediately.
    Admitted(AgentId),
    /// Capacity was exhausted; the submission waits in FIFO order.
    Queued(AgentId),
}

impl Submitted {
    pub fn id(&self) -> &AgentId {
        match self {
            Self::Admitted(id) | Self::Queued(id) => id,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

struct Entry {
    instance: AgentInstance,
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

struct QueuedSubmission {
    id: AgentId,
    driver: Arc<dyn AgentDriver>,
    submission: Submission,
}

#[derive(Default)]
struct FleetState {
    active: HashMap<AgentId, Entry>,
    queue: VecDeque<QueuedSubmission>,
    /// Workers currently admitted. Guarded together with the queue so
    /// two simultaneous completions cannot admit the same entry twice.
    admitted: usize,
}

enum WaitProbe {
    Done(AgentResult),
    Pending(Arc<Notify>),
}

/// Bounded-concurrency scheduler for agent workers.
#[derive(Clone)]
pub struct FleetScheduler {
    state: Arc<Mutex<FleetState>>,
    registry: Arc<dyn AgentRegistry>,
    bus: Arc<EventBus>,
    config: FleetConfig,
}

impl FleetScheduler {
    pub fn new(registry: Arc<dyn AgentRegistry>, bus: Arc<EventBus>, config: FleetConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(FleetState::default())),
            registry,
            bus,
            config,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Submit a task for execution. Records a Spawning instance,
    /// persists it, and emits AgentSpawned; launches a worker when
    /// under the concurrency ceiling, otherwise queues.
    ///
    /// Registry failures are fatal and surface to the caller.
    pub async fn submit(
        &self,
        driver: Arc<dyn AgentDriver>,
        submission: Submission,
    ) -> Result<Submitted, FleetError> {
        let id = submission
            .agent_id
            .clone()
            .unwrap_or_else(|| AgentId::generate(driver.kind()));

        let instance = AgentInstance::new(
            id.clone(),
            driver.kind(),
            &submission.project,
            &submission.task,
            submission.worktree_path.clone(),
        );
        self.registry.save(&instance).await?;

        // Emit before the entry becomes poppable from the queue, so
        // AgentSpawned always precedes AgentStarted in the log even
        // when a finishing worker admits this submission immediately.
        self.bus
            .emit(&Event::agent_spawned(
                id.as_str(),
                driver.kind(),
                &submission.task,
                &submission.workdir.to_string_lossy(),
                &submission.project,
            ))
            .await;

        let to_run = {
            let mut state = self.state.lock().await;
            state.active.insert(
                id.clone(),
                Entry {
                    instance,
                    notify: Arc::new(Notify::new()),
                    cancel: CancellationToken::new(),
                },
            );
            if state.admitted < self.config.max_concurrent {
                state.admitted += 1;
                Some((driver, submission))
            } else {
                state.queue.push_back(QueuedSubmission {
                    id: id.clone(),
                    driver,
                    submission,
                });
                None
            }
        };

        match to_run {
            Some((driver, submission)) => {
                info!(agent_id = %id, project = %submission.project, "spawned agent");
                self.spawn_worker(id.clone(), driver, submission);
                Ok(Submitted::Admitted(id))
            }
            None => {
                info!(agent_id = %id, max = self.config.max_concurrent, "concurrency ceiling reached, queued submission");
                Ok(Submitted::Queued(id))
            }
        }
    }

    /// Read-only snapshot of an instance.
    pub async fn status(&self, id: &AgentId) -> Result<AgentInstance, FleetError> {
        let state = self.state.lock().await;
        state
            .active
            .get(id)
            .map(|entry| entry.instance.clone())
            .ok_or_else(|| FleetError::UnknownAgent(id.clone()))
    }

    /// Snapshot of all instances not yet swept by `cleanup_completed`.
    pub async fn list_active(&self) -> Vec<AgentInstance> {
        let state = self.state.lock().await;
        state.active.values().map(|e| e.instance.clone()).collect()
    }

    pub async fn list_by_project(&self, project: &str) -> Vec<AgentInstance> {
        let state = self.state.lock().await;
        state
            .active
            .values()
            .filter(|e| e.instance.project == project)
            .map(|e| e.instance.clone())
            .collect()
    }

    /// Number of instances currently in the Running state.
    pub async fn running_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .active
            .values()
            .filter(|e| e.instance.state == AgentState::Running)
            .count()
    }

    pub async fn queue_size(&self) -> usize {
        let state = self.state.lock().await;
        state.queue.len()
    }

    /// Block until the instance reaches a terminal state or the
    /// timeout elapses. Timing out never changes the instance's state;
    /// a later `wait` on the same id still observes the result.
    pub async fn wait(
        &self,
        id: &AgentId,
        timeout: Option<Duration>,
    ) -> Result<AgentResult, FleetError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let notify = match self.probe(id).await? {
                WaitProbe::Done(result) => return Ok(result),
                WaitProbe::Pending(notify) => notify,
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Re-check after arming: a notification between the probe
            // and enable() would otherwise be lost.
            if let WaitProbe::Done(result) = self.probe(id).await? {
                return Ok(result);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(FleetError::WaitTimeout(id.clone()));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Best-effort wait on the current snapshot of active ids.
    pub async fn wait_all(
        &self,
        timeout: Option<Duration>,
    ) -> HashMap<AgentId, Result<AgentResult, FleetError>> {
        let ids: Vec<AgentId> = {
            let state = self.state.lock().await;
            state.active.keys().cloned().collect()
        };

        let mut results = HashMap::new();
        for id in ids {
            let outcome = self.wait(&id, timeout).await;
            if let Err(error) = &outcome {
                debug!(agent_id = %id, %error, "wait_all: agent did not complete cleanly");
            }
            results.insert(id, outcome);
        }
        results
    }

    /// Drop terminal instances from the active map. They remain in the
    /// registry and the event log.
    pub async fn cleanup_completed(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.active.len();
        state.active.retain(|_, entry| !entry.instance.is_terminal());
        let removed = before - state.active.len();
        if removed > 0 {
            debug!(count = removed, "cleaned up completed agents");
        }
        removed
    }

    /// Mark an instance Shutdown and fire its cancellation token. The
    /// driver may stop; either way its result is no longer observable
    /// as Completed and no further lifecycle events are emitted.
    pub async fn shutdown(&self, id: &AgentId) -> Result<(), FleetError> {
        let handles = {
            let mut state = self.state.lock().await;
            let entry = state
                .active
                .get_mut(id)
                .ok_or_else(|| FleetError::UnknownAgent(id.clone()))?;
            if entry.instance.is_terminal() {
                None
            } else {
                entry.instance.mark_shutdown();
                Some((
                    entry.instance.clone(),
                    entry.cancel.clone(),
                    entry.notify.clone(),
                ))
            }
        };

        if let Some((instance, cancel, notify)) = handles {
            self.registry.save(&instance).await?;
            cancel.cancel();
            notify.notify_waiters();
            info!(agent_id = %id, "shut down agent");
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) -> Result<(), FleetError> {
        let ids: Vec<AgentId> = {
            let state = self.state.lock().await;
            state.active.keys().cloned().collect()
        };
        for id in ids {
            match self.shutdown(&id).await {
                Ok(()) | Err(FleetError::UnknownAgent(_)) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Aggregate registry statistics for a project.
    pub async fn project_stats(&self, project: &str) -> Result<ProjectTotals, FleetError> {
        Ok(self.registry.project_totals(project).await?)
    }

    async fn probe(&self, id: &AgentId) -> Result<WaitProbe, FleetError> {
        let state = self.state.lock().await;
        let entry = state
            .active
            .get(id)
            .ok_or_else(|| FleetError::UnknownAgent(id.clone()))?;

        match entry.instance.state {
            AgentState::Completed => match entry.instance.result.clone() {
                Some(result) => Ok(WaitProbe::Done(result)),
                None => Err(FleetError::AgentFailed {
                    id: id.clone(),
                    error: "completed without a result".to_string(),
                }),
            },
            AgentState::Failed => Err(FleetError::AgentFailed {
                id: id.clone(),
                error: entry.instance.error.clone().unwrap_or_default(),
            }),
            AgentState::Shutdown => Err(FleetError::ShutDown(id.clone())),
            AgentState::Spawning | AgentState::Running => {
                Ok(WaitProbe::Pending(entry.notify.clone()))
            }
        }
    }

    fn spawn_worker(&self, id: AgentId, driver: Arc<dyn AgentDriver>, submission: Submission) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_worker(id, driver, submission).await;
        });
    }

    async fn run_worker(&self, id: AgentId, driver: Arc<dyn AgentDriver>, submission: Submission) {
        let workspace = submission.workdir.to_string_lossy().to_string();

        // Transition to Running, unless shut down while queued.
        let handles = {
            let mut state = self.state.lock().await;
            match state.active.get_mut(&id) {
                Some(entry) if entry.instance.state == AgentState::Spawning => {
                    entry.instance.mark_running();
                    Some((
                        entry.instance.clone(),
                        entry.cancel.clone(),
                        entry.notify.clone(),
                    ))
                }
                _ => None,
            }
        };
        let Some((instance, cancel, notify)) = handles else {
            debug!(agent_id = %id, "agent no longer runnable, releasing slot");
            self.admit_next().await;
            return;
        };

        if let Err(error) = self.registry.save(&instance).await {
            error!(agent_id = %id, %error, "failed to persist running state");
            self.record_failure(&id, &submission, &workspace, format!("registry error: {error}"))
                .await;
            notify.notify_waiters();
            self.admit_next().await;
            return;
        }

        self.bus
            .emit(&Event::agent_started(
                id.as_str(),
                driver.kind(),
                &submission.task,
                &workspace,
                &submission.project,
            ))
            .await;

        // Forward intermediate tool-use events as they occur.
        let (tool_tx, mut tool_rx) = mpsc::unbounded_channel::<ToolUse>();
        let forwarder = {
            let bus = self.bus.clone();
            let agent = id.to_string();
            let project = submission.project.clone();
            tokio::spawn(async move {
                while let Some(tool_use) = tool_rx.recv().await {
                    bus.emit(&Event::tool_used(
                        &agent,
                        &tool_use.tool_name,
                        tool_use.input,
                        tool_use.success,
                        tool_use.error,
                        &project,
                    ))
                    .await;
                }
            })
        };

        let request = DriverRequest {
            task: submission.task.clone(),
            workspace_dir: submission.workdir.clone(),
            context: submission.context.clone(),
            cancel,
            tool_events: Some(tool_tx),
        };

        let outcome = driver.execute(request).await;
        // All senders are dropped once the driver returns; drain the
        // forwarder so ToolUsed events precede the terminal event.
        let _ = forwarder.await;

        match outcome {
            Ok(reply) => {
                let result = AgentResult {
                    response: reply.text.clone(),
                    tokens_used: reply.tokens_total(),
                    cost: reply.cost,
                    duration_seconds: reply.duration.as_secs_f64(),
                    tool_use_count: reply.tool_uses,
                };

                let completed = {
                    let mut state = self.state.lock().await;
                    match state.active.get_mut(&id) {
                        Some(entry) if !entry.instance.is_terminal() => {
                            entry.instance.mark_completed(result.clone());
                            Some(entry.instance.clone())
                        }
                        _ => None,
                    }
                };

                match completed {
                    Some(instance) => {
                        if let Err(error) = self.registry.save(&instance).await {
                            error!(agent_id = %id, %error, "failed to persist completed state");
                        }
                        self.bus
                            .emit(&Event::agent_completed(
                                id.as_str(),
                                driver.kind(),
                                &submission.task,
                                &workspace,
                                &submission.project,
                                result.tokens_used,
                                result.cost,
                                result.duration_seconds,
                                &result.response,
                            ))
                            .await;
                        info!(
                            agent_id = %id,
                            tokens = result.tokens_used,
                            cost = result.cost,
                            "agent completed"
                        );
                    }
                    None => {
                        debug!(agent_id = %id, "agent was shut down, discarding driver result");
                    }
                }
            }
            Err(error) => {
                self.record_failure(&id, &submission, &workspace, error.to_string())
                    .await;
                warn!(agent_id = %id, %error, "agent failed");
            }
        }

        notify.notify_waiters();
        self.admit_next().await;
    }

    async fn record_failure(
        &self,
        id: &AgentId,
        submission: &Submission,
        workspace: &str,
        error: String,
    ) {
        let failed = {
            let mut state = self.state.lock().await;
            match state.active.get_mut(id) {
                Some(entry) if !entry.instance.is_terminal() => {
                    entry.instance.mark_failed(error.clone());
                    Some(entry.instance.clone())
                }
                _ => None,
            }
        };

        if let Some(instance) = failed {
            if let Err(save_error) = self.registry.save(&instance).await {
                error!(agent_id = %id, %save_error, "failed to persist failed state");
            }
            self.bus
                .emit(&Event::agent_failed(
                    id.as_str(),
                    &instance.driver,
                    &submission.task,
                    workspace,
                    &submission.project,
                    &error,
                ))
                .await;
        }
    }

    /// Release this worker's slot and admit the next queued
    /// submission, if any, under the same lock.
    async fn admit_next(&self) {
        let next = {
            let mut state = self.state.lock().await;
            state.admitted = state.admitted.saturating_sub(1);
            if state.admitted < self.config.max_concurrent {
                if let Some(queued) = state.queue.pop_front() {
                    state.admitted += 1;
                    Some(queued)
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(QueuedSubmission { id, driver, submission }) = next {
            debug!(agent_id = %id, "admitting queued submission");
            self.spawn_worker(id, driver, submission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::drivers::{MockDriver, MockScript};
    use crate::domain::errors::DomainResult;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct MemoryRegistry {
        rows: StdMutex<HashMap<AgentId, AgentInstance>>,
    }

    impl MemoryRegistry {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                rows: StdMutex::new(HashMap::new()),
            })
        }

        fn state_of(&self, id: &AgentId) -> Option<AgentState> {
            self.rows.lock().unwrap().get(id).map(|i| i.state)
        }
    }

    #[async_trait]
    impl AgentRegistry for MemoryRegistry {
        async fn save(&self, instance: &AgentInstance) -> DomainResult<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(instance.id.clone(), instance.clone());
            Ok(())
        }

        async fn get(&self, id: &AgentId) -> DomainResult<Option<AgentInstance>> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }

        async fn list_by_project(&self, project: &str) -> DomainResult<Vec<AgentInstance>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|i| i.project == project)
                .cloned()
                .collect())
        }

        async fn project_totals(&self, project: &str) -> DomainResult<ProjectTotals> {
            let rows = self.rows.lock().unwrap();
            let mut totals = ProjectTotals::default();
            for instance in rows.values().filter(|i| i.project == project) {
                totals.total_agents += 1;
                match instance.state {
                    AgentState::Completed => totals.completed += 1,
                    AgentState::Failed => totals.failed += 1,
                    _ => {}
                }
                if let Some(result) = &instance.result {
                    totals.total_tokens += result.tokens_used;
                    totals.total_cost += result.cost;
                }
            }
            Ok(totals)
        }
    }

    fn scheduler(max_concurrent: usize) -> (FleetScheduler, Arc<MemoryRegistry>) {
        let registry = MemoryRegistry::new();
        let bus = Arc::new(EventBus::new());
        let fleet = FleetScheduler::new(registry.clone(), bus, FleetConfig { max_concurrent });
        (fleet, registry)
    }

    fn submission(task: &str) -> Submission {
        Submission::new(task, "proj", PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn test_submit_and_wait_completes() {
        let (fleet, registry) = scheduler(2);
        let driver = Arc::new(MockDriver::new().with_default(MockScript::success("done")));

        let submitted = fleet
            .submit(driver, submission("do it"))
            .await
            .unwrap();
        assert!(!submitted.is_queued());

        let result = fleet.wait(submitted.id(), Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(result.response, "done");
        assert_eq!(registry.state_of(submitted.id()), Some(AgentState::Completed));
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_queues_overflow() {
        let (fleet, _) = scheduler(2);
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("slow").with_delay(Duration::from_millis(200)),
        ));

        let mut ids = Vec::new();
        for i in 0..4 {
            let submitted = fleet
                .submit(driver.clone(), submission(&format!("task {i}")))
                .await
                .unwrap();
            ids.push(submitted);
        }

        assert!(fleet.running_count().await <= 2);
        assert!(fleet.queue_size().await >= 2);

        let results = fleet.wait_all(Some(Duration::from_secs(5))).await;
        assert_eq!(results.len(), 4);
        assert!(results.values().all(Result::is_ok));
        assert_eq!(fleet.queue_size().await, 0);
    }

    #[tokio::test]
    async fn test_queue_preserves_fifo_order() {
        let (fleet, _) = scheduler(1);
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("ok").with_delay(Duration::from_millis(50)),
        ));

        let first = fleet.submit(driver.clone(), submission("a")).await.unwrap();
        let second = fleet.submit(driver.clone(), submission("b")).await.unwrap();
        let third = fleet.submit(driver.clone(), submission("c")).await.unwrap();
        assert!(!first.is_queued());
        assert!(second.is_queued());
        assert!(third.is_queued());

        fleet.wait(second.id(), Some(Duration::from_secs(5))).await.unwrap();
        let second_done = fleet.status(second.id()).await.unwrap().completed_at.unwrap();
        fleet.wait(third.id(), Some(Duration::from_secs(5))).await.unwrap();
        let third_done = fleet.status(third.id()).await.unwrap().completed_at.unwrap();
        assert!(second_done <= third_done);
    }

    #[tokio::test]
    async fn test_driver_failure_is_captured_not_retried() {
        let (fleet, registry) = scheduler(4);
        let driver = Arc::new(MockDriver::new().with_default(MockScript::failure("blew up")));

        let submitted = fleet.submit(driver.clone(), submission("x")).await.unwrap();
        let outcome = fleet.wait(submitted.id(), Some(Duration::from_secs(5))).await;

        match outcome {
            Err(FleetError::AgentFailed { error, .. }) => assert!(error.contains("blew up")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(registry.state_of(submitted.id()), Some(AgentState::Failed));
        // Exactly one invocation: the scheduler never retries.
        assert_eq!(driver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_zero_timeout_returns_timeout() {
        let (fleet, _) = scheduler(2);
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("slow").with_delay(Duration::from_millis(500)),
        ));

        let submitted = fleet.submit(driver, submission("slow")).await.unwrap();
        let outcome = fleet.wait(submitted.id(), Some(Duration::ZERO)).await;
        assert!(matches!(outcome, Err(FleetError::WaitTimeout(_))));

        // The timeout did not disturb the instance; a later wait
        // observes the result.
        let result = fleet.wait(submitted.id(), Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(result.response, "slow");
    }

    #[tokio::test]
    async fn test_wait_unknown_id() {
        let (fleet, _) = scheduler(2);
        let id = AgentId::generate("mock");
        let outcome = fleet.wait(&id, Some(Duration::from_millis(10))).await;
        assert!(matches!(outcome, Err(FleetError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_multiple_waiters_observe_same_outcome() {
        let (fleet, _) = scheduler(2);
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("shared").with_delay(Duration::from_millis(100)),
        ));

        let submitted = fleet.submit(driver, submission("x")).await.unwrap();
        let id = submitted.id().clone();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let fleet = fleet.clone();
                let id = id.clone();
                tokio::spawn(async move { fleet.wait(&id, Some(Duration::from_secs(5))).await })
            })
            .collect();

        for waiter in waiters {
            let result = waiter.await.unwrap().unwrap();
            assert_eq!(result.response, "shared");
        }
    }

    #[tokio::test]
    async fn test_wait_on_queued_submission_blocks_until_done() {
        let (fleet, _) = scheduler(1);
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("ok").with_delay(Duration::from_millis(50)),
        ));

        let _first = fleet.submit(driver.clone(), submission("a")).await.unwrap();
        let queued = fleet.submit(driver, submission("b")).await.unwrap();
        assert!(queued.is_queued());

        // Still Spawning from the queue; wait must block through
        // admission and completion.
        let result = fleet.wait(queued.id(), Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(result.response, "ok");
    }

    #[tokio::test]
    async fn test_shutdown_detaches_result() {
        let (fleet, registry) = scheduler(2);
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("never seen").with_delay(Duration::from_millis(300)),
        ));

        let submitted = fleet.submit(driver, submission("x")).await.unwrap();
        fleet.shutdown(submitted.id()).await.unwrap();

        let outcome = fleet.wait(submitted.id(), Some(Duration::from_secs(5))).await;
        assert!(matches!(outcome, Err(FleetError::ShutDown(_))));
        assert_eq!(registry.state_of(submitted.id()), Some(AgentState::Shutdown));

        // Give the worker time to return; the result must stay
        // discarded.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let status = fleet.status(submitted.id()).await.unwrap();
        assert_eq!(status.state, AgentState::Shutdown);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_completed_sweeps_terminal_only() {
        let (fleet, _) = scheduler(2);
        let driver = Arc::new(MockDriver::new().with_default(MockScript::success("done")));

        let fast = fleet.submit(driver.clone(), submission("fast")).await.unwrap();
        fleet.wait(fast.id(), Some(Duration::from_secs(5))).await.unwrap();

        let slow_driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("slow").with_delay(Duration::from_millis(300)),
        ));
        let slow = fleet.submit(slow_driver, submission("slow")).await.unwrap();

        let removed = fleet.cleanup_completed().await;
        assert_eq!(removed, 1);
        assert!(fleet.status(fast.id()).await.is_err());
        assert!(fleet.status(slow.id()).await.is_ok());

        fleet.wait(slow.id(), Some(Duration::from_secs(5))).await.unwrap();
    }

    #[tokio::test]
    async fn test_project_stats_from_registry() {
        let (fleet, _) = scheduler(4);
        let ok = Arc::new(MockDriver::new().with_default(MockScript::success("ok")));
        let bad = Arc::new(MockDriver::new().with_default(MockScript::failure("no")));

        let a = fleet.submit(ok.clone(), submission("a")).await.unwrap();
        let b = fleet.submit(bad, submission("b")).await.unwrap();
        let _ = fleet.wait(a.id(), Some(Duration::from_secs(5))).await;
        let _ = fleet.wait(b.id(), Some(Duration::from_secs(5))).await;

        let totals = fleet.project_stats("proj").await.unwrap();
        assert_eq!(totals.total_agents, 2);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.failed, 1);
    }
}
