//! Orchestrator facade.
//!
//! Composes the routing heuristic, worktree manager, fleet scheduler,
//! and session store for one user task: decide single vs multi,
//! acquire isolation, submit, await terminal states, update the
//! session, and render results.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentId, AgentResult, Event, RoutingPlan, Session, Turn};
use crate::domain::ports::{AgentDriver, ProjectTotals, RoutingProvider, SessionStore};
use crate::services::event_bus::EventBus;
use crate::services::fleet::{FleetError, FleetScheduler, Submission};
use crate::services::worktree::WorktreeManager;

/// How a task should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Ask the routing heuristic and follow its suggestion.
    Auto,
    /// Force one agent.
    Single,
    /// Force a parallel fan-out of N agents.
    Multi(usize),
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base workspace tasks run against.
    pub workspace: PathBuf,
    /// Project grouping key for instances and events.
    pub project: String,
    pub single_timeout: Duration,
    pub multi_timeout: Duration,
    /// Conversation turns included in driver context snapshots.
    pub context_turns: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            project: "default".to_string(),
            single_timeout: Duration::from_secs(300),
            multi_timeout: Duration::from_secs(600),
            context_turns: 10,
        }
    }
}

/// Snapshot of the fleet for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub active: usize,
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

struct AgentRun {
    index: usize,
    id: AgentId,
    driver: String,
    outcome: Result<AgentResult, FleetError>,
}

const PANEL_WIDTH: usize = 70;
const TEXT_WIDTH: usize = PANEL_WIDTH - 4;

/// Coordinates routing, isolation, scheduling, and session updates
/// for user tasks.
pub struct Orchestrator {
    fleet: Arc<FleetScheduler>,
    worktrees: Arc<WorktreeManager>,
    bus: Arc<EventBus>,
    router: Arc<dyn RoutingProvider>,
    sessions: Arc<dyn SessionStore>,
    drivers: HashMap<String, Arc<dyn AgentDriver>>,
    primary: RwLock<String>,
    session: Mutex<Session>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fleet: Arc<FleetScheduler>,
        worktrees: Arc<WorktreeManager>,
        bus: Arc<EventBus>,
        router: Arc<dyn RoutingProvider>,
        sessions: Arc<dyn SessionStore>,
        drivers: HashMap<String, Arc<dyn AgentDriver>>,
        primary: impl Into<String>,
        session: Session,
        config: OrchestratorConfig,
    ) -> DomainResult<Self> {
        let primary = primary.into();
        if !drivers.contains_key(&primary) {
            return Err(DomainError::DriverNotFound(primary));
        }
        Ok(Self {
            fleet,
            worktrees,
            bus,
            router,
            sessions,
            drivers,
            primary: RwLock::new(primary),
            session: Mutex::new(session),
            config,
        })
    }

    /// Execute a user task and return the rendered response.
    pub async fn execute(&self, task: &str, mode: ExecutionMode) -> DomainResult<String> {
        match mode {
            ExecutionMode::Single => self.execute_single(task).await,
            ExecutionMode::Multi(n) => self.execute_multi(task, n).await,
            ExecutionMode::Auto => {
                let plan = self.routing_plan(task).await;
                if plan.requires_multiple && plan.recommended_agents.len() >= 2 {
                    let agents = plan.recommended_agents.len();
                    info!(
                        intent = %plan.intent,
                        complexity = plan.complexity,
                        agents,
                        "routing suggests multi-agent execution"
                    );
                    let body = self.execute_multi(task, agents).await?;
                    Ok(format!(
                        "Suggestion: {} task (complexity {:.2}), ran {} agents in parallel.\n\n{}",
                        plan.intent, plan.complexity, agents, body
                    ))
                } else {
                    self.execute_single(task).await
                }
            }
        }
    }

    /// Switch the primary driver, carrying conversation context over.
    pub async fn switch(&self, new_driver: &str) -> DomainResult<()> {
        let new = self.drivers.get(new_driver).ok_or_else(|| {
            let mut available: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
            available.sort_unstable();
            DomainError::DriverNotFound(format!(
                "{new_driver} (available: {})",
                available.join(", ")
            ))
        })?;

        let old_kind = self.primary.read().await.clone();
        if old_kind == new_driver {
            return Ok(());
        }
        let old = self
            .drivers
            .get(&old_kind)
            .ok_or_else(|| DomainError::DriverNotFound(old_kind.clone()))?;

        let context = old.export_context().await;
        new.import_context(context).await;

        *self.primary.write().await = new_driver.to_string();
        {
            let mut session = self.session.lock().await;
            session.primary_driver = new_driver.to_string();
            self.sessions.save(&session).await?;
        }
        info!(from = %old_kind, to = %new_driver, "switched primary driver");
        Ok(())
    }

    pub async fn primary_driver(&self) -> String {
        self.primary.read().await.clone()
    }

    pub async fn fleet_status(&self) -> FleetStatus {
        FleetStatus {
            active: self.fleet.list_active().await.len(),
            running: self.fleet.running_count().await,
            queued: self.fleet.queue_size().await,
            max_concurrent: self.fleet.max_concurrent(),
        }
    }

    /// Registry aggregates for the configured project.
    pub async fn project_stats(&self) -> DomainResult<ProjectTotals> {
        self.fleet
            .project_stats(&self.config.project)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))
    }

    /// Snapshot of the session state.
    pub async fn session(&self) -> Session {
        self.session.lock().await.clone()
    }

    async fn execute_single(&self, task: &str) -> DomainResult<String> {
        let context = self.context_snapshot().await;
        let plan = self.routing_plan(task).await;

        // The plan is advisory: fall back to the primary when it
        // recommends a driver we do not have.
        let primary = self.primary.read().await.clone();
        let kind = plan
            .recommended_agents
            .first()
            .filter(|kind| self.drivers.contains_key(*kind))
            .cloned()
            .unwrap_or(primary);
        let driver = self
            .drivers
            .get(&kind)
            .ok_or_else(|| DomainError::DriverNotFound(kind.clone()))?
            .clone();

        // No parallelism, so no isolation: the task runs in the
        // workspace itself.
        let submission = Submission::new(task, &self.config.project, self.config.workspace.clone())
            .with_context(context);

        let submitted = self
            .fleet
            .submit(driver, submission)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;

        let outcome = self
            .fleet
            .wait(submitted.id(), Some(self.config.single_timeout))
            .await;
        self.fleet.cleanup_completed().await;

        let result = outcome.map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
        self.record_turn(&kind, &result).await?;
        Ok(result.response)
    }

    async fn execute_multi(&self, task: &str, agents: usize) -> DomainResult<String> {
        if agents == 0 {
            return Err(DomainError::ValidationFailed(
                "multi mode requires at least one agent".to_string(),
            ));
        }

        let primary = self.primary.read().await.clone();
        let driver = self
            .drivers
            .get(&primary)
            .ok_or_else(|| DomainError::DriverNotFound(primary.clone()))?
            .clone();
        let context = self.context_snapshot().await;
        let workspace = self.config.workspace.clone();

        info!(agents, project = %self.config.project, "spawning agent fan-out");

        let mut submitted = Vec::new();
        for _ in 0..agents {
            // The id is generated here so the worktree and the fleet
            // instance share it.
            let id = AgentId::generate(driver.kind());
            let workdir = self
                .worktrees
                .get_or_create(&workspace, id.as_str(), None)
                .await;
            let isolated = workdir != workspace;

            if isolated {
                if let Some(worktree) = self.worktrees.tracked(id.as_str()).await {
                    self.bus
                        .emit(&Event::worktree_created(
                            id.as_str(),
                            &worktree.path.to_string_lossy(),
                            &workspace.to_string_lossy(),
                            &worktree.branch,
                            &self.config.project,
                        ))
                        .await;
                }
            }

            let mut submission =
                Submission::new(task, &self.config.project, workdir.clone())
                    .with_agent_id(id.clone())
                    .with_context(context.clone());
            if isolated {
                submission = submission.with_worktree_path(workdir.to_string_lossy());
            }

            let handle = self
                .fleet
                .submit(driver.clone(), submission)
                .await
                .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
            submitted.push((handle.id().clone(), isolated));
        }

        let mut runs = Vec::new();
        for (index, (id, isolated)) in submitted.into_iter().enumerate() {
            let outcome = self.fleet.wait(&id, Some(self.config.multi_timeout)).await;
            if isolated {
                self.worktrees.unlock(id.as_str()).await;
            }
            if let Ok(result) = &outcome {
                self.record_turn(&primary, result).await?;
            }
            runs.push(AgentRun {
                index: index + 1,
                id,
                driver: primary.clone(),
                outcome,
            });
        }

        self.fleet.cleanup_completed().await;
        Ok(Self::render_multi(task, &runs))
    }

    async fn routing_plan(&self, task: &str) -> RoutingPlan {
        let context = self.context_snapshot().await;
        let mut available: Vec<String> = self.drivers.keys().cloned().collect();
        available.sort_unstable();

        match self.router.plan(task, &available, &context).await {
            Ok(plan) => plan,
            Err(error) => {
                warn!(%error, "routing provider failed, using single-agent default");
                RoutingPlan::single(self.primary.read().await.clone())
            }
        }
    }

    async fn context_snapshot(&self) -> Value {
        let session = self.session.lock().await;
        session.context_snapshot(self.config.context_turns)
    }

    /// Append an assistant turn, bump session totals, persist, and
    /// emit SessionUpdated.
    async fn record_turn(&self, driver: &str, result: &AgentResult) -> DomainResult<()> {
        let event = {
            let mut session = self.session.lock().await;
            session.add_turn(Turn::assistant(
                result.response.clone(),
                driver,
                result.tokens_used,
                result.cost,
            ));
            self.sessions.save(&session).await?;
            Event::session_updated(
                &session.workspace,
                session.total_tokens,
                session.total_cost,
                session.conversation.len() as u64,
                &self.config.project,
            )
        };
        self.bus.emit(&event).await;
        Ok(())
    }

    fn render_multi(task: &str, runs: &[AgentRun]) -> String {
        if runs.is_empty() {
            return "No results from agents".to_string();
        }
        if runs.len() == 1 {
            if let Ok(result) = &runs[0].outcome {
                return result.response.clone();
            }
        }

        let rule = "=".repeat(PANEL_WIDTH);
        let mut out = vec![
            rule.clone(),
            format!("Results from {} agents", runs.len()),
            format!("Task: {task}"),
            rule.clone(),
            String::new(),
        ];

        for run in runs {
            out.extend(Self::render_panel(run));
            out.push(String::new());
        }

        let succeeded: Vec<&AgentResult> =
            runs.iter().filter_map(|r| r.outcome.as_ref().ok()).collect();
        let total_cost: f64 = succeeded.iter().map(|r| r.cost).sum();
        let total_tokens: u64 = succeeded.iter().map(|r| r.tokens_used).sum();
        let avg_time = if succeeded.is_empty() {
            0.0
        } else {
            succeeded.iter().map(|r| r.duration_seconds).sum::<f64>() / succeeded.len() as f64
        };

        out.push(rule.clone());
        out.push(format!(
            "Total Cost: ${total_cost:.4} | Total Tokens: {total_tokens} | Succeeded: {}/{}",
            succeeded.len(),
            runs.len()
        ));
        out.push(format!("Average Time: {avg_time:.2}s"));
        out.push(rule);

        out.join("\n")
    }

    fn render_panel(run: &AgentRun) -> Vec<String> {
        let title = format!("─ Agent {}: {} ", run.index, run.driver);
        let filler = "─".repeat(PANEL_WIDTH.saturating_sub(title.chars().count() + 2));
        let mut lines = vec![format!("┌{title}{filler}┐")];

        match &run.outcome {
            Ok(result) => {
                lines.push(format!(
                    "│ Time: {:.2}s | Tokens: {} | Cost: ${:.4}",
                    result.duration_seconds, result.tokens_used, result.cost
                ));
                lines.push(format!("│ Tools used: {}", result.tool_use_count));
                lines.push(format!("├{}┤", "─".repeat(PANEL_WIDTH - 2)));
                for raw in result.response.lines() {
                    for wrapped in Self::wrap(raw, TEXT_WIDTH) {
                        lines.push(format!("│ {:<width$} │", wrapped, width = TEXT_WIDTH));
                    }
                }
            }
            Err(error) => {
                lines.push(format!("│ Agent: {}", run.id));
                lines.push(format!("├{}┤", "─".repeat(PANEL_WIDTH - 2)));
                for wrapped in Self::wrap(&format!("Error: {error}"), TEXT_WIDTH) {
                    lines.push(format!("│ {:<width$} │", wrapped, width = TEXT_WIDTH));
                }
            }
        }

        lines.push(format!("└{}┘", "─".repeat(PANEL_WIDTH - 2)));
        lines
    }

    fn wrap(line: &str, width: usize) -> Vec<String> {
        if line.chars().count() <= width {
            return vec![line.to_string()];
        }

        let mut wrapped = Vec::new();
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > width {
                wrapped.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            // A single over-long word is hard-split.
            if word.chars().count() > width {
                let mut chunk = String::new();
                for ch in word.chars() {
                    if chunk.chars().count() == width {
                        wrapped.push(std::mem::take(&mut chunk));
                    }
                    chunk.push(ch);
                }
                current.push_str(&chunk);
            } else {
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            wrapped.push(current);
        }
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::drivers::{MockDriver, MockScript};
    use crate::adapters::fs::JsonSessionStore;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRegistry};
    use crate::services::event_store::{EventQuery, EventStore, InMemoryEventStore};
    use crate::services::fleet::FleetConfig;
    use crate::services::router::KeywordRouter;
    use crate::services::sinks::StoreSink;
    use crate::domain::models::EventKind;

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<InMemoryEventStore>,
        _dirs: Vec<tempfile::TempDir>,
    }

    async fn harness(drivers: Vec<(&str, Arc<MockDriver>)>) -> Harness {
        let workspace = tempfile::tempdir().unwrap();
        let sessions_dir = tempfile::tempdir().unwrap();

        let bus = Arc::new(EventBus::new());
        let store = Arc::new(InMemoryEventStore::new());
        bus.subscribe_all(Arc::new(StoreSink::new(store.clone()))).await;

        let pool = create_migrated_test_pool().await.unwrap();
        let registry = Arc::new(SqliteAgentRegistry::new(pool));
        let fleet = Arc::new(FleetScheduler::new(
            registry,
            bus.clone(),
            FleetConfig { max_concurrent: 10 },
        ));

        let primary = drivers[0].0.to_string();
        let mut driver_map: HashMap<String, Arc<dyn AgentDriver>> = HashMap::new();
        for (kind, driver) in drivers {
            driver_map.insert(kind.to_string(), driver);
        }

        let sessions: Arc<dyn SessionStore> =
            Arc::new(JsonSessionStore::new(sessions_dir.path().to_path_buf()));
        let session = Session::new("testspace", &primary);
        sessions.save(&session).await.unwrap();

        let config = OrchestratorConfig {
            workspace: workspace.path().to_path_buf(),
            project: "testproj".to_string(),
            single_timeout: Duration::from_secs(10),
            multi_timeout: Duration::from_secs(10),
            context_turns: 10,
        };

        let orchestrator = Orchestrator::new(
            fleet,
            Arc::new(WorktreeManager::default()),
            bus,
            Arc::new(KeywordRouter::new(&primary)),
            sessions,
            driver_map,
            primary,
            session,
            config,
        )
        .unwrap();

        Harness {
            orchestrator,
            store,
            _dirs: vec![workspace, sessions_dir],
        }
    }

    #[tokio::test]
    async fn test_single_task_round_trip() {
        let driver = Arc::new(
            MockDriver::new().with_default(MockScript::success("4").with_tokens(40, 10).with_cost(0.002)),
        );
        let h = harness(vec![("mock", driver)]).await;

        let response = h
            .orchestrator
            .execute("What is 2+2?", ExecutionMode::Single)
            .await
            .unwrap();
        assert!(response.contains('4'));

        // One spawned + started + completed trace in the log.
        for kind in [
            EventKind::AgentSpawned,
            EventKind::AgentStarted,
            EventKind::AgentCompleted,
        ] {
            let events = h
                .store
                .query(EventQuery::new().kind(kind).project("testproj"))
                .await
                .unwrap();
            assert_eq!(events.len(), 1, "expected one {kind} event");
        }

        // Session grew by one assistant turn with the driver's totals.
        let session = h.orchestrator.session().await;
        assert_eq!(session.conversation.len(), 1);
        assert_eq!(session.conversation[0].role, "assistant");
        assert_eq!(session.total_tokens, 50);
        assert!((session.total_cost - 0.002).abs() < 1e-9);

        let updates = h
            .store
            .query(EventQuery::new().kind(EventKind::SessionUpdated))
            .await
            .unwrap();
        assert_eq!(updates.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_renders_panels_and_tolerates_failure() {
        let driver = Arc::new(MockDriver::new().with_default(MockScript::success("fine")));
        driver.push_script(MockScript::success("alpha answer"));
        driver.push_script(MockScript::failure("agent two broke"));
        driver.push_script(MockScript::success("gamma answer"));
        let h = harness(vec![("mock", driver)]).await;

        let response = h
            .orchestrator
            .execute("try this", ExecutionMode::Multi(3))
            .await
            .unwrap();

        assert!(response.contains("Results from 3 agents"));
        assert!(response.contains("Agent 1"));
        assert!(response.contains("Agent 3"));
        assert!(response.contains("Error:"));
        assert!(response.contains("Succeeded: 2/3"));

        // Two successes recorded as turns; the failure is not.
        let session = h.orchestrator.session().await;
        assert_eq!(session.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_mode_defaults_to_single() {
        let driver = Arc::new(MockDriver::new().with_default(MockScript::success("plain")));
        let h = harness(vec![("mock", driver.clone())]).await;

        let response = h
            .orchestrator
            .execute("what is the capital of France?", ExecutionMode::Auto)
            .await
            .unwrap();
        assert_eq!(response, "plain");
        assert_eq!(driver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_mode_fans_out_on_multi_hint() {
        let driver = Arc::new(MockDriver::new().with_default(MockScript::success("variant")));
        let h = harness(vec![("mock", driver.clone())]).await;

        let response = h
            .orchestrator
            .execute(
                "compare different approaches to error handling",
                ExecutionMode::Auto,
            )
            .await
            .unwrap();
        assert!(response.starts_with("Suggestion:"));
        assert!(driver.call_count() >= 2);
    }

    #[tokio::test]
    async fn test_single_timeout_surfaces_error() {
        let driver = Arc::new(MockDriver::new().with_default(
            MockScript::success("slow").with_delay(Duration::from_secs(30)),
        ));
        let workspace = tempfile::tempdir().unwrap();
        let sessions_dir = tempfile::tempdir().unwrap();

        let bus = Arc::new(EventBus::new());
        let pool = create_migrated_test_pool().await.unwrap();
        let fleet = Arc::new(FleetScheduler::new(
            Arc::new(SqliteAgentRegistry::new(pool)),
            bus.clone(),
            FleetConfig::default(),
        ));
        let mut drivers: HashMap<String, Arc<dyn AgentDriver>> = HashMap::new();
        drivers.insert("mock".to_string(), driver);

        let orchestrator = Orchestrator::new(
            fleet,
            Arc::new(WorktreeManager::default()),
            bus,
            Arc::new(KeywordRouter::new("mock")),
            Arc::new(JsonSessionStore::new(sessions_dir.path().to_path_buf())),
            drivers,
            "mock",
            Session::new("ws", "mock"),
            OrchestratorConfig {
                workspace: workspace.path().to_path_buf(),
                single_timeout: Duration::from_millis(50),
                ..OrchestratorConfig::default()
            },
        )
        .unwrap();

        let outcome = orchestrator.execute("task", ExecutionMode::Single).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_switch_transfers_context() {
        let first = Arc::new(MockDriver::new());
        let second = Arc::new(MockDriver::new().with_kind("other"));
        first
            .import_context(serde_json::json!({"memory": "carried"}))
            .await;

        let h = harness(vec![("mock", first), ("other", second.clone())]).await;

        h.orchestrator.switch("other").await.unwrap();
        assert_eq!(h.orchestrator.primary_driver().await, "other");
        assert_eq!(second.export_context().await["memory"], "carried");

        let session = h.orchestrator.session().await;
        assert_eq!(session.primary_driver, "other");

        let missing = h.orchestrator.switch("ghost").await;
        assert!(matches!(missing, Err(DomainError::DriverNotFound(_))));
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let wrapped = Orchestrator::wrap("abcdefghij", 4);
        assert_eq!(wrapped, vec!["abcd", "efgh", "ij"]);

        let wrapped = Orchestrator::wrap("one two three", 7);
        assert_eq!(wrapped, vec!["one two", "three"]);
    }
}
