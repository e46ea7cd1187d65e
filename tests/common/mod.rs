//! Shared fixtures for integration tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use hivemind::adapters::drivers::MockDriver;
use hivemind::adapters::fs::JsonSessionStore;
use hivemind::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRegistry, SqliteEventStore};
use hivemind::domain::models::Session;
use hivemind::domain::ports::{AgentDriver, SessionStore};
use hivemind::services::event_bus::EventBus;
use hivemind::services::event_store::EventStore;
use hivemind::services::fleet::{FleetConfig, FleetScheduler};
use hivemind::services::orchestrator::{Orchestrator, OrchestratorConfig};
use hivemind::services::router::KeywordRouter;
use hivemind::services::sinks::StoreSink;
use hivemind::services::worktree::WorktreeManager;

pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

/// Run a git command in `repo`, asserting success.
#[allow(dead_code)]
pub fn git(repo: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Initialize a git repository with one commit on `main`.
///
/// Returns the tempdir guard and the canonicalized repository root.
#[allow(dead_code)]
pub fn setup_git_repo() -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let root = dir.path().canonicalize().expect("canonicalize repo root");

    git(&root, &["init", "-b", "main"]);
    git(&root, &["config", "user.email", "test@example.com"]);
    git(&root, &["config", "user.name", "Test User"]);
    std::fs::write(root.join("README.md"), "# test repo\n").expect("write README");
    git(&root, &["add", "."]);
    git(&root, &["commit", "-m", "initial commit"]);

    (dir, root)
}

/// A fully wired core over real SQLite (in-memory) with a mock driver.
pub struct Fixture {
    pub orchestrator: Orchestrator,
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn EventStore>,
    pub fleet: Arc<FleetScheduler>,
    pub worktrees: Arc<WorktreeManager>,
    pub project: String,
    _dirs: Vec<TempDir>,
}

#[allow(dead_code)]
pub async fn fixture(driver: Arc<MockDriver>, max_concurrent: usize) -> Fixture {
    let workspace = temp_dir();
    let path = workspace.path().to_path_buf();
    fixture_in(driver, max_concurrent, path, vec![workspace]).await
}

/// Build a fixture whose orchestrator runs tasks against `workspace`.
/// `keep` holds tempdir guards that must outlive the fixture.
#[allow(dead_code)]
pub async fn fixture_in(
    driver: Arc<MockDriver>,
    max_concurrent: usize,
    workspace: PathBuf,
    mut keep: Vec<TempDir>,
) -> Fixture {
    let sessions_dir = temp_dir();
    let project = "testproj".to_string();

    let bus = Arc::new(EventBus::new());
    let pool = create_migrated_test_pool().await.expect("test pool");
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone()));
    bus.subscribe_all(Arc::new(StoreSink::new(store.clone()))).await;

    let registry = Arc::new(SqliteAgentRegistry::new(pool));
    let fleet = Arc::new(FleetScheduler::new(
        registry,
        bus.clone(),
        FleetConfig { max_concurrent },
    ));
    let worktrees = Arc::new(WorktreeManager::default());

    let sessions: Arc<dyn SessionStore> =
        Arc::new(JsonSessionStore::new(sessions_dir.path().to_path_buf()));
    let session = Session::new("testspace", driver.kind());
    sessions.save(&session).await.expect("save session");

    let mut drivers: HashMap<String, Arc<dyn AgentDriver>> = HashMap::new();
    let primary = driver.kind().to_string();
    drivers.insert(primary.clone(), driver);

    let orchestrator = Orchestrator::new(
        fleet.clone(),
        worktrees.clone(),
        bus.clone(),
        Arc::new(KeywordRouter::new(&primary)),
        sessions,
        drivers,
        primary,
        session,
        OrchestratorConfig {
            workspace,
            project: project.clone(),
            single_timeout: Duration::from_secs(30),
            multi_timeout: Duration::from_secs(30),
            context_turns: 10,
        },
    )
    .expect("build orchestrator");

    keep.push(sessions_dir);
    Fixture {
        orchestrator,
        bus,
        store,
        fleet,
        worktrees,
        project,
        _dirs: keep,
    }
}
