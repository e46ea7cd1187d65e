//! Root system wiring.
//!
//! One `System` owns one EventBus, one EventStore, one FleetScheduler,
//! one WorktreeManager, and one SessionStore, and hands them to the
//! Orchestrator and the query API by constructor injection. There are
//! no process-wide singletons.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::adapters::drivers::{CommandDriver, CommandDriverConfig, MockDriver};
use crate::adapters::fs::JsonSessionStore;
use crate::adapters::http::{QueryApiConfig, QueryApiServer};
use crate::adapters::sqlite::{initialize_database, SqliteAgentRegistry, SqliteEventStore};
use crate::domain::models::{Config, Event, Session};
use crate::domain::ports::{AgentDriver, SessionStore};
use crate::services::event_bus::EventBus;
use crate::services::event_store::EventStore;
use crate::services::fleet::{FleetConfig, FleetScheduler};
use crate::services::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::services::router::KeywordRouter;
use crate::services::sinks::{BroadcastSink, StoreSink};
use crate::services::worktree::{WorktreeManager, WorktreeManagerConfig};

/// The wired-up core: bus, store, fleet, worktrees, and sessions.
pub struct System {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn EventStore>,
    /// Live event feed backing the websocket fan-out.
    pub events: broadcast::Sender<Event>,
    pub fleet: Arc<FleetScheduler>,
    pub worktrees: Arc<WorktreeManager>,
    pub sessions: Arc<dyn SessionStore>,
    pool: SqlitePool,
}

impl System {
    /// Open the database, run migrations, and wire every component.
    pub async fn init(config: Config) -> Result<Self> {
        let database_url = format!("sqlite:{}", config.database.path);
        let pool = initialize_database(&database_url)
            .await
            .context("failed to initialize database")?;

        let bus = Arc::new(EventBus::new());
        let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone()));
        bus.subscribe_all(Arc::new(StoreSink::new(store.clone()))).await;

        let broadcast_sink = Arc::new(BroadcastSink::new(1024));
        let events = broadcast_sink.sender();
        bus.subscribe_all(broadcast_sink).await;

        let registry = Arc::new(SqliteAgentRegistry::new(pool.clone()));
        let fleet = Arc::new(FleetScheduler::new(
            registry,
            bus.clone(),
            FleetConfig {
                max_concurrent: config.max_concurrent,
            },
        ));

        let worktrees = Arc::new(WorktreeManager::new(WorktreeManagerConfig {
            cleanup_after: Duration::from_secs(config.worktree.cleanup_after_hours * 3600),
            ..WorktreeManagerConfig::default()
        }));

        let sessions: Arc<dyn SessionStore> =
            Arc::new(JsonSessionStore::new(config.sessions.root.clone()));

        Ok(Self {
            config,
            bus,
            store,
            events,
            fleet,
            worktrees,
            sessions,
            pool,
        })
    }

    /// Instantiate the configured drivers. A driver with a command
    /// runs that binary; otherwise it is backed by the built-in mock.
    /// The primary driver always exists.
    pub fn build_drivers(&self) -> HashMap<String, Arc<dyn AgentDriver>> {
        let mut drivers: HashMap<String, Arc<dyn AgentDriver>> = HashMap::new();

        for (name, settings) in &self.config.drivers {
            let driver: Arc<dyn AgentDriver> = match &settings.command {
                Some(command) => Arc::new(CommandDriver::new(CommandDriverConfig {
                    kind: name.clone(),
                    command: command.clone(),
                    args: settings.args.clone(),
                    cost_per_1k_tokens: settings.cost_per_1k_tokens,
                })),
                None => Arc::new(MockDriver::new().with_kind(name.clone())),
            };
            drivers.insert(name.clone(), driver);
        }

        let primary = self.config.primary_driver.clone();
        drivers
            .entry(primary.clone())
            .or_insert_with(|| Arc::new(MockDriver::new().with_kind(primary)));

        drivers
    }

    /// Build the orchestrator over this system, loading or creating
    /// the workspace session.
    pub async fn orchestrator(&self) -> Result<Orchestrator> {
        let drivers = self.build_drivers();
        let primary = self.config.primary_driver.clone();

        let workspace_key = self.config.project.clone();
        let session = match self.sessions.load(&workspace_key).await? {
            Some(session) => session,
            None => {
                let session = Session::new(&workspace_key, &primary);
                self.sessions.save(&session).await?;
                session
            }
        };

        // Canonicalize so worktree paths compare against the same
        // root the manager resolves.
        let workspace = tokio::fs::canonicalize(&self.config.workspace)
            .await
            .unwrap_or_else(|_| PathBuf::from(&self.config.workspace));

        let orchestrator = Orchestrator::new(
            self.fleet.clone(),
            self.worktrees.clone(),
            self.bus.clone(),
            Arc::new(KeywordRouter::new(&primary)),
            self.sessions.clone(),
            drivers,
            primary,
            session,
            OrchestratorConfig {
                workspace,
                project: self.config.project.clone(),
                single_timeout: Duration::from_secs(self.config.orchestrator.single_timeout_secs),
                multi_timeout: Duration::from_secs(self.config.orchestrator.multi_timeout_secs),
                context_turns: 10,
            },
        )?;

        Ok(orchestrator)
    }

    /// Build the query API server over this system's store and feed.
    pub fn api_server(&self) -> QueryApiServer {
        QueryApiServer::new(
            self.store.clone(),
            self.events.clone(),
            QueryApiConfig {
                host: self.config.server.host.clone(),
                port: self.config.server.port,
                enable_cors: self.config.server.enable_cors,
            },
        )
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::orchestrator::ExecutionMode;

    #[tokio::test]
    async fn test_init_and_execute_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir
            .path()
            .join("hm.db")
            .to_string_lossy()
            .to_string();
        config.sessions.root = dir.path().join("sessions");
        config.workspace = dir.path().to_string_lossy().to_string();
        config.project = "systest".to_string();

        let system = System::init(config).await.unwrap();
        let orchestrator = system.orchestrator().await.unwrap();

        let response = orchestrator
            .execute("say hi", ExecutionMode::Single)
            .await
            .unwrap();
        assert!(!response.is_empty());

        // The store sink persisted the lifecycle trace.
        let count = system.store.count().await.unwrap();
        assert!(count >= 3, "expected spawned/started/completed, got {count}");
    }

    #[tokio::test]
    async fn test_primary_driver_always_built() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("hm.db").to_string_lossy().to_string();
        config.primary_driver = "unconfigured".to_string();

        let system = System::init(config).await.unwrap();
        let drivers = system.build_drivers();
        assert!(drivers.contains_key("unconfigured"));
    }
}
