//! Core services: event fan-out and storage, fleet scheduling,
//! worktree isolation, routing, and the orchestrator facade.

pub mod event_bus;
pub mod event_store;
pub mod fleet;
pub mod orchestrator;
pub mod router;
pub mod sinks;
pub mod worktree;

pub use event_bus::{EventBus, EventSubscriber};
pub use event_store::{
    EventQuery, EventStore, EventStoreError, InMemoryEventStore, ProjectStats, ProjectSummary,
    ToolUsage,
};
pub use fleet::{FleetConfig, FleetError, FleetScheduler, Submission, Submitted};
pub use orchestrator::{ExecutionMode, FleetStatus, Orchestrator, OrchestratorConfig};
pub use router::KeywordRouter;
pub use sinks::{BroadcastSink, StoreSink};
pub use worktree::{SyncOutcome, WorktreeError, WorktreeManager, WorktreeManagerConfig};
