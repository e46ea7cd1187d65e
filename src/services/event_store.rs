//! EventStore trait: durable append-only storage of bus events.
//!
//! The SQLite implementation lives in `adapters::sqlite::event_store`;
//! the in-memory implementation here backs tests.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::models::{Event, EventKind, EventPayload};

/// Error type for event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("Failed to append event: {0}")]
    Append(String),

    #[error("Failed to query events: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for EventStoreError {
    fn from(err: sqlx::Error) -> Self {
        EventStoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for EventStoreError {
    fn from(err: serde_json::Error) -> Self {
        EventStoreError::Serialization(err.to_string())
    }
}

/// Filters for event retrieval. Results are ordered by timestamp
/// descending.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub kind: Option<EventKind>,
    pub project: Option<String>,
    pub agent_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            kind: None,
            project: None,
            agent_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// Tool usage count for project statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub tool_name: String,
    pub count: u64,
}

/// Aggregate statistics for one project, derived from the event log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectStats {
    pub project: String,
    /// Distinct agent ids spawned.
    pub total_agents: u64,
    pub completed: u64,
    pub failed: u64,
    /// Summed over AgentCompleted events only.
    pub total_cost: f64,
    /// Summed over AgentCompleted events only.
    pub total_tokens: u64,
    /// Top tools by invocation count, at most ten entries.
    pub tool_usage: Vec<ToolUsage>,
}

/// A project with its event count.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project: String,
    pub event_count: u64,
}

/// Trait for event persistence implementations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event; durable before returning.
    async fn append(&self, event: &Event) -> Result<(), EventStoreError>;

    /// Events matching all filters, newest first.
    async fn query(&self, query: EventQuery) -> Result<Vec<Event>, EventStoreError>;

    /// Aggregate statistics for a project.
    async fn project_stats(&self, project: &str) -> Result<ProjectStats, EventStoreError>;

    /// All events for an agent, oldest first.
    async fn agent_timeline(&self, agent_id: &str) -> Result<Vec<Event>, EventStoreError>;

    /// Remove every event for a project; returns the number removed.
    async fn clear_project(&self, project: &str) -> Result<u64, EventStoreError>;

    /// Distinct projects with event counts, most active first.
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, EventStoreError>;

    /// Total events stored.
    async fn count(&self) -> Result<u64, EventStoreError>;
}

/// In-memory event store for testing.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(event: &Event, query: &EventQuery) -> bool {
    if let Some(kind) = query.kind {
        if event.kind != kind {
            return false;
        }
    }
    if let Some(ref project) = query.project {
        if &event.project != project {
            return false;
        }
    }
    if let Some(ref agent_id) = query.agent_id {
        if event.agent_id() != Some(agent_id.as_str()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &Event) -> Result<(), EventStoreError> {
        let mut events = self.events.write().await;
        events.push(event.clone());
        Ok(())
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<Event>, EventStoreError> {
        let events = self.events.read().await;
        let filtered: Vec<Event> = events
            .iter()
            .rev() // insertion order is nondecreasing timestamp order
            .filter(|e| matches(e, &query))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(filtered)
    }

    async fn project_stats(&self, project: &str) -> Result<ProjectStats, EventStoreError> {
        let events = self.events.read().await;

        let mut spawned_ids = std::collections::HashSet::new();
        let mut stats = ProjectStats {
            project: project.to_string(),
            ..ProjectStats::default()
        };
        let mut tool_counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();

        for event in events.iter().filter(|e| e.project == project) {
            match (&event.kind, &event.payload) {
                (EventKind::AgentSpawned, EventPayload::Agent(body)) => {
                    spawned_ids.insert(body.agent_id.clone());
                }
                (EventKind::AgentCompleted, EventPayload::Agent(body)) => {
                    stats.completed += 1;
                    stats.total_tokens += body.tokens_used.unwrap_or(0);
                    stats.total_cost += body.cost.unwrap_or(0.0);
                }
                (EventKind::AgentFailed, _) => stats.failed += 1,
                (EventKind::ToolUsed, EventPayload::Tool(body)) => {
                    *tool_counts.entry(body.tool_name.clone()).or_default() += 1;
                }
                _ => {}
            }
        }

        stats.total_agents = spawned_ids.len() as u64;
        let mut tool_usage: Vec<ToolUsage> = tool_counts
            .into_iter()
            .map(|(tool_name, count)| ToolUsage { tool_name, count })
            .collect();
        tool_usage.sort_by(|a, b| b.count.cmp(&a.count).then(a.tool_name.cmp(&b.tool_name)));
        tool_usage.truncate(10);
        stats.tool_usage = tool_usage;

        Ok(stats)
    }

    async fn agent_timeline(&self, agent_id: &str) -> Result<Vec<Event>, EventStoreError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.agent_id() == Some(agent_id))
            .cloned()
            .collect())
    }

    async fn clear_project(&self, project: &str) -> Result<u64, EventStoreError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.project != project);
        Ok((before - events.len()) as u64)
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, EventStoreError> {
        let events = self.events.read().await;
        let mut counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for event in events.iter() {
            *counts.entry(event.project.clone()).or_default() += 1;
        }
        let mut projects: Vec<ProjectSummary> = counts
            .into_iter()
            .map(|(project, event_count)| ProjectSummary { project, event_count })
            .collect();
        projects.sort_by(|a, b| b.event_count.cmp(&a.event_count).then(a.project.cmp(&b.project)));
        Ok(projects)
    }

    async fn count(&self) -> Result<u64, EventStoreError> {
        let events = self.events.read().await;
        Ok(events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Event;

    #[tokio::test]
    async fn test_append_and_filtered_query() {
        let store = InMemoryEventStore::new();
        store
            .append(&Event::agent_spawned("a-1", "mock", "t", "/ws", "alpha"))
            .await
            .unwrap();
        store
            .append(&Event::agent_started("a-1", "mock", "t", "/ws", "alpha"))
            .await
            .unwrap();
        store
            .append(&Event::agent_spawned("b-1", "mock", "t", "/ws", "beta"))
            .await
            .unwrap();

        let alpha = store
            .query(EventQuery::new().project("alpha"))
            .await
            .unwrap();
        assert_eq!(alpha.len(), 2);

        let spawned = store
            .query(EventQuery::new().kind(EventKind::AgentSpawned))
            .await
            .unwrap();
        assert_eq!(spawned.len(), 2);

        let agent = store.query(EventQuery::new().agent_id("a-1")).await.unwrap();
        assert_eq!(agent.len(), 2);
    }

    #[tokio::test]
    async fn test_query_returns_stored_event_exactly_once() {
        let store = InMemoryEventStore::new();
        let event = Event::agent_failed("a-1", "mock", "t", "/ws", "proj", "boom");
        store.append(&event).await.unwrap();

        let found = store
            .query(
                EventQuery::new()
                    .kind(EventKind::AgentFailed)
                    .project("proj")
                    .agent_id("a-1"),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id(), Some("a-1"));
    }

    #[tokio::test]
    async fn test_project_stats_aggregates() {
        let store = InMemoryEventStore::new();
        store
            .append(&Event::agent_spawned("a-1", "mock", "t", "/ws", "proj"))
            .await
            .unwrap();
        store
            .append(&Event::agent_spawned("a-2", "mock", "t", "/ws", "proj"))
            .await
            .unwrap();
        store
            .append(&Event::agent_completed(
                "a-1", "mock", "t", "/ws", "proj", 100, 0.01, 1.0, "ok",
            ))
            .await
            .unwrap();
        store
            .append(&Event::agent_failed("a-2", "mock", "t", "/ws", "proj", "err"))
            .await
            .unwrap();
        store
            .append(&Event::tool_used(
                "a-1",
                "bash",
                serde_json::json!({}),
                true,
                None,
                "proj",
            ))
            .await
            .unwrap();

        let stats = store.project_stats("proj").await.unwrap();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_tokens, 100);
        assert_eq!(stats.tool_usage.len(), 1);
        assert_eq!(stats.tool_usage[0].tool_name, "bash");
    }

    #[tokio::test]
    async fn test_timeline_ascending_and_clear() {
        let store = InMemoryEventStore::new();
        store
            .append(&Event::agent_spawned("a-1", "mock", "t", "/ws", "proj"))
            .await
            .unwrap();
        store
            .append(&Event::agent_started("a-1", "mock", "t", "/ws", "proj"))
            .await
            .unwrap();

        let timeline = store.agent_timeline("a-1").await.unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].kind, EventKind::AgentSpawned);
        assert_eq!(timeline[1].kind, EventKind::AgentStarted);

        let removed = store.clear_project("proj").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_pagination() {
        let store = InMemoryEventStore::new();
        for i in 0..10 {
            store
                .append(&Event::agent_spawned(
                    &format!("a-{i}"),
                    "mock",
                    "t",
                    "/ws",
                    "proj",
                ))
                .await
                .unwrap();
        }

        let page = store
            .query(EventQuery::new().limit(3).offset(3))
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
        // Newest first: offset 3 skips a-9, a-8, a-7.
        assert_eq!(page[0].agent_id(), Some("a-6"));
    }
}
