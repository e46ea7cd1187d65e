//! Agent registry port - durable storage for fleet instance state.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentId, AgentInstance};

/// Aggregate registry statistics for one project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectTotals {
    pub total_agents: u64,
    pub completed: u64,
    pub failed: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_duration_seconds: f64,
}

/// Persistent registry of agent instances, rewritten on every state
/// change so the stored row always reflects the latest state.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Insert or replace the row for this instance.
    async fn save(&self, instance: &AgentInstance) -> DomainResult<()>;

    async fn get(&self, id: &AgentId) -> DomainResult<Option<AgentInstance>>;

    async fn list_by_project(&self, project: &str) -> DomainResult<Vec<AgentInstance>>;

    async fn project_totals(&self, project: &str) -> DomainResult<ProjectTotals>;
}
