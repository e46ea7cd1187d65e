//! SQLite implementation of the fleet's agent registry.
//!
//! One row per agent instance, rewritten on every state change, so the
//! table always reflects the latest state for post-hoc inspection.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentId, AgentInstance, AgentResult, AgentState};
use crate::domain::ports::{AgentRegistry, ProjectTotals};

use super::{parse_datetime, parse_optional_datetime};

pub struct SqliteAgentRegistry {
    pool: SqlitePool,
}

impl SqliteAgentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRegistry for SqliteAgentRegistry {
    async fn save(&self, instance: &AgentInstance) -> DomainResult<()> {
        let result = instance.result.as_ref();
        sqlx::query(
            r#"INSERT OR REPLACE INTO agents
               (agent_id, driver, project, task, state, worktree_path,
                spawn_time, completion_time, error, tokens_used, cost, duration_seconds)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.as_str())
        .bind(&instance.driver)
        .bind(&instance.project)
        .bind(&instance.task)
        .bind(instance.state.as_str())
        .bind(&instance.worktree_path)
        .bind(instance.spawned_at.to_rfc3339())
        .bind(instance.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(&instance.error)
        .bind(result.map(|r| r.tokens_used as i64))
        .bind(result.map(|r| r.cost))
        .bind(result.map(|r| r.duration_seconds))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &AgentId) -> DomainResult<Option<AgentInstance>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE agent_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_project(&self, project: &str) -> DomainResult<Vec<AgentInstance>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE project = ? ORDER BY spawn_time DESC")
                .bind(project)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn project_totals(&self, project: &str) -> DomainResult<ProjectTotals> {
        let row: (i64, i64, i64, i64, f64, f64) = sqlx::query_as(
            r#"SELECT
                COUNT(*),
                COUNT(CASE WHEN state = 'completed' THEN 1 END),
                COUNT(CASE WHEN state = 'failed' THEN 1 END),
                COALESCE(SUM(tokens_used), 0),
                COALESCE(SUM(cost), 0.0),
                COALESCE(AVG(duration_seconds), 0.0)
               FROM agents WHERE project = ?"#,
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?;

        Ok(ProjectTotals {
            total_agents: row.0 as u64,
            completed: row.1 as u64,
            failed: row.2 as u64,
            total_tokens: row.3 as u64,
            total_cost: row.4,
            avg_duration_seconds: row.5,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    agent_id: String,
    driver: String,
    project: String,
    task: String,
    state: String,
    worktree_path: Option<String>,
    spawn_time: String,
    completion_time: Option<String>,
    error: Option<String>,
    tokens_used: Option<i64>,
    cost: Option<f64>,
    duration_seconds: Option<f64>,
}

impl TryFrom<AgentRow> for AgentInstance {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let state = AgentState::from_str(&row.state)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid state: {}", row.state)))?;

        // The registry denormalizes the result into scalar columns;
        // reconstruct it only for completed rows.
        let result = if state == AgentState::Completed {
            Some(AgentResult {
                response: String::new(),
                tokens_used: row.tokens_used.unwrap_or(0) as u64,
                cost: row.cost.unwrap_or(0.0),
                duration_seconds: row.duration_seconds.unwrap_or(0.0),
                tool_use_count: 0,
            })
        } else {
            None
        };

        Ok(AgentInstance {
            id: AgentId::from(row.agent_id),
            driver: row.driver,
            project: row.project,
            task: row.task,
            state,
            worktree_path: row.worktree_path,
            spawned_at: parse_datetime(&row.spawn_time)?,
            completed_at: parse_optional_datetime(row.completion_time)?,
            result,
            error: row.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup() -> SqliteAgentRegistry {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteAgentRegistry::new(pool)
    }

    fn instance(project: &str) -> AgentInstance {
        AgentInstance::new(AgentId::generate("mock"), "mock", project, "task", None)
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let registry = setup().await;
        let instance = instance("proj");
        registry.save(&instance).await.unwrap();

        let loaded = registry.get(&instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, AgentState::Spawning);
        assert_eq!(loaded.project, "proj");
    }

    #[tokio::test]
    async fn test_save_rewrites_row_on_state_change() {
        let registry = setup().await;
        let mut instance = instance("proj");
        registry.save(&instance).await.unwrap();

        instance.mark_running();
        registry.save(&instance).await.unwrap();
        instance.mark_completed(AgentResult {
            response: "ok".into(),
            tokens_used: 200,
            cost: 0.02,
            duration_seconds: 1.5,
            tool_use_count: 1,
        });
        registry.save(&instance).await.unwrap();

        let loaded = registry.get(&instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, AgentState::Completed);
        assert_eq!(loaded.result.map(|r| r.tokens_used), Some(200));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_project_totals() {
        let registry = setup().await;

        let mut done = instance("proj");
        done.mark_running();
        done.mark_completed(AgentResult {
            response: "ok".into(),
            tokens_used: 100,
            cost: 0.01,
            duration_seconds: 2.0,
            tool_use_count: 0,
        });
        registry.save(&done).await.unwrap();

        let mut failed = instance("proj");
        failed.mark_failed("boom");
        registry.save(&failed).await.unwrap();

        registry.save(&instance("other")).await.unwrap();

        let totals = registry.project_totals("proj").await.unwrap();
        assert_eq!(totals.total_agents, 2);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.total_tokens, 100);
        assert!((totals.total_cost - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_list_by_project() {
        let registry = setup().await;
        registry.save(&instance("alpha")).await.unwrap();
        registry.save(&instance("alpha")).await.unwrap();
        registry.save(&instance("beta")).await.unwrap();

        let alpha = registry.list_by_project("alpha").await.unwrap();
        assert_eq!(alpha.len(), 2);
    }
}
