//! SQLite implementation of the event store.
//!
//! One `events` table carrying the union of every kind's fields (all
//! nullable) plus a JSON metadata column, indexed on kind, project,
//! agent_id, and timestamp. Timestamps are stored as fixed-precision
//! RFC3339 strings so the timestamp index sorts lexicographically.

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::domain::models::{
    AgentEventBody, Event, EventKind, EventPayload, SessionEventBody, ToolEventBody,
    WorktreeEventBody,
};
use crate::services::event_store::{
    EventQuery, EventStore, EventStoreError, ProjectStats, ProjectSummary, ToolUsage,
};

use super::parse_datetime;

pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, event: &Event) -> Result<(), EventStoreError> {
        let mut agent_id: Option<&str> = None;
        let mut driver: Option<&str> = None;
        let mut task: Option<&str> = None;
        let mut workspace_path: Option<&str> = None;
        let mut tokens_used: Option<i64> = None;
        let mut cost: Option<f64> = None;
        let mut duration_seconds: Option<f64> = None;
        let mut response: Option<&str> = None;
        let mut error: Option<&str> = None;
        let mut tool_name: Option<&str> = None;
        let mut tool_input: Option<String> = None;
        let mut success: Option<bool> = None;
        let mut worktree_path: Option<&str> = None;
        let mut repo_path: Option<&str> = None;
        let mut branch: Option<&str> = None;
        let mut workspace: Option<&str> = None;
        let mut total_tokens: Option<i64> = None;
        let mut total_cost: Option<f64> = None;
        let mut conversation_turns: Option<i64> = None;

        match &event.payload {
            EventPayload::Agent(body) => {
                agent_id = Some(&body.agent_id);
                driver = Some(&body.driver);
                task = Some(&body.task);
                workspace_path = Some(&body.workspace_path);
                tokens_used = body.tokens_used.map(|t| t as i64);
                cost = body.cost;
                duration_seconds = body.duration_seconds;
                response = body.response.as_deref();
                error = body.error.as_deref();
            }
            EventPayload::Tool(body) => {
                agent_id = Some(&body.agent_id);
                tool_name = Some(&body.tool_name);
                tool_input = Some(serde_json::to_string(&body.tool_input)?);
                success = Some(body.success);
                error = body.error.as_deref();
            }
            EventPayload::Worktree(body) => {
                agent_id = Some(&body.agent_id);
                worktree_path = Some(&body.worktree_path);
                repo_path = Some(&body.repo_path);
                branch = Some(&body.branch);
            }
            EventPayload::Session(body) => {
                workspace = Some(&body.workspace);
                total_tokens = Some(body.total_tokens as i64);
                total_cost = Some(body.total_cost);
                conversation_turns = Some(body.conversation_turns as i64);
            }
        }

        let metadata = serde_json::to_string(&event.metadata)?;

        sqlx::query(
            r#"INSERT INTO events
               (kind, timestamp, project,
                agent_id, driver, task, workspace_path,
                tokens_used, cost, duration_seconds, response, error,
                tool_name, tool_input, success,
                worktree_path, repo_path, branch,
                workspace, total_tokens, total_cost, conversation_turns,
                metadata)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.kind.as_str())
        .bind(event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(&event.project)
        .bind(agent_id)
        .bind(driver)
        .bind(task)
        .bind(workspace_path)
        .bind(tokens_used)
        .bind(cost)
        .bind(duration_seconds)
        .bind(response)
        .bind(error)
        .bind(tool_name)
        .bind(tool_input)
        .bind(success)
        .bind(worktree_path)
        .bind(repo_path)
        .bind(branch)
        .bind(workspace)
        .bind(total_tokens)
        .bind(total_cost)
        .bind(conversation_turns)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::Append(e.to_string()))?;

        Ok(())
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<Event>, EventStoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM events WHERE 1=1");
        if let Some(kind) = query.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(project) = &query.project {
            builder.push(" AND project = ").push_bind(project.clone());
        }
        if let Some(agent_id) = &query.agent_id {
            builder.push(" AND agent_id = ").push_bind(agent_id.clone());
        }
        builder
            .push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let rows: Vec<EventRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::Query(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn project_stats(&self, project: &str) -> Result<ProjectStats, EventStoreError> {
        let (total_agents,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT agent_id) FROM events
             WHERE project = ? AND kind = 'agent_spawned'",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?;

        let (completed,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM events WHERE project = ? AND kind = 'agent_completed'",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?;

        let (failed,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM events WHERE project = ? AND kind = 'agent_failed'",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?;

        let (total_cost, total_tokens): (f64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(cost), 0.0), COALESCE(SUM(tokens_used), 0)
             FROM events WHERE project = ? AND kind = 'agent_completed'",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await?;

        let tool_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT tool_name, COUNT(*) AS uses FROM events
             WHERE project = ? AND kind = 'tool_used' AND tool_name IS NOT NULL
             GROUP BY tool_name ORDER BY uses DESC LIMIT 10",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProjectStats {
            project: project.to_string(),
            total_agents: total_agents as u64,
            completed: completed as u64,
            failed: failed as u64,
            total_cost,
            total_tokens: total_tokens as u64,
            tool_usage: tool_rows
                .into_iter()
                .map(|(tool_name, count)| ToolUsage {
                    tool_name,
                    count: count as u64,
                })
                .collect(),
        })
    }

    async fn agent_timeline(&self, agent_id: &str) -> Result<Vec<Event>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM events WHERE agent_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Query(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn clear_project(&self, project: &str) -> Result<u64, EventStoreError> {
        let result = sqlx::query("DELETE FROM events WHERE project = ?")
            .bind(project)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, EventStoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT project, COUNT(*) AS event_count FROM events
             GROUP BY project ORDER BY event_count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(project, event_count)| ProjectSummary {
                project,
                event_count: event_count as u64,
            })
            .collect())
    }

    async fn count(&self) -> Result<u64, EventStoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    kind: String,
    timestamp: String,
    project: String,
    agent_id: Option<String>,
    driver: Option<String>,
    task: Option<String>,
    workspace_path: Option<String>,
    tokens_used: Option<i64>,
    cost: Option<f64>,
    duration_seconds: Option<f64>,
    response: Option<String>,
    error: Option<String>,
    tool_name: Option<String>,
    tool_input: Option<String>,
    success: Option<bool>,
    worktree_path: Option<String>,
    repo_path: Option<String>,
    branch: Option<String>,
    workspace: Option<String>,
    total_tokens: Option<i64>,
    total_cost: Option<f64>,
    conversation_turns: Option<i64>,
    metadata: Option<String>,
}

impl TryFrom<EventRow> for Event {
    type Error = EventStoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let kind = EventKind::from_str(&row.kind)
            .ok_or_else(|| EventStoreError::Serialization(format!("Invalid kind: {}", row.kind)))?;

        let timestamp = parse_datetime(&row.timestamp)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        let payload = match kind {
            EventKind::AgentSpawned
            | EventKind::AgentStarted
            | EventKind::AgentCompleted
            | EventKind::AgentFailed => EventPayload::Agent(AgentEventBody {
                agent_id: row.agent_id.unwrap_or_default(),
                driver: row.driver.unwrap_or_default(),
                task: row.task.unwrap_or_default(),
                workspace_path: row.workspace_path.unwrap_or_default(),
                tokens_used: row.tokens_used.map(|t| t as u64),
                cost: row.cost,
                duration_seconds: row.duration_seconds,
                response: row.response,
                error: row.error,
            }),
            EventKind::ToolUsed => EventPayload::Tool(ToolEventBody {
                agent_id: row.agent_id.unwrap_or_default(),
                tool_name: row.tool_name.unwrap_or_default(),
                tool_input: row
                    .tool_input
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or(serde_json::Value::Null),
                success: row.success.unwrap_or(false),
                error: row.error,
            }),
            EventKind::WorktreeCreated | EventKind::WorktreeRemoved => {
                EventPayload::Worktree(WorktreeEventBody {
                    agent_id: row.agent_id.unwrap_or_default(),
                    worktree_path: row.worktree_path.unwrap_or_default(),
                    repo_path: row.repo_path.unwrap_or_default(),
                    branch: row.branch.unwrap_or_default(),
                })
            }
            EventKind::SessionUpdated => EventPayload::Session(SessionEventBody {
                workspace: row.workspace.unwrap_or_default(),
                total_tokens: row.total_tokens.unwrap_or(0) as u64,
                total_cost: row.total_cost.unwrap_or(0.0),
                conversation_turns: row.conversation_turns.unwrap_or(0) as u64,
            }),
        };

        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        Ok(Event {
            kind,
            timestamp,
            project: row.project,
            payload,
            metadata,
        })
    }
}
