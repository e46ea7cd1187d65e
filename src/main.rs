//! hivemind CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;

use hivemind::cli::{Cli, Commands, WorktreeCommands};
use hivemind::domain::models::{Event, EventKind, EventPayload};
use hivemind::domain::ports::SessionStore;
use hivemind::infrastructure::config::ConfigLoader;
use hivemind::infrastructure::logging;
use hivemind::services::event_store::{EventQuery, EventStore};
use hivemind::System;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load().context("Failed to load configuration")?;
    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
    }

    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    let system = System::init(config).await?;

    match cli.command {
        Commands::Run { task, mode, agents } => {
            let orchestrator = system.orchestrator().await?;
            let response = orchestrator
                .execute(&task, mode.to_execution_mode(agents))
                .await?;
            println!("{response}");
        }

        Commands::Serve { .. } => {
            system
                .api_server()
                .serve()
                .await
                .map_err(|e| anyhow::anyhow!("server error: {e}"))?;
        }

        Commands::Status => {
            let totals = system
                .fleet
                .project_stats(&system.config.project)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&totals)?);
            } else {
                let mut table = Table::new();
                table.set_header(vec![
                    "project",
                    "agents",
                    "completed",
                    "failed",
                    "tokens",
                    "cost",
                ]);
                table.add_row(vec![
                    system.config.project.clone(),
                    totals.total_agents.to_string(),
                    totals.completed.to_string(),
                    totals.failed.to_string(),
                    totals.total_tokens.to_string(),
                    format!("${:.4}", totals.total_cost),
                ]);
                println!("{table}");
            }
        }

        Commands::Events {
            kind,
            project,
            agent,
            limit,
            offset,
        } => {
            let mut query = EventQuery::new().limit(limit).offset(offset);
            if let Some(raw) = kind {
                let kind = EventKind::from_str(&raw)
                    .with_context(|| format!("invalid event kind: {raw}"))?;
                query = query.kind(kind);
            }
            if let Some(project) = project {
                query = query.project(project);
            }
            if let Some(agent) = agent {
                query = query.agent_id(agent);
            }

            let events = system
                .store
                .query(query)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                let mut table = Table::new();
                table.set_header(vec!["timestamp", "kind", "project", "agent", "detail"]);
                for event in &events {
                    table.add_row(vec![
                        event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                        event.kind.to_string(),
                        event.project.clone(),
                        event.agent_id().unwrap_or("-").to_string(),
                        summarize(event),
                    ]);
                }
                println!("{table}");
            }
        }

        Commands::Stats { project } => {
            let project = project.unwrap_or_else(|| system.config.project.clone());
            let stats = system
                .store
                .project_stats(&project)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Worktree(command) => match command {
            WorktreeCommands::List { repo } => {
                let entries = system.worktrees.list(&repo).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    let mut table = Table::new();
                    table.set_header(vec!["path", "branch", "head"]);
                    for entry in &entries {
                        table.add_row(vec![
                            entry.path.display().to_string(),
                            entry.branch.clone().unwrap_or_else(|| "(detached)".into()),
                            entry.head.clone().unwrap_or_default(),
                        ]);
                    }
                    println!("{table}");
                }
            }
            WorktreeCommands::Cleanup { repo } => {
                let removed = system
                    .worktrees
                    .cleanup_old(&repo, chrono::Utc::now())
                    .await?;
                println!("Removed {} worktree(s)", removed.len());
            }
            WorktreeCommands::Remove { agent_id, force } => {
                match system.worktrees.remove(&agent_id, force).await? {
                    Some(worktree) => println!("Removed {}", worktree.path.display()),
                    None => println!("No worktree tracked for {agent_id}"),
                }
            }
        },

        Commands::Session { workspace } => match workspace {
            Some(workspace) => match system.sessions.load(&workspace).await? {
                Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                None => println!("No session for workspace: {workspace}"),
            },
            None => {
                for workspace in system.sessions.list_workspaces().await? {
                    println!("{workspace}");
                }
            }
        },
    }

    Ok(())
}

fn truncate_line(text: &str, max_chars: usize) -> String {
    let mut line: String = text.replace('\n', " ");
    if line.chars().count() > max_chars {
        line = line.chars().take(max_chars.saturating_sub(3)).collect();
        line.push_str("...");
    }
    line
}

fn summarize(event: &Event) -> String {
    match &event.payload {
        EventPayload::Agent(body) => {
            if let Some(error) = &body.error {
                truncate_line(&format!("error: {error}"), 60)
            } else if let Some(response) = &body.response {
                truncate_line(response, 60)
            } else {
                truncate_line(&body.task, 60)
            }
        }
        EventPayload::Tool(body) => body.tool_name.clone(),
        EventPayload::Worktree(body) => body.worktree_path.clone(),
        EventPayload::Session(body) => format!(
            "{} turns, {} tokens",
            body.conversation_turns, body.total_tokens
        ),
    }
}
