//! Command-line interface definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::services::orchestrator::ExecutionMode;

#[derive(Parser)]
#[command(name = "hivemind", version, about = "Multi-agent orchestration hub")]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a task through the orchestrator.
    Run {
        /// The natural-language task.
        task: String,
        /// Execution mode.
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
        /// Number of agents in multi mode.
        #[arg(short = 'n', long, default_value_t = 3)]
        agents: usize,
    },

    /// Start the HTTP query API and websocket stream.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show fleet counters and project aggregates.
    Status,

    /// Query the event log.
    Events {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Filter by agent id.
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Aggregate event statistics for a project.
    Stats {
        /// Project name; defaults to the configured project.
        project: Option<String>,
    },

    /// Manage agent worktrees.
    #[command(subcommand)]
    Worktree(WorktreeCommands),

    /// Show a workspace session, or list workspaces when omitted.
    Session {
        workspace: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum WorktreeCommands {
    /// List worktrees in a repository.
    List {
        #[arg(default_value = ".")]
        repo: PathBuf,
    },
    /// Remove old unlocked worktrees.
    Cleanup {
        #[arg(default_value = ".")]
        repo: PathBuf,
    },
    /// Remove one agent's worktree.
    Remove {
        agent_id: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Auto,
    Single,
    Multi,
}

impl ModeArg {
    pub fn to_execution_mode(self, agents: usize) -> ExecutionMode {
        match self {
            Self::Auto => ExecutionMode::Auto,
            Self::Single => ExecutionMode::Single,
            Self::Multi => ExecutionMode::Multi(agents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(ModeArg::Single.to_execution_mode(5), ExecutionMode::Single);
        assert_eq!(ModeArg::Multi.to_execution_mode(5), ExecutionMode::Multi(5));
    }
}
