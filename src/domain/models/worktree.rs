//! Worktree domain model.
//!
//! A worktree is an auxiliary working directory of a git repository,
//! sharing history with the primary working copy but holding its own
//! branch, so parallel agents can mutate files without conflicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An isolated working directory tied to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    /// Absolute filesystem path, unique per repository root.
    pub path: PathBuf,
    /// Branch name, unique within the repository.
    pub branch: String,
    /// Owning agent.
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    /// True while an agent is using it; locked worktrees are never
    /// removed by cleanup.
    pub locked: bool,
}

impl Worktree {
    pub fn new(path: PathBuf, branch: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            path,
            branch: branch.into(),
            agent_id: agent_id.into(),
            created_at: Utc::now(),
            locked: true,
        }
    }

    /// The default branch name for an agent's worktree.
    pub fn branch_for_agent(agent_id: &str) -> String {
        format!("agent-{agent_id}")
    }
}

/// One entry parsed from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeListEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worktree_is_locked() {
        let wt = Worktree::new(PathBuf::from("/repo/.agent-worktrees/a1"), "agent-a1", "a1");
        assert!(wt.locked);
        assert_eq!(wt.branch, "agent-a1");
    }

    #[test]
    fn test_branch_naming() {
        assert_eq!(Worktree::branch_for_agent("mock-12ab34cd"), "agent-mock-12ab34cd");
    }
}
