//! Worktree manager: per-agent filesystem isolation over git worktrees.
//!
//! Each concurrent agent gets its own working directory under
//! `<repo_root>/.agent-worktrees/<agent_id>`, checked out on branch
//! `agent-<agent_id>`. The on-disk worktrees are authoritative; the
//! in-process tracking map is reconstructable from `git worktree list`.
//!
//! Creation and removal are serialized per repository root so the
//! branch probe-and-create dance never races at the git level.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::{Worktree, WorktreeListEntry};

/// Error type for worktree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Worktree path already exists: {0}")]
    WorktreeExists(PathBuf),

    #[error("No worktree tracked for agent: {0}")]
    NoWorktree(String),

    #[error("Worktree is locked: {0}")]
    Locked(PathBuf),

    #[error("Primary working copy has uncommitted changes: {0}")]
    DirtyWorkspace(PathBuf),

    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },

    #[error("git {command} timed out")]
    Timeout { command: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of `sync_to_main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The worktree had no changes to merge.
    NoChanges,
    /// Changes were committed and merged into main.
    Merged,
}

/// Tuning for the worktree manager.
#[derive(Debug, Clone)]
pub struct WorktreeManagerConfig {
    /// Unlocked worktrees older than this are removed by `cleanup_old`.
    pub cleanup_after: Duration,
    /// Timeout for read-only git queries.
    pub read_timeout: Duration,
    /// Timeout for git commands that mutate the repository.
    pub mutate_timeout: Duration,
}

impl Default for WorktreeManagerConfig {
    fn default() -> Self {
        Self {
            cleanup_after: Duration::from_secs(24 * 60 * 60),
            read_timeout: Duration::from_secs(5),
            mutate_timeout: Duration::from_secs(30),
        }
    }
}

/// Directory under the repository root holding agent worktrees.
const WORKTREE_BASE: &str = ".agent-worktrees";

/// Manages isolated git worktrees for parallel agent execution.
pub struct WorktreeManager {
    config: WorktreeManagerConfig,
    tracked: Mutex<HashMap<String, Worktree>>,
    repo_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Default for WorktreeManager {
    fn default() -> Self {
        Self::new(WorktreeManagerConfig::default())
    }
}

impl WorktreeManager {
    pub fn new(config: WorktreeManagerConfig) -> Self {
        Self {
            config,
            tracked: Mutex::new(HashMap::new()),
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `path` is inside a git repository.
    pub async fn is_repo(&self, path: &Path) -> bool {
        match self
            .run_git(path, &["rev-parse", "--git-dir"], self.config.read_timeout)
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    /// Canonical repository root for `path`, symlinks resolved.
    pub async fn repo_root(&self, path: &Path) -> Option<PathBuf> {
        let output = self
            .run_git(
                path,
                &["rev-parse", "--show-toplevel"],
                self.config.read_timeout,
            )
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tokio::fs::canonicalize(&root).await.ok()
    }

    /// Create a worktree for an agent on a fresh branch, or attach to
    /// the branch if it already exists. The new worktree starts locked.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn create(
        &self,
        repo_path: &Path,
        agent_id: &str,
        branch: Option<&str>,
    ) -> Result<PathBuf, WorktreeError> {
        if !self.is_repo(repo_path).await {
            return Err(WorktreeError::NotARepository(repo_path.to_path_buf()));
        }
        let root = self
            .repo_root(repo_path)
            .await
            .ok_or_else(|| WorktreeError::NotARepository(repo_path.to_path_buf()))?;

        let repo_lock = self.lock_for_repo(&root).await;
        let _guard = repo_lock.lock().await;

        let base = root.join(WORKTREE_BASE);
        tokio::fs::create_dir_all(&base).await?;

        let worktree_path = base.join(agent_id);
        if tokio::fs::try_exists(&worktree_path).await? {
            return Err(WorktreeError::WorktreeExists(worktree_path));
        }

        let branch = branch
            .map(ToString::to_string)
            .unwrap_or_else(|| Worktree::branch_for_agent(agent_id));
        let path_str = worktree_path.to_string_lossy().to_string();

        // Try a new branch first; when it already exists, attach to it.
        let created = self
            .run_git(
                &root,
                &["worktree", "add", "-b", &branch, &path_str],
                self.config.mutate_timeout,
            )
            .await?;

        if !created.status.success() {
            let attached = self
                .run_git(
                    &root,
                    &["worktree", "add", &path_str, &branch],
                    self.config.mutate_timeout,
                )
                .await?;
            if !attached.status.success() {
                return Err(WorktreeError::GitFailed {
                    command: "worktree add".to_string(),
                    stderr: String::from_utf8_lossy(&attached.stderr).trim().to_string(),
                });
            }
            debug!(branch = %branch, "attached worktree to existing branch");
        }

        let worktree = Worktree::new(worktree_path.clone(), branch.clone(), agent_id);
        self.tracked
            .lock()
            .await
            .insert(agent_id.to_string(), worktree);

        info!(path = %worktree_path.display(), branch = %branch, "created worktree");
        Ok(worktree_path)
    }

    /// Get the agent's tracked worktree, create one, or degrade to the
    /// original path when isolation is impossible.
    ///
    /// Calling twice with the same `agent_id` returns the same path
    /// without invoking git again.
    pub async fn get_or_create(
        &self,
        repo_path: &Path,
        agent_id: &str,
        branch: Option<&str>,
    ) -> PathBuf {
        // Tracked first: a repeat call must not touch git at all.
        if let Some(existing) = self.tracked.lock().await.get(agent_id) {
            debug!(path = %existing.path.display(), "reusing existing worktree");
            return existing.path.clone();
        }

        if !self.is_repo(repo_path).await {
            return repo_path.to_path_buf();
        }

        match self.create(repo_path, agent_id, branch).await {
            Ok(path) => path,
            Err(error) => {
                warn!(%error, agent_id, "worktree creation failed, falling back to workspace path");
                repo_path.to_path_buf()
            }
        }
    }

    /// Release an agent's worktree for cleanup. Returns false when no
    /// worktree is tracked for the agent.
    pub async fn unlock(&self, agent_id: &str) -> bool {
        let mut tracked = self.tracked.lock().await;
        match tracked.get_mut(agent_id) {
            Some(worktree) => {
                worktree.locked = false;
                debug!(agent_id, "unlocked worktree");
                true
            }
            None => false,
        }
    }

    /// Remove an agent's worktree. Refuses while locked unless `force`.
    ///
    /// Idempotent: removing an untracked agent is a no-op returning
    /// `Ok(None)`.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn remove(
        &self,
        agent_id: &str,
        force: bool,
    ) -> Result<Option<Worktree>, WorktreeError> {
        let worktree = {
            let tracked = self.tracked.lock().await;
            match tracked.get(agent_id) {
                Some(worktree) => worktree.clone(),
                None => return Ok(None),
            }
        };

        if worktree.locked && !force {
            return Err(WorktreeError::Locked(worktree.path.clone()));
        }

        // <root>/.agent-worktrees/<agent_id> -> the repository root.
        let root = worktree
            .path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .ok_or_else(|| WorktreeError::NoWorktree(agent_id.to_string()))?;

        let repo_lock = self.lock_for_repo(&root).await;
        let _guard = repo_lock.lock().await;

        let path_str = worktree.path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);

        let output = self
            .run_git(&root, &args, self.config.mutate_timeout)
            .await?;
        if !output.status.success() {
            return Err(WorktreeError::GitFailed {
                command: "worktree remove".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.tracked.lock().await.remove(agent_id);
        info!(path = %worktree.path.display(), "removed worktree");
        Ok(Some(worktree))
    }

    /// Remove unlocked worktrees under this repository that are older
    /// than the configured retention, relative to `now`. Locked
    /// worktrees are never touched regardless of age.
    pub async fn cleanup_old(
        &self,
        repo_path: &Path,
        now: DateTime<Utc>,
    ) -> Result<Vec<Worktree>, WorktreeError> {
        let root = match self.repo_root(repo_path).await {
            Some(root) => root,
            None => return Ok(Vec::new()),
        };

        let cutoff = now
            - chrono::Duration::from_std(self.config.cleanup_after)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let candidates: Vec<String> = {
            let tracked = self.tracked.lock().await;
            tracked
                .values()
                .filter(|wt| wt.path.starts_with(&root))
                .filter(|wt| !wt.locked && wt.created_at < cutoff)
                .map(|wt| wt.agent_id.clone())
                .collect()
        };

        let mut removed = Vec::new();
        for agent_id in candidates {
            match self.remove(&agent_id, false).await {
                Ok(Some(worktree)) => removed.push(worktree),
                Ok(None) => {}
                Err(error) => warn!(%error, agent_id, "failed to clean up worktree"),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "cleaned up old worktrees");
        }
        Ok(removed)
    }

    /// Parse `git worktree list --porcelain` into structured records.
    pub async fn list(&self, repo_path: &Path) -> Result<Vec<WorktreeListEntry>, WorktreeError> {
        if !self.is_repo(repo_path).await {
            return Err(WorktreeError::NotARepository(repo_path.to_path_buf()));
        }

        let output = self
            .run_git(
                repo_path,
                &["worktree", "list", "--porcelain"],
                self.config.read_timeout,
            )
            .await?;
        if !output.status.success() {
            return Err(WorktreeError::GitFailed {
                command: "worktree list".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Self::parse_porcelain(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Stage and commit the worktree's changes, then merge its branch
    /// into `main` with a non-fast-forward merge.
    ///
    /// Refuses when the primary working copy is dirty: the merge
    /// requires checking out `main` there. Never invoked by the core
    /// automatically.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn sync_to_main(&self, agent_id: &str) -> Result<SyncOutcome, WorktreeError> {
        let worktree = {
            let tracked = self.tracked.lock().await;
            tracked
                .get(agent_id)
                .cloned()
                .ok_or_else(|| WorktreeError::NoWorktree(agent_id.to_string()))?
        };

        let root = worktree
            .path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .ok_or_else(|| WorktreeError::NoWorktree(agent_id.to_string()))?;

        let repo_lock = self.lock_for_repo(&root).await;
        let _guard = repo_lock.lock().await;

        if !self.status_clean(&root).await? {
            return Err(WorktreeError::DirtyWorkspace(root));
        }

        if self.status_clean(&worktree.path).await? {
            debug!(agent_id, "no changes to sync");
            return Ok(SyncOutcome::NoChanges);
        }

        self.run_git_checked(&worktree.path, &["add", "-A"], "add")
            .await?;
        let message = format!("Agent {agent_id} changes");
        self.run_git_checked(&worktree.path, &["commit", "-m", &message], "commit")
            .await?;

        self.run_git_checked(&root, &["checkout", "main"], "checkout")
            .await?;
        let merge_message = format!("Merge agent {agent_id} changes");
        self.run_git_checked(
            &root,
            &["merge", "--no-ff", &worktree.branch, "-m", &merge_message],
            "merge",
        )
        .await?;

        info!(agent_id, branch = %worktree.branch, "synced worktree to main");
        Ok(SyncOutcome::Merged)
    }

    /// Snapshot of the tracked worktree for an agent, if any.
    pub async fn tracked(&self, agent_id: &str) -> Option<Worktree> {
        self.tracked.lock().await.get(agent_id).cloned()
    }

    /// Number of tracked worktrees.
    pub async fn tracked_count(&self) -> usize {
        self.tracked.lock().await.len()
    }

    fn parse_porcelain(output: &str) -> Vec<WorktreeListEntry> {
        let mut entries = Vec::new();
        let mut current: Option<WorktreeListEntry> = None;

        for line in output.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some(WorktreeListEntry {
                    path: PathBuf::from(path),
                    head: None,
                    branch: None,
                });
            } else if let Some(head) = line.strip_prefix("HEAD ") {
                if let Some(entry) = current.as_mut() {
                    entry.head = Some(head.to_string());
                }
            } else if let Some(branch) = line.strip_prefix("branch ") {
                if let Some(entry) = current.as_mut() {
                    entry.branch = Some(
                        branch
                            .strip_prefix("refs/heads/")
                            .unwrap_or(branch)
                            .to_string(),
                    );
                }
            }
        }
        if let Some(entry) = current {
            entries.push(entry);
        }
        entries
    }

    async fn status_clean(&self, dir: &Path) -> Result<bool, WorktreeError> {
        let output = self
            .run_git(dir, &["status", "--porcelain"], self.config.read_timeout)
            .await?;
        if !output.status.success() {
            return Err(WorktreeError::GitFailed {
                command: "status".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout.iter().all(u8::is_ascii_whitespace))
    }

    async fn run_git_checked(
        &self,
        cwd: &Path,
        args: &[&str],
        command: &str,
    ) -> Result<(), WorktreeError> {
        let output = self
            .run_git(cwd, args, self.config.mutate_timeout)
            .await?;
        if !output.status.success() {
            return Err(WorktreeError::GitFailed {
                command: command.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn run_git(
        &self,
        cwd: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, WorktreeError> {
        let command_line = args.join(" ");
        let result = tokio::time::timeout(
            timeout,
            Command::new("git")
                .args(args)
                .current_dir(cwd)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(WorktreeError::Io(error)),
            Err(_) => Err(WorktreeError::Timeout {
                command: command_line,
            }),
        }
    }

    async fn lock_for_repo(&self, root: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.repo_locks.lock().await;
        locks
            .entry(root.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_non_repo_returns_path_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorktreeManager::default();

        let path = manager.get_or_create(dir.path(), "agent-1", None).await;
        assert_eq!(path, dir.path().to_path_buf());
        assert_eq!(manager.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_untracked_is_noop() {
        let manager = WorktreeManager::default();
        let removed = manager.remove("nobody", false).await.unwrap();
        assert!(removed.is_none());
    }

    #[tokio::test]
    async fn test_unlock_untracked_returns_false() {
        let manager = WorktreeManager::default();
        assert!(!manager.unlock("nobody").await);
    }

    #[test]
    fn test_parse_porcelain() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n\
                      worktree /repo/.agent-worktrees/a1\nHEAD def456\nbranch refs/heads/agent-a1\n\n\
                      worktree /repo/.agent-worktrees/a2\nHEAD 789abc\ndetached\n";
        let entries = WorktreeManager::parse_porcelain(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, PathBuf::from("/repo/.agent-worktrees/a1"));
        assert_eq!(entries[1].branch.as_deref(), Some("agent-a1"));
        assert_eq!(entries[2].branch, None);
        assert_eq!(entries[2].head.as_deref(), Some("789abc"));
    }

    #[test]
    fn test_default_config_timeouts() {
        let config = WorktreeManagerConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.mutate_timeout, Duration::from_secs(30));
        assert_eq!(config.cleanup_after, Duration::from_secs(86_400));
    }
}
