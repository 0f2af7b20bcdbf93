// ABOUTME: Typed wrapper over the git CLI for worktree and branch operations
// ABOUTME: Every invocation is an explicit arg vector, never a shell string

use crate::error::WorkspaceError;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output, WorkspaceError> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output, WorkspaceError> {
        let output = self.run(args).await?;

        if !output.status.success() {
            return Err(WorkspaceError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }

    pub async fn init(&self) -> Result<(), WorkspaceError> {
        self.run_checked(&["init", "--initial-branch", "main"])
            .await?;
        Ok(())
    }

    pub async fn config(&self, key: &str, value: &str) -> Result<(), WorkspaceError> {
        self.run_checked(&["config", key, value]).await?;
        Ok(())
    }

    pub async fn add_all(&self) -> Result<(), WorkspaceError> {
        self.run_checked(&["add", "-A"]).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<(), WorkspaceError> {
        self.run_checked(&["commit", "-m", message]).await?;
        Ok(())
    }

    /// Resolve a revision to a commit id, or None if it does not exist.
    pub async fn rev_parse(&self, rev: &str) -> Result<Option<String>, WorkspaceError> {
        let output = self
            .run(&["rev-parse", "--verify", "--quiet", &format!("{rev}^{{commit}}")])
            .await?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, WorkspaceError> {
        Ok(self
            .rev_parse(&format!("refs/heads/{branch}"))
            .await?
            .is_some())
    }

    /// Tracked-file status lines (porcelain), untracked excluded.
    pub async fn dirty_tracked_files(&self) -> Result<Vec<String>, WorkspaceError> {
        let output = self
            .run_checked(&["status", "--porcelain", "--untracked-files=no"])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    /// Snapshot the working tree into a dangling commit without touching the
    /// index or HEAD. Returns None when there is nothing to snapshot.
    pub async fn stash_create(&self) -> Result<Option<String>, WorkspaceError> {
        let output = self.run_checked(&["stash", "create"]).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }

    pub async fn worktree_add_new_branch(
        &self,
        path: &Path,
        branch: &str,
        base: &str,
    ) -> Result<(), WorkspaceError> {
        self.run_checked(&[
            "worktree",
            "add",
            "-b",
            branch,
            &path.to_string_lossy(),
            base,
        ])
        .await?;
        Ok(())
    }

    pub async fn worktree_add_existing_branch(
        &self,
        path: &Path,
        branch: &str,
    ) -> Result<(), WorkspaceError> {
        self.run_checked(&["worktree", "add", &path.to_string_lossy(), branch])
            .await?;
        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<(), WorkspaceError> {
        self.run_checked(&["worktree", "remove", "--force", &path.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Drop metadata for worktree directories that no longer exist, so
    /// occupancy checks see the true state.
    pub async fn worktree_prune(&self) -> Result<(), WorkspaceError> {
        self.run_checked(&["worktree", "prune"]).await?;
        Ok(())
    }

    /// Parsed `git worktree list --porcelain`: (worktree path, checked-out
    /// branch ref if any).
    pub async fn worktree_list(&self) -> Result<Vec<(PathBuf, Option<String>)>, WorkspaceError> {
        let output = self.run_checked(&["worktree", "list", "--porcelain"]).await?;
        let text = String::from_utf8_lossy(&output.stdout);

        let mut entries = Vec::new();
        let mut current: Option<PathBuf> = None;
        let mut branch: Option<String> = None;
        for line in text.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(p) = current.take() {
                    entries.push((p, branch.take()));
                }
                current = Some(PathBuf::from(path));
                branch = None;
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.to_string());
            }
        }
        if let Some(p) = current {
            entries.push((p, branch));
        }

        Ok(entries)
    }
}
