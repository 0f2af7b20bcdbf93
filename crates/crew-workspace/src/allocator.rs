// ABOUTME: Branch-scoped workspace allocation for crew agents
// ABOUTME: One worktree per agent, serialized by a lockfile with bounded wait

use crate::error::WorkspaceError;
use crate::git::GitRunner;
use crew_core::DirtyBasePolicy;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "allocations.lock";
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// Allocates isolated, branch-scoped workspaces derived from a base
/// revision. Workspace lifetime is tied to the session, not the agent
/// process; `release` is explicit, never automatic.
pub struct WorkspaceAllocator {
    repo_root: PathBuf,
    workspaces_dir: PathBuf,
    policy: DirtyBasePolicy,
    lock_wait: Duration,
}

impl WorkspaceAllocator {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        workspaces_dir: impl Into<PathBuf>,
        policy: DirtyBasePolicy,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            workspaces_dir: workspaces_dir.into(),
            policy,
            lock_wait: Duration::from_secs(10),
        }
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    fn git(&self) -> GitRunner {
        GitRunner::new(&self.repo_root)
    }

    /// Branch name derived deterministically from the agent name.
    pub fn branch_for(agent: &str) -> String {
        format!("crew/{agent}")
    }

    pub fn workspace_path(&self, agent: &str) -> PathBuf {
        self.workspaces_dir.join(agent)
    }

    /// Apply the session's dirty-base policy to the requested base revision.
    /// Snapshot captures uncommitted tracked changes once; the returned
    /// revision is shared by every agent allocated afterwards.
    pub async fn resolve_base(&self, requested: &str) -> Result<String, WorkspaceError> {
        let git = self.git();

        if git.rev_parse(requested).await?.is_none() {
            return Err(WorkspaceError::MissingBase(requested.to_string()));
        }

        let dirty = git.dirty_tracked_files().await?;
        if dirty.is_empty() {
            return Ok(requested.to_string());
        }

        match self.policy {
            DirtyBasePolicy::Forbid => Err(WorkspaceError::DirtyBase),
            DirtyBasePolicy::Ignore => Ok(requested.to_string()),
            DirtyBasePolicy::Snapshot => {
                let snapshot = git.stash_create().await?;
                match snapshot {
                    Some(rev) => {
                        info!(revision = %rev, "Snapshotted dirty base for allocation");
                        Ok(rev)
                    }
                    None => Ok(requested.to_string()),
                }
            }
        }
    }

    /// Pre-flight for a whole team: verify no agent's branch is checked out
    /// in a foreign worktree before any workspace is created, so a conflict
    /// aborts the allocation sequence instead of leaving it half done.
    pub async fn check_conflicts(&self, agents: &[String]) -> Result<(), WorkspaceError> {
        let git = self.git();
        git.worktree_prune().await?;
        let worktrees = git.worktree_list().await?;

        for agent in agents {
            let branch = Self::branch_for(agent);
            let branch_ref = format!("refs/heads/{branch}");
            let expected = self.workspace_path(agent);
            for (wt_path, wt_branch) in &worktrees {
                if wt_branch.as_deref() == Some(branch_ref.as_str()) && *wt_path != expected {
                    return Err(WorkspaceError::BranchCheckedOut {
                        branch,
                        path: wt_path.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Create or reuse the agent's workspace at the given base revision.
    ///
    /// Stale worktree metadata is pruned first so the occupancy check sees
    /// the true state; a branch checked out in a foreign worktree fails
    /// loudly instead of being silently reused.
    pub async fn allocate(&self, agent: &str, base: &str) -> Result<PathBuf, WorkspaceError> {
        let git = self.git();
        let branch = Self::branch_for(agent);
        let path = self.workspace_path(agent);

        git.worktree_prune().await?;

        if git.rev_parse(base).await?.is_none() {
            return Err(WorkspaceError::MissingBase(base.to_string()));
        }

        let branch_ref = format!("refs/heads/{branch}");
        for (wt_path, wt_branch) in git.worktree_list().await? {
            if wt_branch.as_deref() == Some(branch_ref.as_str()) {
                if wt_path == path {
                    debug!(agent = %agent, path = %path.display(), "Reusing existing workspace");
                    return Ok(path);
                }
                return Err(WorkspaceError::BranchCheckedOut {
                    branch,
                    path: wt_path,
                });
            }
        }

        std::fs::create_dir_all(&self.workspaces_dir)?;
        let _lock = AllocationLock::acquire(
            self.workspaces_dir.join(LOCK_FILE),
            self.lock_wait,
        )
        .await?;

        if git.branch_exists(&branch).await? {
            git.worktree_add_existing_branch(&path, &branch).await?;
        } else {
            git.worktree_add_new_branch(&path, &branch, base).await?;
        }

        info!(agent = %agent, branch = %branch, path = %path.display(), "Allocated workspace");
        Ok(path)
    }

    /// Remove the agent's worktree. The branch is kept; history stays
    /// reachable after the sandbox is gone.
    pub async fn release(&self, agent: &str) -> Result<(), WorkspaceError> {
        let path = self.workspace_path(agent);
        if !path.exists() {
            return Ok(());
        }

        self.git().worktree_remove(&path).await?;
        info!(agent = %agent, path = %path.display(), "Released workspace");
        Ok(())
    }
}

/// Exclusive allocation lock: a lockfile created with `create_new`, waited
/// on with a bounded retry loop, removed on drop.
struct AllocationLock {
    path: PathBuf,
}

impl AllocationLock {
    async fn acquire(path: PathBuf, wait: Duration) -> Result<Self, WorkspaceError> {
        let start = std::time::Instant::now();
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= wait {
                        warn!(path = %path.display(), "Allocation lock wait exhausted");
                        return Err(WorkspaceError::LockTimeout(path));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for AllocationLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove allocation lock");
        }
    }
}
