// ABOUTME: Error types for workspace allocation
// ABOUTME: Git failures, branch collisions, dirty-base refusal, lock timeout

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// A git invocation failed; carries the command's stderr.
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// The agent's branch is already checked out in another worktree.
    /// Allocation fails loudly rather than reusing a conflicting workspace.
    #[error("branch '{branch}' is already checked out at {path} (release it with 'crew teamdelete' or 'git worktree remove')")]
    BranchCheckedOut { branch: String, path: PathBuf },

    /// The base repository has uncommitted tracked changes and the session
    /// policy forbids allocating from a dirty base.
    #[error("base repository has uncommitted changes (commit or stash them, or set dirty_base = \"snapshot\")")]
    DirtyBase,

    /// The requested base revision does not resolve.
    #[error("base revision '{0}' not found")]
    MissingBase(String),

    /// Another allocation held the lock past the bounded wait.
    #[error("timed out waiting for allocation lock at {0}")]
    LockTimeout(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
