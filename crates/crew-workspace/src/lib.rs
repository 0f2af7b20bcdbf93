// ABOUTME: Git worktree allocator for crew agent sandboxes
// ABOUTME: Re-exports the allocator, git runner, and error type

pub mod allocator;
pub mod error;
pub mod git;

pub use allocator::WorkspaceAllocator;
pub use error::WorkspaceError;
pub use git::GitRunner;
