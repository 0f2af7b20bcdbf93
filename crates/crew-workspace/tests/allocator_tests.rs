// ABOUTME: Integration tests for workspace allocation against real git repos
// ABOUTME: Covers reuse, branch collisions, dirty-base policies, and release

use crew_core::DirtyBasePolicy;
use crew_workspace::{GitRunner, WorkspaceAllocator, WorkspaceError};
use tempfile::TempDir;

async fn temp_repo() -> (TempDir, GitRunner) {
    let dir = TempDir::new().unwrap();
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let git = GitRunner::new(&repo);
    git.init().await.unwrap();
    git.config("user.email", "crew@example.com").await.unwrap();
    git.config("user.name", "crew").await.unwrap();
    std::fs::write(repo.join("README.md"), "hello\n").unwrap();
    git.add_all().await.unwrap();
    git.commit("initial").await.unwrap();
    (dir, git)
}

fn allocator(dir: &TempDir, policy: DirtyBasePolicy) -> WorkspaceAllocator {
    WorkspaceAllocator::new(
        dir.path().join("repo"),
        dir.path().join("workspaces"),
        policy,
    )
}

#[tokio::test]
async fn allocate_creates_branch_scoped_worktree() {
    let (dir, git) = temp_repo().await;
    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);

    let path = alloc.allocate("worker-1", "HEAD").await.unwrap();
    assert!(path.join("README.md").exists());
    assert!(git.branch_exists("crew/worker-1").await.unwrap());
}

#[tokio::test]
async fn allocate_is_reusable_for_same_agent() {
    let (dir, _git) = temp_repo().await;
    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);

    let first = alloc.allocate("worker-1", "HEAD").await.unwrap();
    let second = alloc.allocate("worker-1", "HEAD").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn branch_checked_out_elsewhere_fails_loudly() {
    let (dir, git) = temp_repo().await;

    // the agent's branch is already checked out in a foreign worktree
    let foreign = dir.path().join("foreign");
    git.worktree_add_new_branch(&foreign, "crew/worker-1", "HEAD")
        .await
        .unwrap();

    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);
    let err = alloc.allocate("worker-1", "HEAD").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::BranchCheckedOut { .. }));
}

#[tokio::test]
async fn missing_base_revision_aborts_before_allocation() {
    let (dir, _git) = temp_repo().await;
    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);

    let err = alloc.allocate("worker-1", "no-such-rev").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::MissingBase(_)));
    assert!(!dir.path().join("workspaces/worker-1").exists());
}

#[tokio::test]
async fn dirty_base_forbid_refuses() {
    let (dir, _git) = temp_repo().await;
    std::fs::write(dir.path().join("repo/README.md"), "changed\n").unwrap();

    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);
    let err = alloc.resolve_base("HEAD").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::DirtyBase));
}

#[tokio::test]
async fn dirty_base_snapshot_yields_ephemeral_revision() {
    let (dir, git) = temp_repo().await;
    std::fs::write(dir.path().join("repo/README.md"), "changed\n").unwrap();

    let alloc = allocator(&dir, DirtyBasePolicy::Snapshot);
    let base = alloc.resolve_base("HEAD").await.unwrap();
    assert_ne!(base, "HEAD");

    // the snapshot revision is allocatable and carries the dirty content
    let path = alloc.allocate("worker-1", &base).await.unwrap();
    let content = std::fs::read_to_string(path.join("README.md")).unwrap();
    assert_eq!(content, "changed\n");

    // the base repository itself is untouched
    assert_eq!(git.dirty_tracked_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn dirty_base_ignore_uses_requested_revision() {
    let (dir, _git) = temp_repo().await;
    std::fs::write(dir.path().join("repo/README.md"), "changed\n").unwrap();

    let alloc = allocator(&dir, DirtyBasePolicy::Ignore);
    let base = alloc.resolve_base("HEAD").await.unwrap();
    assert_eq!(base, "HEAD");
}

#[tokio::test]
async fn clean_base_passes_through_under_any_policy() {
    let (dir, _git) = temp_repo().await;
    for policy in [
        DirtyBasePolicy::Forbid,
        DirtyBasePolicy::Snapshot,
        DirtyBasePolicy::Ignore,
    ] {
        let alloc = allocator(&dir, policy);
        assert_eq!(alloc.resolve_base("HEAD").await.unwrap(), "HEAD");
    }
}

#[tokio::test]
async fn release_removes_worktree_but_keeps_branch() {
    let (dir, git) = temp_repo().await;
    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);

    let path = alloc.allocate("worker-1", "HEAD").await.unwrap();
    assert!(path.exists());

    alloc.release("worker-1").await.unwrap();
    assert!(!path.exists());
    assert!(git.branch_exists("crew/worker-1").await.unwrap());

    // releasing again is a no-op
    alloc.release("worker-1").await.unwrap();
}

#[tokio::test]
async fn allocate_after_manual_deletion_prunes_and_recreates() {
    let (dir, _git) = temp_repo().await;
    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);

    let path = alloc.allocate("worker-1", "HEAD").await.unwrap();
    // sandbox deleted out from under us, metadata left stale
    std::fs::remove_dir_all(&path).unwrap();

    let again = alloc.allocate("worker-1", "HEAD").await.unwrap();
    assert_eq!(path, again);
    assert!(again.join("README.md").exists());
}

#[tokio::test]
async fn stale_lockfile_times_out_with_bounded_wait() {
    let (dir, _git) = temp_repo().await;
    let workspaces = dir.path().join("workspaces");
    std::fs::create_dir_all(&workspaces).unwrap();
    std::fs::write(workspaces.join("allocations.lock"), "").unwrap();

    let alloc = allocator(&dir, DirtyBasePolicy::Forbid)
        .with_lock_wait(std::time::Duration::from_millis(200));
    let err = alloc.allocate("worker-1", "HEAD").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::LockTimeout(_)));
}

#[tokio::test]
async fn check_conflicts_aborts_before_any_allocation() {
    let (dir, git) = temp_repo().await;

    let foreign = dir.path().join("foreign");
    git.worktree_add_new_branch(&foreign, "crew/worker-2", "HEAD")
        .await
        .unwrap();

    let alloc = allocator(&dir, DirtyBasePolicy::Forbid);
    let agents = vec!["worker-1".to_string(), "worker-2".to_string()];
    let err = alloc.check_conflicts(&agents).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::BranchCheckedOut { .. }));

    // nothing was allocated for either agent
    assert!(!dir.path().join("workspaces").exists());
}

#[tokio::test]
async fn branch_name_is_deterministic() {
    assert_eq!(WorkspaceAllocator::branch_for("worker-2"), "crew/worker-2");
    assert_eq!(WorkspaceAllocator::branch_for("utility"), "crew/utility");
}
