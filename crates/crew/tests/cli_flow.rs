// ABOUTME: End-to-end command-layer test of the team lifecycle
// ABOUTME: One test fn so the process-global env setup happens exactly once

use crew::cli::commands;
use crew::cli::CliError;
use crew_core::{Bus, MessageKind, SessionPaths, DATA_DIR_ENV, GATE_AGENTS, GATE_PRIMARY};
use tempfile::TempDir;

#[tokio::test]
async fn team_lifecycle_via_commands() {
    let dir = TempDir::new().unwrap();
    std::env::set_var(DATA_DIR_ENV, dir.path());
    std::env::set_var(GATE_PRIMARY, "1");
    std::env::set_var(GATE_AGENTS, "1");

    // validation failures exit before any state is mutated
    let err = commands::teamcreate("bad/name", "3", None).await.unwrap_err();
    assert!(matches!(err, CliError::Usage(_)));
    let err = commands::teamcreate("alpha", "1", None).await.unwrap_err();
    assert!(matches!(err, CliError::Usage(_)), "worker floor is 2");
    assert!(!SessionPaths::resolve("alpha").unwrap().exists());

    // create a 3-worker team
    commands::teamcreate("alpha", "3", None).await.unwrap();
    let paths = SessionPaths::resolve("alpha").unwrap();
    assert!(paths.exists());

    let bus = Bus::open(paths.bus_db()).await.unwrap();
    let members = bus.members("main").await.unwrap();
    assert_eq!(members.len(), 5, "lead + 3 workers + utility");

    // recomputing the team replaces the member set wholesale
    commands::teamcreate("alpha", "2", None).await.unwrap();
    let members = bus.members("main").await.unwrap();
    assert_eq!(members.len(), 4, "worker-3 deactivated by refresh");

    // plain sends fan out through the bus
    commands::sendmessage("alpha", "message", "lead", "all", "hello", None, false, false)
        .await
        .unwrap();
    assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 1);
    assert_eq!(bus.unread_count("main", "lead").await.unwrap(), 0);

    // unknown kinds are usage errors
    let err =
        commands::sendmessage("alpha", "bogus", "lead", "all", "x", None, false, false)
            .await
            .unwrap_err();
    assert!(matches!(err, CliError::Usage(_)));

    // request-type sends create a pending control request
    commands::sendmessage(
        "alpha",
        "shutdown",
        "worker-1",
        "lead",
        "{}",
        Some("req-9".to_string()),
        false,
        false,
    )
    .await
    .unwrap();
    let inbox = bus.inbox("lead", true, false).await.unwrap();
    assert!(inbox
        .iter()
        .any(|i| i.message.kind == MessageKind::ShutdownRequest));

    // approving resolves it exactly once
    commands::sendmessage(
        "alpha",
        "shutdown",
        "lead",
        "worker-1",
        "go ahead",
        Some("req-9".to_string()),
        true,
        false,
    )
    .await
    .unwrap();
    let err = commands::sendmessage(
        "alpha",
        "shutdown",
        "lead",
        "worker-1",
        "again",
        Some("req-9".to_string()),
        true,
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::Usage(_)), "second respond is rejected");

    // responding to an unknown id fails with no side effects
    let before = bus.status("main").await.unwrap().total_messages;
    let err = commands::sendmessage(
        "alpha",
        "shutdown",
        "lead",
        "worker-1",
        "x",
        Some("no-such-id".to_string()),
        true,
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::Usage(_)));
    assert_eq!(bus.status("main").await.unwrap().total_messages, before);

    // status succeeds on a live session
    commands::status("alpha").await.unwrap();

    // forced delete removes the session directory
    bus.close().await;
    commands::teamdelete("alpha", true).await.unwrap();
    assert!(!SessionPaths::resolve("alpha").unwrap().exists());

    // and status on it is now a precondition failure
    let err = commands::status("alpha").await.unwrap_err();
    assert!(matches!(err, CliError::Precondition(_)));
}
