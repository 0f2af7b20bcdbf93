// ABOUTME: Implementations of the crew subcommands
// ABOUTME: Validation first, feature gates second, then state mutation

use crate::cli::CliError;
use crate::orchestrator::{delegate, size_pool};
use crate::supervisor::{shutdown_target, Supervisor};
use anyhow::Context;
use crew_backend::{resolve_backend, Multiplexer, RuntimeTable};
use crew_core::{
    missing_gate, validate_session_name, AgentStatus, BackendKind, BackendMode, Bus, BusError,
    ControlError, ControlKind, ControlPlane, CrewConfig, Decision, IntervalTicker, MessageKind,
    Role, SessionMirror, SessionPaths, TeamConfig,
};
use crew_workspace::{GitRunner, WorkspaceAllocator, WorkspaceError};
use std::io::IsTerminal;

const ROOM: &str = "main";

pub(crate) fn gate_check() -> Result<(), CliError> {
    match missing_gate() {
        None => Ok(()),
        Some(gate) => Err(CliError::Precondition(format!(
            "feature gate {gate} is not enabled; export {gate}=1 to proceed"
        ))),
    }
}

fn map_bus_err(err: BusError) -> CliError {
    match err {
        BusError::UnknownRoom(_) | BusError::UnknownAgent { .. } => {
            CliError::Usage(err.to_string())
        }
        BusError::Storage(_) => CliError::Internal(err.into()),
    }
}

fn map_control_err(err: ControlError) -> CliError {
    match err {
        ControlError::NotFound(_)
        | ControlError::NotPending(_)
        | ControlError::DuplicateRequest(_) => CliError::Usage(err.to_string()),
        ControlError::Bus(bus_err) => map_bus_err(bus_err),
        other => CliError::Internal(other.into()),
    }
}

fn map_workspace_err(err: WorkspaceError) -> CliError {
    CliError::Precondition(err.to_string())
}

/// Write a default config file. The only command allowed without the
/// feature gates.
pub async fn init() -> Result<(), CliError> {
    let path = CrewConfig::default_path()?;
    if path.exists() {
        println!("config already present at {}", path.display());
        return Ok(());
    }
    CrewConfig::default().save(&path)?;
    println!("wrote default config to {}", path.display());
    Ok(())
}

fn resolve_worker_count(workers: &str, description: &str) -> Result<usize, CliError> {
    if workers == "auto" {
        return Ok(size_pool(description));
    }
    let count: usize = workers
        .parse()
        .map_err(|_| CliError::Usage(format!("invalid worker count '{workers}' (use 2-4 or 'auto')")))?;
    if count < 2 {
        return Err(CliError::Usage(
            "worker count below the floor of 2".to_string(),
        ));
    }
    Ok(count)
}

/// Create or recompute the team for a session. The member set is replaced
/// wholesale from the role shape; members dropped by the refresh are
/// deactivated, not deleted.
async fn create_team(
    session: &str,
    workers: &str,
    description: &str,
    config: &CrewConfig,
    backend: BackendKind,
) -> Result<TeamConfig, CliError> {
    validate_session_name(session).map_err(|e| CliError::Usage(e.to_string()))?;
    let count = resolve_worker_count(workers, description)?;

    let paths = SessionPaths::resolve(session)?;
    paths.ensure()?;

    let bus = Bus::open(paths.bus_db()).await.map_err(map_bus_err)?;
    let team = TeamConfig::compose(session, count, &config.model, &config.profile, backend);

    let current = bus.members(ROOM).await.map_err(map_bus_err)?;
    for (agent, role) in current {
        if role != Role::System && team.member(&agent).is_none() {
            bus.deactivate(ROOM, &agent).await.map_err(map_bus_err)?;
        }
    }
    for member in &team.members {
        bus.register(ROOM, &member.name, member.role)
            .await
            .map_err(map_bus_err)?;
    }

    let mirror = SessionMirror::new(paths.root());
    mirror.write_team(&team)?;

    Ok(team)
}

pub async fn teamcreate(
    session: &str,
    workers: &str,
    description: Option<&str>,
) -> Result<(), CliError> {
    gate_check()?;
    let config = CrewConfig::load_or_default()?;
    let backend = resolve_backend(
        config.backend_mode,
        std::io::stdin().is_terminal(),
        Multiplexer::in_session(),
    );

    let team = create_team(session, workers, description.unwrap_or(""), &config, backend).await?;

    let worker_count = team.workers().count();
    println!("team '{session}' created: 1 lead, {worker_count} workers, 1 utility");
    for member in &team.members {
        println!("  {} ({})", member.name, member.role);
    }
    Ok(())
}

pub async fn up(
    session: &str,
    task: Option<String>,
    backend_arg: &str,
    workers: &str,
) -> Result<(), CliError> {
    gate_check()?;
    let config = CrewConfig::load_or_default()?;

    let mode = BackendMode::parse(backend_arg).ok_or_else(|| {
        CliError::Usage(format!(
            "unsupported backend mode '{backend_arg}' (use auto, pane, process, or hub)"
        ))
    })?;
    let backend = resolve_backend(
        mode,
        std::io::stdin().is_terminal(),
        Multiplexer::in_session(),
    );

    let paths = SessionPaths::resolve(session)?;
    let mirror = SessionMirror::new(paths.root());

    let mut team = if !mirror.team_path().exists() || workers != "auto" {
        create_team(
            session,
            workers,
            task.as_deref().unwrap_or(""),
            &config,
            backend,
        )
        .await?
    } else {
        mirror.read_team()?
    };

    // allocate one workspace per non-lead member, aborting before anything
    // is created when the base is unusable or a branch is in conflict
    let repo_root = std::env::current_dir().context("could not determine working directory")?;
    let git = GitRunner::new(&repo_root);
    if git
        .rev_parse("HEAD")
        .await
        .map_err(map_workspace_err)?
        .is_none()
    {
        return Err(CliError::Precondition(
            "current directory is not a git repository with at least one commit".to_string(),
        ));
    }

    let allocator = WorkspaceAllocator::new(
        &repo_root,
        config.workspaces_dir_expanded().join(session),
        config.dirty_base,
    );
    let agents: Vec<String> = team
        .members
        .iter()
        .filter(|m| m.role != Role::Lead)
        .map(|m| m.name.clone())
        .collect();
    allocator
        .check_conflicts(&agents)
        .await
        .map_err(map_workspace_err)?;
    let base = allocator
        .resolve_base("HEAD")
        .await
        .map_err(map_workspace_err)?;

    for member in team.members.iter_mut() {
        member.backend = backend;
        if member.role == Role::Lead {
            member.workspace_path = Some(repo_root.clone());
            continue;
        }
        let path = allocator
            .allocate(&member.name, &base)
            .await
            .map_err(map_workspace_err)?;
        member.workspace_path = Some(path);
    }
    mirror.write_team(&team)?;

    let bus = Bus::open(paths.bus_db()).await.map_err(map_bus_err)?;
    let control = ControlPlane::new(bus.clone(), mirror.clone());
    let runtime = RuntimeTable::load(mirror.runtime_path());
    let mut supervisor = Supervisor::new(
        session,
        config.clone(),
        bus.clone(),
        control,
        runtime,
        backend,
    );

    let outcomes = supervisor.spawn_team(&team, task.as_deref()).await?;
    println!(
        "spawned {} of {} agents under {backend}",
        outcomes.len(),
        agents.len()
    );

    if let Some(task_text) = &task {
        let mux = (backend == BackendKind::MultiplexedPane).then(Multiplexer::new);
        delegate(
            &bus,
            &mirror,
            mux.as_ref(),
            &outcomes,
            &team,
            ROOM,
            task_text,
        )
        .await?;
        println!("task delegated to {} members", team.members.len() - 1);
    }

    match backend {
        BackendKind::MultiplexedPane => {
            // panes outlive this command; the multiplexer holds the agents
        }
        BackendKind::IsolatedProcess | BackendKind::SharedHub => {
            if supervisor.has_children() {
                let mut ticker = IntervalTicker::every(config.poll_interval());
                supervisor.run(&mut ticker).await?;
            }
        }
    }

    Ok(())
}

pub async fn status(session: &str) -> Result<(), CliError> {
    gate_check()?;
    let paths = SessionPaths::resolve(session)?;
    if !paths.exists() {
        return Err(CliError::Precondition(format!(
            "session '{session}' not found (create it with 'crew teamcreate {session}')"
        )));
    }

    let bus = Bus::open(paths.bus_db()).await.map_err(map_bus_err)?;
    let mirror = SessionMirror::new(paths.root());
    let control = ControlPlane::new(bus.clone(), mirror.clone());

    let room_status = bus.status(ROOM).await.map_err(map_bus_err)?;
    println!("session {session}: {} messages", room_status.total_messages);
    for (kind, count) in &room_status.by_kind {
        println!("  {kind}: {count}");
    }
    if !room_status.unread.is_empty() {
        println!("unread:");
        for (agent, count) in &room_status.unread {
            println!("  {agent}: {count}");
        }
    }

    let runtime = RuntimeTable::load(mirror.runtime_path());
    if !runtime.records().is_empty() {
        println!("agents:");
        for record in runtime.records() {
            let identity = match (&record.process_id, &record.pane_id) {
                (Some(pid), _) => format!(" pid={pid}"),
                (None, Some(pane)) => format!(" pane={pane}"),
                _ => String::new(),
            };
            println!(
                "  {} {} {:?}{}",
                record.agent_name, record.backend, record.status, identity
            );
        }
    }

    let mut pending_total = 0;
    for (agent, _) in bus.members(ROOM).await.map_err(map_bus_err)? {
        pending_total += control.pending(&agent).await.map_err(map_control_err)?.len();
    }
    // requests are counted once per involved member pair
    println!("pending control requests: {}", pending_total / 2);

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn sendmessage(
    session: &str,
    kind: &str,
    from: &str,
    to: &str,
    content: &str,
    request_id: Option<String>,
    approve: bool,
    reject: bool,
) -> Result<(), CliError> {
    gate_check()?;
    let paths = SessionPaths::resolve(session)?;
    if !paths.exists() {
        return Err(CliError::Precondition(format!(
            "session '{session}' not found (create it with 'crew teamcreate {session}')"
        )));
    }

    let bus = Bus::open(paths.bus_db()).await.map_err(map_bus_err)?;
    let mirror = SessionMirror::new(paths.root());
    let control = ControlPlane::new(bus.clone(), mirror.clone());

    if approve && reject {
        return Err(CliError::Usage(
            "pass exactly one of --approve or --reject".to_string(),
        ));
    }

    if approve || reject {
        let id = request_id.ok_or_else(|| {
            CliError::Usage("--request-id is required with --approve/--reject".to_string())
        })?;
        let decision = if approve {
            Decision::Approve
        } else {
            Decision::Reject
        };

        let resolved = control
            .respond(&id, from, decision, content)
            .await
            .map_err(map_control_err)?;
        println!("request {id}: {:?}", decision.status());

        // shutdown approvals for pane-backed targets are applied here; the
        // process and hub backends apply them from their supervising loop
        if resolved.kind == ControlKind::Shutdown && decision == Decision::Approve {
            let target = shutdown_target(&resolved);
            let runtime = RuntimeTable::load(mirror.runtime_path());
            let pane_backed = runtime.get(&target).map(|r| {
                r.backend == BackendKind::MultiplexedPane && r.status == AgentStatus::Running
            });
            if pane_backed == Some(true) {
                let config = CrewConfig::load_or_default()?;
                let control = ControlPlane::new(bus.clone(), mirror.clone());
                let mut supervisor = Supervisor::new(
                    session,
                    config,
                    bus.clone(),
                    control,
                    runtime,
                    BackendKind::MultiplexedPane,
                );
                supervisor.apply_shutdown(&target).await?;
                println!("shutdown applied to {target}");
            }
        }
        return Ok(());
    }

    // request-type sends create a correlated control request
    let control_kind = ControlKind::parse(kind)
        .or_else(|| ControlKind::parse(kind.strip_suffix("_request").unwrap_or(kind)));
    if let Some(ck) = control_kind {
        let id = control
            .request(ck, ROOM, from, to, content, content, request_id)
            .await
            .map_err(map_control_err)?;
        println!("request_id={id}");
        return Ok(());
    }

    match MessageKind::parse(kind) {
        Some(message_kind) => {
            bus.send(ROOM, from, to, message_kind, content, serde_json::json!({}))
                .await
                .map_err(map_bus_err)?;
            println!("sent");
            Ok(())
        }
        None => Err(CliError::Usage(format!(
            "unknown message type '{kind}'"
        ))),
    }
}

pub async fn teamdelete(session: &str, force: bool) -> Result<(), CliError> {
    gate_check()?;
    let paths = SessionPaths::resolve(session)?;
    if !paths.exists() {
        return Err(CliError::Precondition(format!(
            "session '{session}' not found"
        )));
    }

    let mirror = SessionMirror::new(paths.root());
    let mut runtime = RuntimeTable::load(mirror.runtime_path());
    let running: Vec<String> = runtime
        .running()
        .filter(|r| r.role != Role::Lead)
        .map(|r| r.agent_name.clone())
        .collect();

    if !running.is_empty() && !force {
        return Err(CliError::Precondition(format!(
            "{} agents still running; re-run with --force to tear them down",
            running.len()
        )));
    }

    let bus = Bus::open(paths.bus_db()).await.map_err(map_bus_err)?;

    if force {
        let mux = Multiplexer::new();
        for agent in &running {
            if let Some(record) = runtime.get(agent) {
                if record.backend == BackendKind::MultiplexedPane {
                    if let Some(pane) = record.pane_id.clone() {
                        if let Err(e) = mux.kill_pane(&pane).await {
                            tracing::warn!(agent = %agent, error = %e, "Pane teardown failed");
                        }
                    }
                }
            }
            runtime.mark_terminated(agent)?;
        }
    }

    for (agent, _) in bus.members(ROOM).await.map_err(map_bus_err)? {
        bus.deactivate(ROOM, &agent).await.map_err(map_bus_err)?;
    }

    if force {
        bus.close().await;
        std::fs::remove_dir_all(paths.root())
            .with_context(|| format!("Failed to remove {}", paths.root().display()))?;
        println!("session '{session}' deleted");
    } else {
        println!("team '{session}' torn down; history retained at {}", paths.root().display());
    }

    Ok(())
}
