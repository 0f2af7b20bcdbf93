// ABOUTME: Shared hub: one process interleaving every agent's poll loop
// ABOUTME: Resource-lean backend trading isolation for lower process count

use crate::agent::{agent_loop, AgentContext, AgentRunner};
use crate::supervisor::shutdown_target;
use anyhow::Result;
use crew_backend::RuntimeTable;
use crew_core::{
    Bus, ControlKind, ControlPlane, CrewConfig, IntervalTicker, MessageKind, RequestStatus, Role,
    SessionMirror, SessionPaths, Ticker, SYSTEM_SENDER,
};
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Process entrypoint for `crew hub`: host every member's poll loop as a
/// cooperative task inside this single process. Shutdown approvals stop one
/// loop at a time; the hub exits when none remain.
pub async fn run_hub(session: &str) -> Result<()> {
    let paths = SessionPaths::resolve(session)?;
    if !paths.exists() {
        anyhow::bail!("session '{session}' not found (create it with 'crew teamcreate {session}')");
    }

    let config = CrewConfig::load_or_default()?;
    let bus = Bus::open(paths.bus_db()).await?;
    let mirror = SessionMirror::new(paths.root());
    let control = ControlPlane::new(bus.clone(), mirror.clone());
    let team = mirror.read_team()?;
    let room = "main".to_string();

    let mut loops: HashMap<String, (watch::Sender<bool>, JoinHandle<Result<()>>)> =
        HashMap::new();

    for member in team.members.iter().filter(|m| m.role != Role::Lead) {
        let workspace_ok = member
            .workspace_path
            .as_ref()
            .map(|p| p.exists())
            .unwrap_or(false);
        if !workspace_ok {
            warn!(agent = %member.name, "Workspace missing, hub will not host this agent");
            continue;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = AgentContext {
            bus: bus.clone(),
            mirror: mirror.clone(),
            room: room.clone(),
            name: member.name.clone(),
            role: member.role,
            runner: AgentRunner::new(
                &config.agent_program,
                &config.agent_args,
                member.workspace_path.clone(),
                session,
                &member.name,
            ),
        };
        let interval = config.poll_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = IntervalTicker::every(interval);
            agent_loop(&ctx, &mut ticker, Some(stop_rx)).await
        });
        loops.insert(member.name.clone(), (stop_tx, handle));
    }

    info!(session = %session, agents = loops.len(), "Hub hosting agent loops");

    let mut runtime = RuntimeTable::load(mirror.runtime_path());
    let mut ticker = IntervalTicker::every(config.poll_interval());
    while !loops.is_empty() {
        ticker.tick().await;

        // stop loops whose shutdown was approved
        let approved = control
            .resolved(ControlKind::Shutdown, RequestStatus::Approved)
            .await?;
        for request in approved {
            let target = shutdown_target(&request);
            if let Some((stop_tx, _)) = loops.get(&target) {
                info!(agent = %target, "Stopping hub-hosted loop after approved shutdown");
                let _ = stop_tx.send(true);
            }
        }

        // reap finished loops and record their termination
        let finished: Vec<String> = loops
            .iter()
            .filter(|(_, (_, handle))| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in finished {
            loops.remove(&name);
            runtime.mark_terminated(&name)?;
            bus.deactivate(&room, &name).await?;
            bus.send(
                &room,
                SYSTEM_SENDER,
                crew_core::BROADCAST,
                MessageKind::Status,
                &format!("agent {name} terminated (hub loop stopped)"),
                serde_json::json!({ "agent": name }),
            )
            .await?;
        }
    }

    info!(session = %session, "Hub exiting, no loops remain");
    Ok(())
}
