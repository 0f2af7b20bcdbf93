// ABOUTME: The per-agent poll/execute loop driven by an injectable ticker
// ABOUTME: Reads the mailbox, runs the agent executable on tasks, reports status

use anyhow::{Context, Result};
use crew_backend::ProcessDescriptor;
use crew_core::{
    Bus, CrewConfig, IntervalTicker, MessageKind, Role, SessionMirror, SessionPaths, Ticker,
};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A pulse status message is emitted every this many ticks while idle.
const PULSE_EVERY_TICKS: u64 = 20;

/// Executes the underlying agent executable for one task. The control-plane
/// passes the task text through and never interprets it.
pub struct AgentRunner {
    descriptor: ProcessDescriptor,
}

/// Outcome of one task execution, reported back on the bus.
#[derive(Debug)]
pub struct ExecutionReport {
    pub exit_code: Option<i32>,
}

impl AgentRunner {
    pub fn new(
        program: &str,
        args: &[String],
        cwd: Option<PathBuf>,
        session: &str,
        agent: &str,
    ) -> Self {
        let mut descriptor = ProcessDescriptor::new(program)
            .args(args.iter().cloned())
            .env("CREW_SESSION", session)
            .env("CREW_AGENT", agent);
        if let Some(dir) = cwd {
            descriptor = descriptor.cwd(dir);
        }
        Self { descriptor }
    }

    pub async fn execute(&self, task: &str) -> Result<ExecutionReport> {
        let mut cmd = self.descriptor.clone().arg(task).command();
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run agent program {}", self.descriptor.program))?;

        Ok(ExecutionReport {
            exit_code: output.status.code(),
        })
    }
}

/// Everything one agent loop needs; built once per agent by the process
/// entrypoint or the shared hub.
pub struct AgentContext {
    pub bus: Bus,
    pub mirror: SessionMirror,
    pub room: String,
    pub name: String,
    pub role: Role,
    pub runner: AgentRunner,
}

fn stop_requested(stop_rx: &Option<watch::Receiver<bool>>) -> bool {
    stop_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// The poll/execute loop. Blocks only between ticks and while the agent
/// executable runs; a stop signal is honored at the next loop boundary
/// (cooperative shutdown, in-flight work is not cancelled mid-step).
pub async fn agent_loop(
    ctx: &AgentContext,
    ticker: &mut dyn Ticker,
    stop_rx: Option<watch::Receiver<bool>>,
) -> Result<()> {
    ctx.bus.register(&ctx.room, &ctx.name, ctx.role).await?;
    info!(agent = %ctx.name, room = %ctx.room, "Agent loop started");

    let mut ticks: u64 = 0;
    loop {
        if stop_requested(&stop_rx) {
            break;
        }
        ticker.tick().await;
        ticks += 1;

        let items = ctx.bus.inbox(&ctx.name, true, true).await?;
        for item in &items {
            match item.message.kind {
                MessageKind::Task => {
                    info!(agent = %ctx.name, message_id = item.message.id, "Executing task");
                    match ctx.runner.execute(&item.message.body).await {
                        Ok(report) => {
                            let code = report.exit_code;
                            ctx.bus
                                .send(
                                    &ctx.room,
                                    &ctx.name,
                                    &item.message.sender,
                                    MessageKind::Status,
                                    &format!(
                                        "task {} finished (exit code {:?})",
                                        item.message.id, code
                                    ),
                                    serde_json::json!({
                                        "task_id": item.message.id,
                                        "exit_code": code,
                                    }),
                                )
                                .await?;
                        }
                        Err(e) => {
                            warn!(agent = %ctx.name, error = %e, "Task execution failed");
                            ctx.bus
                                .send(
                                    &ctx.room,
                                    &ctx.name,
                                    &item.message.sender,
                                    MessageKind::Blocker,
                                    &format!("task {} could not run: {e}", item.message.id),
                                    serde_json::json!({ "task_id": item.message.id }),
                                )
                                .await?;
                        }
                    }
                }
                kind => {
                    debug!(agent = %ctx.name, kind = %kind, message_id = item.message.id, "Noted message");
                }
            }
        }

        let full = ctx.bus.inbox(&ctx.name, false, false).await?;
        if let Err(e) = ctx.mirror.write_inbox(&ctx.name, &full) {
            warn!(agent = %ctx.name, error = %e, "Inbox mirror write failed");
        }

        if items.is_empty() && ticks % PULSE_EVERY_TICKS == 0 {
            ctx.bus
                .send(
                    &ctx.room,
                    &ctx.name,
                    "lead",
                    MessageKind::Status,
                    "pulse",
                    serde_json::json!({ "pulse": true }),
                )
                .await?;
        }
    }

    ctx.bus
        .send(
            &ctx.room,
            &ctx.name,
            "lead",
            MessageKind::Status,
            "stopping",
            serde_json::json!({ "stopping": true }),
        )
        .await?;
    info!(agent = %ctx.name, "Agent loop stopped");
    Ok(())
}

/// Process entrypoint for `crew agent`: one isolated OS process per agent.
pub async fn run_agent(session: &str, name: &str) -> Result<()> {
    let paths = SessionPaths::resolve(session)?;
    if !paths.exists() {
        anyhow::bail!(
            "session '{session}' not found (create it with 'crew teamcreate {session}')"
        );
    }

    let config = CrewConfig::load_or_default()?;
    let bus = Bus::open(paths.bus_db()).await?;
    let mirror = SessionMirror::new(paths.root());
    let team = mirror.read_team()?;
    let member = team
        .member(name)
        .with_context(|| format!("agent '{name}' is not a member of session '{session}'"))?;

    let runner = AgentRunner::new(
        &config.agent_program,
        &config.agent_args,
        member.workspace_path.clone(),
        session,
        name,
    );
    let ctx = AgentContext {
        bus,
        mirror: mirror.clone(),
        room: "main".to_string(),
        name: name.to_string(),
        role: member.role,
        runner,
    };

    let mut ticker = IntervalTicker::every(config.poll_interval());
    agent_loop(&ctx, &mut ticker, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::ManualTicker;
    use tempfile::TempDir;

    async fn context(dir: &TempDir, program: &str) -> AgentContext {
        let bus = Bus::open(dir.path().join("bus.db")).await.unwrap();
        bus.register("main", "lead", Role::Lead).await.unwrap();
        let mirror = SessionMirror::new(dir.path());
        AgentContext {
            bus,
            mirror,
            room: "main".to_string(),
            name: "worker-1".to_string(),
            role: Role::Worker,
            runner: AgentRunner::new(program, &[], None, "s1", "worker-1"),
        }
    }

    #[tokio::test]
    async fn loop_registers_executes_task_and_reports_status() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "true").await;

        // a task is waiting before the loop starts
        ctx.bus.register("main", "worker-1", Role::Worker).await.unwrap();
        ctx.bus
            .send("main", "lead", "worker-1", MessageKind::Task, "do it", serde_json::json!({}))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut ticker = ManualTicker::new();

        // let the loop run a couple of iterations, then stop it
        let bus = ctx.bus.clone();
        let loop_fut = agent_loop(&ctx, &mut ticker, Some(stop_rx));
        tokio::pin!(loop_fut);
        for _ in 0..200 {
            if tokio::time::timeout(std::time::Duration::from_millis(10), &mut loop_fut)
                .await
                .is_ok()
            {
                break;
            }
            if bus.unread_count("main", "lead").await.unwrap() > 0 {
                stop_tx.send(true).unwrap();
            }
        }

        // the task was consumed and a status with evidence reached the lead
        let lead_inbox = bus.inbox("lead", false, false).await.unwrap();
        assert!(lead_inbox
            .iter()
            .any(|i| i.message.kind == MessageKind::Status
                && i.message.metadata["exit_code"] == 0));
        assert_eq!(bus.unread_count("main", "worker-1").await.unwrap(), 0);

        // inbox mirror document was refreshed
        assert!(!ctx.mirror.read_inbox("worker-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_program_reports_blocker() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "/no/such/agent-program").await;

        ctx.bus.register("main", "worker-1", Role::Worker).await.unwrap();
        ctx.bus
            .send("main", "lead", "worker-1", MessageKind::Task, "do it", serde_json::json!({}))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut ticker = ManualTicker::new();

        let bus = ctx.bus.clone();
        let loop_fut = agent_loop(&ctx, &mut ticker, Some(stop_rx));
        tokio::pin!(loop_fut);
        for _ in 0..200 {
            if tokio::time::timeout(std::time::Duration::from_millis(10), &mut loop_fut)
                .await
                .is_ok()
            {
                break;
            }
            if bus.unread_count("main", "lead").await.unwrap() > 0 {
                stop_tx.send(true).unwrap();
            }
        }

        let lead_inbox = bus.inbox("lead", false, false).await.unwrap();
        assert!(lead_inbox
            .iter()
            .any(|i| i.message.kind == MessageKind::Blocker));
    }

    #[tokio::test]
    async fn stop_signal_ends_loop_with_stopping_status() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "true").await;

        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();

        let mut ticker = ManualTicker::new();
        agent_loop(&ctx, &mut ticker, Some(stop_rx)).await.unwrap();

        let lead_inbox = ctx.bus.inbox("lead", false, false).await.unwrap();
        assert!(lead_inbox
            .iter()
            .any(|i| i.message.kind == MessageKind::Status && i.message.body == "stopping"));
    }
}
