// ABOUTME: Spawns, tracks, and tears down agents under the resolved backend
// ABOUTME: Observes exit codes, applies shutdown approvals, records runtime state

pub mod hub;

use anyhow::{Context, Result};
use crew_backend::{AgentProcess, Multiplexer, ProcessDescriptor, RuntimeTable};
use crew_core::{
    AgentRuntimeRecord, AgentStatus, BackendKind, Bus, ControlKind, ControlPlane, ControlRequest,
    CrewConfig, MessageKind, RequestStatus, Role, TeamConfig, TeamMember, Ticker, DATA_DIR_ENV,
    SYSTEM_SENDER,
};
use std::collections::HashMap;
use tracing::{info, warn};

/// Key under which the shared hub process is tracked; not an agent name.
const HUB_KEY: &str = "hub";

/// What spawning one member produced. `boot_prompted` is true when the
/// member's pane was launched with a pre-composed prompt, in which case
/// delegation must not inject keystrokes into it.
#[derive(Debug)]
pub struct SpawnOutcome {
    pub record: AgentRuntimeRecord,
    pub boot_prompted: bool,
}

/// Lead-side process supervisor for one session.
pub struct Supervisor {
    session: String,
    room: String,
    config: CrewConfig,
    bus: Bus,
    control: ControlPlane,
    runtime: RuntimeTable,
    backend: BackendKind,
    mux: Multiplexer,
    processes: HashMap<String, AgentProcess>,
}

impl Supervisor {
    pub fn new(
        session: &str,
        config: CrewConfig,
        bus: Bus,
        control: ControlPlane,
        runtime: RuntimeTable,
        backend: BackendKind,
    ) -> Self {
        Self {
            session: session.to_string(),
            room: "main".to_string(),
            config,
            bus,
            control,
            runtime,
            backend,
            mux: Multiplexer::new(),
            processes: HashMap::new(),
        }
    }

    pub fn runtime(&self) -> &RuntimeTable {
        &self.runtime
    }

    pub fn has_children(&self) -> bool {
        !self.processes.is_empty()
    }

    /// Launch every non-lead member under the resolved backend. A member
    /// whose workspace is missing is skipped with a warning; the rest still
    /// launch. With `task` set, pane-backed members boot with their
    /// pre-composed prompt.
    pub async fn spawn_team(
        &mut self,
        team: &TeamConfig,
        task: Option<&str>,
    ) -> Result<Vec<SpawnOutcome>> {
        // the lead is this process
        let mut lead_record =
            AgentRuntimeRecord::spawning("lead", Role::Lead, self.backend);
        lead_record.status = AgentStatus::Running;
        lead_record.process_id = Some(std::process::id());
        self.runtime.upsert(lead_record)?;

        if self.backend == BackendKind::SharedHub {
            self.spawn_hub().await?;
        }

        let mut outcomes = Vec::new();
        for member in team.members.iter().filter(|m| m.role != Role::Lead) {
            let workspace_ok = member
                .workspace_path
                .as_ref()
                .map(|p| p.exists())
                .unwrap_or(false);
            if !workspace_ok {
                warn!(
                    agent = %member.name,
                    "Workspace missing, skipping spawn (allocate it with 'crew up')"
                );
                continue;
            }

            let outcome = match self.backend {
                BackendKind::MultiplexedPane => self.spawn_pane(member, task).await?,
                BackendKind::IsolatedProcess => self.spawn_process(member).await?,
                BackendKind::SharedHub => self.record_hub_member(member)?,
            };

            self.bus
                .send(
                    &self.room,
                    SYSTEM_SENDER,
                    crew_core::BROADCAST,
                    MessageKind::System,
                    &format!("agent {} spawned ({})", member.name, self.backend),
                    serde_json::json!({ "agent": member.name, "backend": self.backend.as_str() }),
                )
                .await?;

            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn spawn_pane(
        &mut self,
        member: &TeamMember,
        task: Option<&str>,
    ) -> Result<SpawnOutcome> {
        // a pane surviving from an earlier invocation is reused; delegation
        // will inject into it instead of booting a new one
        if let Some(existing) = self.runtime.get(&member.name) {
            if existing.status == AgentStatus::Running && existing.pane_id.is_some() {
                info!(agent = %member.name, pane = ?existing.pane_id, "Reusing running pane");
                return Ok(SpawnOutcome {
                    record: existing.clone(),
                    boot_prompted: false,
                });
            }
        }

        self.runtime.upsert(AgentRuntimeRecord::spawning(
            &member.name,
            member.role,
            BackendKind::MultiplexedPane,
        ))?;

        let mut descriptor = ProcessDescriptor::new(&self.config.agent_program)
            .args(self.config.agent_args.iter().cloned())
            .env("CREW_SESSION", &self.session)
            .env("CREW_AGENT", &member.name);
        let boot_prompted = if let Some(task_text) = task {
            let prompt =
                crate::orchestrator::build_prompt(member, task_text, &self.session);
            descriptor = descriptor.arg(prompt);
            true
        } else {
            false
        };

        let workspace = member
            .workspace_path
            .as_ref()
            .context("pane spawn requires a workspace")?;
        let (window, pane) = self
            .mux
            .new_window(&member.name, workspace, &descriptor.argv())
            .await?;

        self.runtime.mark_running(
            &member.name,
            None,
            Some(pane.clone()),
            Some(window.clone()),
        )?;
        info!(agent = %member.name, window = %window, pane = %pane, "Spawned pane agent");

        let record = self
            .runtime
            .get(&member.name)
            .context("record missing after pane spawn")?
            .clone();
        Ok(SpawnOutcome {
            record,
            boot_prompted,
        })
    }

    async fn spawn_process(&mut self, member: &TeamMember) -> Result<SpawnOutcome> {
        self.runtime.upsert(AgentRuntimeRecord::spawning(
            &member.name,
            member.role,
            BackendKind::IsolatedProcess,
        ))?;

        let descriptor = self.self_descriptor([
            "agent",
            "--session",
            self.session.as_str(),
            "--name",
            member.name.as_str(),
        ])?;
        let process = AgentProcess::spawn(&member.name, &descriptor).await?;
        let pid = process.pid();
        self.processes.insert(member.name.clone(), process);

        self.runtime.mark_running(&member.name, pid, None, None)?;

        let record = self
            .runtime
            .get(&member.name)
            .context("record missing after process spawn")?
            .clone();
        Ok(SpawnOutcome {
            record,
            boot_prompted: false,
        })
    }

    async fn spawn_hub(&mut self) -> Result<()> {
        let descriptor = self.self_descriptor(["hub", "--session", self.session.as_str()])?;
        let process = AgentProcess::spawn(HUB_KEY, &descriptor).await?;
        info!(pid = ?process.pid(), "Spawned shared hub");
        self.processes.insert(HUB_KEY.to_string(), process);
        Ok(())
    }

    fn record_hub_member(&mut self, member: &TeamMember) -> Result<SpawnOutcome> {
        let hub_pid = self.processes.get(HUB_KEY).and_then(|p| p.pid());
        let mut record =
            AgentRuntimeRecord::spawning(&member.name, member.role, BackendKind::SharedHub);
        record.status = AgentStatus::Running;
        record.process_id = hub_pid;
        self.runtime.upsert(record.clone())?;
        Ok(SpawnOutcome {
            record,
            boot_prompted: false,
        })
    }

    /// Descriptor relaunching this executable with a subcommand, preserving
    /// the data-root override for the child.
    fn self_descriptor<const N: usize>(&self, args: [&str; N]) -> Result<ProcessDescriptor> {
        let exe = std::env::current_exe().context("could not locate the crew executable")?;
        let mut descriptor =
            ProcessDescriptor::new(exe.to_string_lossy()).args(args.iter().map(|s| s.to_string()));
        if let Ok(data_dir) = std::env::var(DATA_DIR_ENV) {
            descriptor = descriptor.env(DATA_DIR_ENV, data_dir);
        }
        Ok(descriptor)
    }

    /// Observe exits of child processes; mark crashed or finished agents
    /// terminated and emit a status message. No automatic restart.
    pub async fn reap(&mut self) -> Result<()> {
        let mut exited = Vec::new();
        for (name, process) in self.processes.iter_mut() {
            if let Some(code) = process.try_wait() {
                exited.push((name.clone(), code));
            }
        }

        for (name, code) in exited {
            self.processes.remove(&name);
            info!(agent = %name, code = ?code, "Agent process exited");

            if name == HUB_KEY {
                // all hub-hosted agents went down with it
                let hub_agents: Vec<String> = self
                    .runtime
                    .running()
                    .filter(|r| r.backend == BackendKind::SharedHub && r.role != Role::Lead)
                    .map(|r| r.agent_name.clone())
                    .collect();
                for agent in hub_agents {
                    self.mark_terminated(&agent, code).await?;
                }
            } else {
                self.mark_terminated(&name, code).await?;
            }
        }

        Ok(())
    }

    async fn mark_terminated(&mut self, agent: &str, code: Option<i32>) -> Result<()> {
        self.runtime.mark_terminated(agent)?;
        self.bus
            .send(
                &self.room,
                SYSTEM_SENDER,
                crew_core::BROADCAST,
                MessageKind::Status,
                &format!("agent {agent} terminated (exit code {code:?})"),
                serde_json::json!({ "agent": agent, "exit_code": code }),
            )
            .await?;
        Ok(())
    }

    /// Apply shutdown approvals the supervisor has not acted on yet. The
    /// transition is already durably recorded by the control protocol; this
    /// is the observable side effect.
    pub async fn apply_pending_shutdowns(&mut self) -> Result<()> {
        let approved = self
            .control
            .resolved(ControlKind::Shutdown, RequestStatus::Approved)
            .await?;
        for request in approved {
            let target = shutdown_target(&request);
            let running = self
                .runtime
                .get(&target)
                .map(|r| r.status == AgentStatus::Running)
                .unwrap_or(false);
            if running {
                self.apply_shutdown(&target).await?;
            }
        }
        Ok(())
    }

    /// Tear down one agent: kill its pane (or window when the window is
    /// wholly its own), kill its process, or leave a hub-hosted loop to the
    /// hub's own tracking. The record transitions to terminated and a
    /// status message is emitted in every case.
    pub async fn apply_shutdown(&mut self, agent: &str) -> Result<()> {
        let record = match self.runtime.get(agent) {
            Some(r) => r.clone(),
            None => {
                warn!(agent = %agent, "No runtime record for shutdown target");
                return Ok(());
            }
        };

        match record.backend {
            BackendKind::MultiplexedPane => {
                if let (Some(pane), Some(window)) = (&record.pane_id, &record.window) {
                    let panes = self.mux.list_panes(window).await.unwrap_or_default();
                    let result = if panes.len() <= 1 {
                        self.mux.kill_window(window).await
                    } else {
                        self.mux.kill_pane(pane).await
                    };
                    if let Err(e) = result {
                        warn!(agent = %agent, error = %e, "Pane teardown failed");
                    }
                }
            }
            BackendKind::IsolatedProcess => {
                if let Some(process) = self.processes.get_mut(agent) {
                    process.kill().await?;
                    self.processes.remove(agent);
                }
            }
            BackendKind::SharedHub => {
                // the hub polls approved shutdowns and stops the loop itself
            }
        }

        self.bus.deactivate(&self.room, agent).await?;
        self.mark_terminated(agent, None).await?;
        info!(agent = %agent, "Shutdown applied");
        Ok(())
    }

    /// Foreground supervision loop for process-based backends: reap exits
    /// and apply shutdown approvals until no children remain.
    pub async fn run(&mut self, ticker: &mut dyn Ticker) -> Result<()> {
        loop {
            ticker.tick().await;
            self.reap().await?;
            self.apply_pending_shutdowns().await?;
            if self.processes.is_empty() {
                break;
            }
        }
        info!(session = %self.session, "All agents terminated, supervisor exiting");
        Ok(())
    }
}

/// The agent a shutdown request targets: the `agent` field of the request
/// body when present, else the requester itself.
pub fn shutdown_target(request: &ControlRequest) -> String {
    serde_json::from_str::<serde_json::Value>(&request.body)
        .ok()
        .and_then(|v| {
            v.get("agent")
                .and_then(|a| a.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| request.sender.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crew_core::SessionMirror;
    use tempfile::TempDir;

    fn request_with_body(body: &str) -> ControlRequest {
        ControlRequest {
            request_id: "r1".to_string(),
            room: "main".to_string(),
            kind: ControlKind::Shutdown,
            sender: "worker-1".to_string(),
            recipient: "lead".to_string(),
            body: body.to_string(),
            summary: "shutdown".to_string(),
            status: RequestStatus::Approved,
            created_at: Utc::now(),
            resolved_at: Some(Utc::now()),
        }
    }

    #[test]
    fn shutdown_target_prefers_body_agent_field() {
        assert_eq!(shutdown_target(&request_with_body(r#"{"agent": "worker-2"}"#)), "worker-2");
        assert_eq!(shutdown_target(&request_with_body("{}")), "worker-1");
        assert_eq!(shutdown_target(&request_with_body("not json")), "worker-1");
    }

    async fn supervisor(dir: &TempDir, backend: BackendKind) -> Supervisor {
        let bus = Bus::open(dir.path().join("bus.db")).await.unwrap();
        bus.register("main", "lead", Role::Lead).await.unwrap();
        let mirror = SessionMirror::new(dir.path());
        let control = ControlPlane::new(bus.clone(), mirror);
        let runtime = RuntimeTable::load(dir.path().join("runtime.json"));
        Supervisor::new("s1", CrewConfig::default(), bus, control, runtime, backend)
    }

    #[tokio::test]
    async fn missing_workspaces_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, BackendKind::IsolatedProcess).await;

        // no member has an allocated workspace
        let team =
            TeamConfig::compose("s1", 2, "default", "standard", BackendKind::IsolatedProcess);
        let outcomes = sup.spawn_team(&team, None).await.unwrap();

        assert!(outcomes.is_empty());
        assert!(!sup.has_children());
        // the lead's own record still exists
        assert_eq!(
            sup.runtime().get("lead").unwrap().status,
            AgentStatus::Running
        );
    }

    #[tokio::test]
    async fn apply_shutdown_marks_terminated_and_deactivates() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, BackendKind::IsolatedProcess).await;
        sup.bus
            .register("main", "worker-1", Role::Worker)
            .await
            .unwrap();

        let mut record = AgentRuntimeRecord::spawning(
            "worker-1",
            Role::Worker,
            BackendKind::IsolatedProcess,
        );
        record.status = AgentStatus::Running;
        sup.runtime.upsert(record).unwrap();

        sup.apply_shutdown("worker-1").await.unwrap();

        assert_eq!(
            sup.runtime().get("worker-1").unwrap().status,
            AgentStatus::Terminated
        );
        // no longer part of broadcast fanout
        let members = sup.bus.members("main").await.unwrap();
        assert!(!members.iter().any(|(a, _)| a == "worker-1"));
        // termination is visible on the bus
        let lead_inbox = sup.bus.inbox("lead", true, false).await.unwrap();
        assert!(lead_inbox
            .iter()
            .any(|i| i.message.kind == MessageKind::Status
                && i.message.body.contains("worker-1")));
    }

    #[tokio::test]
    async fn approved_shutdown_requests_are_applied_once() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, BackendKind::IsolatedProcess).await;
        sup.bus
            .register("main", "worker-1", Role::Worker)
            .await
            .unwrap();

        let mut record = AgentRuntimeRecord::spawning(
            "worker-1",
            Role::Worker,
            BackendKind::IsolatedProcess,
        );
        record.status = AgentStatus::Running;
        sup.runtime.upsert(record).unwrap();

        let id = sup
            .control
            .request(
                ControlKind::Shutdown,
                "main",
                "worker-1",
                "lead",
                "{}",
                "done",
                None,
            )
            .await
            .unwrap();
        sup.control
            .respond(&id, "lead", crew_core::Decision::Approve, "ok")
            .await
            .unwrap();

        sup.apply_pending_shutdowns().await.unwrap();
        assert_eq!(
            sup.runtime().get("worker-1").unwrap().status,
            AgentStatus::Terminated
        );

        // a second pass finds nothing running and applies nothing new
        sup.apply_pending_shutdowns().await.unwrap();
    }
}
