// ABOUTME: Shared data model for the crew control-plane
// ABOUTME: Roles, message kinds, control requests, runtime records, team config

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Recipient value that expands to every active member except the sender.
pub const BROADCAST: &str = "all";

/// Well-known sender auto-registered by the bus with [`Role::System`].
pub const SYSTEM_SENDER: &str = "system";

/// Explicit role tag carried on every member and runtime record.
/// Never re-derived from agent name patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Lead,
    Worker,
    Utility,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Worker => "worker",
            Self::Utility => "utility",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lead" => Some(Self::Lead),
            "worker" => Some(Self::Worker),
            "utility" => Some(Self::Utility),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every message kind that can appear on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Task,
    Question,
    Answer,
    Status,
    Blocker,
    System,
    Message,
    Broadcast,
    PlanApprovalRequest,
    PlanApprovalResponse,
    ShutdownRequest,
    ShutdownResponse,
    PermissionRequest,
    PermissionResponse,
    ModeSetRequest,
    ModeSetResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Status => "status",
            Self::Blocker => "blocker",
            Self::System => "system",
            Self::Message => "message",
            Self::Broadcast => "broadcast",
            Self::PlanApprovalRequest => "plan_approval_request",
            Self::PlanApprovalResponse => "plan_approval_response",
            Self::ShutdownRequest => "shutdown_request",
            Self::ShutdownResponse => "shutdown_response",
            Self::PermissionRequest => "permission_request",
            Self::PermissionResponse => "permission_response",
            Self::ModeSetRequest => "mode_set_request",
            Self::ModeSetResponse => "mode_set_response",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(Self::Task),
            "question" => Some(Self::Question),
            "answer" => Some(Self::Answer),
            "status" => Some(Self::Status),
            "blocker" => Some(Self::Blocker),
            "system" => Some(Self::System),
            "message" => Some(Self::Message),
            "broadcast" => Some(Self::Broadcast),
            "plan_approval_request" => Some(Self::PlanApprovalRequest),
            "plan_approval_response" => Some(Self::PlanApprovalResponse),
            "shutdown_request" => Some(Self::ShutdownRequest),
            "shutdown_response" => Some(Self::ShutdownResponse),
            "permission_request" => Some(Self::PermissionRequest),
            "permission_response" => Some(Self::PermissionResponse),
            "mode_set_request" => Some(Self::ModeSetRequest),
            "mode_set_response" => Some(Self::ModeSetResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four correlated request/response interactions layered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    PlanApproval,
    Shutdown,
    Permission,
    ModeSet,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanApproval => "plan_approval",
            Self::Shutdown => "shutdown",
            Self::Permission => "permission",
            Self::ModeSet => "mode_set",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan_approval" => Some(Self::PlanApproval),
            "shutdown" => Some(Self::Shutdown),
            "permission" => Some(Self::Permission),
            "mode_set" => Some(Self::ModeSet),
            _ => None,
        }
    }

    /// Bus message kind emitted when the request is created.
    pub fn request_kind(&self) -> MessageKind {
        match self {
            Self::PlanApproval => MessageKind::PlanApprovalRequest,
            Self::Shutdown => MessageKind::ShutdownRequest,
            Self::Permission => MessageKind::PermissionRequest,
            Self::ModeSet => MessageKind::ModeSetRequest,
        }
    }

    /// Bus message kind emitted when the request is resolved.
    pub fn response_kind(&self) -> MessageKind {
        match self {
            Self::PlanApproval => MessageKind::PlanApprovalResponse,
            Self::Shutdown => MessageKind::ShutdownResponse,
            Self::Permission => MessageKind::PermissionResponse,
            Self::ModeSet => MessageKind::ModeSetResponse,
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal decision on a pending control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
        }
    }
}

/// Lifecycle of a control request. Transitions exactly once out of Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// Read state of a mailbox entry. Private to the owning recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadState {
    Unread,
    Read,
}

impl ReadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "read" => Self::Read,
            _ => Self::Unread,
        }
    }
}

/// One immutable row in a room's ordered message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room: String,
    pub kind: MessageKind,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A mailbox entry joined with the message it delivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItem {
    pub message: Message,
    pub state: ReadState,
    pub delivered_at: DateTime<Utc>,
}

/// A correlated request/response exchange persisted alongside the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub request_id: String,
    pub room: String,
    pub kind: ControlKind,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub summary: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Concurrency strategy used to run agent processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    MultiplexedPane,
    #[default]
    IsolatedProcess,
    SharedHub,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiplexedPane => "multiplexed-pane",
            Self::IsolatedProcess => "isolated-process",
            Self::SharedHub => "shared-hub",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested backend mode before resolution. Auto defers to the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Auto,
    Pane,
    Process,
    Hub,
}

impl BackendMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "pane" => Some(Self::Pane),
            "process" => Some(Self::Process),
            "hub" => Some(Self::Hub),
            _ => None,
        }
    }
}

/// Agent lifecycle as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Spawning,
    Running,
    Terminated,
}

/// One runtime record per agent per session. Created at spawn, retained
/// after termination for audit. Process/pane identity is meaningful only
/// while status is Running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntimeRecord {
    pub agent_name: String,
    pub role: Role,
    pub backend: BackendKind,
    pub status: AgentStatus,
    pub process_id: Option<u32>,
    pub pane_id: Option<String>,
    pub window: Option<String>,
}

impl AgentRuntimeRecord {
    pub fn spawning(agent_name: impl Into<String>, role: Role, backend: BackendKind) -> Self {
        Self {
            agent_name: agent_name.into(),
            role,
            backend,
            status: AgentStatus::Spawning,
            process_id: None,
            pane_id: None,
            window: None,
        }
    }
}

/// One member of a team. The full member set is recomputed on refresh,
/// never incrementally patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub role: Role,
    pub model: String,
    pub profile: String,
    pub workspace_path: Option<PathBuf>,
    pub backend: BackendKind,
}

/// Team shape for one session: lead x1, workers xN, utility x1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub session_id: String,
    pub members: Vec<TeamMember>,
}

impl TeamConfig {
    /// Recompute the full member set from the role shape.
    pub fn compose(
        session_id: impl Into<String>,
        worker_count: usize,
        model: &str,
        profile: &str,
        backend: BackendKind,
    ) -> Self {
        let mut members = Vec::with_capacity(worker_count + 2);
        members.push(TeamMember {
            name: "lead".to_string(),
            role: Role::Lead,
            model: model.to_string(),
            profile: profile.to_string(),
            workspace_path: None,
            backend,
        });
        for i in 1..=worker_count {
            members.push(TeamMember {
                name: format!("worker-{i}"),
                role: Role::Worker,
                model: model.to_string(),
                profile: profile.to_string(),
                workspace_path: None,
                backend,
            });
        }
        members.push(TeamMember {
            name: "utility".to_string(),
            role: Role::Utility,
            model: model.to_string(),
            profile: profile.to_string(),
            workspace_path: None,
            backend,
        });
        Self {
            session_id: session_id.into(),
            members,
        }
    }

    pub fn member(&self, name: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn workers(&self) -> impl Iterator<Item = &TeamMember> {
        self.members.iter().filter(|m| m.role == Role::Worker)
    }
}
