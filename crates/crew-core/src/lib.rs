// ABOUTME: Core crate for the crew control-plane
// ABOUTME: Bus, control protocol, session layout, config, and shared types

pub mod bus;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod mirror;
pub mod session;
pub mod types;

pub use bus::{Bus, RoomStatus, Tail};
pub use clock::{IntervalTicker, ManualTicker, Ticker};
pub use config::{missing_gate, CrewConfig, DirtyBasePolicy, GATE_AGENTS, GATE_PRIMARY};
pub use control::ControlPlane;
pub use error::{BusError, ControlError};
pub use mirror::SessionMirror;
pub use session::{data_root, validate_session_name, SessionPaths, DATA_DIR_ENV};
pub use types::{
    AgentRuntimeRecord, AgentStatus, BackendKind, BackendMode, ControlKind, ControlRequest,
    Decision, InboxItem, Message, MessageKind, ReadState, RequestStatus, Role, TeamConfig,
    TeamMember, BROADCAST, SYSTEM_SENDER,
};
