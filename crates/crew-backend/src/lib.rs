// ABOUTME: Backend abstraction crate for crew agent execution
// ABOUTME: Re-exports resolution, tmux runner, process launch, runtime table

pub mod error;
pub mod mux;
pub mod process;
pub mod resolve;
pub mod runtime;

pub use error::BackendError;
pub use mux::Multiplexer;
pub use process::{AgentProcess, ProcessDescriptor};
pub use resolve::resolve_backend;
pub use runtime::RuntimeTable;
