// ABOUTME: crew library with cli, orchestrator, supervisor, and agent modules
// ABOUTME: Re-exports for programmatic use of the control-plane

pub mod agent;
pub mod cli;
pub mod orchestrator;
pub mod supervisor;

pub use agent::{agent_loop, run_agent, AgentContext, AgentRunner};
pub use cli::{run, Cli, CliError};
pub use orchestrator::{build_prompt, delegate, size_pool};
pub use supervisor::{hub::run_hub, shutdown_target, SpawnOutcome, Supervisor};
