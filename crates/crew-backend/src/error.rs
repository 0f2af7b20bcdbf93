// ABOUTME: Error types for backend supervision
// ABOUTME: Multiplexer command failures and process launch failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    /// A tmux invocation failed; carries the command's stderr.
    #[error("tmux {command} failed: {stderr}")]
    Mux { command: String, stderr: String },

    /// The requested backend needs a live multiplexer session.
    #[error("no terminal multiplexer session is active (start one with 'tmux new-session', or use --backend process)")]
    NoMultiplexer,

    /// Launching an agent process failed.
    #[error("failed to spawn agent '{agent}': {reason}")]
    Spawn { agent: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
