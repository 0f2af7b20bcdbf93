// ABOUTME: Error types for the crew-core bus and control protocol
// ABOUTME: BusError for log/mailbox operations, ControlError for request resolution

use thiserror::Error;

/// Errors from message log and mailbox operations.
#[derive(Error, Debug)]
pub enum BusError {
    /// The room has no members; sends do not create rooms implicitly.
    #[error("unknown room: {0} (run 'crew teamcreate' first)")]
    UnknownRoom(String),

    /// The agent is not an active member of the room.
    #[error("agent '{agent}' is not registered in room '{room}'")]
    UnknownAgent { room: String, agent: String },

    /// Underlying SQLite failure.
    #[error("bus storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Errors from the request/response control protocol.
#[derive(Error, Debug)]
pub enum ControlError {
    /// No request with this id exists.
    #[error("control request not found: {0}")]
    NotFound(String),

    /// The request exists but was already resolved; the original resolution
    /// is unchanged.
    #[error("control request {0} is not pending")]
    NotPending(String),

    /// A caller-supplied request id collided with an existing request.
    #[error("duplicate request id: {0}")]
    DuplicateRequest(String),

    /// The poll budget ran out before the request was resolved.
    #[error("control request {0} still pending after wait budget")]
    WaitExhausted(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("control storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_display() {
        let err = BusError::UnknownRoom("main".to_string());
        assert!(err.to_string().contains("unknown room"));
        assert!(err.to_string().contains("teamcreate"));

        let err = BusError::UnknownAgent {
            room: "main".to_string(),
            agent: "worker-9".to_string(),
        };
        assert!(err.to_string().contains("worker-9"));
    }

    #[test]
    fn control_error_display() {
        let err = ControlError::NotFound("abc".to_string());
        assert!(err.to_string().contains("not found"));

        let err = ControlError::NotPending("abc".to_string());
        assert!(err.to_string().contains("not pending"));
    }
}
