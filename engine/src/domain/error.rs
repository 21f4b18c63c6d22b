//! Agent-level errors
//! These represent lifecycle failures, not infrastructure failures

use crate::domain::value_objects::{InstanceState, LifecycleEvent};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AgentError {
    // Fatal at initialization time
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Install/launch errors, retried according to the self-healing policy
    #[error("Install failed: {0}")]
    Install(String),

    #[error("Failed to launch service process: {0}")]
    Launch(String),

    // A lifecycle listener failed; aborts the triggering operation
    #[error("Lifecycle event {event} failed: {cause}")]
    Event {
        event: LifecycleEvent,
        cause: String,
    },

    // The OS process query itself failed (not merely "process absent")
    #[error("Process table query failed: {0}")]
    ProcessQuery(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // The managed process died while an operation was in flight
    #[error("Service process died: {0}")]
    ProcessDied(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: InstanceState,
        to: InstanceState,
    },

    // Terminal failure, retained and surfaced through the aliveness query
    #[error("Instance permanently failed: {0}")]
    InstanceFailed(String),

    #[error("Coordination store failure: {0}")]
    Store(String),

    #[error("Unknown custom command '{0}'")]
    UnknownCommand(String),

    // A recipe hook command exited non-zero or could not be run
    #[error("Hook command failed: {0}")]
    Hook(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Wrap an I/O error with context about what was being done.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        AgentError::Io(format!("{context}: {err}"))
    }
}
