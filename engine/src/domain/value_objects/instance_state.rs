use crate::domain::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a managed service instance.
///
/// Exactly one state is current at any time; transitions go through
/// [`InstanceState::transition_to`] so illegal jumps are rejected at the
/// domain boundary instead of surfacing as inconsistent behavior later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Reconciling on-disk state, firing init events, installing.
    Initializing,
    /// Start command issued, liveness not yet confirmed.
    Launching,
    /// Liveness confirmed, steady-state monitoring active.
    Running,
    /// Orderly stop in progress; terminal.
    ShuttingDown,
    /// Unrecoverable failure; only an orderly shutdown may follow.
    Error,
}

impl InstanceState {
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        match (self, next) {
            // Adoption of a live process skips the launch phase entirely.
            (Initializing, Launching) | (Initializing, Running) => true,
            (Launching, Running) => true,
            // Process death while running restarts the launch phase.
            (Running, Launching) => true,
            (Initializing, Error) | (Launching, Error) | (Running, Error) => true,
            (Error, ShuttingDown) => true,
            (s, ShuttingDown) if s != ShuttingDown => true,
            _ => false,
        }
    }

    pub fn transition_to(self, next: InstanceState) -> Result<InstanceState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AgentError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    /// True once the instance can no longer reach `Running`.
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::ShuttingDown | InstanceState::Error)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Initializing => "INITIALIZING",
            InstanceState::Launching => "LAUNCHING",
            InstanceState::Running => "RUNNING",
            InstanceState::ShuttingDown => "SHUTTING_DOWN",
            InstanceState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_path_transitions() {
        assert!(InstanceState::Initializing.can_transition_to(InstanceState::Launching));
        assert!(InstanceState::Launching.can_transition_to(InstanceState::Running));
        assert!(InstanceState::Running.can_transition_to(InstanceState::Launching));
    }

    #[test]
    fn test_adoption_skips_launching() {
        assert!(InstanceState::Initializing.can_transition_to(InstanceState::Running));
    }

    #[test]
    fn test_shutdown_reachable_from_everywhere_but_itself() {
        for s in [
            InstanceState::Initializing,
            InstanceState::Launching,
            InstanceState::Running,
            InstanceState::Error,
        ] {
            assert!(s.can_transition_to(InstanceState::ShuttingDown), "{s}");
        }
        assert!(!InstanceState::ShuttingDown.can_transition_to(InstanceState::ShuttingDown));
    }

    #[test]
    fn test_terminal_states_reject_relaunch() {
        assert!(!InstanceState::Error.can_transition_to(InstanceState::Launching));
        assert!(!InstanceState::ShuttingDown.can_transition_to(InstanceState::Running));
        let err = InstanceState::Error
            .transition_to(InstanceState::Running)
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_serde_wire_format() {
        let json = serde_json::to_string(&InstanceState::ShuttingDown).unwrap();
        assert_eq!(json, "\"SHUTTING_DOWN\"");
        let back: InstanceState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InstanceState::ShuttingDown);
    }
}
