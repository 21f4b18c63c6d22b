use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle events an instance fires, in rough chronological order.
///
/// `PreServiceStart` / `PreServiceStop` are service-wide and only fired by
/// the first instance of the service; everything else is per-instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    PreServiceStart,
    Init,
    PreInstall,
    Install,
    PostInstall,
    PreStart,
    PostStart,
    PreStop,
    Stop,
    PostStop,
    Shutdown,
    PreServiceStop,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::PreServiceStart => "PRE_SERVICE_START",
            LifecycleEvent::Init => "INIT",
            LifecycleEvent::PreInstall => "PRE_INSTALL",
            LifecycleEvent::Install => "INSTALL",
            LifecycleEvent::PostInstall => "POST_INSTALL",
            LifecycleEvent::PreStart => "PRE_START",
            LifecycleEvent::PostStart => "POST_START",
            LifecycleEvent::PreStop => "PRE_STOP",
            LifecycleEvent::Stop => "STOP",
            LifecycleEvent::PostStop => "POST_STOP",
            LifecycleEvent::Shutdown => "SHUTDOWN",
            LifecycleEvent::PreServiceStop => "PRE_SERVICE_STOP",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a start-phase event is being fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    Deploy,
    ProcessRecovery,
}

impl fmt::Display for StartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StartReason::Deploy => "DEPLOY",
            StartReason::ProcessRecovery => "PROCESS_RECOVERY",
        })
    }
}

/// Why a stop-phase event is being fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Undeploy,
    ProcessFailure,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Undeploy => "UNDEPLOY",
            StopReason::ProcessFailure => "PROCESS_FAILURE",
        })
    }
}

/// Context handed to every lifecycle listener.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: LifecycleEvent,
    pub start_reason: Option<StartReason>,
    pub stop_reason: Option<StopReason>,
}

impl EventContext {
    pub fn new(event: LifecycleEvent) -> Self {
        EventContext {
            event,
            start_reason: None,
            stop_reason: None,
        }
    }

    pub fn starting(event: LifecycleEvent, reason: StartReason) -> Self {
        EventContext {
            event,
            start_reason: Some(reason),
            stop_reason: None,
        }
    }

    pub fn stopping(event: LifecycleEvent, reason: StopReason) -> Self {
        EventContext {
            event,
            start_reason: None,
            stop_reason: Some(reason),
        }
    }
}
