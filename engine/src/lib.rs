//! Service instance lifecycle engine.
//!
//! Supervises a single service instance through its whole life: install the
//! service, launch its process, confirm liveness through ordered detectors,
//! monitor it in steady state, relaunch it under a configurable retry budget
//! when it dies, and take it down in order on shutdown.
//!
//! The domain layer is adapter-agnostic: everything that touches the OS, the
//! filesystem or the cluster goes through the ports in [`domain::ports`],
//! with production adapters in [`infrastructure`].

pub mod domain;
pub mod infrastructure;

pub use domain::error::{AgentError, Result};
pub use domain::services::{
    EventBus, EventBusBuilder, InstanceOrchestrator, InstancePlugins, InstancePorts,
    InstanceSettings, InstanceTimings, InvocationOutcome,
};
pub use domain::value_objects::{
    EventContext, InstanceIdentity, InstanceState, LifecycleEvent, SelfHealingPolicy,
    StartReason, StopReason,
};
