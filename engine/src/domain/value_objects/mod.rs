mod instance_identity;
mod instance_state;
mod lifecycle_event;
mod metrics;
mod self_healing;

pub use instance_identity::InstanceIdentity;
pub use instance_state::InstanceState;
pub use lifecycle_event::{EventContext, LifecycleEvent, StartReason, StopReason};
pub use metrics::{metric_number, sanitize_metric_values, MetricsSnapshot};
pub use self_healing::{AttemptRecord, RecoveryDecision, SelfHealingPolicy};
