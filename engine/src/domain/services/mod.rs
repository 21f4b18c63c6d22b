mod death_notifier;
mod dependency_wait;
mod event_bus;
mod liveness;
mod metrics_cache;
mod orchestrator;
mod output_reader;
mod process_poller;
mod scheduler;

pub use death_notifier::ProcessDeathNotifier;
pub use dependency_wait::wait_for_dependencies;
pub use event_bus::{EventBus, EventBusBuilder};
pub use liveness::{any_stop_detected, await_liveness};
pub use metrics_cache::{InstanceStatus, MetricsCache, ServiceDetailsAggregator};
pub use orchestrator::{
    InstanceOrchestrator, InstancePlugins, InstancePorts, InstanceSettings, InstanceTimings,
    InvocationOutcome,
};
pub use output_reader::{spawn_stream_reader, FileTailer};
pub use process_poller::ProcessStatePoller;
pub use scheduler::TaskScheduler;
