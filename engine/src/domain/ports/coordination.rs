use crate::domain::error::Result;
use crate::domain::value_objects::{AttemptRecord, InstanceIdentity, InstanceState};
use async_trait::async_trait;

/// Durable store for per-instance launch-attempt records.
///
/// The record must survive an agent restart: exhausting the retry budget is
/// only meaningful if a crash-looping agent cannot reset its own counter.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn load(&self, identity: &InstanceIdentity) -> Result<Option<AttemptRecord>>;
    async fn save(&self, record: &AttemptRecord) -> Result<()>;
    async fn delete(&self, identity: &InstanceIdentity) -> Result<()>;
}

/// Shared view of instance states across the cluster.
///
/// Used in two directions: publishing this instance's state for others, and
/// polling the states of services this instance depends on.
#[async_trait]
pub trait ClusterStateView: Send + Sync {
    async fn publish_state(&self, identity: &InstanceIdentity, state: InstanceState) -> Result<()>;

    /// State of the named service, `None` when no instance has published yet.
    /// When several instances have published, a `Running` one wins.
    async fn service_state(&self, service: &str) -> Result<Option<InstanceState>>;

    /// Remove this instance's published state during shutdown.
    async fn withdraw(&self, identity: &InstanceIdentity) -> Result<()>;
}
