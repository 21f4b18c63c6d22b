use crate::domain::error::Result;
use async_trait::async_trait;

/// Materializes the service binaries/configuration before first launch.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self) -> Result<()>;
}

/// Storage attached to the instance (data volumes and the like).
///
/// Allocation happens before install, deallocation on permanent failure and
/// on orderly shutdown. Internals (attach/partition/format/mount and their
/// resume-after-crash behavior) stay behind this port.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn allocate(&self) -> Result<()>;
    async fn deallocate(&self) -> Result<()>;
}
