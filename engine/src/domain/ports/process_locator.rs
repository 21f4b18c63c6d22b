use crate::domain::error::Result;
use async_trait::async_trait;

/// Resolves the pids that actually need monitoring once the start command
/// has settled.
///
/// Start commands are frequently wrappers: a shell script that forks the
/// real server and lingers, or a launcher that exits after daemonizing.
/// The locator bridges the gap between "the pid we spawned" and "the pids
/// whose death means the service died".
#[async_trait]
pub trait ProcessLocator: Send + Sync {
    /// `direct_child` is the pid of the directly spawned process, when one
    /// exists. An empty result means no process could be identified.
    async fn locate(&self, direct_child: Option<u32>) -> Result<Vec<u32>>;
}
