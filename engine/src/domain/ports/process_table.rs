use crate::domain::error::Result;
use async_trait::async_trait;

/// Read-only OS process-table queries plus termination.
///
/// "Alive" means present and neither a zombie nor stopped. `Err` from any
/// query means the query itself failed; callers in the monitoring path treat
/// that as loss of observability, i.e. a death signal.
#[async_trait]
pub trait ProcessTable: Send + Sync {
    async fn is_alive(&self, pid: u32) -> Result<bool>;

    /// Executable name of `pid`, if it is still present.
    async fn command_name(&self, pid: u32) -> Result<Option<String>>;

    /// Direct children of `parent`.
    async fn children(&self, parent: u32) -> Result<Vec<u32>>;

    /// The chain of pids from `child` up to (excluding) `stop_at`,
    /// child first.
    async fn parent_chain(&self, child: u32, stop_at: u32) -> Result<Vec<u32>>;

    /// Pids whose executable name equals `name`.
    async fn find_by_name(&self, name: &str) -> Result<Vec<u32>>;

    /// Terminate `pid`, escalating if it ignores the polite request.
    async fn terminate(&self, pid: u32) -> Result<()>;
}
