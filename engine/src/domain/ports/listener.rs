use crate::domain::error::Result;
use crate::domain::value_objects::EventContext;
use async_trait::async_trait;

/// A lifecycle listener, invoked for the events it was registered on.
///
/// Listeners on the same event run in ascending `priority` order; the first
/// error aborts the chain and the surrounding operation.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    async fn handle(&self, ctx: &EventContext) -> Result<()>;
}
