use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Owns the background tasks of one process incarnation.
///
/// Every task spawned here is tied to a single `CancellationToken`; on
/// process death or shutdown the whole scheduler is cancelled and replaced
/// with a fresh one, so stale monitoring tasks from a dead incarnation never
/// observe the next one.
pub struct TaskScheduler {
    token: CancellationToken,
}

impl TaskScheduler {
    pub fn new() -> Self {
        TaskScheduler {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `task` every `interval` after an initial `delay`, until cancelled.
    /// Cancellation also interrupts a run already in flight.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        delay: Duration,
        interval: Duration,
        mut task: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = task() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!(task = name, "periodic task cancelled");
        });
    }

    /// Run `task` once after `delay`, unless cancelled first.
    pub fn spawn_once<Fut>(&self, name: &'static str, delay: Duration, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(task = name, "one-shot task cancelled before start");
                }
                _ = tokio::time::sleep(delay) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(task = name, "one-shot task cancelled");
                        }
                        _ = task => {}
                    }
                }
            }
        });
    }

    /// Cancel every task spawned from this scheduler.
    pub fn cancel_all(&self) {
        self.token.cancel();
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
