use crate::domain::error::Result;
use async_trait::async_trait;

/// One liveness probe run during start detection.
///
/// Detectors are ordered; the launch phase only advances past a detector
/// once it has reported `true`. `Err` is a hard failure and aborts the
/// launch, unlike a plain `false` which is retried until the timeout.
#[async_trait]
pub trait LivenessDetector: Send + Sync {
    fn name(&self) -> &str;
    async fn probe(&self) -> Result<bool>;
}

/// Steady-state check for "the service stopped on its own terms".
///
/// Polled periodically while running; any detector reporting `true` is
/// treated as process death. `Err` here is logged and skipped, because a
/// flaky stop detector must not take down a healthy service.
#[async_trait]
pub trait StopDetector: Send + Sync {
    fn name(&self) -> &str;
    async fn is_stopped(&self) -> Result<bool>;
}
