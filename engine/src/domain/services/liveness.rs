use crate::domain::error::{AgentError, Result};
use crate::domain::ports::{LaunchedProcess, LivenessDetector, StopDetector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run the ordered start-detection loop until every detector has passed.
///
/// Detectors are evaluated strictly in order: the loop never probes detector
/// N+1 before detector N has reported `true`, and it never re-probes a
/// detector that already passed. A detector error aborts the launch; so does
/// a non-zero exit of the directly launched child, observed between probes.
/// The whole loop is bounded by `timeout`.
pub async fn await_liveness(
    detectors: &[Arc<dyn LivenessDetector>],
    process: &mut Option<LaunchedProcess>,
    death: &CancellationToken,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    if detectors.is_empty() {
        warn!("no liveness detectors configured, assuming the service started");
        return Ok(());
    }
    let deadline = Instant::now() + timeout;
    let mut watch_exit = process.is_some();
    let mut index = 0;
    while Instant::now() < deadline {
        if watch_exit {
            let exited_cleanly = match process.as_mut() {
                Some(p) => match p.try_exit_code()? {
                    Some(0) => true,
                    Some(code) => {
                        return Err(AgentError::Launch(format!(
                            "service process exited with code {code} during start detection"
                        )));
                    }
                    None => false,
                },
                None => false,
            };
            if exited_cleanly {
                // The start command completed; the service runs in the
                // background from here on. Drop the reaped handle so the
                // caller knows there is no direct child to watch.
                info!("start command exited with code 0, continuing start detection");
                *process = None;
                watch_exit = false;
            }
        }
        let detector = &detectors[index];
        let passed = tokio::select! {
            _ = death.cancelled() => {
                return Err(AgentError::ProcessDied(
                    "service process died during start detection".into(),
                ));
            }
            result = detector.probe() => result?,
        };
        if passed {
            debug!(detector = detector.name(), "liveness detector passed");
            index += 1;
            if index == detectors.len() {
                return Ok(());
            }
            continue;
        }
        tokio::select! {
            _ = death.cancelled() => {
                return Err(AgentError::ProcessDied(
                    "service process died during start detection".into(),
                ));
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    Err(AgentError::Timeout(format!(
        "start detection did not complete within {}s, detector '{}' still pending",
        timeout.as_secs(),
        detectors[index].name()
    )))
}

/// One pass over the stop detectors. Any `true` means the service stopped;
/// detector errors are logged and skipped.
pub async fn any_stop_detected(detectors: &[Arc<dyn StopDetector>]) -> bool {
    for detector in detectors {
        match detector.is_stopped().await {
            Ok(true) => {
                info!(detector = detector.name(), "stop detector reported service stopped");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                error!(detector = detector.name(), error = %e, "stop detector failed, skipping");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingDetector {
        name: String,
        pass_after: usize,
        probes: AtomicUsize,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CountingDetector {
        fn new(name: &str, pass_after: usize, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(CountingDetector {
                name: name.to_string(),
                pass_after,
                probes: AtomicUsize::new(0),
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl LivenessDetector for CountingDetector {
        fn name(&self) -> &str {
            &self.name
        }

        async fn probe(&self) -> Result<bool> {
            self.log.lock().unwrap().push(self.name.clone());
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.pass_after)
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl LivenessDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        async fn probe(&self) -> Result<bool> {
            Err(AgentError::ProcessQuery("probe exploded".into()))
        }
    }

    fn short(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_detectors_pass_in_order_without_reprobing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = CountingDetector::new("first", 3, &log);
        let second = CountingDetector::new("second", 1, &log);
        let detectors: Vec<Arc<dyn LivenessDetector>> = vec![first.clone(), second.clone()];
        let token = CancellationToken::new();
        await_liveness(&detectors, &mut None, &token, short(2000), short(1))
            .await
            .unwrap();
        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["first", "first", "first", "second"]);
        assert_eq!(second.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_when_detector_never_passes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stuck = CountingDetector::new("stuck", usize::MAX, &log);
        let detectors: Vec<Arc<dyn LivenessDetector>> = vec![stuck];
        let token = CancellationToken::new();
        let err = await_liveness(&detectors, &mut None, &token, short(30), short(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_detector_error_aborts_immediately() {
        let detectors: Vec<Arc<dyn LivenessDetector>> = vec![Arc::new(FailingDetector)];
        let token = CancellationToken::new();
        let err = await_liveness(&detectors, &mut None, &token, short(1000), short(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProcessQuery(_)));
    }

    #[tokio::test]
    async fn test_death_token_aborts_between_probes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stuck = CountingDetector::new("stuck", usize::MAX, &log);
        let detectors: Vec<Arc<dyn LivenessDetector>> = vec![stuck];
        let token = CancellationToken::new();
        token.cancel();
        let err = await_liveness(&detectors, &mut None, &token, short(1000), short(500))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProcessDied(_)));
    }

    #[tokio::test]
    async fn test_empty_detector_list_passes() {
        let token = CancellationToken::new();
        await_liveness(&[], &mut None, &token, short(10), short(1))
            .await
            .unwrap();
    }

    struct FixedStop {
        name: String,
        stopped: bool,
        fail: bool,
    }

    #[async_trait]
    impl StopDetector for FixedStop {
        fn name(&self) -> &str {
            &self.name
        }

        async fn is_stopped(&self) -> Result<bool> {
            if self.fail {
                Err(AgentError::ProcessQuery("broken".into()))
            } else {
                Ok(self.stopped)
            }
        }
    }

    #[tokio::test]
    async fn test_stop_detection_skips_failing_detectors() {
        let detectors: Vec<Arc<dyn StopDetector>> = vec![
            Arc::new(FixedStop {
                name: "broken".into(),
                stopped: false,
                fail: true,
            }),
            Arc::new(FixedStop {
                name: "healthy".into(),
                stopped: false,
                fail: false,
            }),
        ];
        assert!(!any_stop_detected(&detectors).await);
    }

    #[tokio::test]
    async fn test_stop_detection_reports_any_stopped() {
        let detectors: Vec<Arc<dyn StopDetector>> = vec![
            Arc::new(FixedStop {
                name: "quiet".into(),
                stopped: false,
                fail: false,
            }),
            Arc::new(FixedStop {
                name: "tripped".into(),
                stopped: true,
                fail: false,
            }),
        ];
        assert!(any_stop_detected(&detectors).await);
    }
}
