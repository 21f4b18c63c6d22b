use crate::domain::error::{AgentError, Result};
use crate::domain::ports::ClusterStateView;
use crate::domain::value_objects::InstanceState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Block until every service in `dependencies` reports `RUNNING` through the
/// cluster view, polling at `poll_interval` and giving up after `timeout`.
pub async fn wait_for_dependencies(
    view: &Arc<dyn ClusterStateView>,
    dependencies: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    if dependencies.is_empty() {
        return Ok(());
    }
    info!(dependencies = ?dependencies, "waiting for dependencies");
    let deadline = Instant::now() + timeout;
    for dependency in dependencies {
        loop {
            match view.service_state(dependency).await? {
                Some(InstanceState::Running) => {
                    info!(dependency, "dependency is running");
                    break;
                }
                state => {
                    debug!(dependency, state = ?state, "dependency not running yet");
                }
            }
            if Instant::now() >= deadline {
                return Err(AgentError::Timeout(format!(
                    "dependency '{dependency}' did not reach RUNNING within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
    Ok(())
}
