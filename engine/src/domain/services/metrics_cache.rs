use crate::domain::error::Result;
use crate::domain::ports::{DetailsProvider, Monitor};
use crate::domain::value_objects::{sanitize_metric_values, InstanceState, MetricsSnapshot};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::error;

/// Point-in-time view of the instance handed to the metrics collection.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub state: InstanceState,
    pub monitored_pids: Vec<u32>,
}

struct CachedSnapshot {
    snapshot: Arc<MetricsSnapshot>,
    expires_at: Instant,
}

/// Time-bounded cache in front of the monitors.
///
/// The monitoring façade polls aggressively; monitors may shell out or hit
/// the network. Within the expiration window every caller gets the cached
/// snapshot; past it, exactly one caller recomputes while the others wait on
/// the lock. A single slow monitor therefore delays all metrics consumers,
/// which is the intended backpressure.
pub struct MetricsCache {
    monitors: Vec<Arc<dyn Monitor>>,
    window: Duration,
    slot: Mutex<Option<CachedSnapshot>>,
}

impl MetricsCache {
    pub fn new(monitors: Vec<Arc<dyn Monitor>>, window: Duration) -> Self {
        MetricsCache {
            monitors,
            window,
            slot: Mutex::new(None),
        }
    }

    pub async fn metrics(&self, status: &InstanceStatus) -> Arc<MetricsSnapshot> {
        // Outside RUNNING the monitors have nothing meaningful to observe;
        // the snapshot carries only the instance state, uncached.
        if status.state != InstanceState::Running {
            let mut values = BTreeMap::new();
            values.insert(
                "instance_state".to_string(),
                json!(status.state.to_string()),
            );
            return Arc::new(MetricsSnapshot::new(values));
        }
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return cached.snapshot.clone();
            }
        }
        let mut values = BTreeMap::new();
        for monitor in &self.monitors {
            match monitor.collect().await {
                Ok(map) => values.extend(map),
                Err(e) => {
                    error!(monitor = monitor.name(), error = %e, "monitor failed, skipping");
                }
            }
        }
        sanitize_metric_values(&mut values);
        // Agent-supplied defaults go in last so a plugin cannot shadow them.
        values.insert("instance_state".to_string(), json!(status.state.to_string()));
        values.insert("monitored_pids".to_string(), json!(status.monitored_pids));
        let snapshot = Arc::new(MetricsSnapshot::new(values));
        *slot = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            expires_at: Instant::now() + self.window,
        });
        snapshot
    }
}

/// Static service details, aggregated across providers exactly once per
/// agent lifetime and cached forever after.
pub struct ServiceDetailsAggregator {
    providers: Vec<Arc<dyn DetailsProvider>>,
    cell: OnceCell<Arc<BTreeMap<String, Value>>>,
}

impl ServiceDetailsAggregator {
    pub fn new(providers: Vec<Arc<dyn DetailsProvider>>) -> Self {
        ServiceDetailsAggregator {
            providers,
            cell: OnceCell::new(),
        }
    }

    pub async fn details(&self) -> Result<Arc<BTreeMap<String, Value>>> {
        let details = self
            .cell
            .get_or_try_init(|| async {
                let mut all = BTreeMap::new();
                for provider in &self.providers {
                    all.extend(provider.details().await?);
                }
                Ok::<_, crate::domain::error::AgentError>(Arc::new(all))
            })
            .await?;
        Ok(details.clone())
    }
}
