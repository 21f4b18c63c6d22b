use crate::domain::error::{AgentError, Result};
use crate::domain::ports::LifecycleListener;
use crate::domain::value_objects::{EventContext, LifecycleEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Dedicated target so operators can raise/lower lifecycle event logging
/// independently of the rest of the agent.
const EVENT_TARGET: &str = "svcmgr::lifecycle_events";

/// Immutable registry of lifecycle listeners, built once at wiring time.
pub struct EventBusBuilder {
    listeners: HashMap<LifecycleEvent, Vec<Arc<dyn LifecycleListener>>>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        EventBusBuilder {
            listeners: HashMap::new(),
        }
    }

    pub fn listen(mut self, event: LifecycleEvent, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.entry(event).or_default().push(listener);
        self
    }

    pub fn build(mut self) -> EventBus {
        for listeners in self.listeners.values_mut() {
            listeners.sort_by_key(|l| l.priority());
        }
        EventBus {
            listeners: self.listeners,
        }
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventBus {
    listeners: HashMap<LifecycleEvent, Vec<Arc<dyn LifecycleListener>>>,
}

impl EventBus {
    /// Fire `ctx.event` through its registered listeners, in priority order.
    ///
    /// Fail-fast: the first listener error aborts the chain. An event with
    /// no listeners is a silent no-op.
    pub async fn fire(&self, ctx: &EventContext) -> Result<()> {
        let listeners = match self.listeners.get(&ctx.event) {
            Some(l) if !l.is_empty() => l,
            _ => return Ok(()),
        };
        info!(
            target: EVENT_TARGET,
            event = %ctx.event,
            listeners = listeners.len(),
            "invoked"
        );
        let started = Instant::now();
        for listener in listeners {
            if let Err(e) = listener.handle(ctx).await {
                info!(
                    target: EVENT_TARGET,
                    event = %ctx.event,
                    listener = listener.name(),
                    error = %e,
                    "failed"
                );
                return Err(AgentError::Event {
                    event: ctx.event,
                    cause: format!("listener '{}': {e}", listener.name()),
                });
            }
        }
        info!(
            target: EVENT_TARGET,
            event = %ctx.event,
            duration_ms = started.elapsed().as_millis() as u64,
            "completed successfully"
        );
        Ok(())
    }
}
