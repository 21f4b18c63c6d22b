use crate::domain::ports::ProcessTable;
use crate::domain::services::death_notifier::ProcessDeathNotifier;
use std::sync::Arc;
use tracing::{debug, warn};

/// Periodic OS-level check that at least one monitored pid is still alive.
///
/// This is the safety net behind the event-driven watchers: it catches the
/// adopted-process case (no exit handle, no pipes) and any pid the locator
/// resolved beyond the direct child. A failing table query counts as a death
/// signal, because a process we cannot observe cannot be supervised.
pub struct ProcessStatePoller {
    table: Arc<dyn ProcessTable>,
    pids: Vec<u32>,
    notifier: Arc<ProcessDeathNotifier>,
}

impl ProcessStatePoller {
    pub fn new(
        table: Arc<dyn ProcessTable>,
        pids: Vec<u32>,
        notifier: Arc<ProcessDeathNotifier>,
    ) -> Self {
        ProcessStatePoller {
            table,
            pids,
            notifier,
        }
    }

    pub async fn poll_once(&self) {
        if self.pids.is_empty() {
            return;
        }
        for pid in &self.pids {
            match self.table.is_alive(*pid).await {
                Ok(true) => {
                    debug!(pid, "monitored process alive");
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(pid, error = %e, "process table query failed");
                    self.notifier
                        .notify(&format!("process table query failed for pid {pid}: {e}"));
                    return;
                }
            }
        }
        self.notifier.notify("all monitored processes are gone");
    }
}
