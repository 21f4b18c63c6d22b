use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fan-in point for "the managed process is gone" signals.
///
/// Several independent watchers can conclude death: the exit watcher, the
/// stream readers on EOF, the process-table poller and the stop detectors.
/// Whichever fires first wins; every later signal for the same incarnation
/// is dropped. A fresh notifier is created for every launch, so signals from
/// a previous incarnation can never leak into the next one.
pub struct ProcessDeathNotifier {
    fired: AtomicBool,
    death: CancellationToken,
    tx: mpsc::UnboundedSender<String>,
}

impl ProcessDeathNotifier {
    /// Returns the notifier and the receiver that yields the winning cause.
    /// The receiver produces at most one value.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(ProcessDeathNotifier {
            fired: AtomicBool::new(false),
            death: CancellationToken::new(),
            tx,
        });
        (notifier, rx)
    }

    /// Signal process death. Only the first call per incarnation delivers.
    pub fn notify(&self, cause: &str) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!(cause, "additional death signal ignored");
            return;
        }
        self.death.cancel();
        // Receiver may already be gone during shutdown; nothing to do then.
        let _ = self.tx.send(cause.to_string());
    }

    /// Consume the notifier without delivering anything.
    ///
    /// Used when the start command exits cleanly after daemonizing: its pipe
    /// end-of-streams are expected and must not count as process death.
    pub fn disarm(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Token cancelled the moment the first death signal arrives. In-flight
    /// launch work (liveness probes in particular) selects on this.
    pub fn death_token(&self) -> CancellationToken {
        self.death.clone()
    }
}
