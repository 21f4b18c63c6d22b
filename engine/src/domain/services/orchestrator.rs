use crate::domain::error::{AgentError, Result};
use crate::domain::ports::{
    AttemptStore, ClusterStateView, DetailsProvider, Installer, LaunchedProcess,
    LivenessDetector, Monitor, ProcessLauncher, ProcessLocator, ProcessTable, StopDetector,
    StorageDriver,
};
use crate::domain::services::death_notifier::ProcessDeathNotifier;
use crate::domain::services::dependency_wait::wait_for_dependencies;
use crate::domain::services::event_bus::EventBus;
use crate::domain::services::liveness::{any_stop_detected, await_liveness};
use crate::domain::services::metrics_cache::{InstanceStatus, MetricsCache, ServiceDetailsAggregator};
use crate::domain::services::output_reader::{spawn_stream_reader, FileTailer};
use crate::domain::services::process_poller::ProcessStatePoller;
use crate::domain::services::scheduler::TaskScheduler;
use crate::domain::value_objects::{
    AttemptRecord, EventContext, InstanceIdentity, InstanceState, LifecycleEvent, MetricsSnapshot,
    RecoveryDecision, SelfHealingPolicy, StartReason, StopReason,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// All the tunable waits and intervals of an instance, in one place.
#[derive(Debug, Clone)]
pub struct InstanceTimings {
    /// Grace period between issuing the start command and the first check.
    pub post_launch_wait: Duration,
    /// Grace period between process death and the relaunch attempt.
    pub post_death_wait: Duration,
    /// Final sleep at the end of shutdown, letting in-flight signals drain.
    pub drain_period: Duration,
    pub start_detection_timeout: Duration,
    pub start_detection_interval: Duration,
    pub stop_detection_interval: Duration,
    pub process_poll_interval: Duration,
    /// Poll cadence for tailing the capture files of an adopted process.
    pub tailer_interval: Duration,
    pub dependency_timeout: Duration,
    pub dependency_poll_interval: Duration,
    pub metrics_window: Duration,
}

impl Default for InstanceTimings {
    fn default() -> Self {
        InstanceTimings {
            post_launch_wait: Duration::from_secs(2),
            post_death_wait: Duration::from_secs(2),
            drain_period: Duration::from_secs(10),
            start_detection_timeout: Duration::from_secs(90),
            start_detection_interval: Duration::from_secs(1),
            stop_detection_interval: Duration::from_secs(5),
            process_poll_interval: Duration::from_secs(5),
            tailer_interval: Duration::from_secs(5),
            dependency_timeout: Duration::from_secs(1800),
            dependency_poll_interval: Duration::from_secs(5),
            metrics_window: Duration::from_secs(5),
        }
    }
}

/// Static description of the instance being managed.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub identity: InstanceIdentity,
    pub work_dir: PathBuf,
    pub start_command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub custom_commands: HashMap<String, Vec<String>>,
    pub depends_on: Vec<String>,
    pub async_install: bool,
    pub policy: SelfHealingPolicy,
    pub timings: InstanceTimings,
}

/// The injected adapters the orchestrator drives.
pub struct InstancePorts {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub locator: Arc<dyn ProcessLocator>,
    pub table: Arc<dyn ProcessTable>,
    pub installer: Arc<dyn Installer>,
    pub storage: Arc<dyn StorageDriver>,
    pub attempts: Arc<dyn AttemptStore>,
    pub cluster: Arc<dyn ClusterStateView>,
}

/// Plugin-provided probes and collectors.
pub struct InstancePlugins {
    pub liveness_detectors: Vec<Arc<dyn LivenessDetector>>,
    pub stop_detectors: Vec<Arc<dyn StopDetector>>,
    pub monitors: Vec<Arc<dyn Monitor>>,
    pub details_providers: Vec<Arc<dyn DetailsProvider>>,
}

/// Result of a custom command invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub command: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Mutable lifecycle state, guarded by one mutex.
///
/// Every state transition and every mutation of the process handle happens
/// under this lock; it is a tokio mutex precisely because launch holds it
/// across awaits (events, liveness probes), serializing shutdown and death
/// handling behind the launch in progress.
struct Inner {
    state: InstanceState,
    process: Option<LaunchedProcess>,
    scheduler: TaskScheduler,
    notifier: Option<Arc<ProcessDeathNotifier>>,
}

/// Drives one service instance through install, launch, liveness
/// confirmation, steady-state monitoring, self-healing recovery and orderly
/// shutdown.
pub struct InstanceOrchestrator {
    settings: InstanceSettings,
    ports: InstancePorts,
    events: EventBus,
    liveness_detectors: Vec<Arc<dyn LivenessDetector>>,
    stop_detectors: Vec<Arc<dyn StopDetector>>,
    metrics_cache: MetricsCache,
    details: ServiceDetailsAggregator,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<InstanceState>,
    monitored_pids: std::sync::Mutex<Vec<u32>>,
    last_failure: std::sync::Mutex<Option<AgentError>>,
    shutdown_started: AtomicBool,
    self_ref: Weak<InstanceOrchestrator>,
}

impl InstanceOrchestrator {
    pub fn new(
        settings: InstanceSettings,
        ports: InstancePorts,
        events: EventBus,
        plugins: InstancePlugins,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(InstanceState::Initializing);
        let metrics_window = settings.timings.metrics_window;
        Arc::new_cyclic(|self_ref| InstanceOrchestrator {
            settings,
            ports,
            events,
            liveness_detectors: plugins.liveness_detectors,
            stop_detectors: plugins.stop_detectors,
            metrics_cache: MetricsCache::new(plugins.monitors, metrics_window),
            details: ServiceDetailsAggregator::new(plugins.details_providers),
            inner: Mutex::new(Inner {
                state: InstanceState::Initializing,
                process: None,
                scheduler: TaskScheduler::new(),
                notifier: None,
            }),
            state_tx,
            monitored_pids: std::sync::Mutex::new(Vec::new()),
            last_failure: std::sync::Mutex::new(None),
            shutdown_started: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    // ---- observation -----------------------------------------------------

    pub fn state(&self) -> InstanceState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<InstanceState> {
        self.state_tx.subscribe()
    }

    pub fn monitored_pids(&self) -> Vec<u32> {
        self.monitored_pids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_failure(&self) -> Option<AgentError> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Health answer for the hosting container: `Ok` while the instance has
    /// not permanently failed.
    pub fn aliveness(&self) -> Result<()> {
        match self.last_failure() {
            Some(cause) => Err(AgentError::InstanceFailed(cause.to_string())),
            None => Ok(()),
        }
    }

    pub async fn wait_until_running(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    InstanceState::Running => return Ok(()),
                    InstanceState::Error | InstanceState::ShuttingDown => {
                        return Err(self.last_failure().unwrap_or_else(|| {
                            AgentError::InstanceFailed(format!("instance entered {state}"))
                        }));
                    }
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(AgentError::InstanceFailed("state channel closed".into()));
                }
            }
        })
        .await;
        match waited {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(format!(
                "instance did not reach RUNNING within {}s",
                timeout.as_secs()
            ))),
        }
    }

    pub async fn metrics(&self) -> Arc<MetricsSnapshot> {
        let status = InstanceStatus {
            state: self.state(),
            monitored_pids: self.monitored_pids(),
        };
        self.metrics_cache.metrics(&status).await
    }

    pub async fn service_details(&self) -> Result<Arc<BTreeMap<String, Value>>> {
        self.details.details().await
    }

    // ---- initialization --------------------------------------------------

    /// Bring the instance up: reconcile leftover runtime files, adopt a
    /// still-running process if one exists, otherwise install and launch.
    pub async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        info!(
            instance = %self.settings.identity.file_prefix(),
            "initializing service instance"
        );
        if let Err(e) = self
            .ports
            .cluster
            .publish_state(&self.settings.identity, InstanceState::Initializing)
            .await
        {
            warn!(error = %e, "failed to publish state to cluster view");
        }
        if let Some(adopted) = self.reconcile_runtime_files().await? {
            info!(pids = ?adopted, "adopting service process from a previous agent run");
            self.set_monitored_pids(adopted);
            self.start_steady_state_tasks(&mut inner, true);
            self.set_state(&mut inner, InstanceState::Running).await?;
            return Ok(());
        }
        let result = self.fire_init_and_install(&mut inner).await;
        if let Err(cause) = &result {
            self.mark_failed_locked(&mut inner, cause.clone()).await;
        }
        result
    }

    async fn fire_init_and_install(&self, inner: &mut Inner) -> Result<()> {
        if self.settings.identity.instance_id == 1 {
            self.events
                .fire(&EventContext::new(LifecycleEvent::PreServiceStart))
                .await?;
        }
        self.events
            .fire(&EventContext::new(LifecycleEvent::Init))
            .await?;
        if self.settings.async_install {
            let weak = self.self_ref.clone();
            inner
                .scheduler
                .spawn_once("deferred-install", Duration::ZERO, async move {
                    let Some(orch) = weak.upgrade() else { return };
                    let result = {
                        let mut inner = orch.inner.lock().await;
                        if inner.state != InstanceState::Initializing {
                            debug!(state = %inner.state, "deferred install aborted");
                            return;
                        }
                        orch.install_and_launch(&mut inner).await
                    };
                    if let Err(cause) = result {
                        let mut inner = orch.inner.lock().await;
                        orch.mark_failed_locked(&mut inner, cause).await;
                    }
                });
            Ok(())
        } else {
            self.install_and_launch(inner).await
        }
    }

    async fn install_and_launch(&self, inner: &mut Inner) -> Result<()> {
        wait_for_dependencies(
            &self.ports.cluster,
            &self.settings.depends_on,
            self.settings.timings.dependency_timeout,
            self.settings.timings.dependency_poll_interval,
        )
        .await?;
        self.ports.storage.allocate().await?;
        self.events
            .fire(&EventContext::new(LifecycleEvent::PreInstall))
            .await?;
        self.ports.installer.install().await?;
        self.events
            .fire(&EventContext::new(LifecycleEvent::Install))
            .await?;
        self.events
            .fire(&EventContext::new(LifecycleEvent::PostInstall))
            .await?;
        self.launch_locked(inner, StartReason::Deploy).await?;
        self.clear_attempt_record().await;
        Ok(())
    }

    // ---- launch ----------------------------------------------------------

    async fn launch_locked(&self, inner: &mut Inner, reason: StartReason) -> Result<()> {
        self.set_state(inner, InstanceState::Launching).await?;
        let notifier = self.arm_death_notifier(inner);
        self.events
            .fire(&EventContext::starting(LifecycleEvent::PreStart, reason))
            .await?;
        let launched = self
            .ports
            .launcher
            .launch(
                &self.settings.start_command,
                &self.settings.work_dir,
                &self.settings.env,
            )
            .await?;
        let had_direct_child = launched.is_some();
        match launched {
            Some(mut process) => {
                info!(pid = process.pid(), "service process launched");
                if let Some(out) = process.take_stdout() {
                    spawn_stream_reader(
                        out,
                        self.settings.identity.output_file(&self.settings.work_dir),
                        "stdout",
                        notifier.clone(),
                    );
                }
                if let Some(err) = process.take_stderr() {
                    spawn_stream_reader(
                        err,
                        self.settings.identity.error_file(&self.settings.work_dir),
                        "stderr",
                        notifier.clone(),
                    );
                }
                inner.process = Some(process);
            }
            None => {
                info!("start command is empty, no process launched directly");
            }
        }
        tokio::time::sleep(self.settings.timings.post_launch_wait).await;
        let liveness = await_liveness(
            &self.liveness_detectors,
            &mut inner.process,
            &notifier.death_token(),
            self.settings.timings.start_detection_timeout,
            self.settings.timings.start_detection_interval,
        )
        .await;
        // Pid resolution runs even when liveness failed, so whatever did
        // start is on record for cleanup.
        let resolution = self.resolve_and_persist_pids(inner).await;
        liveness?;
        resolution?;
        if had_direct_child && inner.process.is_none() {
            // The start command exited cleanly after daemonizing. Its pipe
            // end-of-streams are expected; re-arm death detection for the
            // located background pids only.
            notifier.disarm();
            self.arm_death_notifier(inner);
        }
        self.events
            .fire(&EventContext::starting(LifecycleEvent::PostStart, reason))
            .await?;
        self.start_steady_state_tasks(inner, false);
        self.set_state(inner, InstanceState::Running).await
    }

    /// Create a fresh notifier for this incarnation and spawn the one-shot
    /// listener that turns its signal into `on_process_death`.
    fn arm_death_notifier(&self, inner: &mut Inner) -> Arc<ProcessDeathNotifier> {
        let (notifier, rx) = ProcessDeathNotifier::new();
        self.spawn_death_listener(rx);
        inner.notifier = Some(notifier.clone());
        notifier
    }

    fn spawn_death_listener(&self, mut rx: mpsc::UnboundedReceiver<String>) {
        let weak = self.self_ref.clone();
        tokio::spawn(async move {
            if let Some(cause) = rx.recv().await {
                if let Some(orch) = weak.upgrade() {
                    orch.on_process_death(&cause).await;
                }
            }
        });
    }

    async fn resolve_and_persist_pids(&self, inner: &mut Inner) -> Result<()> {
        let direct = inner.process.as_ref().map(|p| p.pid());
        let mut pids = match self.ports.locator.locate(direct).await {
            Ok(pids) => pids,
            Err(e) => {
                warn!(error = %e, "process location failed, monitoring the direct child only");
                Vec::new()
            }
        };
        if pids.is_empty() {
            pids = direct.into_iter().collect();
        }
        self.set_monitored_pids(pids.clone());
        if pids.is_empty() {
            warn!("no service process identified for monitoring");
            return Ok(());
        }
        let pid_file = self.settings.identity.pid_file(&self.settings.work_dir);
        let joined = pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        std::fs::write(&pid_file, joined)
            .map_err(|e| AgentError::io("writing pid file", e))?;
        info!(pids = ?pids, pid_file = %pid_file.display(), "service pids persisted");
        Ok(())
    }

    /// Start the steady-state watchers for the current incarnation: the
    /// exit watcher for a direct child, stop detection, the process-table
    /// poller, and for adopted processes the capture-file tailers.
    fn start_steady_state_tasks(&self, inner: &mut Inner, adopted: bool) {
        let notifier = match &inner.notifier {
            Some(n) => n.clone(),
            None => self.arm_death_notifier(inner),
        };
        let timings = &self.settings.timings;
        if let Some(process) = inner.process.take() {
            let n = notifier.clone();
            let token = inner.scheduler.token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = process.wait() => match result {
                        Ok(code) => n.notify(&format!("service process exited with code {code}")),
                        Err(e) => n.notify(&format!("waiting on service process failed: {e}")),
                    }
                }
            });
        }
        if !self.stop_detectors.is_empty() {
            let detectors = self.stop_detectors.clone();
            let n = notifier.clone();
            inner.scheduler.spawn_periodic(
                "stop-detection",
                timings.stop_detection_interval,
                timings.stop_detection_interval,
                move || {
                    let detectors = detectors.clone();
                    let n = n.clone();
                    async move {
                        if any_stop_detected(&detectors).await {
                            n.notify("stop detector reported service stopped");
                        }
                    }
                },
            );
        }
        let pids = self.monitored_pids();
        if !pids.is_empty() {
            let poller = Arc::new(ProcessStatePoller::new(
                self.ports.table.clone(),
                pids,
                notifier,
            ));
            inner.scheduler.spawn_periodic(
                "process-poll",
                timings.process_poll_interval,
                timings.process_poll_interval,
                move || {
                    let poller = poller.clone();
                    async move { poller.poll_once().await }
                },
            );
        }
        if adopted {
            let tailers = Arc::new(Mutex::new(vec![
                FileTailer::new(
                    self.settings.identity.output_file(&self.settings.work_dir),
                    "stdout",
                ),
                FileTailer::new(
                    self.settings.identity.error_file(&self.settings.work_dir),
                    "stderr",
                ),
            ]));
            inner.scheduler.spawn_periodic(
                "output-tailer",
                timings.tailer_interval,
                timings.tailer_interval,
                move || {
                    let tailers = tailers.clone();
                    async move {
                        for tailer in tailers.lock().await.iter_mut() {
                            tailer.poll_once().await;
                        }
                    }
                },
            );
        }
    }

    // ---- death and recovery ----------------------------------------------

    /// React to the death of the managed process. Outside `RUNNING` this is
    /// a no-op: launch failures carry their own error path, and during
    /// shutdown the process is supposed to die.
    pub async fn on_process_death(&self, cause: &str) {
        let mut inner = self.inner.lock().await;
        if inner.state != InstanceState::Running {
            debug!(cause, state = %inner.state, "death signal ignored outside RUNNING");
            return;
        }
        warn!(cause, "managed service process died");
        if let Err(e) = self
            .events
            .fire(&EventContext::stopping(
                LifecycleEvent::PostStop,
                StopReason::ProcessFailure,
            ))
            .await
        {
            error!(error = %e, "post-stop listeners failed after process death");
        }
        inner.scheduler.cancel_all();
        inner.scheduler = TaskScheduler::new();
        inner.process = None;
        inner.notifier = None;
        self.set_monitored_pids(Vec::new());
        if let Err(e) = self.set_state(&mut inner, InstanceState::Launching).await {
            error!(error = %e, "cannot enter LAUNCHING for recovery");
            return;
        }
        drop(inner);
        // Recovery runs detached: the caller may be a watcher task that is
        // about to be torn down with the old incarnation.
        let weak = self.self_ref.clone();
        tokio::spawn(async move {
            if let Some(orch) = weak.upgrade() {
                orch.recover().await;
            }
        });
    }

    async fn recover(&self) {
        loop {
            tokio::time::sleep(self.settings.timings.post_death_wait).await;
            let result = {
                let mut inner = self.inner.lock().await;
                if inner.state != InstanceState::Launching {
                    debug!(state = %inner.state, "recovery aborted");
                    return;
                }
                info!("relaunching service process");
                self.launch_locked(&mut inner, StartReason::ProcessRecovery)
                    .await
            };
            match result {
                Ok(()) => {
                    self.clear_attempt_record().await;
                    info!("service process relaunched");
                    return;
                }
                Err(cause) => {
                    error!(error = %cause, "relaunch attempt failed");
                    self.cleanup_failed_launch().await;
                    match self.next_recovery_decision().await {
                        RecoveryDecision::Retry => continue,
                        RecoveryDecision::Fail => {
                            let mut inner = self.inner.lock().await;
                            self.mark_failed_locked(&mut inner, cause).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Kill whatever a failed launch attempt left behind so the retry
    /// starts from a clean slate.
    async fn cleanup_failed_launch(&self) {
        let mut inner = self.inner.lock().await;
        inner.scheduler.cancel_all();
        inner.scheduler = TaskScheduler::new();
        inner.notifier = None;
        if let Some(mut process) = inner.process.take() {
            let pid = process.pid();
            if let Err(e) = self.ports.table.terminate(pid).await {
                warn!(pid, error = %e, "failed to terminate half-started process");
            }
            let _ = process.try_exit_code();
        }
        for pid in self.monitored_pids() {
            match self.ports.table.is_alive(pid).await {
                Ok(true) => {
                    if let Err(e) = self.ports.table.terminate(pid).await {
                        warn!(pid, error = %e, "failed to terminate leftover process");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(pid, error = %e, "process table query failed during cleanup"),
            }
        }
        self.set_monitored_pids(Vec::new());
    }

    async fn next_recovery_decision(&self) -> RecoveryDecision {
        let current = match self.ports.attempts.load(&self.settings.identity).await {
            Ok(Some(record)) => record.attempt_number,
            Ok(None) => 1,
            Err(e) => {
                warn!(error = %e, "failed to load launch attempt record, assuming first attempt");
                1
            }
        };
        let decision = self.settings.policy.decide(current);
        match decision {
            RecoveryDecision::Retry => {
                let mut record = AttemptRecord::first(&self.settings.identity);
                record.attempt_number = current + 1;
                if let Err(e) = self.ports.attempts.save(&record).await {
                    warn!(error = %e, "failed to persist launch attempt record");
                }
                warn!(
                    attempt = current,
                    limit = self.settings.policy.retry_limit,
                    "retrying launch"
                );
            }
            RecoveryDecision::Fail => {
                error!(
                    attempt = current,
                    limit = self.settings.policy.retry_limit,
                    enabled = self.settings.policy.enabled,
                    "launch retry budget exhausted"
                );
            }
        }
        decision
    }

    async fn mark_failed_locked(&self, inner: &mut Inner, cause: AgentError) {
        error!(error = %cause, "service instance permanently failed");
        inner.scheduler.cancel_all();
        inner.scheduler = TaskScheduler::new();
        inner.process = None;
        inner.notifier = None;
        if let Err(e) = self.set_state(inner, InstanceState::Error).await {
            debug!(error = %e, "state already terminal");
        }
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cause);
        if let Err(e) = self.ports.storage.deallocate().await {
            warn!(error = %e, "storage deallocation failed after permanent failure");
        }
    }

    async fn clear_attempt_record(&self) {
        if let Err(e) = self.ports.attempts.delete(&self.settings.identity).await {
            warn!(error = %e, "failed to clear launch attempt record");
        }
    }

    // ---- shutdown --------------------------------------------------------

    /// Orderly shutdown. Idempotent: only the first call does any work.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already requested");
            return;
        }
        info!("shutting down service instance");
        {
            let mut inner = self.inner.lock().await;
            if let Err(e) = self.set_state(&mut inner, InstanceState::ShuttingDown).await {
                debug!(error = %e, "state transition during shutdown: {e}");
            }
            inner.scheduler.cancel_all();
            if self.settings.identity.instance_id == 1 {
                if let Err(e) = self
                    .events
                    .fire(&EventContext::new(LifecycleEvent::PreServiceStop))
                    .await
                {
                    error!(error = %e, "pre-service-stop listeners failed");
                }
            }
            self.stop_locked(&mut inner, StopReason::Undeploy).await;
            if let Err(e) = self
                .events
                .fire(&EventContext::new(LifecycleEvent::Shutdown))
                .await
            {
                error!(error = %e, "shutdown listeners failed");
            }
            self.remove_runtime_files();
            self.clear_work_dir();
            if let Err(e) = self.ports.storage.deallocate().await {
                warn!(error = %e, "storage deallocation failed during shutdown");
            }
            self.clear_attempt_record().await;
            if let Err(e) = self.ports.cluster.withdraw(&self.settings.identity).await {
                warn!(error = %e, "failed to withdraw state from cluster view");
            }
        }
        tokio::time::sleep(self.settings.timings.drain_period).await;
        info!("shutdown complete");
    }

    /// Stop the managed process: pre-stop listeners, kill the process chain
    /// from the monitored leaf up to (excluding) the agent, stop/post-stop
    /// listeners. Every step is best-effort; shutdown must always complete.
    async fn stop_locked(&self, inner: &mut Inner, reason: StopReason) {
        if let Err(e) = self
            .events
            .fire(&EventContext::stopping(LifecycleEvent::PreStop, reason))
            .await
        {
            error!(error = %e, "pre-stop listeners failed");
        }
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        for pid in self.monitored_pids() {
            let chain = match self
                .ports
                .table
                .parent_chain(pid, self.settings.identity.container_pid)
                .await
            {
                Ok(chain) => chain,
                Err(e) => {
                    warn!(pid, error = %e, "failed to resolve parent chain, killing pid directly");
                    vec![pid]
                }
            };
            for p in chain {
                if seen.insert(p) {
                    targets.push(p);
                }
            }
        }
        for pid in targets {
            match self.ports.table.is_alive(pid).await {
                Ok(true) => {
                    info!(pid, "terminating service process");
                    if let Err(e) = self.ports.table.terminate(pid).await {
                        error!(pid, error = %e, "failed to terminate service process");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(pid, error = %e, "process table query failed during stop"),
            }
        }
        if let Some(mut process) = inner.process.take() {
            let _ = process.try_exit_code();
        }
        if let Err(e) = self
            .events
            .fire(&EventContext::stopping(LifecycleEvent::Stop, reason))
            .await
        {
            error!(error = %e, "stop listeners failed");
        }
        if let Err(e) = self
            .events
            .fire(&EventContext::stopping(LifecycleEvent::PostStop, reason))
            .await
        {
            error!(error = %e, "post-stop listeners failed");
        }
        self.set_monitored_pids(Vec::new());
    }

    // ---- custom commands -------------------------------------------------

    /// Run one of the recipe's named custom commands with extra arguments.
    pub async fn invoke(&self, command: &str, args: &[String]) -> Result<InvocationOutcome> {
        let template = self
            .settings
            .custom_commands
            .get(command)
            .ok_or_else(|| AgentError::UnknownCommand(command.to_string()))?;
        let program = template
            .first()
            .ok_or_else(|| AgentError::Configuration(format!("custom command '{command}' is empty")))?;
        info!(command, args = ?args, "invoking custom command");
        let output = tokio::process::Command::new(program)
            .args(&template[1..])
            .args(args)
            .current_dir(&self.settings.work_dir)
            .envs(self.settings.env.iter().cloned())
            .output()
            .await
            .map_err(|e| AgentError::io("running custom command", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let outcome = InvocationOutcome {
            command: command.to_string(),
            success: output.status.success(),
            output: (!stdout.is_empty()).then_some(stdout),
            error: (!stderr.is_empty()).then_some(stderr),
        };
        info!(command, success = outcome.success, "custom command finished");
        Ok(outcome)
    }

    // ---- internals -------------------------------------------------------

    async fn set_state(&self, inner: &mut Inner, next: InstanceState) -> Result<()> {
        if inner.state == next {
            return Ok(());
        }
        inner.state = inner.state.transition_to(next)?;
        info!(state = %next, "instance state changed");
        // send_replace updates the channel value even with no subscribers,
        // so state() stays accurate whether or not anyone is watching.
        self.state_tx.send_replace(next);
        if let Err(e) = self
            .ports
            .cluster
            .publish_state(&self.settings.identity, next)
            .await
        {
            warn!(error = %e, "failed to publish state to cluster view");
        }
        Ok(())
    }

    fn set_monitored_pids(&self, pids: Vec<u32>) {
        *self
            .monitored_pids
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = pids;
    }

    /// Check for a pid file left by a previous agent run. Returns the still
    /// alive pids it names, or `None` after clearing stale files away.
    async fn reconcile_runtime_files(&self) -> Result<Option<Vec<u32>>> {
        let pid_file = self.settings.identity.pid_file(&self.settings.work_dir);
        if pid_file.exists() {
            let raw = std::fs::read_to_string(&pid_file)
                .map_err(|e| AgentError::io("reading pid file", e))?;
            let mut pids = Vec::new();
            for token in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let pid = token.parse::<u32>().map_err(|_| {
                    AgentError::Configuration(format!(
                        "pid file {} is corrupt: '{token}'",
                        pid_file.display()
                    ))
                })?;
                pids.push(pid);
            }
            let mut alive = Vec::new();
            for pid in &pids {
                if self.ports.table.is_alive(*pid).await? {
                    alive.push(*pid);
                }
            }
            if !alive.is_empty() {
                return Ok(Some(alive));
            }
            info!(pid_file = %pid_file.display(), "stale pid file found, clearing runtime files");
        }
        self.remove_runtime_files();
        Ok(None)
    }

    /// A pid file that survives shutdown gets adopted by the next agent run,
    /// so its removal failure is logged at error level.
    fn remove_runtime_files(&self) {
        let identity = &self.settings.identity;
        let work_dir = &self.settings.work_dir;
        let pid_file = identity.pid_file(work_dir);
        match std::fs::remove_file(&pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(path = %pid_file.display(), error = %e, "failed to remove pid file"),
        }
        for path in [identity.output_file(work_dir), identity.error_file(work_dir)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove runtime file"),
            }
        }
    }

    /// Empty the instance work directory during shutdown. Installed
    /// artifacts belong to the incarnation; an undeployed instance leaves
    /// nothing behind. Best-effort, entry by entry.
    fn clear_work_dir(&self) {
        let work_dir = &self.settings.work_dir;
        let entries = match std::fs::read_dir(work_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %work_dir.display(), error = %e, "failed to list work directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = removed {
                warn!(path = %path.display(), error = %e, "failed to remove work directory entry");
            }
        }
    }
}
