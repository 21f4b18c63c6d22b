//! End-to-end lifecycle tests against real shell processes.
//!
//! These drive the orchestrator with the production adapters: real process
//! spawning, the /proc-backed process table and the file-based stores.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use svcmgr_engine::domain::ports::{LivenessDetector, ProcessTable};
use svcmgr_engine::infrastructure::{
    CommandInstaller, CommandStorageDriver, FileAttemptStore, FileClusterView, LeafProcessLocator,
    LogPatternDetector, ProcProcessTable, TokioProcessLauncher,
};
use svcmgr_engine::{
    EventBusBuilder, InstanceIdentity, InstanceOrchestrator, InstancePlugins, InstancePorts,
    InstanceSettings, InstanceState, InstanceTimings, SelfHealingPolicy,
};
use tempfile::TempDir;

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

fn fast_timings() -> InstanceTimings {
    InstanceTimings {
        post_launch_wait: Duration::from_millis(100),
        post_death_wait: Duration::from_millis(50),
        drain_period: Duration::from_millis(10),
        start_detection_timeout: Duration::from_secs(5),
        start_detection_interval: Duration::from_millis(50),
        stop_detection_interval: Duration::from_millis(50),
        process_poll_interval: Duration::from_millis(50),
        tailer_interval: Duration::from_millis(50),
        dependency_timeout: Duration::from_secs(5),
        dependency_poll_interval: Duration::from_millis(50),
        metrics_window: Duration::from_millis(50),
    }
}

struct Harness {
    work: TempDir,
    shared: TempDir,
    identity: InstanceIdentity,
    table: Arc<ProcProcessTable>,
}

impl Harness {
    fn new() -> Self {
        Harness {
            work: TempDir::new().unwrap(),
            shared: TempDir::new().unwrap(),
            identity: InstanceIdentity::new("itest", "svc", 1),
            table: Arc::new(ProcProcessTable::new(Duration::from_secs(2))),
        }
    }

    fn work_dir(&self) -> &Path {
        self.work.path()
    }

    fn orchestrator(
        &self,
        start: Vec<String>,
        install: Vec<String>,
        liveness: Vec<Arc<dyn LivenessDetector>>,
        policy: SelfHealingPolicy,
    ) -> Arc<InstanceOrchestrator> {
        let work_dir = self.work.path().to_path_buf();
        let shared = self.shared.path().to_path_buf();
        let table: Arc<dyn ProcessTable> = self.table.clone();
        let settings = InstanceSettings {
            identity: self.identity.clone(),
            work_dir: work_dir.clone(),
            start_command: start,
            env: Vec::new(),
            custom_commands: Default::default(),
            depends_on: Vec::new(),
            async_install: false,
            policy,
            timings: fast_timings(),
        };
        let ports = InstancePorts {
            launcher: Arc::new(TokioProcessLauncher),
            locator: Arc::new(LeafProcessLocator::new(table.clone())),
            table,
            installer: Arc::new(CommandInstaller::new(install, work_dir.clone(), Vec::new())),
            storage: Arc::new(CommandStorageDriver::new(
                Vec::new(),
                Vec::new(),
                work_dir,
                Vec::new(),
            )),
            attempts: Arc::new(FileAttemptStore::new(shared.clone())),
            cluster: Arc::new(FileClusterView::new(shared)),
        };
        InstanceOrchestrator::new(
            settings,
            ports,
            EventBusBuilder::new().build(),
            InstancePlugins {
                liveness_detectors: liveness,
                stop_detectors: Vec::new(),
                monitors: Vec::new(),
                details_providers: Vec::new(),
            },
        )
    }

    fn ready_detector(&self) -> Vec<Arc<dyn LivenessDetector>> {
        vec![Arc::new(LogPatternDetector::new(
            self.identity.output_file(self.work_dir()),
            "ready".to_string(),
        ))]
    }
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_deploy_runs_real_process_and_shutdown_reaps_it() {
    let h = Harness::new();
    let orch = h.orchestrator(
        sh("echo ready; exec sleep 30"),
        sh("touch installed.marker"),
        h.ready_detector(),
        SelfHealingPolicy::default(),
    );
    orch.initialize().await.unwrap();
    assert_eq!(orch.state(), InstanceState::Running);
    assert!(h.work_dir().join("installed.marker").exists());

    let pids = orch.monitored_pids();
    assert_eq!(pids.len(), 1);
    assert!(h.table.is_alive(pids[0]).await.unwrap());
    let pid_file = h.identity.pid_file(h.work_dir());
    assert_eq!(
        std::fs::read_to_string(&pid_file).unwrap().trim(),
        pids[0].to_string()
    );

    orch.shutdown().await;
    assert_eq!(orch.state(), InstanceState::ShuttingDown);
    assert!(!h.table.is_alive(pids[0]).await.unwrap());
    assert!(!pid_file.exists());
    // Undeploy empties the work directory, install artifacts included.
    assert!(!h.work_dir().join("installed.marker").exists());
    // Published cluster state is withdrawn with the instance.
    assert!(std::fs::read_dir(h.shared.path())
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn test_killed_process_is_relaunched() {
    let h = Harness::new();
    let orch = h.orchestrator(
        sh("echo ready; exec sleep 30"),
        Vec::new(),
        h.ready_detector(),
        SelfHealingPolicy::default(),
    );
    orch.initialize().await.unwrap();
    let first = orch.monitored_pids()[0];

    let status = std::process::Command::new("kill")
        .args(["-9", &first.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    wait_for("relaunched process", || {
        orch.state() == InstanceState::Running
            && orch.monitored_pids().first().is_some_and(|p| *p != first)
    })
    .await;
    let second = orch.monitored_pids()[0];
    assert!(h.table.is_alive(second).await.unwrap());

    orch.shutdown().await;
    assert!(!h.table.is_alive(second).await.unwrap());
}

#[tokio::test]
async fn test_recovery_stops_once_retry_budget_is_spent() {
    let h = Harness::new();
    // The service only comes up while the flag file is absent.
    let orch = h.orchestrator(
        sh("[ -e die.flag ] && exit 1; echo ready; exec sleep 30"),
        Vec::new(),
        h.ready_detector(),
        SelfHealingPolicy {
            enabled: true,
            retry_limit: 1,
        },
    );
    orch.initialize().await.unwrap();
    let pid = orch.monitored_pids()[0];

    std::fs::write(h.work_dir().join("die.flag"), "").unwrap();
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    wait_for("recovery giving up", || {
        orch.state() == InstanceState::Error
    })
    .await;
    assert!(orch.last_failure().is_some());

    orch.shutdown().await;
}

#[tokio::test]
async fn test_live_pid_file_is_adopted_without_reinstall() {
    let h = Harness::new();
    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    std::fs::write(
        h.identity.pid_file(h.work_dir()),
        child.id().to_string(),
    )
    .unwrap();

    let orch = h.orchestrator(
        sh("echo ready; exec sleep 30"),
        sh("touch installed.marker"),
        h.ready_detector(),
        SelfHealingPolicy::default(),
    );
    orch.initialize().await.unwrap();
    assert_eq!(orch.state(), InstanceState::Running);
    assert!(!h.work_dir().join("installed.marker").exists());
    assert_eq!(orch.monitored_pids(), vec![child.id()]);

    orch.shutdown().await;
    // The adopted process was terminated; reap it so the assertion below
    // does not see a zombie as alive.
    let _ = child.wait();
    assert!(!h.table.is_alive(child.id()).await.unwrap());
}

#[tokio::test]
async fn test_stale_pid_file_falls_back_to_fresh_deploy() {
    let h = Harness::new();
    // A pid that cannot exist keeps the adoption path from firing.
    std::fs::write(h.identity.pid_file(h.work_dir()), "999999999").unwrap();

    let orch = h.orchestrator(
        sh("echo ready; exec sleep 30"),
        sh("touch installed.marker"),
        h.ready_detector(),
        SelfHealingPolicy::default(),
    );
    orch.initialize().await.unwrap();
    assert_eq!(orch.state(), InstanceState::Running);
    assert!(h.work_dir().join("installed.marker").exists());

    orch.shutdown().await;
}
