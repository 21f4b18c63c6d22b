//! svcmgrd — supervises one service instance described by a recipe file.
//!
//! Configuration comes from `SVCMGR_*` environment variables plus the YAML
//! recipe named by `SVCMGR_CONFIG_FILE`. The process runs until SIGTERM or
//! ctrl-c, then takes the instance down in order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use svcmgr_engine::domain::error::{AgentError, Result};
use svcmgr_engine::domain::ports::{LivenessDetector, ProcessTable, StopDetector};
use svcmgr_engine::infrastructure::{
    load_recipe, AgentOptions, CommandInstaller, CommandListener, CommandStorageDriver,
    DetectorSpec, FileAttemptStore, FileClusterView, LeafProcessLocator, LogPatternDetector,
    ProcProcessTable, ProcessNameDetector, ServiceRecipe, TcpPortDetector, TokioProcessLauncher,
};
use svcmgr_engine::{
    EventBusBuilder, InstanceIdentity, InstanceOrchestrator, InstancePlugins, InstancePorts,
    InstanceSettings,
};
use tracing::{error, info};

const TERMINATE_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn liveness_detector(
    spec: &DetectorSpec,
    identity: &InstanceIdentity,
    work_dir: &Path,
    table: &Arc<dyn ProcessTable>,
) -> Arc<dyn LivenessDetector> {
    match spec {
        DetectorSpec::TcpPort {
            host,
            port,
            timeout_millis,
        } => Arc::new(TcpPortDetector::new(
            host.clone(),
            *port,
            Duration::from_millis(*timeout_millis),
        )),
        DetectorSpec::LogPattern { file, pattern } => {
            let file = file
                .clone()
                .unwrap_or_else(|| identity.output_file(work_dir));
            Arc::new(LogPatternDetector::new(file, pattern.clone()))
        }
        DetectorSpec::ProcessName { name } => {
            Arc::new(ProcessNameDetector::new(table.clone(), name.clone()))
        }
    }
}

fn stop_detector(spec: &DetectorSpec) -> Result<Arc<dyn StopDetector>> {
    match spec {
        DetectorSpec::TcpPort {
            host,
            port,
            timeout_millis,
        } => Ok(Arc::new(TcpPortDetector::new(
            host.clone(),
            *port,
            Duration::from_millis(*timeout_millis),
        ))),
        other => Err(AgentError::Configuration(format!(
            "detector {other:?} cannot be used for stop detection"
        ))),
    }
}

fn build_orchestrator(
    recipe: &ServiceRecipe,
    options: &AgentOptions,
) -> Result<Arc<InstanceOrchestrator>> {
    let work_dir = match &options.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| AgentError::io("resolving work dir", e))?,
    };
    let identity = InstanceIdentity::new(&recipe.application, &recipe.service, options.instance_id);
    let env: Vec<(String, String)> = recipe
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let table: Arc<dyn ProcessTable> = Arc::new(ProcProcessTable::new(TERMINATE_GRACE));
    let ports = InstancePorts {
        launcher: Arc::new(TokioProcessLauncher),
        locator: Arc::new(LeafProcessLocator::new(table.clone())),
        table: table.clone(),
        installer: Arc::new(CommandInstaller::new(
            recipe.install.clone(),
            work_dir.clone(),
            env.clone(),
        )),
        storage: Arc::new(CommandStorageDriver::new(
            recipe.storage_allocate.clone(),
            recipe.storage_deallocate.clone(),
            work_dir.clone(),
            env.clone(),
        )),
        attempts: Arc::new(FileAttemptStore::new(options.shared_dir.clone())),
        cluster: Arc::new(FileClusterView::new(options.shared_dir.clone())),
    };
    let mut events = EventBusBuilder::new();
    for (event, command) in recipe.lifecycle_hooks()? {
        events = events.listen(
            event,
            Arc::new(CommandListener::new(
                format!("hook-{event}"),
                command,
                work_dir.clone(),
                env.clone(),
            )),
        );
    }
    let liveness_detectors = recipe
        .liveness_detectors
        .iter()
        .map(|spec| liveness_detector(spec, &identity, &work_dir, &table))
        .collect();
    let stop_detectors = recipe
        .stop_detectors
        .iter()
        .map(stop_detector)
        .collect::<Result<Vec<_>>>()?;
    let settings = InstanceSettings {
        identity,
        work_dir,
        start_command: recipe.start.clone(),
        env,
        custom_commands: recipe
            .custom_commands
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<HashMap<_, _>>(),
        depends_on: options.depends_on.clone(),
        async_install: options.async_install,
        policy: options.policy(),
        timings: recipe.timeouts.timings(),
    };
    Ok(InstanceOrchestrator::new(
        settings,
        ports,
        events.build(),
        InstancePlugins {
            liveness_detectors,
            stop_detectors,
            monitors: Vec::new(),
            details_providers: Vec::new(),
        },
    ))
}

async fn wait_for_stop_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received ctrl-c");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let options = AgentOptions::from_env()?;
    init_tracing(&options.log_level);
    let recipe = load_recipe(&options.config_file)?;
    info!(
        application = %recipe.application,
        service = %recipe.service,
        instance = options.instance_id,
        "starting service instance agent"
    );
    let orchestrator = build_orchestrator(&recipe, &options)?;
    if let Err(e) = orchestrator.initialize().await {
        error!(error = %e, "initialization failed");
        orchestrator.shutdown().await;
        return Err(e.into());
    }
    wait_for_stop_signal().await?;
    orchestrator.shutdown().await;
    Ok(())
}
