use crate::domain::error::{AgentError, Result};
use crate::domain::ports::{Installer, LifecycleListener, StorageDriver};
use crate::domain::value_objects::EventContext;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Run one recipe hook command to completion. An empty command is a no-op;
/// a non-zero exit is a failure.
async fn run_hook(
    command: &[String],
    work_dir: &Path,
    env: &[(String, String)],
    label: &str,
) -> std::result::Result<(), String> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    info!(hook = label, command = ?command, "running hook command");
    let status = Command::new(program)
        .args(args)
        .current_dir(work_dir)
        .envs(env.iter().cloned())
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("{label}: running '{program}': {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{label}: '{program}' exited with {status}"))
    }
}

/// Installer that runs the recipe's install command.
pub struct CommandInstaller {
    command: Vec<String>,
    work_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl CommandInstaller {
    pub fn new(command: Vec<String>, work_dir: PathBuf, env: Vec<(String, String)>) -> Self {
        CommandInstaller {
            command,
            work_dir,
            env,
        }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self) -> Result<()> {
        run_hook(&self.command, &self.work_dir, &self.env, "install")
            .await
            .map_err(AgentError::Install)
    }
}

/// Storage driver that delegates allocation and deallocation to recipe
/// commands. With both commands empty the instance simply has no managed
/// storage.
pub struct CommandStorageDriver {
    allocate: Vec<String>,
    deallocate: Vec<String>,
    work_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl CommandStorageDriver {
    pub fn new(
        allocate: Vec<String>,
        deallocate: Vec<String>,
        work_dir: PathBuf,
        env: Vec<(String, String)>,
    ) -> Self {
        CommandStorageDriver {
            allocate,
            deallocate,
            work_dir,
            env,
        }
    }
}

#[async_trait]
impl StorageDriver for CommandStorageDriver {
    async fn allocate(&self) -> Result<()> {
        run_hook(&self.allocate, &self.work_dir, &self.env, "storage-allocate")
            .await
            .map_err(AgentError::Store)
    }

    async fn deallocate(&self) -> Result<()> {
        run_hook(
            &self.deallocate,
            &self.work_dir,
            &self.env,
            "storage-deallocate",
        )
        .await
        .map_err(AgentError::Store)
    }
}

/// Lifecycle listener that runs a recipe command when its event fires.
pub struct CommandListener {
    name: String,
    command: Vec<String>,
    work_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl CommandListener {
    pub fn new(
        name: String,
        command: Vec<String>,
        work_dir: PathBuf,
        env: Vec<(String, String)>,
    ) -> Self {
        CommandListener {
            name,
            command,
            work_dir,
            env,
        }
    }
}

#[async_trait]
impl LifecycleListener for CommandListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _ctx: &EventContext) -> Result<()> {
        run_hook(&self.command, &self.work_dir, &self.env, &self.name)
            .await
            .map_err(AgentError::Hook)
    }
}
