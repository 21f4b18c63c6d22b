use crate::domain::error::{AgentError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::{Child, ChildStderr, ChildStdout};

/// A freshly launched service process.
///
/// The orchestrator takes the piped output streams for the stream readers,
/// then hands the child off to the exit watcher once liveness is confirmed.
#[derive(Debug)]
pub struct LaunchedProcess {
    pid: u32,
    child: Child,
}

impl LaunchedProcess {
    pub fn new(child: Child) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| AgentError::Launch("child exited before pid was observed".into()))?;
        Ok(LaunchedProcess { pid, child })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Non-blocking exit check. `Ok(None)` means still running.
    pub fn try_exit_code(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => Ok(None),
            Err(e) => Err(AgentError::io("polling child exit status", e)),
        }
    }

    /// Wait for the child to exit, consuming the handle.
    pub async fn wait(mut self) -> Result<i32> {
        match self.child.wait().await {
            Ok(status) => Ok(status.code().unwrap_or(-1)),
            Err(e) => Err(AgentError::io("waiting for child exit", e)),
        }
    }
}

/// Launches the service's start command as a child process.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launch `command` in `work_dir` with `env` merged over the agent's
    /// environment. An empty command yields `Ok(None)`: the service manages
    /// its own processes and nothing is launched directly.
    async fn launch(
        &self,
        command: &[String],
        work_dir: &Path,
        env: &[(String, String)],
    ) -> Result<Option<LaunchedProcess>>;
}
