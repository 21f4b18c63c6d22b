use crate::domain::error::{AgentError, Result};
use crate::domain::ports::{LaunchedProcess, ProcessLauncher};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Launches service processes with piped stdout/stderr.
///
/// The pipes feed the stream readers; stdin is closed so a service waiting
/// for console input fails fast instead of hanging the launch.
pub struct TokioProcessLauncher;

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(
        &self,
        command: &[String],
        work_dir: &Path,
        env: &[(String, String)],
    ) -> Result<Option<LaunchedProcess>> {
        let Some((program, args)) = command.split_first() else {
            return Ok(None);
        };
        debug!(program, args = ?args, work_dir = %work_dir.display(), "spawning service process");
        let child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .envs(env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Launch(format!("spawning '{program}': {e}")))?;
        LaunchedProcess::new(child).map(Some)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_launch_pipes_stdout() {
        let launcher = TokioProcessLauncher;
        let mut process = launcher
            .launch(&cmd(&["/bin/sh", "-c", "echo hello"]), Path::new("/tmp"), &[])
            .await
            .unwrap()
            .unwrap();
        assert!(process.pid() > 0);
        let mut out = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "hello\n");
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_launch_applies_env_and_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = TokioProcessLauncher;
        let mut process = launcher
            .launch(
                &cmd(&["/bin/sh", "-c", "echo $GREETING; pwd"]),
                dir.path(),
                &[("GREETING".to_string(), "hi".to_string())],
            )
            .await
            .unwrap()
            .unwrap();
        let mut out = String::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert!(out.starts_with("hi\n"));
        assert!(out.contains(dir.path().file_name().unwrap().to_str().unwrap()));
        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_command_launches_nothing() {
        let launcher = TokioProcessLauncher;
        assert!(launcher.launch(&[], Path::new("/tmp"), &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_launch_error() {
        let launcher = TokioProcessLauncher;
        let err = launcher
            .launch(&cmd(&["/no/such/program"]), Path::new("/tmp"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Launch(_)));
    }
}
