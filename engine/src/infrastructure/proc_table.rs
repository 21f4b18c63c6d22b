use crate::domain::error::{AgentError, Result};
use crate::domain::ports::ProcessTable;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

const TERMINATE_POLL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(1);

// Walks are bounded in case a ppid cycle ever shows up in a bad reading.
#[cfg(target_os = "linux")]
const MAX_CHAIN_DEPTH: usize = 64;

/// Process-table adapter backed by `/proc` with a signal-0 fallback.
///
/// Zombies and stopped processes count as dead: a zombie cannot serve
/// traffic, and the distinction only matters to whoever reaps it.
pub struct ProcProcessTable {
    /// How long a terminated process gets to exit on SIGTERM before SIGKILL.
    term_grace: Duration,
}

impl ProcProcessTable {
    pub fn new(term_grace: Duration) -> Self {
        ProcProcessTable { term_grace }
    }

    fn signal(pid: u32, sig: libc::c_int) -> Result<bool> {
        let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if rc == 0 {
            return Ok(true);
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            // The process exists but belongs to someone else.
            Some(libc::EPERM) => Ok(true),
            _ => Err(AgentError::ProcessQuery(format!(
                "kill({pid}, {sig}): {}",
                std::io::Error::last_os_error()
            ))),
        }
    }

    fn alive_now(&self, pid: u32) -> Result<bool> {
        #[cfg(target_os = "linux")]
        {
            match read_stat(pid)? {
                Some(stat) => Ok(!matches!(stat.state, 'Z' | 'X' | 'x' | 'T' | 't')),
                None => Ok(false),
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::signal(pid, 0)
        }
    }
}

#[cfg(target_os = "linux")]
struct ProcStat {
    state: char,
    ppid: u32,
}

/// Parse a `/proc/<pid>/stat` line. The command name is parenthesized and
/// may itself contain spaces and parentheses, so fields are taken after the
/// last closing parenthesis.
#[cfg(target_os = "linux")]
fn parse_stat(raw: &str) -> Result<ProcStat> {
    let close = raw
        .rfind(')')
        .ok_or_else(|| AgentError::ProcessQuery(format!("malformed stat line: '{raw}'")))?;
    let mut fields = raw[close + 1..].split_whitespace();
    let state = fields
        .next()
        .and_then(|f| f.chars().next())
        .ok_or_else(|| AgentError::ProcessQuery(format!("stat line missing state: '{raw}'")))?;
    let ppid = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| AgentError::ProcessQuery(format!("stat line missing ppid: '{raw}'")))?;
    Ok(ProcStat { state, ppid })
}

#[cfg(target_os = "linux")]
fn read_stat(pid: u32) -> Result<Option<ProcStat>> {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(raw) => parse_stat(&raw).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AgentError::ProcessQuery(format!("reading stat for pid {pid}: {e}"))),
    }
}

#[cfg(target_os = "linux")]
fn read_comm(pid: u32) -> Result<Option<String>> {
    match std::fs::read_to_string(format!("/proc/{pid}/comm")) {
        Ok(name) => Ok(Some(name.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AgentError::ProcessQuery(format!("reading comm for pid {pid}: {e}"))),
    }
}

#[cfg(target_os = "linux")]
fn all_pids() -> Result<Vec<u32>> {
    let entries = std::fs::read_dir("/proc")
        .map_err(|e| AgentError::ProcessQuery(format!("reading /proc: {e}")))?;
    let mut pids = Vec::new();
    for entry in entries.flatten() {
        if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            pids.push(pid);
        }
    }
    Ok(pids)
}

#[async_trait]
impl ProcessTable for ProcProcessTable {
    async fn is_alive(&self, pid: u32) -> Result<bool> {
        self.alive_now(pid)
    }

    async fn command_name(&self, pid: u32) -> Result<Option<String>> {
        #[cfg(target_os = "linux")]
        {
            read_comm(pid)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
            Ok(None)
        }
    }

    async fn children(&self, parent: u32) -> Result<Vec<u32>> {
        #[cfg(target_os = "linux")]
        {
            let mut children = Vec::new();
            for pid in all_pids()? {
                if let Some(stat) = read_stat(pid)? {
                    if stat.ppid == parent {
                        children.push(pid);
                    }
                }
            }
            Ok(children)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = parent;
            Ok(Vec::new())
        }
    }

    async fn parent_chain(&self, child: u32, stop_at: u32) -> Result<Vec<u32>> {
        #[cfg(target_os = "linux")]
        {
            let mut chain = Vec::new();
            let mut current = child;
            for _ in 0..MAX_CHAIN_DEPTH {
                chain.push(current);
                let Some(stat) = read_stat(current)? else {
                    break;
                };
                if stat.ppid <= 1 || stat.ppid == stop_at {
                    break;
                }
                current = stat.ppid;
            }
            Ok(chain)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = stop_at;
            Ok(vec![child])
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<u32>> {
        #[cfg(target_os = "linux")]
        {
            let mut matches = Vec::new();
            for pid in all_pids()? {
                if read_comm(pid)?.as_deref() == Some(name) {
                    matches.push(pid);
                }
            }
            Ok(matches)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = name;
            Ok(Vec::new())
        }
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        if !Self::signal(pid, libc::SIGTERM)? {
            return Ok(());
        }
        debug!(pid, "sent SIGTERM");
        let deadline = std::time::Instant::now() + self.term_grace;
        while std::time::Instant::now() < deadline {
            if !self.alive_now(pid)? {
                return Ok(());
            }
            tokio::time::sleep(TERMINATE_POLL).await;
        }
        warn!(pid, "process ignored SIGTERM, escalating to SIGKILL");
        if !Self::signal(pid, libc::SIGKILL)? {
            return Ok(());
        }
        let deadline = std::time::Instant::now() + KILL_GRACE;
        while std::time::Instant::now() < deadline {
            if !self.alive_now(pid)? {
                return Ok(());
            }
            tokio::time::sleep(TERMINATE_POLL).await;
        }
        Err(AgentError::ProcessQuery(format!(
            "pid {pid} survived SIGKILL"
        )))
    }
}
