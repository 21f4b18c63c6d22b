use crate::domain::error::Result;
use crate::domain::ports::{LivenessDetector, ProcessTable, StopDetector};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Probes a TCP port. As a liveness detector it passes once the port
/// accepts connections; as a stop detector it trips once the port no longer
/// does.
pub struct TcpPortDetector {
    name: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpPortDetector {
    pub fn new(host: String, port: u16, timeout: Duration) -> Self {
        TcpPortDetector {
            name: format!("tcp-port-{port}"),
            host,
            port,
            timeout,
        }
    }

    async fn port_open(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(port = self.port, error = %e, "port probe refused");
                false
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LivenessDetector for TcpPortDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<bool> {
        Ok(self.port_open().await)
    }
}

#[async_trait]
impl StopDetector for TcpPortDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_stopped(&self) -> Result<bool> {
        Ok(!self.port_open().await)
    }
}

/// Passes once a pattern shows up in a log file. A missing file simply has
/// not been written yet.
pub struct LogPatternDetector {
    name: String,
    file: PathBuf,
    pattern: String,
}

impl LogPatternDetector {
    pub fn new(file: PathBuf, pattern: String) -> Self {
        LogPatternDetector {
            name: format!("log-pattern[{pattern}]"),
            file,
            pattern,
        }
    }
}

#[async_trait]
impl LivenessDetector for LogPatternDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<bool> {
        match tokio::fs::read_to_string(&self.file).await {
            Ok(contents) => Ok(contents.contains(&self.pattern)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(crate::domain::error::AgentError::io(
                "reading log file for pattern detection",
                e,
            )),
        }
    }
}

/// Passes once a process with the given executable name shows up in the
/// process table.
pub struct ProcessNameDetector {
    name: String,
    table: Arc<dyn ProcessTable>,
    process_name: String,
}

impl ProcessNameDetector {
    pub fn new(table: Arc<dyn ProcessTable>, process_name: String) -> Self {
        ProcessNameDetector {
            name: format!("process-name[{process_name}]"),
            table,
            process_name,
        }
    }
}

#[async_trait]
impl LivenessDetector for ProcessNameDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<bool> {
        Ok(!self.table.find_by_name(&self.process_name).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_detector_sees_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let detector =
            TcpPortDetector::new("127.0.0.1".to_string(), port, Duration::from_millis(500));
        assert!(LivenessDetector::probe(&detector).await.unwrap());
        assert!(!detector.is_stopped().await.unwrap());
        drop(listener);
        assert!(detector.is_stopped().await.unwrap());
    }

    #[tokio::test]
    async fn test_tcp_detector_fails_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let detector =
            TcpPortDetector::new("127.0.0.1".to_string(), port, Duration::from_millis(500));
        assert!(!LivenessDetector::probe(&detector).await.unwrap());
    }

    #[tokio::test]
    async fn test_log_pattern_detector() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("svc.out");
        let detector = LogPatternDetector::new(log.clone(), "Server started".to_string());
        assert!(!detector.probe().await.unwrap());
        std::fs::write(&log, "booting...\n").unwrap();
        assert!(!detector.probe().await.unwrap());
        std::fs::write(&log, "booting...\nServer started on 8080\n").unwrap();
        assert!(detector.probe().await.unwrap());
    }
}
