use crate::domain::services::death_notifier::ProcessDeathNotifier;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const OUTPUT_TARGET: &str = "svcmgr::service_output";

/// Drain one piped output stream of the managed process.
///
/// Every line is appended to the capture file and echoed into the agent log.
/// End-of-stream means the process closed its side of the pipe, which for a
/// directly launched child is a death signal.
pub fn spawn_stream_reader<R>(
    stream: R,
    capture_path: PathBuf,
    stream_name: &'static str,
    notifier: Arc<ProcessDeathNotifier>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&capture_path)
            .await
        {
            Ok(f) => Some(f),
            Err(e) => {
                error!(
                    path = %capture_path.display(),
                    error = %e,
                    "failed to open output capture file, stream will only be logged"
                );
                None
            }
        };
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: OUTPUT_TARGET, stream = stream_name, "{line}");
                    if let Some(f) = capture.as_mut() {
                        if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                            warn!(error = %e, "failed writing to output capture file");
                            capture = None;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(stream = stream_name, error = %e, "error reading service output");
                    break;
                }
            }
        }
        if let Some(f) = capture.as_mut() {
            let _ = f.flush().await;
        }
        notifier.notify(&format!("{stream_name} end-of-stream"));
    })
}

/// Periodic tailer for the output files of an adopted process.
///
/// An adopted process was launched by a previous agent incarnation, so there
/// is no pipe to read; instead its capture files are tailed from the offset
/// where the previous agent left off.
pub struct FileTailer {
    path: PathBuf,
    stream_name: &'static str,
    offset: u64,
}

impl FileTailer {
    pub fn new(path: PathBuf, stream_name: &'static str) -> Self {
        // Start at the current end: lines written before adoption were
        // already relayed by the previous agent.
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        FileTailer {
            path,
            stream_name,
            offset,
        }
    }

    /// Read and log everything appended since the last poll.
    pub async fn poll_once(&mut self) {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(_) => return,
        };
        let len = match file.metadata().await {
            Ok(m) => m.len(),
            Err(_) => return,
        };
        if len < self.offset {
            // File was truncated or rotated under us.
            self.offset = 0;
        }
        if len == self.offset {
            return;
        }
        if file.seek(SeekFrom::Start(self.offset)).await.is_err() {
            return;
        }
        let mut buf = String::new();
        let mut reader = BufReader::new(file);
        match reader.read_to_string(&mut buf).await {
            Ok(read) => {
                self.offset += read as u64;
                for line in buf.lines() {
                    debug!(target: OUTPUT_TARGET, stream = self.stream_name, "{line}");
                }
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed tailing output file");
            }
        }
    }
}
