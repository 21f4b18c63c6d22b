use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identity of one service instance within the cluster.
///
/// The identity is assigned by the deployment, never generated here. It
/// determines the unique on-disk file-name prefix used for the pid file and
/// the captured output/error streams, so two instances sharing a working
/// directory never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub application: String,
    pub service: String,
    /// Fully qualified cluster name, `<application>.<service>`.
    pub cluster_name: String,
    pub instance_id: u32,
    /// Pid of the agent process hosting this instance.
    pub container_pid: u32,
}

impl InstanceIdentity {
    pub fn new(application: &str, service: &str, instance_id: u32) -> Self {
        InstanceIdentity {
            application: application.to_string(),
            service: service.to_string(),
            cluster_name: format!("{application}.{service}"),
            instance_id,
            container_pid: std::process::id(),
        }
    }

    /// Unique file-name prefix for this instance's runtime files.
    pub fn file_prefix(&self) -> String {
        format!("{}_{}", self.cluster_name, self.instance_id)
    }

    pub fn pid_file(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}.pid", self.file_prefix()))
    }

    pub fn output_file(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}.out", self.file_prefix()))
    }

    pub fn error_file(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}.err", self.file_prefix()))
    }
}
