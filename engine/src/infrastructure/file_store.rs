use crate::domain::error::{AgentError, Result};
use crate::domain::ports::{AttemptStore, ClusterStateView};
use crate::domain::value_objects::{AttemptRecord, InstanceIdentity, InstanceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

fn store_err(context: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Store(format!("{context}: {e}"))
}

/// Attempt records as JSON files in a shared directory.
///
/// The directory is expected to survive agent restarts; that persistence is
/// what makes the retry budget enforceable across a crash-looping agent.
pub struct FileAttemptStore {
    dir: PathBuf,
}

impl FileAttemptStore {
    pub fn new(dir: PathBuf) -> Self {
        FileAttemptStore { dir }
    }

    fn record_path(&self, application: &str, service: &str, instance_id: u32) -> PathBuf {
        self.dir
            .join(format!("{application}.{service}_{instance_id}.attempts.json"))
    }

    fn identity_path(&self, identity: &InstanceIdentity) -> PathBuf {
        self.record_path(&identity.application, &identity.service, identity.instance_id)
    }
}

#[async_trait]
impl AttemptStore for FileAttemptStore {
    async fn load(&self, identity: &InstanceIdentity) -> Result<Option<AttemptRecord>> {
        let path = self.identity_path(identity);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let record = serde_json::from_slice(&raw)
                    .map_err(|e| store_err("parsing attempt record", e))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err("reading attempt record", e)),
        }
    }

    async fn save(&self, record: &AttemptRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_err("creating store directory", e))?;
        let path = self.record_path(&record.application, &record.service, record.instance_id);
        let raw = serde_json::to_vec_pretty(record)
            .map_err(|e| store_err("encoding attempt record", e))?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| store_err("writing attempt record", e))?;
        debug!(path = %path.display(), attempt = record.attempt_number, "attempt record saved");
        Ok(())
    }

    async fn delete(&self, identity: &InstanceIdentity) -> Result<()> {
        match tokio::fs::remove_file(self.identity_path(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("deleting attempt record", e)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PublishedState {
    application: String,
    service: String,
    instance_id: u32,
    state: InstanceState,
}

/// Cluster state view over a shared directory: one JSON file per published
/// instance. Stands in for a real coordination service behind the same port.
pub struct FileClusterView {
    dir: PathBuf,
}

impl FileClusterView {
    pub fn new(dir: PathBuf) -> Self {
        FileClusterView { dir }
    }

    fn state_path(&self, identity: &InstanceIdentity) -> PathBuf {
        self.dir
            .join(format!("{}.state.json", identity.file_prefix()))
    }
}

#[async_trait]
impl ClusterStateView for FileClusterView {
    async fn publish_state(&self, identity: &InstanceIdentity, state: InstanceState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_err("creating store directory", e))?;
        let record = PublishedState {
            application: identity.application.clone(),
            service: identity.service.clone(),
            instance_id: identity.instance_id,
            state,
        };
        let raw =
            serde_json::to_vec_pretty(&record).map_err(|e| store_err("encoding state", e))?;
        tokio::fs::write(self.state_path(identity), raw)
            .await
            .map_err(|e| store_err("publishing state", e))
    }

    async fn service_state(&self, service: &str) -> Result<Option<InstanceState>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err("listing cluster state", e)),
        };
        let mut found = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_err("listing cluster state", e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".state.json") {
                continue;
            }
            let raw = match tokio::fs::read(entry.path()).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let Ok(record) = serde_json::from_slice::<PublishedState>(&raw) else {
                // A half-written file from a concurrent publisher; skip it.
                continue;
            };
            if record.service != service {
                continue;
            }
            if record.state == InstanceState::Running {
                return Ok(Some(InstanceState::Running));
            }
            found.get_or_insert(record.state);
        }
        Ok(found)
    }

    async fn withdraw(&self, identity: &InstanceIdentity) -> Result<()> {
        match tokio::fs::remove_file(self.state_path(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("withdrawing state", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_attempt_record_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileAttemptStore::new(dir.path().to_path_buf());
        let identity = InstanceIdentity::new("app", "svc", 1);
        assert!(store.load(&identity).await.unwrap().is_none());
        let mut record = AttemptRecord::first(&identity);
        record.attempt_number = 4;
        store.save(&record).await.unwrap();
        let loaded = store.load(&identity).await.unwrap().unwrap();
        assert_eq!(loaded.attempt_number, 4);
        store.delete(&identity).await.unwrap();
        assert!(store.load(&identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_record_is_ok() {
        let dir = tempdir().unwrap();
        let store = FileAttemptStore::new(dir.path().to_path_buf());
        store
            .delete(&InstanceIdentity::new("app", "svc", 9))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_store_error() {
        let dir = tempdir().unwrap();
        let store = FileAttemptStore::new(dir.path().to_path_buf());
        let identity = InstanceIdentity::new("app", "svc", 1);
        std::fs::write(store.identity_path(&identity), "{ not json").unwrap();
        assert!(matches!(
            store.load(&identity).await.unwrap_err(),
            AgentError::Store(_)
        ));
    }

    #[tokio::test]
    async fn test_running_instance_wins_for_dependency_checks() {
        let dir = tempdir().unwrap();
        let view = FileClusterView::new(dir.path().to_path_buf());
        let one = InstanceIdentity::new("app", "db", 1);
        let two = InstanceIdentity::new("app", "db", 2);
        view.publish_state(&one, InstanceState::Launching)
            .await
            .unwrap();
        assert_eq!(
            view.service_state("db").await.unwrap(),
            Some(InstanceState::Launching)
        );
        view.publish_state(&two, InstanceState::Running)
            .await
            .unwrap();
        assert_eq!(
            view.service_state("db").await.unwrap(),
            Some(InstanceState::Running)
        );
    }

    #[tokio::test]
    async fn test_unknown_service_has_no_state() {
        let dir = tempdir().unwrap();
        let view = FileClusterView::new(dir.path().to_path_buf());
        assert!(view.service_state("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_withdraw_removes_published_state() {
        let dir = tempdir().unwrap();
        let view = FileClusterView::new(dir.path().to_path_buf());
        let identity = InstanceIdentity::new("app", "web", 1);
        view.publish_state(&identity, InstanceState::Running)
            .await
            .unwrap();
        view.withdraw(&identity).await.unwrap();
        assert!(view.service_state("web").await.unwrap().is_none());
    }
}
