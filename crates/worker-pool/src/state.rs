//! Per-process state persistence under `states/`
//!
//! One JSON file per worker, written on demand and at shutdown, read back
//! by best-effort recovery after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::metrics::ProcessMetrics;
use crate::process::{WorkerRecord, WorkerStatus};
use crate::PoolError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedWorkerState {
    pub process_id: Uuid,
    pub instance_id: String,
    pub role: String,
    pub model_tier: String,
    pub status: WorkerStatus,
    pub os_pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_load: f64,
    pub current_task: Option<String>,
    pub config: WorkerConfig,
    pub metrics: ProcessMetrics,
    pub saved_at: DateTime<Utc>,
}

impl SavedWorkerState {
    pub fn from_record(record: &WorkerRecord, config: &WorkerConfig) -> Self {
        Self {
            process_id: record.process_id,
            instance_id: record.instance_id.clone(),
            role: record.role.clone(),
            model_tier: record.model_tier.clone(),
            status: record.status,
            os_pid: record.os_pid,
            started_at: record.started_at,
            last_activity: record.last_activity,
            current_load: record.current_load,
            current_task: record.current_task.clone(),
            config: config.clone(),
            metrics: record.metrics.clone(),
            saved_at: Utc::now(),
        }
    }
}

pub(crate) struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, process_id: Uuid) -> PathBuf {
        self.dir.join(format!("{process_id}.json"))
    }

    pub async fn save(&self, state: &SavedWorkerState) -> Result<(), PoolError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(state.process_id);
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&path, json).await?;
        tracing::debug!(process_id = %state.process_id, path = %path.display(), "worker state saved");
        Ok(())
    }

    pub async fn load(&self, process_id: Uuid) -> Result<SavedWorkerState, PoolError> {
        let path = self.path_for(process_id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PoolError::Persistence(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| PoolError::Persistence(format!("{}: {e}", path.display())))
    }

    pub async fn list(&self) -> Result<Vec<SavedWorkerState>, PoolError> {
        let mut states = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(state) => states.push(state),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state file");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state file");
                }
            }
        }

        states.sort_by_key(|s: &SavedWorkerState| s.saved_at);
        Ok(states)
    }

    pub async fn remove(&self, process_id: Uuid) -> Result<(), PoolError> {
        match tokio::fs::remove_file(self.path_for(process_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete state files older than `max_age_days`. Returns count removed.
    pub async fn cleanup_old(&self, max_age_days: u32) -> Result<u64, PoolError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));
        let mut removed = 0;
        for state in self.list().await? {
            if state.saved_at < cutoff {
                self.remove(state.process_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(instance: &str) -> SavedWorkerState {
        SavedWorkerState {
            process_id: Uuid::new_v4(),
            instance_id: instance.to_string(),
            role: "research".to_string(),
            model_tier: "research".to_string(),
            status: WorkerStatus::Idle,
            os_pid: Some(4242),
            started_at: Utc::now(),
            last_activity: Utc::now(),
            current_load: 0.0,
            current_task: None,
            config: WorkerConfig::for_role("research", "research"),
            metrics: ProcessMetrics::new(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("states"));

        let state = sample_state("research-1");
        store.save(&state).await.unwrap();

        let loaded = store.load(state.process_id).await.unwrap();
        assert_eq!(loaded.instance_id, "research-1");
        assert_eq!(loaded.role, "research");
        assert_eq!(loaded.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn list_skips_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let states_dir = dir.path().join("states");
        let store = StateStore::new(states_dir.clone());

        store.save(&sample_state("a")).await.unwrap();
        tokio::fs::write(states_dir.join("junk.json"), "not json")
            .await
            .unwrap();
        tokio::fs::write(states_dir.join("notes.txt"), "ignored")
            .await
            .unwrap();

        let states = store.list().await.unwrap();
        assert_eq!(states.len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_states() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("states"));

        let mut stale = sample_state("old");
        stale.saved_at = Utc::now() - chrono::Duration::days(30);
        store.save(&stale).await.unwrap();
        store.save(&sample_state("fresh")).await.unwrap();

        assert_eq!(store.cleanup_old(7).await.unwrap(), 1);
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].instance_id, "fresh");
    }
}
