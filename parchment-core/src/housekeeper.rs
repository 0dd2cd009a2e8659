//! C9 — Housekeeper. Periodically bounds `document_proxy` storage under a
//! configured size threshold, deleting oldest-first.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::config::DocConfig;
use crate::error::DocResult;
use crate::model::BlobMeta;
use crate::storage::Storage;

fn is_document_proxy(meta: &BlobMeta) -> bool {
    meta.artifact_type() == Some("document_proxy")
}

/// Summary of a single sweep, logged and returned for manual invocation
/// (e.g. from the CLI).
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub size_before: u64,
    pub size_after: u64,
    pub deleted: Vec<BlobMeta>,
    pub target_met: bool,
}

pub struct Housekeeper {
    lock_path: PathBuf,
    stale_after: Duration,
    threshold_bytes: u64,
}

impl Housekeeper {
    pub fn new(config: &DocConfig) -> Self {
        Housekeeper {
            lock_path: config.data_dir.join(".prune_size.lock"),
            stale_after: Duration::from_secs(config.housekeeper_lock_stale_seconds),
            threshold_bytes: config.max_storage_bytes(),
        }
    }

    /// Try to acquire the advisory lock file. Returns `false` without
    /// touching anything if a fresh lock is already held by another
    /// process or scheduler tick; a stale lock is reclaimed.
    async fn try_acquire_lock(&self) -> DocResult<bool> {
        if let Ok(meta) = tokio::fs::metadata(&self.lock_path).await {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or(Duration::MAX);
            if age < self.stale_after {
                return Ok(false);
            }
            tracing::warn!(path = %self.lock_path.display(), "reclaiming stale housekeeper lock");
        }
        if let Some(parent) = self.lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.lock_path, Utc::now().to_rfc3339()).await?;
        Ok(true)
    }

    async fn release_lock(&self) {
        let _ = tokio::fs::remove_file(&self.lock_path).await;
    }

    /// Run one sweep against `storage`, pruning `document_proxy` blobs
    /// down to the configured threshold. No-ops if the advisory lock is
    /// already held by a concurrent sweep.
    pub async fn run_once(&self, storage: &Storage) -> DocResult<Option<SweepReport>> {
        if !self.try_acquire_lock().await? {
            tracing::debug!("housekeeper sweep skipped, lock held");
            return Ok(None);
        }

        let result = async {
            let size_before = storage.total_size(None, is_document_proxy).await?;
            let deleted = storage.prune_to_threshold(self.threshold_bytes, is_document_proxy).await?;
            let size_after = storage.total_size(None, is_document_proxy).await?;

            for meta in &deleted {
                tracing::info!(guid = %meta.guid, group = %meta.group, size = meta.size, "housekeeper deleted proxy document");
            }
            let target_met = size_after <= self.threshold_bytes;
            if !target_met {
                tracing::warn!(
                    size_after,
                    threshold = self.threshold_bytes,
                    "housekeeper could not reach target size: no more eligible blobs to prune"
                );
            }
            tracing::info!(
                size_before,
                size_after,
                deleted_count = deleted.len(),
                target_met,
                "housekeeper sweep complete"
            );
            Ok(SweepReport { size_before, size_after, deleted, target_met })
        }
        .await;

        self.release_lock().await;
        result.map(Some)
    }

    /// Spawn the periodic sweep loop, firing every
    /// `GOFR_DOC_HOUSEKEEPING_INTERVAL_MINS` minutes until the returned
    /// handle is dropped or aborted.
    pub fn spawn_periodic(self, storage: std::sync::Arc<Storage>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once(&storage).await {
                    tracing::error!(error = %err, "housekeeper sweep failed");
                }
            }
        })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(dir: &Path, threshold_mb: u64) -> DocConfig {
        DocConfig {
            data_dir: dir.to_path_buf(),
            templates_dir: dir.join("templates"),
            styles_dir: dir.join("styles"),
            fragments_dir: dir.join("fragments"),
            images_dir: dir.join("images"),
            max_storage_mb: threshold_mb,
            housekeeping_interval_mins: 60,
            housekeeper_lock_stale_seconds: 1,
            image_max_size_mb: 10,
            image_validation_timeout: Duration::from_secs(10),
            image_require_https: true,
        }
    }

    fn extra_proxy() -> HashMap<String, serde_json::Value> {
        let mut m = HashMap::new();
        m.insert("artifact_type".into(), serde_json::json!("document_proxy"));
        m
    }

    #[tokio::test]
    async fn sweep_prunes_down_to_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage"));
        for _ in 0..3 {
            storage.save(&vec![0u8; 500_000], "html", "acme", extra_proxy()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let config = test_config(dir.path(), 1);
        let housekeeper = Housekeeper::new(&config);
        let report = housekeeper.run_once(&storage).await.unwrap().unwrap();
        assert!(report.target_met);
        assert!(!report.deleted.is_empty());
        assert!(report.size_after <= config.max_storage_bytes());
    }

    #[tokio::test]
    async fn concurrent_sweep_is_skipped_while_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage"));
        let config = test_config(dir.path(), 1000);
        let housekeeper = Housekeeper::new(&config);

        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(housekeeper.lock_path(), Utc::now().to_rfc3339()).await.unwrap();

        let report = housekeeper.run_once(&storage).await.unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage"));
        let config = test_config(dir.path(), 1000);
        let housekeeper = Housekeeper::new(&config);

        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(housekeeper.lock_path(), "stale").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let report = housekeeper.run_once(&storage).await.unwrap();
        assert!(report.is_some());
    }
}
