//! C1 — Storage backend. Blob-with-metadata store on the local filesystem.
//!
//! Layout: `<root>/<group>/<guid>.<ext>` for bytes, one JSON index file
//! per group (`<root>/<group>/metadata.json`) holding
//! `{guid: {format, group, size, created_at, extra...}}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::{DocError, DocResult};
use crate::model::BlobMeta;

/// A lock file older than this is assumed abandoned by a crashed process
/// and reclaimed rather than waited on forever.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Per-group write mutex plus an advisory lock file, guarding against
/// concurrent writers within and across processes.
struct GroupLock {
    mutex: Mutex<()>,
}

pub struct Storage {
    root: PathBuf,
    locks: DashMap<String, Arc<GroupLock>>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Storage {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn group_dir(&self, group: &str) -> PathBuf {
        self.root.join(group)
    }

    fn index_path(&self, group: &str) -> PathBuf {
        self.group_dir(group).join("metadata.json")
    }

    fn blob_path(&self, group: &str, guid: &str, ext: &str) -> PathBuf {
        self.group_dir(group).join(format!("{guid}.{ext}"))
    }

    fn lock_for(&self, group: &str) -> Arc<GroupLock> {
        self.locks
            .entry(group.to_string())
            .or_insert_with(|| {
                Arc::new(GroupLock {
                    mutex: Mutex::new(()),
                })
            })
            .clone()
    }

    fn write_lock_path(&self, group: &str) -> PathBuf {
        self.group_dir(group).join(".write.lock")
    }

    /// Acquire the per-group advisory lock file, guarding against another
    /// process writing the same group concurrently. Spins with a short
    /// delay rather than failing outright, since writes are expected to
    /// succeed rather than be skipped.
    async fn acquire_file_lock(&self, group: &str) -> DocResult<PathBuf> {
        let path = self.write_lock_path(group);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        loop {
            match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Ok(meta) = tokio::fs::metadata(&path).await {
                        let age = meta.modified().ok().and_then(|m| m.elapsed().ok()).unwrap_or(Duration::MAX);
                        if age >= LOCK_STALE_AFTER {
                            tracing::warn!(group, path = %path.display(), "reclaiming stale storage write lock");
                            let _ = tokio::fs::remove_file(&path).await;
                            continue;
                        }
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn release_file_lock(&self, path: &Path) {
        let _ = tokio::fs::remove_file(path).await;
    }

    /// Read the group's metadata index, recovering from corruption by
    /// re-initializing an empty index and scanning the filesystem for
    /// blobs whose metadata entry is missing.
    async fn read_index(&self, group: &str) -> DocResult<HashMap<String, BlobMeta>> {
        let path = self.index_path(group);
        let raw = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<HashMap<String, BlobMeta>>(&raw) {
            Ok(index) => Ok(index),
            Err(e) => {
                tracing::warn!(group, error = %e, "metadata index corrupt, reconciling from filesystem scan");
                self.reconcile_from_scan(group).await
            }
        }
    }

    async fn reconcile_from_scan(&self, group: &str) -> DocResult<HashMap<String, BlobMeta>> {
        let mut index = HashMap::new();
        let dir = self.group_dir(group);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Some(ext) = path.extension().and_then(|s| s.to_str()) else { continue };
            if stem == "metadata" {
                continue;
            }
            let meta = entry.metadata().await?;
            index.insert(
                stem.to_string(),
                BlobMeta {
                    guid: stem.to_string(),
                    group: group.to_string(),
                    format: ext.to_string(),
                    size: meta.len(),
                    created_at: meta
                        .created()
                        .map(chrono::DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                    extra: HashMap::new(),
                },
            );
        }
        tracing::info!(group, recovered = index.len(), "reconciled metadata index from scan");
        Ok(index)
    }

    async fn write_index(&self, group: &str, index: &HashMap<String, BlobMeta>) -> DocResult<()> {
        let dir = self.group_dir(group);
        tokio::fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(index)?;
        let tmp = dir.join(format!(".metadata.json.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.index_path(group)).await?;
        Ok(())
    }

    /// Atomically persist a new blob under `group`, returning its guid.
    pub async fn save(
        &self,
        bytes: &[u8],
        format: &str,
        group: &str,
        extra: HashMap<String, serde_json::Value>,
    ) -> DocResult<String> {
        let guid = uuid::Uuid::new_v4().to_string();
        let lock = self.lock_for(group);
        let _guard = lock.mutex.lock().await;
        let file_lock = self.acquire_file_lock(group).await?;

        let result = async {
            let dir = self.group_dir(group);
            tokio::fs::create_dir_all(&dir).await?;
            let final_path = self.blob_path(group, &guid, format);
            let tmp_path = dir.join(format!(".{guid}.{format}.tmp"));
            tokio::fs::write(&tmp_path, bytes).await?;
            tokio::fs::rename(&tmp_path, &final_path).await?;

            let mut index = self.read_index(group).await?;
            index.insert(
                guid.clone(),
                BlobMeta {
                    guid: guid.clone(),
                    group: group.to_string(),
                    format: format.to_string(),
                    size: bytes.len() as u64,
                    created_at: Utc::now(),
                    extra,
                },
            );
            self.write_index(group, &index).await?;
            Ok(guid.clone())
        }
        .await;

        self.release_file_lock(&file_lock).await;
        result
    }

    /// Fetch a blob's bytes. Fails `NotFound` if absent or the group
    /// doesn't match the stored group — never distinguishing the two
    /// cases to the caller.
    pub async fn get(&self, guid: &str, group: &str) -> DocResult<(Vec<u8>, BlobMeta)> {
        let index = self.read_index(group).await?;
        let meta = index.get(guid).cloned().ok_or(DocError::NotFound("blob".into()))?;
        let path = self.blob_path(group, guid, &meta.format);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| DocError::NotFound("blob".into()))?;
        Ok((bytes, meta))
    }

    /// List metadata entries for a group, optionally filtered by a
    /// predicate over the artifact extras.
    pub async fn list(
        &self,
        group: &str,
        predicate: impl Fn(&BlobMeta) -> bool,
    ) -> DocResult<Vec<BlobMeta>> {
        let index = self.read_index(group).await?;
        Ok(index.into_values().filter(predicate).collect())
    }

    pub async fn delete(&self, guid: &str, group: &str) -> DocResult<()> {
        let lock = self.lock_for(group);
        let _guard = lock.mutex.lock().await;
        let file_lock = self.acquire_file_lock(group).await?;

        let result = async {
            let mut index = self.read_index(group).await?;
            if let Some(meta) = index.remove(guid) {
                let path = self.blob_path(group, guid, &meta.format);
                let _ = tokio::fs::remove_file(&path).await;
                self.write_index(group, &index).await?;
            }
            Ok(())
        }
        .await;

        self.release_file_lock(&file_lock).await;
        result
    }

    /// Delete blobs older than `age_days`, optionally scoped to a group
    /// and filtered by a predicate. Returns the deletion count.
    pub async fn purge(
        &self,
        age_days: i64,
        group: Option<&str>,
        predicate: impl Fn(&BlobMeta) -> bool + Copy,
    ) -> DocResult<u64> {
        let groups = match group {
            Some(g) => vec![g.to_string()],
            None => self.list_groups().await?,
        };
        let cutoff = Utc::now() - chrono::Duration::days(age_days);
        let mut count = 0u64;
        for g in groups {
            let lock = self.lock_for(&g);
            let _guard = lock.mutex.lock().await;
            let file_lock = self.acquire_file_lock(&g).await?;

            let result = async {
                let mut index = self.read_index(&g).await?;
                let stale: Vec<String> = index
                    .values()
                    .filter(|m| m.created_at < cutoff && predicate(m))
                    .map(|m| m.guid.clone())
                    .collect();
                let mut group_count = 0u64;
                for guid in stale {
                    if let Some(meta) = index.remove(&guid) {
                        let path = self.blob_path(&g, &guid, &meta.format);
                        let _ = tokio::fs::remove_file(&path).await;
                        group_count += 1;
                    }
                }
                self.write_index(&g, &index).await?;
                Ok(group_count)
            }
            .await;

            self.release_file_lock(&file_lock).await;
            count += result?;
        }
        Ok(count)
    }

    pub async fn total_size(
        &self,
        group: Option<&str>,
        predicate: impl Fn(&BlobMeta) -> bool + Copy,
    ) -> DocResult<u64> {
        let groups = match group {
            Some(g) => vec![g.to_string()],
            None => self.list_groups().await?,
        };
        let mut total = 0u64;
        for g in groups {
            let index = self.read_index(&g).await?;
            total += index.values().filter(|m| predicate(m)).map(|m| m.size).sum::<u64>();
        }
        Ok(total)
    }

    async fn list_groups(&self) -> DocResult<Vec<String>> {
        let mut groups = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(groups),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    groups.push(name.to_string());
                }
            }
        }
        Ok(groups)
    }

    /// Delete blobs sorted oldest-first until `total <= threshold`, scoped
    /// by a predicate. Returns the guids deleted, in deletion order.
    pub async fn prune_to_threshold(
        &self,
        threshold_bytes: u64,
        predicate: impl Fn(&BlobMeta) -> bool + Copy,
    ) -> DocResult<Vec<BlobMeta>> {
        let groups = self.list_groups().await?;
        let mut all: Vec<BlobMeta> = Vec::new();
        for g in &groups {
            let index = self.read_index(g).await?;
            all.extend(index.into_values().filter(predicate));
        }
        all.sort_by_key(|m| m.created_at);

        let mut total: u64 = all.iter().map(|m| m.size).sum();
        let mut deleted = Vec::new();
        for meta in all {
            if total <= threshold_bytes {
                break;
            }
            self.delete(&meta.guid, &meta.group).await?;
            total = total.saturating_sub(meta.size);
            deleted.push(meta);
        }
        Ok(deleted)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra_with(artifact_type: &str) -> HashMap<String, serde_json::Value> {
        let mut m = HashMap::new();
        m.insert("artifact_type".into(), serde_json::json!(artifact_type));
        m
    }

    #[tokio::test]
    async fn save_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let guid = storage
            .save(b"hello", "txt", "acme", HashMap::new())
            .await
            .unwrap();
        let (bytes, meta) = storage.get(&guid, "acme").await.unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(meta.group, "acme");
    }

    #[tokio::test]
    async fn save_releases_the_advisory_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.save(b"hello", "txt", "acme", HashMap::new()).await.unwrap();
        assert!(!storage.write_lock_path("acme").exists());
    }

    #[tokio::test]
    async fn concurrent_saves_to_the_same_group_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let (a, b) = tokio::join!(
            storage.save(b"one", "txt", "acme", HashMap::new()),
            storage.save(b"two", "txt", "acme", HashMap::new()),
        );
        let guid_a = a.unwrap();
        let guid_b = b.unwrap();
        assert_eq!(storage.get(&guid_a, "acme").await.unwrap().0, b"one");
        assert_eq!(storage.get(&guid_b, "acme").await.unwrap().0, b"two");
        assert!(!storage.write_lock_path("acme").exists());
    }

    #[tokio::test]
    async fn get_with_wrong_group_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let guid = storage
            .save(b"hello", "txt", "acme", HashMap::new())
            .await
            .unwrap();
        let err = storage.get(&guid, "globex").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let guid = storage
            .save(b"hello", "txt", "acme", HashMap::new())
            .await
            .unwrap();
        storage.delete(&guid, "acme").await.unwrap();
        storage.delete(&guid, "acme").await.unwrap();
        assert!(storage.get(&guid, "acme").await.is_err());
    }

    #[tokio::test]
    async fn prune_to_threshold_deletes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        for _ in 0..3 {
            storage
                .save(&vec![0u8; 600_000], "bin", "acme", extra_with("document_proxy"))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let deleted = storage
            .prune_to_threshold(1024 * 1024, |m| m.artifact_type() == Some("document_proxy"))
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        let remaining = storage
            .total_size(Some("acme"), |m| m.artifact_type() == Some("document_proxy"))
            .await
            .unwrap();
        assert!(remaining <= 1024 * 1024);
    }
}
