use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

const META_SUFFIX: &str = ".meta.json";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata persisted next to every blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMeta {
    pub content_type: String,
    pub size: u64,
    #[serde(default)]
    pub original_name: Option<String>,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub meta: BlobMeta,
}

#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub key: String,
    pub meta: BlobMeta,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefixPurge {
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub objects: usize,
    pub bytes: u64,
}

/// Blob store rooted at a local directory. Keys are `/`-separated relative
/// paths; anything that could escape the root is rejected.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: Arc<PathBuf>,
}

impl FileStore {
    /// Ensure the storage root exists and return a store bound to it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to ensure storage root at {}", root.display()))?;
        Ok(Self::at(root))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        original_name: Option<&str>,
    ) -> Result<BlobMeta> {
        let Some(path) = self.resolve(key) else {
            bail!("invalid storage key `{key}`");
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write blob {key}"))?;

        let meta = BlobMeta {
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            original_name: original_name
                .map(sanitize_filename::sanitize)
                .filter(|name| !name.is_empty()),
            stored_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&meta).context("failed to encode blob metadata")?;
        tokio::fs::write(meta_path(&path), encoded)
            .await
            .with_context(|| format!("failed to write metadata for {key}"))?;

        Ok(meta)
    }

    /// Read a blob. Unknown and malformed keys both yield `None`.
    pub async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let Some(path) = self.resolve(key) else {
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read blob {key}"));
            }
        };

        let meta = read_meta(&path, bytes.len() as u64).await;
        Ok(Some(StoredObject { bytes, meta }))
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let Some(path) = self.resolve(key) else {
            return Ok(false);
        };

        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err).with_context(|| format!("failed to delete blob {key}")),
        };

        match tokio::fs::remove_file(meta_path(&path)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(?err, key, "failed to delete blob metadata"),
        }

        Ok(removed)
    }

    /// List every blob under `prefix` (a directory-style key prefix).
    pub async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let start = if prefix.trim_matches('/').is_empty() {
            self.root.as_ref().clone()
        } else {
            match self.resolve(prefix.trim_end_matches('/')) {
                Some(path) => path,
                None => bail!("invalid storage prefix `{prefix}`"),
            }
        };

        let mut entries = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to list {}", dir.display()));
                }
            };

            while let Some(entry) = reader
                .next_entry()
                .await
                .with_context(|| format!("failed to read entry in {}", dir.display()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .with_context(|| format!("failed to stat {}", path.display()))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let is_meta = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(META_SUFFIX));
                if is_meta {
                    continue;
                }

                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                let meta = read_meta(&path, size).await;
                entries.push(BlobEntry { key, meta });
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Delete every blob under `prefix`. Individual failures are counted and
    /// logged; only a failure to enumerate the prefix is an error.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<PrefixPurge> {
        let entries = self.list(prefix).await?;

        let results = join_all(entries.iter().map(|entry| self.delete(&entry.key))).await;

        let mut purge = PrefixPurge::default();
        for (entry, result) in entries.iter().zip(results) {
            match result {
                Ok(_) => purge.removed += 1,
                Err(err) => {
                    warn!(?err, key = %entry.key, "failed to delete blob under prefix");
                    purge.failed += 1;
                }
            }
        }

        if purge.failed == 0 {
            if let Some(dir) = self.resolve(prefix.trim_end_matches('/')) {
                if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                    if err.kind() != ErrorKind::NotFound {
                        warn!(?err, prefix, "failed to remove emptied prefix directory");
                    }
                }
            }
        }

        Ok(purge)
    }

    pub async fn usage(&self, prefix: &str) -> Result<StorageUsage> {
        let entries = self.list(prefix).await?;
        Ok(StorageUsage {
            objects: entries.len(),
            bytes: entries.iter().map(|entry| entry.meta.size).sum(),
        })
    }

    fn resolve(&self, key: &str) -> Option<PathBuf> {
        if !is_valid_key(key) {
            return None;
        }
        let mut path = self.root.as_ref().clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        Some(path)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.root.as_ref()).ok()?;
        let segments = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(segments.join("/"))
    }
}

pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.ends_with(META_SUFFIX)
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && !segment.contains(['\\', '\0', ':'])
        })
}

fn meta_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(META_SUFFIX);
    PathBuf::from(raw)
}

async fn read_meta(path: &Path, size: u64) -> BlobMeta {
    let fallback = || BlobMeta {
        content_type: FALLBACK_CONTENT_TYPE.to_string(),
        size,
        original_name: None,
        stored_at: Utc::now(),
    };

    match tokio::fs::read(meta_path(path)).await {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
            warn!(?err, path = %path.display(), "unreadable blob metadata");
            fallback()
        }),
        Err(_) => fallback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_keeps_content_type() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        store
            .put("2026-1/u1/cv-1.pdf", b"%PDF-1.7", "application/pdf", Some("My CV.pdf"))
            .await
            .expect("put");

        let object = store
            .get("2026-1/u1/cv-1.pdf")
            .await
            .expect("get")
            .expect("object exists");
        assert_eq!(object.bytes, b"%PDF-1.7");
        assert_eq!(object.meta.content_type, "application/pdf");
        assert_eq!(object.meta.size, 8);
        assert_eq!(object.meta.original_name.as_deref(), Some("My CV.pdf"));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path().join("root")).await.expect("open");

        assert!(store.put("../escape.pdf", b"x", "application/pdf", None).await.is_err());
        assert!(store.get("a/../../etc/passwd").await.expect("get").is_none());
        assert!(!is_valid_key("a//b"));
        assert!(!is_valid_key("a/b.pdf.meta.json"));
        assert!(is_valid_key("2026-1/abc/cv-1700000000000.pdf"));
    }

    #[tokio::test]
    async fn replaced_blobs_stay_in_storage_accounting() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        store
            .put("2026-1/u1/cv-1000.pdf", &[0u8; 100], "application/pdf", None)
            .await
            .expect("first upload");
        store
            .put("2026-1/u1/cv-2000.pdf", &[0u8; 50], "application/pdf", None)
            .await
            .expect("second upload");

        let usage = store.usage("2026-1/").await.expect("usage");
        assert_eq!(usage, StorageUsage { objects: 2, bytes: 150 });

        let keys: Vec<_> = store
            .list("2026-1")
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(keys, vec!["2026-1/u1/cv-1000.pdf", "2026-1/u1/cv-2000.pdf"]);
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_that_period() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        for key in ["2026-1/u1/cv-1.pdf", "2026-1/u2/cv-1.png", "2026-2/u1/cv-1.pdf"] {
            store.put(key, b"data", "application/pdf", None).await.expect("put");
        }

        let purge = store.delete_prefix("2026-1/").await.expect("purge");
        assert_eq!(purge, PrefixPurge { removed: 2, failed: 0 });
        assert!(store.list("2026-1/").await.expect("list").is_empty());
        assert_eq!(store.list("2026-2/").await.expect("list").len(), 1);
        assert!(!dir.path().join("2026-1").exists());
    }

    #[tokio::test]
    async fn delete_prefix_of_unknown_period_is_empty() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");

        let purge = store.delete_prefix("never-used/").await.expect("purge");
        assert_eq!(purge, PrefixPurge::default());
    }

    #[tokio::test]
    async fn delete_prefix_reports_unlistable_root() {
        let dir = tempdir().expect("temp dir");
        let not_a_dir = dir.path().join("plain-file");
        std::fs::write(&not_a_dir, b"x").expect("write file");

        let store = FileStore::at(&not_a_dir);
        assert!(store.delete_prefix("2026-1/").await.is_err());
    }
}
