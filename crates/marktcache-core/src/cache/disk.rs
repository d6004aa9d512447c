use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::storage::{validate_name, CacheStorage, StoreError, StoredResponse};
use crate::http::Response;

/// Extension of committed entry files
const ENTRY_EXT: &str = "json";

/// Distinguishes concurrent temp files within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 so binary assets survive the JSON round trip.
    body: String,
    stored_at: DateTime<Utc>,
}

impl DiskEntry {
    fn into_stored(self) -> Result<StoredResponse, StoreError> {
        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.key, e)))?;
        Ok(StoredResponse {
            response: Response {
                status: self.status,
                headers: self.headers,
                body,
            },
            stored_at: self.stored_at,
        })
    }
}

/// Partitions persisted under a root directory: one sub-directory per
/// partition, one JSON file per entry named by the SHA-256 of its key.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn partition_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        dir.join(format!("{}.{}", hex::encode(digest), ENTRY_EXT))
    }

    async fn read_entry(path: &Path) -> Result<Option<DiskEntry>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.partition_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn lookup(&self, name: &str, key: &str) -> Result<Option<StoredResponse>, StoreError> {
        let dir = self.partition_dir(name)?;
        match Self::read_entry(&Self::entry_path(&dir, key)).await? {
            Some(entry) => Ok(Some(entry.into_stored()?)),
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, key: &str, response: Response) -> Result<(), StoreError> {
        let dir = self.partition_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;

        let entry = DiskEntry {
            key: key.to_string(),
            status: response.status,
            headers: response.headers,
            body: BASE64.encode(&response.body),
            stored_at: Utc::now(),
        };
        let contents = serde_json::to_vec(&entry)?;

        // Write aside and rename so readers never see a half-written entry.
        let path = Self::entry_path(&dir, key);
        let tmp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(partition = name, key, "Stored entry on disk");
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.partition_dir(name)?;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(entry)) => keys.push(entry.key),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut read_dir = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(dir_entry) = read_dir.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = dir_entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.partition_dir(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, DiskStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().join("partitions")).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_put_then_lookup_preserves_binary_body() {
        let (_dir, storage) = storage();
        let body = vec![0u8, 159, 146, 150, 255];
        let response = Response::new(200, body.clone()).with_header("Content-Type", "image/png");

        storage.put("marktplaats-runtime-v1", "/assets/logo.png", response).await.unwrap();

        let stored = storage
            .lookup("marktplaats-runtime-v1", "/assets/logo.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.response.body, body);
        assert_eq!(stored.response.header("content-type"), Some("image/png"));
    }

    #[tokio::test]
    async fn test_partitions_survive_reopen() {
        let (dir, storage) = storage();
        storage.put("a", "/api/items", Response::new(200, "[]")).await.unwrap();
        storage.put("a", "/api/items/1", Response::new(200, "{}")).await.unwrap();
        storage.open("b").await.unwrap();
        drop(storage);

        let reopened = DiskStorage::new(dir.path().join("partitions")).unwrap();
        assert_eq!(reopened.names().await.unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            reopened.keys("a").await.unwrap(),
            vec!["/api/items".to_string(), "/api/items/1".to_string()]
        );
        assert!(reopened.keys("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_partition_reads_as_empty() {
        let (_dir, storage) = storage();
        assert!(storage.lookup("nope", "/").await.unwrap().is_none());
        assert!(storage.keys("nope").await.unwrap().is_empty());
        assert!(!storage.delete("nope").await.unwrap());
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let (_dir, storage) = storage();
        let err = storage.put("../outside", "/", Response::new(200, "")).await;
        assert!(matches!(err, Err(StoreError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_concurrent_puts_to_different_keys() {
        let (_dir, storage) = storage();
        let storage = std::sync::Arc::new(storage);
        let puts = (0..16).map(|i| {
            let storage = storage.clone();
            async move {
                storage
                    .put("p", &format!("/api/items/{}", i), Response::new(200, format!("{}", i)))
                    .await
            }
        });
        for result in futures::future::join_all(puts).await {
            result.unwrap();
        }
        assert_eq!(storage.keys("p").await.unwrap().len(), 16);
        let stored = storage.lookup("p", "/api/items/7").await.unwrap().unwrap();
        assert_eq!(stored.response.body, b"7");
    }
}
