use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::storage::{validate_name, CacheStorage, StoreError, StoredResponse};
use crate::http::Response;

type Entries = BTreeMap<String, StoredResponse>;

/// Partitions held in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    partitions: Mutex<BTreeMap<String, Entries>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_partitions<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Entries>) -> R) -> Result<R, StoreError> {
        let mut guard = self
            .partitions
            .lock()
            .map_err(|_| StoreError::Unavailable("memory storage lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.with_partitions(|p| {
            p.entry(name.to_string()).or_default();
        })
    }

    async fn lookup(&self, name: &str, key: &str) -> Result<Option<StoredResponse>, StoreError> {
        self.with_partitions(|p| p.get(name).and_then(|entries| entries.get(key).cloned()))
    }

    async fn put(&self, name: &str, key: &str, response: Response) -> Result<(), StoreError> {
        validate_name(name)?;
        self.with_partitions(|p| {
            p.entry(name.to_string())
                .or_default()
                .insert(key.to_string(), StoredResponse::new(response));
        })
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>, StoreError> {
        self.with_partitions(|p| {
            p.get(name)
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        self.with_partitions(|p| p.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        self.with_partitions(|p| p.remove(name).is_some())
    }
}
