//! Scripted collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::{CacheStorage, StoreError, StoredResponse};
use crate::http::{Request, Response};
use crate::network::{FetchError, Network};

/// A network that answers from a route table keyed by cache key
/// (path plus query). Unrouted paths answer 404. Offline, every fetch fails.
pub(crate) struct MockNetwork {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub(crate) fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn route(&self, key: &str, response: Response) {
        self.routes.lock().unwrap().insert(key.to_string(), response);
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of fetches attempted for `key`, online or not.
    pub(crate) fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let key = request.cache_key();
        self.calls.lock().unwrap().push(key.clone());
        tokio::task::yield_now().await;

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable(key));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }
}

/// Storage whose every operation fails, like a browser with storage disabled.
pub(crate) struct FailingStorage;

fn unavailable() -> StoreError {
    StoreError::Unavailable("quota exceeded".to_string())
}

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn open(&self, _name: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn lookup(&self, _name: &str, _key: &str) -> Result<Option<StoredResponse>, StoreError> {
        Err(unavailable())
    }

    async fn put(&self, _name: &str, _key: &str, _response: Response) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn keys(&self, _name: &str) -> Result<Vec<String>, StoreError> {
        Err(unavailable())
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        Err(unavailable())
    }

    async fn delete(&self, _name: &str) -> Result<bool, StoreError> {
        Err(unavailable())
    }
}
