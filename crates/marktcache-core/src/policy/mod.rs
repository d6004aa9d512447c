//! Caching policies, one per request class.
//!
//! - API: offline-first for the listings resource, network-first otherwise,
//!   synthetic offline envelope as the last resort
//! - Navigation: network-first, then runtime copy, then the app shell, then a
//!   built-in offline page
//! - Static assets: cache-first with background refresh, shell fallback
//! - Other: network-first with runtime fallback
//!
//! API and navigation traffic never fails. Asset and other traffic fails only
//! when neither the network nor a partition can answer.

mod api;
mod asset;
mod navigation;

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStorage, Partition, PartitionKind, PartitionSet, StoreError};
use crate::classify::RequestClass;
use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::{FetchError, Network};
use crate::tasks::BackgroundTasks;

/// Terminal response for a navigation that nothing else could answer.
const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="nl">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
body { font-family: system-ui, sans-serif; text-align: center; padding: 3rem 1rem; color: #333; }
button { margin-top: 1.5rem; padding: .6rem 1.4rem; font-size: 1rem; cursor: pointer; }
</style>
</head>
<body>
<h1>Je bent offline</h1>
<p>Deze pagina is niet beschikbaar zonder internetverbinding.</p>
<button type="button" onclick="location.reload()">Opnieuw proberen</button>
</body>
</html>
"#;

/// Shared state for the policy handlers. Clone is cheap.
#[derive(Clone)]
pub struct Policies {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    partitions: Arc<PartitionSet>,
    tasks: BackgroundTasks,
    listings_path: String,
    offline_message: String,
    listings_offline_message: String,
}

impl Policies {
    pub fn new(
        config: &Config,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        partitions: Arc<PartitionSet>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            storage,
            network,
            partitions,
            tasks,
            listings_path: config.listings_path.trim_end_matches('/').to_string(),
            offline_message: config.offline_message.clone(),
            listings_offline_message: config.listings_offline_message.clone(),
        }
    }

    /// Run the policy for `class`.
    pub async fn handle(&self, class: RequestClass, request: &Request) -> Result<Response, FetchError> {
        match class {
            RequestClass::Api => Ok(self.api(request).await),
            RequestClass::Navigation => Ok(self.navigation(request).await),
            RequestClass::StaticAsset => self.static_asset(request).await,
            RequestClass::Other => self.other(request).await,
        }
    }

    async fn open(&self, kind: PartitionKind) -> Result<Partition, StoreError> {
        Partition::open(self.storage.clone(), self.partitions.name(kind)).await
    }

    /// The listings collection or one of its item sub-paths.
    pub fn is_listings(&self, path: &str) -> bool {
        match path.strip_prefix(self.listings_path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Store a clone of a successful response. Failures are logged; the
    /// caller still has the response to return.
    async fn store(&self, partition: &Partition, key: &str, response: &Response) {
        if !response.ok() {
            return;
        }
        match partition.put(key, response.clone()).await {
            Ok(()) => debug!(partition = partition.name(), key, "Cached response"),
            Err(e) => error!(partition = partition.name(), key, error = %e, "Failed to cache response"),
        }
    }

    /// Look up `key` in `kind`, treating storage failures as a miss.
    async fn lookup_or_miss(&self, kind: PartitionKind, key: &str) -> Option<Response> {
        let partition = match self.open(kind).await {
            Ok(p) => p,
            Err(e) => {
                error!(partition = %kind, error = %e, "Failed to open partition");
                return None;
            }
        };
        match partition.lookup(key).await {
            Ok(found) => found.map(|stored| stored.response),
            Err(e) => {
                error!(partition = %kind, key, error = %e, "Failed to read partition");
                None
            }
        }
    }

    /// Revalidate `request` into `partition` without making anyone wait.
    /// Concurrent refreshes of the same key are not deduplicated; the last
    /// one to finish wins.
    fn refresh_in_background(&self, request: &Request, partition: &Partition) {
        let network = self.network.clone();
        let partition = partition.clone();
        let request = request.clone();
        let key = request.cache_key();

        self.tasks.submit(format!("refresh {}", key), async move {
            let response = network.fetch(&request).await?;
            if response.ok() {
                partition.put(&key, response).await?;
                info!(partition = partition.name(), key = %key, "Background cache update completed");
            } else {
                debug!(key = %key, status = response.status, "Background refresh got non-success status, keeping cached copy");
            }
            Ok(())
        });
    }

    /// `{ success: false, message, data: [], offline: true }` with status 200.
    pub fn offline_envelope(&self, path: &str) -> Response {
        let message = if self.is_listings(path) {
            &self.listings_offline_message
        } else {
            &self.offline_message
        };
        warn!(path, "Serving offline envelope");
        Response::json(&json!({
            "success": false,
            "message": message,
            "data": [],
            "offline": true,
        }))
        .with_header("Cache-Control", "no-cache")
    }

    pub fn offline_page() -> Response {
        Response::html(OFFLINE_PAGE).with_header("Cache-Control", "no-cache")
    }
}
