//! The caching engine for one page origin and one deployed version.
//!
//! `CacheWorker` wires the classifier, the policies, the lifecycle and the
//! page registry around a storage backend and a network backend. Hosts feed
//! it every request the page makes through `handle_fetch`.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, Partition, PartitionKind, PartitionSet, StoreError};
use crate::classify::Classifier;
use crate::clients::Clients;
use crate::config::Config;
use crate::http::{Request, Response};
use crate::lifecycle::{ActivateReport, InstallReport, Lifecycle, LifecycleError, LifecycleState};
use crate::network::{FetchError, Network};
use crate::policy::Policies;
use crate::tasks::BackgroundTasks;

pub struct CacheWorker {
    config: Config,
    origin: Url,
    classifier: Classifier,
    partitions: Arc<PartitionSet>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    policies: Policies,
    lifecycle: Lifecycle,
    clients: Clients,
    tasks: BackgroundTasks,
}

impl CacheWorker {
    pub fn new(config: Config, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Result<Self> {
        let origin = config.origin_url()?;
        let classifier = Classifier::new(&origin, &config);
        let partitions = Arc::new(PartitionSet::new(&config.cache_prefix, &config.version));
        let clients = Clients::new();
        let tasks = BackgroundTasks::new();

        let policies = Policies::new(
            &config,
            storage.clone(),
            network.clone(),
            partitions.clone(),
            tasks.clone(),
        );
        let lifecycle = Lifecycle::new(
            origin.clone(),
            config.shell_urls.clone(),
            storage.clone(),
            network.clone(),
            partitions.clone(),
            clients.clone(),
        );

        Ok(Self {
            config,
            origin,
            classifier,
            partitions,
            storage,
            network,
            policies,
            lifecycle,
            clients,
            tasks,
        })
    }

    /// Answer a request from the page.
    ///
    /// `None` means the request is not intercepted and must go to the network
    /// unmodified. API and navigation requests always yield a response;
    /// asset and other requests fail only when nothing can answer them.
    pub async fn handle_fetch(&self, request: &Request) -> Option<Result<Response, FetchError>> {
        let Some(class) = self.classifier.classify(request) else {
            debug!(method = request.method.as_str(), url = %request.url, "Not intercepted");
            return None;
        };
        debug!(url = %request.url, ?class, "Intercepted request");
        Some(self.policies.handle(class, request).await)
    }

    pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
        self.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<ActivateReport, LifecycleError> {
        self.lifecycle.activate().await
    }

    /// Install, then activate straight away.
    pub async fn start(&self) -> Result<(InstallReport, ActivateReport), LifecycleError> {
        let installed = self.install().await?;
        let activated = self.activate().await?;
        Ok((installed, activated))
    }

    /// Stop waiting: activate now if installed, otherwise as soon as install
    /// finishes.
    pub async fn force_activate(&self) {
        match self.lifecycle.skip_waiting().await {
            Ok(Some(report)) => info!(deleted = report.deleted.len(), claimed = report.claimed, "Forced activation"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Forced activation failed"),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub async fn open_partition(&self, kind: PartitionKind) -> Result<Partition, StoreError> {
        Partition::open(self.storage.clone(), self.partitions.name(kind)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::MemoryStorage;
    use crate::control::{ClientMessage, ControlCommand};
    use crate::http::{Method, RequestMode};
    use crate::test_support::MockNetwork;

    fn worker() -> (Arc<CacheWorker>, Arc<MemoryStorage>, Arc<MockNetwork>) {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(MockNetwork::new());
        let worker = CacheWorker::new(Config::default(), storage.clone(), network.clone()).unwrap();
        (Arc::new(worker), storage, network)
    }

    fn url(path: &str) -> String {
        format!("http://localhost:5173{}", path)
    }

    #[tokio::test]
    async fn test_non_get_and_cross_origin_pass_through() {
        let (worker, storage, network) = worker();

        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            let req = Request::get(&url("/api/items")).unwrap().with_method(method);
            assert!(worker.handle_fetch(&req).await.is_none());
        }
        let req = Request::get("https://images.cdn.example/fiets.jpg").unwrap();
        assert!(worker.handle_fetch(&req).await.is_none());
        let req = Request::get("chrome-extension://abc/inject.js").unwrap();
        assert!(worker.handle_fetch(&req).await.is_none());

        assert_eq!(network.total_calls(), 0);
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatches_by_class() {
        let (worker, _storage, network) = worker();
        network.set_online(false);

        let api = worker.handle_fetch(&Request::get(&url("/api/items")).unwrap()).await;
        let value: serde_json::Value = api.unwrap().unwrap().json_body().unwrap();
        assert_eq!(value["offline"], true);

        let nav = Request::get(&url("/items/1")).unwrap().with_mode(RequestMode::Navigate);
        let page = worker.handle_fetch(&nav).await.unwrap().unwrap();
        assert!(page.text().contains("offline"));

        let asset = worker.handle_fetch(&Request::get(&url("/assets/a.js")).unwrap()).await;
        assert!(asset.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_stale_listings_are_served_then_updated() {
        let (worker, _storage, network) = worker();
        let stale = json!([{"id": 1, "title": "Fiets"}]);
        worker.seed_items(&stale).await;
        network.route(
            "/api/items",
            Response::json(&json!({"success": true, "data": [{"id": 1, "title": "Fiets (verkocht)"}]})),
        );

        let req = Request::get(&url("/api/items")).unwrap();
        let resp = worker.handle_fetch(&req).await.unwrap().unwrap();
        let served: serde_json::Value = resp.json_body().unwrap();
        assert_eq!(served["data"], stale);
        assert_eq!(worker.tasks().submitted(), 1);

        worker.tasks().settle().await;
        let api = worker.open_partition(PartitionKind::Api).await.unwrap();
        let stored = api.lookup("/api/items").await.unwrap().unwrap();
        let value: serde_json::Value = stored.response.json_body().unwrap();
        assert_eq!(value["data"][0]["title"], "Fiets (verkocht)");
    }

    #[tokio::test]
    async fn test_seed_then_clear_round_trip() {
        let (worker, _storage, _network) = worker();
        worker.install().await.unwrap();

        let items = json!([{"id": 1}, {"id": 2}, {"id": "x9"}, {"title": "no id"}]);
        worker.handle_command(ControlCommand::SeedItems { items }, None).await;

        let status = worker.status().await;
        assert_eq!(status.api_count, 4);

        let api = worker.open_partition(PartitionKind::Api).await.unwrap();
        let item = api.lookup("/api/items/x9").await.unwrap().unwrap();
        assert_eq!(item.response.header("cache-control"), Some("max-age=3600"));
        let value: serde_json::Value = item.response.json_body().unwrap();
        assert_eq!(value, json!({"success": true, "data": {"id": "x9"}}));

        worker.handle_command(ControlCommand::ClearCache, None).await;
        let status = worker.status().await;
        assert_eq!(status.total_count, 0);
        assert!(status.partition_names.is_empty());
    }

    #[tokio::test]
    async fn test_seeded_items_are_served_under_their_request_urls() {
        let (worker, _storage, network) = worker();
        let items = json!([{"id": "fiets 1", "title": "Fiets"}, {"id": 2.0, "title": "Bank"}, {"id": "stoel-é"}]);
        worker.seed_items(&items).await;
        network.set_online(false);

        let api = worker.open_partition(PartitionKind::Api).await.unwrap();
        assert_eq!(
            api.keys().await.unwrap(),
            vec!["/api/items", "/api/items/2", "/api/items/fiets%201", "/api/items/stoel-%C3%A9"]
        );

        let req = Request::get(&url("/api/items/fiets%201")).unwrap();
        let resp = worker.handle_fetch(&req).await.unwrap().unwrap();
        let value: serde_json::Value = resp.json_body().unwrap();
        assert_eq!(value["data"]["title"], "Fiets");

        let req = Request::get(&url("/api/items/2")).unwrap();
        let resp = worker.handle_fetch(&req).await.unwrap().unwrap();
        let value: serde_json::Value = resp.json_body().unwrap();
        assert_eq!(value["data"]["title"], "Bank");
    }

    #[tokio::test]
    async fn test_seed_n_items_gives_n_plus_one_entries() {
        let (worker, _storage, _network) = worker();
        let items: Vec<_> = (1..=5).map(|i| json!({"id": i, "price": i * 10})).collect();
        worker.seed_items(&json!(items)).await;
        assert_eq!(worker.status().await.api_count, 6);
    }

    #[tokio::test]
    async fn test_invalid_seed_payload_is_ignored() {
        let (worker, storage, _network) = worker();
        worker
            .handle_command(
                ControlCommand::SeedItems {
                    items: json!({"id": 1}),
                },
                None,
            )
            .await;
        worker
            .handle_command(ControlCommand::SeedItems { items: serde_json::Value::Null }, None)
            .await;
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_before_anything_is_opened() {
        let (worker, storage, _network) = worker();
        let control = worker.spawn_control();

        let status = control.status().await.unwrap();
        assert_eq!(status.total_count, 0);
        assert!(status.partition_names.is_empty());
        // Asking must not create partitions.
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_counts_partitions() {
        let (worker, _storage, network) = worker();
        network.route("/", Response::html("root"));
        network.route("/index.html", Response::html("index"));
        worker.start().await.unwrap();
        network.route("/assets/app.js", Response::new(200, "js"));
        worker
            .handle_fetch(&Request::get(&url("/assets/app.js")).unwrap())
            .await
            .unwrap()
            .unwrap();
        worker.seed_items(&json!([{"id": 1}])).await;

        let control = worker.spawn_control();
        let status = control.status().await.unwrap();
        assert_eq!(status.static_count, 2);
        assert_eq!(status.runtime_count, 1);
        assert_eq!(status.api_count, 2);
        assert_eq!(status.total_count, 5);
        assert_eq!(
            status.partition_names,
            vec![
                "marktplaats-api-v1".to_string(),
                "marktplaats-runtime-v1".to_string(),
                "marktplaats-shell-v1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_times_out_when_nobody_answers() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let control = crate::control::ControlClient::for_channel(tx, Duration::from_millis(50));
        let started = std::time::Instant::now();
        let result = control.status().await;
        assert!(matches!(result, Err(crate::control::ControlError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_resync_broadcasts_even_when_offline() {
        let (worker, _storage, network) = worker();
        let (_a, mut rx_a) = worker.clients().open("/");
        let (_b, mut rx_b) = worker.clients().open("/items/2");
        network.set_online(false);

        let control = worker.spawn_control();
        control.post(ControlCommand::Resync).await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let ClientMessage::ResyncComplete { timestamp } = msg;
            assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
        }
        assert!(worker
            .open_partition(PartitionKind::Api)
            .await
            .unwrap()
            .lookup("/api/items")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resync_overwrites_listings_when_online() {
        let (worker, _storage, network) = worker();
        worker.seed_items(&json!([{"id": 1}])).await;
        let fresh = Response::json(&json!({"success": true, "data": [{"id": 1}, {"id": 2}]}));
        network.route("/api/items", fresh.clone());

        assert_eq!(worker.resync().await, 0);
        let api = worker.open_partition(PartitionKind::Api).await.unwrap();
        assert_eq!(api.lookup("/api/items").await.unwrap().unwrap().response, fresh);
    }

    #[tokio::test]
    async fn test_force_activate_activates_installed_worker() {
        let (worker, storage, _network) = worker();
        storage.open("marktplaats-api-v0").await.unwrap();
        let (page, _rx) = worker.clients().open("/");

        worker.install().await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Installed);

        worker.handle_command(ControlCommand::ForceActivate, None).await;
        assert_eq!(worker.state(), LifecycleState::Activated);
        assert_eq!(worker.clients().controller(page).as_deref(), Some("v1"));
        assert_eq!(storage.names().await.unwrap(), vec!["marktplaats-shell-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_force_activate_before_install_activates_once_installed() {
        let (worker, storage, _network) = worker();
        storage.open("marktplaats-api-v0").await.unwrap();
        let (page, _rx) = worker.clients().open("/");

        // Nothing to activate yet; only the request is recorded.
        worker.handle_command(ControlCommand::ForceActivate, None).await;
        assert_eq!(worker.state(), LifecycleState::Parsed);

        worker.install().await.unwrap();
        assert_eq!(worker.state(), LifecycleState::Activated);
        assert_eq!(worker.clients().controller(page).as_deref(), Some("v1"));
        assert_eq!(storage.names().await.unwrap(), vec!["marktplaats-shell-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_version_bump_orphans_previous_generation() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(MockNetwork::new());
        network.route("/index.html", Response::html("index"));

        let v1 = CacheWorker::new(Config::default(), storage.clone(), network.clone()).unwrap();
        v1.start().await.unwrap();
        v1.seed_items(&json!([{"id": 1}])).await;

        let config = Config {
            version: "v2".to_string(),
            ..Config::default()
        };
        let v2 = CacheWorker::new(config, storage.clone(), network.clone()).unwrap();
        let (_, report) = v2.start().await.unwrap();
        assert_eq!(
            report.deleted,
            vec!["marktplaats-api-v1".to_string(), "marktplaats-shell-v1".to_string()]
        );
        assert_eq!(storage.names().await.unwrap(), vec!["marktplaats-shell-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let (worker, storage, _network) = worker();
        let control = worker.spawn_control();
        control
            .post(ControlCommand::from_value(&json!({"type": "DEFRAGMENT"})))
            .await
            .unwrap();
        // Still serving afterwards.
        assert_eq!(control.status().await.unwrap(), crate::control::StatusReport::default());
        assert!(storage.names().await.unwrap().is_empty());
    }
}
