//! Control channel between the page and the engine.
//!
//! Pages post `ControlCommand`s; the engine answers `GET_STATUS` on a
//! dedicated reply channel and broadcasts `RESYNC_COMPLETE` to every open
//! page after a resync.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::cache::{PartitionKind, StoreError};
use crate::http::{Request, Response};
use crate::worker::CacheWorker;

/// Buffer size for the page → engine command channel.
const COMMAND_BUFFER_SIZE: usize = 32;

/// Seeded entries may be reused for an hour by anything honouring headers.
const SEEDED_CACHE_CONTROL: &str = "max-age=3600";

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("No status reply within {0:?}")]
    Timeout(Duration),

    #[error("Control channel closed")]
    Disconnected,
}

/// Commands a page can send. Older command names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    #[serde(alias = "CACHE_ITEMS")]
    SeedItems {
        #[serde(default)]
        items: Value,
    },
    ClearCache,
    #[serde(alias = "GET_CACHE_STATUS")]
    GetStatus,
    #[serde(alias = "SYNC_DATA")]
    Resync,
    #[serde(alias = "SKIP_WAITING")]
    ForceActivate,
    #[serde(other)]
    Unknown,
}

impl ControlCommand {
    /// Parse a raw message. Anything unrecognisable becomes `Unknown`.
    pub fn from_value(value: &Value) -> Self {
        match Self::deserialize(value) {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "Unparseable control message");
                ControlCommand::Unknown
            }
        }
    }
}

/// Reply to `GET_STATUS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub api_count: usize,
    pub static_count: usize,
    pub runtime_count: usize,
    pub total_count: usize,
    pub partition_names: Vec<String>,
}

/// Messages the engine sends to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    ResyncComplete { timestamp: String },
}

/// A command plus, for `GET_STATUS`, where to send the reply.
pub struct ControlMessage {
    pub command: ControlCommand,
    pub reply: Option<oneshot::Sender<StatusReport>>,
}

/// Page-side handle on the control channel. Clone is cheap.
#[derive(Clone)]
pub struct ControlClient {
    tx: mpsc::Sender<ControlMessage>,
    status_timeout: Duration,
}

impl ControlClient {
    /// Wrap the sending half of a command channel.
    pub fn for_channel(tx: mpsc::Sender<ControlMessage>, status_timeout: Duration) -> Self {
        Self { tx, status_timeout }
    }

    /// Fire a command that has no reply.
    pub async fn post(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.tx
            .send(ControlMessage {
                command,
                reply: None,
            })
            .await
            .map_err(|_| ControlError::Disconnected)
    }

    /// Ask for the cache status, giving up after the status timeout.
    pub async fn status(&self) -> Result<StatusReport, ControlError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let message = ControlMessage {
            command: ControlCommand::GetStatus,
            reply: Some(reply_tx),
        };

        let exchange = async {
            self.tx
                .send(message)
                .await
                .map_err(|_| ControlError::Disconnected)?;
            reply_rx.await.map_err(|_| ControlError::Disconnected)
        };

        tokio::time::timeout(self.status_timeout, exchange)
            .await
            .map_err(|_| ControlError::Timeout(self.status_timeout))?
    }
}

impl CacheWorker {
    /// Start serving the control channel. Commands are handled one at a time
    /// in arrival order.
    pub fn spawn_control(self: &Arc<Self>) -> ControlClient {
        let (tx, mut rx) = mpsc::channel::<ControlMessage>(COMMAND_BUFFER_SIZE);
        let worker = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                worker.handle_command(message.command, message.reply).await;
            }
            debug!("Control channel closed");
        });

        ControlClient::for_channel(tx, self.config().status_timeout())
    }

    pub async fn handle_command(
        &self,
        command: ControlCommand,
        reply: Option<oneshot::Sender<StatusReport>>,
    ) {
        match command {
            ControlCommand::SeedItems { items } => self.seed_items(&items).await,
            ControlCommand::ClearCache => self.clear_all().await,
            ControlCommand::GetStatus => {
                let status = self.status().await;
                match reply {
                    Some(reply) => {
                        if reply.send(status).is_err() {
                            debug!("Status requester went away before the reply");
                        }
                    }
                    None => warn!("Status requested without a reply channel"),
                }
            }
            ControlCommand::Resync => {
                self.resync().await;
            }
            ControlCommand::ForceActivate => self.force_activate().await,
            ControlCommand::Unknown => debug!("Ignoring unknown control command"),
        }
    }

    /// Write the listings collection and one entry per identified item into
    /// the API partition, as if they had just been fetched.
    pub async fn seed_items(&self, items: &Value) {
        let Some(list) = items.as_array() else {
            warn!(payload = %items, "Invalid items data for caching");
            return;
        };
        if let Err(e) = self.try_seed_items(list).await {
            error!(error = %e, "Failed to cache items");
        }
    }

    async fn try_seed_items(&self, list: &[Value]) -> Result<(), StoreError> {
        let api = self.open_partition(PartitionKind::Api).await?;
        let listings = self.config().listings_path.trim_end_matches('/').to_string();

        let Some(listings_key) = self.request_key(&listings) else {
            warn!(path = %listings, "Listings path is not a valid URL path");
            return Ok(());
        };
        api.put(&listings_key, seeded(json!({ "success": true, "data": list })))
            .await?;

        let mut seeded_items = 0;
        for item in list {
            let Some(id) = item_id(item) else {
                continue;
            };
            let Some(key) = self.request_key(&format!("{}/{}", listings, id)) else {
                warn!(id = %id, "Skipping item with unusable id");
                continue;
            };
            api.put(&key, seeded(json!({ "success": true, "data": item })))
                .await?;
            seeded_items += 1;
        }
        info!(items = list.len(), individual = seeded_items, "Cached items");
        Ok(())
    }

    /// The key a page request for `path` is stored under, so seeded entries
    /// match what the browser actually asks for.
    fn request_key(&self, path: &str) -> Option<String> {
        let url = self.origin().join(path).ok()?;
        Some(Request::new(crate::http::Method::Get, url).cache_key())
    }

    /// Delete every partition, whatever version it belongs to.
    pub async fn clear_all(&self) {
        let names = match self.storage().names().await {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Failed to list partitions");
                return;
            }
        };
        for name in names {
            if let Err(e) = self.storage().delete(&name).await {
                error!(partition = %name, error = %e, "Failed to delete partition");
            }
        }
        info!("All caches cleared");
    }

    /// Entry counts for this version's partitions plus every partition name
    /// that exists. Does not create partitions.
    pub async fn status(&self) -> StatusReport {
        let api_count = self.count_entries(PartitionKind::Api).await;
        let static_count = self.count_entries(PartitionKind::Shell).await;
        let runtime_count = self.count_entries(PartitionKind::Runtime).await;
        let partition_names = self.storage().names().await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to list partitions");
            Vec::new()
        });

        StatusReport {
            api_count,
            static_count,
            runtime_count,
            total_count: api_count + static_count + runtime_count,
            partition_names,
        }
    }

    async fn count_entries(&self, kind: PartitionKind) -> usize {
        let name = self.partitions().name(kind);
        match self.storage().keys(name).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                error!(partition = name, error = %e, "Failed to count entries");
                0
            }
        }
    }

    /// Refresh the listings entry and tell every page, whether or not the
    /// refresh worked. Returns the number of pages notified.
    pub async fn resync(&self) -> usize {
        info!("Resync triggered - refreshing listings");
        if let Err(e) = self.refresh_listings().await {
            warn!(error = %e, "Could not sync items");
        }

        let message = ClientMessage::ResyncComplete {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.clients().broadcast(&message)
    }

    async fn refresh_listings(&self) -> anyhow::Result<()> {
        let url = self.origin().join(&self.config().listings_path)?;
        let request = Request::new(crate::http::Method::Get, url);
        let response = self.network().fetch_ok(&request).await?;
        let api = self.open_partition(PartitionKind::Api).await?;
        api.put(&request.cache_key(), response).await?;
        info!(key = %request.cache_key(), "Listings cache updated after resync");
        Ok(())
    }
}

fn seeded(body: Value) -> Response {
    Response::json(&body).with_header("Cache-Control", SEEDED_CACHE_CONTROL)
}

/// The item's identifier as it appears in its URL, if it has a usable one.
fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(number_id(n)),
        _ => None,
    }
}

/// Whole floats print without a fraction, the way the page formats them.
fn number_id(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands_and_aliases() {
        let parse = |v: Value| ControlCommand::from_value(&v);

        assert_eq!(parse(json!({"type": "CLEAR_CACHE"})), ControlCommand::ClearCache);
        assert_eq!(parse(json!({"type": "GET_CACHE_STATUS"})), ControlCommand::GetStatus);
        assert_eq!(parse(json!({"type": "SYNC_DATA"})), ControlCommand::Resync);
        assert_eq!(parse(json!({"type": "SKIP_WAITING"})), ControlCommand::ForceActivate);
        assert_eq!(
            parse(json!({"type": "CACHE_ITEMS", "items": [{"id": 1}]})),
            ControlCommand::SeedItems {
                items: json!([{"id": 1}])
            }
        );
        assert_eq!(
            parse(json!({"type": "SEED_ITEMS"})),
            ControlCommand::SeedItems { items: Value::Null }
        );
    }

    #[test]
    fn test_unknown_and_malformed_messages() {
        let parse = |v: Value| ControlCommand::from_value(&v);
        assert_eq!(parse(json!({"type": "PREFETCH_EVERYTHING"})), ControlCommand::Unknown);
        assert_eq!(parse(json!({"kind": "CLEAR_CACHE"})), ControlCommand::Unknown);
        assert_eq!(parse(json!("CLEAR_CACHE")), ControlCommand::Unknown);
        assert_eq!(parse(Value::Null), ControlCommand::Unknown);
    }

    #[test]
    fn test_wire_shapes() {
        let status = StatusReport {
            api_count: 2,
            static_count: 5,
            runtime_count: 1,
            total_count: 8,
            partition_names: vec!["marktplaats-api-v1".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({
                "apiCount": 2,
                "staticCount": 5,
                "runtimeCount": 1,
                "totalCount": 8,
                "partitionNames": ["marktplaats-api-v1"],
            })
        );

        let msg = ClientMessage::ResyncComplete {
            timestamp: "2026-10-19T08:00:00.000Z".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "RESYNC_COMPLETE", "timestamp": "2026-10-19T08:00:00.000Z"})
        );
    }

    #[test]
    fn test_item_id() {
        assert_eq!(item_id(&json!({"id": 12})), Some("12".to_string()));
        assert_eq!(item_id(&json!({"id": "abc"})), Some("abc".to_string()));
        assert_eq!(item_id(&json!({"id": ""})), None);
        assert_eq!(item_id(&json!({"id": 0})), None);
        assert_eq!(item_id(&json!({"id": null})), None);
        assert_eq!(item_id(&json!({"title": "fiets"})), None);
        assert_eq!(item_id(&json!({"id": 2.0})), Some("2".to_string()));
        assert_eq!(item_id(&json!({"id": 2.5})), Some("2.5".to_string()));
        assert_eq!(item_id(&json!({"id": -7})), Some("-7".to_string()));
    }
}
