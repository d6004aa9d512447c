use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::http::Response;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid partition name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}

/// A response as it sits in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.stored_at).num_minutes()
    }

    /// Coarse age for entry listings. Hours and days round to the nearest
    /// unit: 1h 30m reads "2h ago", 1d 12h reads "2d ago".
    pub fn age_display(&self) -> String {
        match self.age_minutes() {
            // Negative when the clock moved backwards
            m if m < 1 => "just now".to_string(),
            m if m < MINUTES_PER_HOUR => format!("{}m ago", m),
            m if m < MINUTES_PER_DAY => format!("{}h ago", round_div(m, MINUTES_PER_HOUR)),
            m => format!("{}d ago", round_div(m, MINUTES_PER_DAY)),
        }
    }
}

const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 24 * MINUTES_PER_HOUR;

/// `n / d` rounded half up, for non-negative `n`.
fn round_div(n: i64, d: i64) -> i64 {
    (n + d / 2) / d
}

/// A set of named partitions.
///
/// Partitions come into existence on `open` or on the first `put`. Reads of a
/// partition that does not exist behave as if it were empty and never create
/// it. A `put` replaces the whole entry for its key atomically.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn open(&self, name: &str) -> Result<(), StoreError>;

    async fn lookup(&self, name: &str, key: &str) -> Result<Option<StoredResponse>, StoreError>;

    async fn put(&self, name: &str, key: &str, response: Response) -> Result<(), StoreError>;

    async fn keys(&self, name: &str) -> Result<Vec<String>, StoreError>;

    /// Names of every partition that currently exists.
    async fn names(&self) -> Result<Vec<String>, StoreError>;

    /// Drop a partition and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

/// An opened partition. Clone is cheap.
#[derive(Clone)]
pub struct Partition {
    storage: Arc<dyn CacheStorage>,
    name: String,
}

impl Partition {
    pub async fn open(storage: Arc<dyn CacheStorage>, name: &str) -> Result<Self, StoreError> {
        storage.open(name).await?;
        Ok(Self {
            storage,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn lookup(&self, key: &str) -> Result<Option<StoredResponse>, StoreError> {
        self.storage.lookup(&self.name, key).await
    }

    pub async fn put(&self, key: &str, response: Response) -> Result<(), StoreError> {
        self.storage.put(&self.name, key, response).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.storage.keys(&self.name).await
    }
}

/// Reject names that could escape a storage root.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.starts_with('.')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
