//! Install and activation.
//!
//! Install pre-caches the app shell for this version. Activation removes every
//! partition that does not belong to this version and then takes control of
//! the open pages.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, Partition, PartitionKind, PartitionSet, StoreError};
use crate::clients::Clients;
use crate::http::Request;
use crate::network::Network;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot activate before install has completed (state: {0})")]
    NotInstalled(LifecycleState),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, install not yet run
    Parsed,
    Installing,
    /// Installed and waiting to activate
    Installed,
    Activating,
    Activated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub claimed: usize,
}

pub struct Lifecycle {
    origin: Url,
    shell_urls: Vec<String>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    partitions: Arc<PartitionSet>,
    clients: Clients,
    state: Mutex<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl Lifecycle {
    pub fn new(
        origin: Url,
        shell_urls: Vec<String>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        partitions: Arc<PartitionSet>,
        clients: Clients,
    ) -> Self {
        Self {
            origin,
            shell_urls,
            storage,
            network,
            partitions,
            clients,
            state: Mutex::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(from = %*state, to = %next, version = self.partitions.version(), "Lifecycle transition");
        *state = next;
    }

    /// Activate without waiting for pages held by an older version.
    ///
    /// Activates now when installed. Otherwise the request is kept and the
    /// next install activates as soon as the shell is cached. Returns the
    /// activation report when activation ran here.
    pub async fn skip_waiting(&self) -> Result<Option<ActivateReport>, LifecycleError> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state() != LifecycleState::Installed {
            debug!(state = %self.state(), "Skip-waiting recorded");
            return Ok(None);
        }
        self.skip_waiting.store(false, Ordering::SeqCst);
        self.activate().await.map(Some)
    }

    /// Pre-cache the shell. A URL that cannot be fetched or stored is skipped
    /// with a warning; install as a whole only fails if the shell partition
    /// cannot be opened.
    pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
        self.set_state(LifecycleState::Installing);

        let shell = match Partition::open(
            self.storage.clone(),
            self.partitions.name(PartitionKind::Shell),
        )
        .await
        {
            Ok(shell) => shell,
            Err(e) => {
                self.set_state(LifecycleState::Parsed);
                return Err(e.into());
            }
        };
        info!(partition = shell.name(), urls = self.shell_urls.len(), "Caching app shell");

        let fetches = self.shell_urls.iter().map(|path| {
            let shell = shell.clone();
            async move {
                let url = self
                    .origin
                    .join(path)
                    .map_err(|e| anyhow::anyhow!("invalid shell URL: {}", e))?;
                let request = Request::new(crate::http::Method::Get, url);
                let response = self.network.fetch_ok(&request).await?;
                shell.put(&request.cache_key(), response).await?;
                anyhow::Ok(())
            }
        });

        let mut report = InstallReport::default();
        for (path, result) in self.shell_urls.iter().zip(join_all(fetches).await) {
            match result {
                Ok(()) => report.cached.push(path.clone()),
                Err(e) => {
                    warn!(url = %path, error = %e, "Skipping shell file");
                    report.skipped.push(path.clone());
                }
            }
        }

        self.set_state(LifecycleState::Installed);
        info!(
            cached = report.cached.len(),
            skipped = report.skipped.len(),
            "App shell cached"
        );

        if self.skip_waiting.swap(false, Ordering::SeqCst) {
            let activated = self.activate().await?;
            info!(deleted = activated.deleted.len(), claimed = activated.claimed, "Activated after install");
        }
        Ok(report)
    }

    /// Delete stale partitions, then claim every open page. Safe to repeat.
    pub async fn activate(&self) -> Result<ActivateReport, LifecycleError> {
        let previous = self.state();
        if matches!(previous, LifecycleState::Parsed | LifecycleState::Installing) {
            return Err(LifecycleError::NotInstalled(previous));
        }
        self.set_state(LifecycleState::Activating);

        let names = match self.storage.names().await {
            Ok(names) => names,
            Err(e) => {
                self.set_state(previous);
                return Err(e.into());
            }
        };

        let mut report = ActivateReport::default();
        for name in names {
            if self.partitions.contains(&name) {
                continue;
            }
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!(partition = %name, "Deleted old partition");
                    report.deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => {
                    self.set_state(previous);
                    return Err(e.into());
                }
            }
        }

        // Pages must be ours before activation is reported complete.
        report.claimed = self.clients.claim(self.partitions.version());
        self.set_state(LifecycleState::Activated);
        Ok(report)
    }
}
