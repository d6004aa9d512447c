//! Engine configuration.
//!
//! Everything the caching engine needs to know about the page it serves:
//! the origin it intercepts for, the deployed version (which names the cache
//! partitions), the API prefix, the app shell file list and the offline
//! messages shown to the user.
//!
//! Configuration is stored at `~/.config/marktcache/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "marktcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Files every deployed version needs to boot offline.
pub const BASE_SHELL_URLS: &[&str] = &["/", "/index.html", "/manifest.json", "/icon.svg", "/vite.svg"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin of the page, e.g. `https://example.org`. Only requests to this
    /// origin are intercepted.
    pub origin: String,
    /// Deployed version identifier. Suffixed to every partition name.
    pub version: String,
    /// Prefix shared by all partition names.
    pub cache_prefix: String,
    /// Path prefix that marks a request as an API call.
    pub api_prefix: String,
    /// The primary listings collection, served offline-first.
    pub listings_path: String,
    /// Absolute URL paths pre-cached into the shell partition on install.
    pub shell_urls: Vec<String>,
    /// File extensions treated as static assets (without the dot).
    pub asset_extensions: Vec<String>,
    /// Path prefixes treated as static asset directories.
    pub asset_prefixes: Vec<String>,
    /// Message in the offline envelope for API calls.
    pub offline_message: String,
    /// Message in the offline envelope for the listings resource.
    pub listings_offline_message: String,
    /// Upper bound for a status reply on the control channel.
    pub status_timeout_secs: u64,
    /// Timeout for live network requests.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://localhost:5173".to_string(),
            version: "v1".to_string(),
            cache_prefix: "marktplaats".to_string(),
            api_prefix: "/api/".to_string(),
            listings_path: "/api/items".to_string(),
            shell_urls: BASE_SHELL_URLS.iter().map(|u| u.to_string()).collect(),
            asset_extensions: [
                "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff",
                "woff2", "ttf", "otf", "eot", "webmanifest",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            asset_prefixes: vec!["/assets/".to_string()],
            offline_message: "Offline - geen internetverbinding".to_string(),
            listings_offline_message: "Items niet beschikbaar offline".to_string(),
            status_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the on-disk partitions.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin)
            .with_context(|| format!("Invalid origin: {}", self.origin))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Origin must be http or https: {}", self.origin);
        }
        Ok(url)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
