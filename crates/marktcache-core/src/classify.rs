//! Request classification.
//!
//! Decides whether a request is intercepted at all and, if so, which caching
//! policy handles it. Pure: the answer depends only on the request and the
//! configuration.

use anyhow::Result;
use url::{Origin, Url};

use crate::config::Config;
use crate::http::{Method, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Api,
    Navigation,
    StaticAsset,
    Other,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    api_prefix: String,
    asset_extensions: Vec<String>,
    asset_prefixes: Vec<String>,
}

impl Classifier {
    pub fn new(origin: &Url, config: &Config) -> Self {
        Self {
            origin: origin.origin(),
            api_prefix: config.api_prefix.clone(),
            asset_extensions: config
                .asset_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            asset_prefixes: config.asset_prefixes.clone(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(&config.origin_url()?, config))
    }

    /// Only same-origin HTTP(S) GETs are intercepted. Everything else goes
    /// to the network untouched.
    pub fn intercepts(&self, request: &Request) -> bool {
        request.method == Method::Get
            && matches!(request.url.scheme(), "http" | "https")
            && request.url.origin() == self.origin
    }

    /// `None` when the request is not intercepted.
    pub fn classify(&self, request: &Request) -> Option<RequestClass> {
        if !self.intercepts(request) {
            return None;
        }

        let path = request.path();
        let class = if path.starts_with(&self.api_prefix) {
            RequestClass::Api
        } else if request.is_navigation() {
            RequestClass::Navigation
        } else if self.is_static_asset(path) {
            RequestClass::StaticAsset
        } else {
            RequestClass::Other
        };
        Some(class)
    }

    fn is_static_asset(&self, path: &str) -> bool {
        if self.asset_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }
        let file = path.rsplit('/').next().unwrap_or(path);
        match file.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.asset_extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}
