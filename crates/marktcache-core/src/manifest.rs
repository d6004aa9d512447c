//! App shell file list derived from a build output directory.
//!
//! The build emits hashed bundles into `dist/assets`. Every `.js` and `.css`
//! file there belongs in the shell next to the fixed base files.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::BASE_SHELL_URLS;

/// Bundle extensions that are pre-cached.
const BUNDLE_EXTENSIONS: &[&str] = &["js", "css"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellManifest {
    pub urls: Vec<String>,
}

impl ShellManifest {
    /// Base shell files followed by `/assets/<file>` for every bundle in
    /// `<dist>/assets`, sorted by name.
    pub fn discover(dist: &Path) -> Result<Self> {
        if !dist.is_dir() {
            anyhow::bail!("Dist directory not found: {}. Run the build first.", dist.display());
        }

        let mut urls: Vec<String> = BASE_SHELL_URLS.iter().map(|u| u.to_string()).collect();

        let assets = dist.join("assets");
        let mut bundles = Vec::new();
        if assets.is_dir() {
            let entries = std::fs::read_dir(&assets)
                .with_context(|| format!("Failed to read {}", assets.display()))?;
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_bundle = Path::new(&name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| BUNDLE_EXTENSIONS.contains(&e));
                if is_bundle {
                    bundles.push(format!("/assets/{}", name));
                }
            }
        }
        bundles.sort();

        info!(bundles = bundles.len(), "Discovered shell bundles");
        urls.extend(bundles);
        Ok(Self { urls })
    }
}
