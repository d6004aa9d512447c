use tracing::{debug, error};

use super::Policies;
use crate::cache::PartitionKind;
use crate::http::{Request, Response};

/// Shell entries tried, in order, when a navigation has nothing better.
const SHELL_DOCUMENTS: &[&str] = &["/index.html", "/"];

impl Policies {
    /// Top-level page loads. Never fails.
    pub(crate) async fn navigation(&self, request: &Request) -> Response {
        let key = request.cache_key();

        match self.network.fetch(request).await {
            Ok(response) => {
                match self.open(PartitionKind::Runtime).await {
                    Ok(partition) => self.store(&partition, &key, &response).await,
                    Err(e) => error!(key = %key, error = %e, "Failed to open runtime partition"),
                }
                return response;
            }
            Err(e) => debug!(url = %request.url, error = %e, "Navigation fetch failed, trying caches"),
        }

        if let Some(response) = self.lookup_or_miss(PartitionKind::Runtime, &key).await {
            debug!(key = %key, "Serving page from runtime cache");
            return response;
        }

        for document in SHELL_DOCUMENTS {
            if let Some(response) = self.lookup_or_miss(PartitionKind::Shell, document).await {
                debug!(key = %key, document, "Serving app shell");
                return response;
            }
        }

        Self::offline_page()
    }
}
