use tracing::{debug, error, warn};

use super::Policies;
use crate::cache::{PartitionKind, StoreError};
use crate::http::{Request, Response};

impl Policies {
    /// API requests. Never fails: the worst case is the offline envelope.
    pub(crate) async fn api(&self, request: &Request) -> Response {
        match self.api_cached(request).await {
            Ok(response) => response,
            Err(e) => {
                // Caching is broken; behave as if it did not exist.
                error!(url = %request.url, error = %e, "Cache error, passing API request through");
                match self.network.fetch(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(url = %request.url, error = %e, "Pass-through fetch failed");
                        self.offline_envelope(request.path())
                    }
                }
            }
        }
    }

    async fn api_cached(&self, request: &Request) -> Result<Response, StoreError> {
        let partition = self.open(PartitionKind::Api).await?;
        let key = request.cache_key();
        let cached = partition.lookup(&key).await?;

        if let Some(stored) = &cached {
            if self.is_listings(request.path()) {
                debug!(key = %key, "Serving listings from cache");
                self.refresh_in_background(request, &partition);
                return Ok(stored.response.clone());
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&partition, &key, &response).await;
                Ok(response)
            }
            Err(e) => match cached {
                Some(stored) => {
                    debug!(key = %key, error = %e, "Network failed, serving API response from cache");
                    Ok(stored.response)
                }
                None => Ok(self.offline_envelope(request.path())),
            },
        }
    }
}
