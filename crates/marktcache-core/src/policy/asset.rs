use tracing::{debug, error};

use super::Policies;
use crate::cache::{PartitionKind, StoreError};
use crate::http::{Request, Response};
use crate::network::FetchError;

impl Policies {
    /// Static assets: cache-first. A failure with no cached copy is passed to
    /// the caller as-is; a missing script must not turn into a fake 200.
    pub(crate) async fn static_asset(&self, request: &Request) -> Result<Response, FetchError> {
        match self.static_asset_cached(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(url = %request.url, error = %e, "Cache error, passing asset request through");
                self.network.fetch(request).await
            }
        }
    }

    async fn static_asset_cached(
        &self,
        request: &Request,
    ) -> Result<Result<Response, FetchError>, StoreError> {
        let runtime = self.open(PartitionKind::Runtime).await?;
        let key = request.cache_key();

        if let Some(stored) = runtime.lookup(&key).await? {
            debug!(key = %key, "Serving asset from runtime cache");
            self.refresh_in_background(request, &runtime);
            return Ok(Ok(stored.response));
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&runtime, &key, &response).await;
                Ok(Ok(response))
            }
            Err(e) => match self.lookup_or_miss(PartitionKind::Shell, &key).await {
                Some(response) => {
                    debug!(key = %key, "Network failed, serving asset from shell");
                    Ok(Ok(response))
                }
                None => Ok(Err(e)),
            },
        }
    }

    /// Everything else: network-first with the runtime partition as fallback.
    pub(crate) async fn other(&self, request: &Request) -> Result<Response, FetchError> {
        let key = request.cache_key();

        let runtime = match self.open(PartitionKind::Runtime).await {
            Ok(p) => p,
            Err(e) => {
                error!(url = %request.url, error = %e, "Cache error, passing request through");
                return self.network.fetch(request).await;
            }
        };

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(&runtime, &key, &response).await;
                Ok(response)
            }
            Err(e) => match runtime.lookup(&key).await {
                Ok(Some(stored)) => {
                    debug!(key = %key, "Network failed, serving from runtime cache");
                    Ok(stored.response)
                }
                Ok(None) => Err(e),
                Err(store_err) => {
                    error!(key = %key, error = %store_err, "Failed to read runtime partition");
                    Err(e)
                }
            },
        }
    }
}
