//! Live network access.
//!
//! The policies never talk to `reqwest` directly; they go through the
//! `Network` trait so the engine can be driven against a real origin
//! (`HttpNetwork`) or a scripted one in tests.

pub mod client;
pub mod error;

use async_trait::async_trait;

pub use client::HttpNetwork;
pub use error::FetchError;

use crate::http::{Request, Response};

#[async_trait]
pub trait Network: Send + Sync {
    /// Issue the request. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;

    /// Like `fetch`, but a non-2xx status is turned into an error.
    async fn fetch_ok(&self, request: &Request) -> Result<Response, FetchError> {
        let response = self.fetch(request).await?;
        if response.ok() {
            Ok(response)
        } else {
            Err(FetchError::from_status(response.status, &response.text()))
        }
    }
}
