pub mod http;

use crate::core::types::{PurchaseRequest, PurchaseResponse};
use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

pub use http::HttpBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

/// The two remote calls the unlock flows make against a site.
///
/// Implementations do not apply timeouts; callers race each call against a timer.
#[async_trait]
pub trait CoinBackend: Send + Sync {
    /// POST one chapter purchase and decode the JSON reply.
    async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseResponse, BackendError>;

    /// Fetch the balance page and read the labeled balance out of it.
    /// `Ok(None)` when the page has no balance label.
    async fn fetch_balance(&self, pattern: &Regex) -> Result<Option<u64>, BackendError>;
}
