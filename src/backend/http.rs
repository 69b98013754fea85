use super::{BackendError, CoinBackend};
use crate::core::site::SiteConfig;
use crate::core::types::{PurchaseRequest, PurchaseResponse};
use crate::scraping::balance_stream::scan_balance_stream;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// `CoinBackend` over the site's `admin-ajax.php` endpoint.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    unlock_url: Url,
    balance_url: Url,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, site: &Arc<SiteConfig>) -> Result<Self, BackendError> {
        let unlock_url = site
            .unlock_url()
            .map_err(|e| BackendError::Endpoint(e.to_string()))?;
        let balance_url = site
            .balance_page_url()
            .map_err(|e| BackendError::Endpoint(e.to_string()))?;
        Ok(Self {
            client,
            unlock_url,
            balance_url,
        })
    }
}

fn network(e: reqwest::Error) -> BackendError {
    BackendError::Network(e.to_string())
}

#[async_trait]
impl CoinBackend for HttpBackend {
    async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseResponse, BackendError> {
        debug!("POST {} chapter={}", self.unlock_url, request.chapter);
        let response = self
            .client
            .post(self.unlock_url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
            .header("X-Requested-With", "XMLHttpRequest")
            .body(request.encode())
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(network)?;
        serde_json::from_str::<PurchaseResponse>(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn fetch_balance(&self, pattern: &Regex) -> Result<Option<u64>, BackendError> {
        let response = self
            .client
            .get(self.balance_url.clone())
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let balance = scan_balance_stream(Box::pin(response.bytes_stream()), pattern)
            .await
            .map_err(network)?;
        info!("balance page {} -> {:?}", self.balance_url, balance);
        Ok(balance)
    }
}
