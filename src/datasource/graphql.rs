//! Gateway client: bounded concurrent HTTPS requests over a keep-alive pool.

use super::{GraphSource, SourceError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Maximum concurrent in-flight requests; callers beyond this queue FIFO.
pub const POOL_SIZE: usize = 16;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SubgraphClient {
    http: Client,
    base_url: String,
    api_key: String,
    permits: Semaphore,
}

impl SubgraphClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url,
            api_key,
            permits: Semaphore::new(POOL_SIZE),
        }
    }
}

#[async_trait]
impl GraphSource for SubgraphClient {
    async fn post(&self, target: &str, body: String) -> Result<String, SourceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SourceError::Network("client shut down".to_string()))?;

        let url = format!("{}{}", self.base_url, target);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))
    }
}
