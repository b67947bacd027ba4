//! HTTP client for the logging/recall backend
//!
//! Committed exchanges are POSTed as JSON to the daily-log endpoint and
//! recall queries go to the recall endpoint. Nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::types::ExchangeChunk;

use super::{ExchangeSink, RecallBackend, RecallResponse};

/// Request body for the recall endpoint
#[derive(Debug, Serialize)]
struct RecallRequest<'a> {
    query: &'a str,
}

/// Error body the backend may return alongside a non-2xx status
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for the logging/recall backend
pub struct CollectorClient {
    config: CollectorConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl CollectorClient {
    /// Create a new collector client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("collector.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// Full URL of the daily-log endpoint
    pub fn daily_log_url(&self) -> String {
        join_url(&self.base_url, &self.config.daily_log_path)
    }

    /// Full URL of the recall endpoint
    pub fn recall_url(&self) -> String {
        join_url(&self.base_url, &self.config.recall_path)
    }

    /// Post one exchange to the daily-log endpoint
    ///
    /// Returns the backend's JSON confirmation, if it sent one.
    pub async fn send_chunk(&self, chunk: &ExchangeChunk) -> Result<Option<serde_json::Value>> {
        let response = self
            .http_client
            .post(self.daily_log_url())
            .json(chunk)
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Collector(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response.json().await.ok())
    }

    /// Query the recall endpoint
    pub async fn query_recall(&self, query: &str) -> Result<RecallResponse> {
        let response = self
            .http_client
            .post(self.recall_url())
            .json(&RecallRequest { query })
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Collector(format!("failed to parse response: {}", e)))
        } else {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
            Err(Error::Collector(message))
        }
    }

    /// Check if the backend answers at all
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .http_client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| Error::Collector(format!("HTTP request failed: {}", e)))?;

        Ok(!response.status().is_server_error())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[async_trait]
impl ExchangeSink for CollectorClient {
    async fn forward(&self, chunk: &ExchangeChunk) -> Result<()> {
        let confirmation = self.send_chunk(chunk).await?;
        tracing::debug!(
            chunk_id = %chunk.chunk_id,
            confirmation = ?confirmation,
            "Exchange forwarded to daily log"
        );
        Ok(())
    }
}

#[async_trait]
impl RecallBackend for CollectorClient {
    async fn recall(&self, query: &str) -> Result<RecallResponse> {
        self.query_recall(query).await
    }
}
