//! Logging and recall backend integration
//!
//! Every committed exchange is forwarded to an external daily log, and
//! RECALL directives can be answered by an external recall service.
//!
//! ## Architecture
//!
//! The integration is "local-first":
//! - Exchanges are always committed to the local project state first
//! - Forwarding happens after the commit and its outcome is only logged
//! - Network failures never block or fail turn processing
//!
//! ## Usage
//!
//! Enable the backend in `~/.config/heartbeat/config.toml`:
//!
//! ```toml
//! [collector]
//! enabled = true
//! server_url = "http://localhost:3001"
//! ```

mod client;

pub use client::CollectorClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ExchangeChunk;

/// Destination for committed exchanges
#[async_trait]
pub trait ExchangeSink: Send + Sync {
    async fn forward(&self, chunk: &ExchangeChunk) -> Result<()>;
}

/// Service that answers recall queries
#[async_trait]
pub trait RecallBackend: Send + Sync {
    async fn recall(&self, query: &str) -> Result<RecallResponse>;
}

/// Sink used when no backend is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl ExchangeSink for NullSink {
    async fn forward(&self, _chunk: &ExchangeChunk) -> Result<()> {
        Ok(())
    }
}

/// Response from the recall endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallResponse {
    #[serde(default)]
    pub status: Option<String>,
    /// Query as the backend understood it
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub results_for_injection: Option<String>,
}

impl RecallResponse {
    pub const NO_MATCHES: &'static str = "no_matches_found";
    pub const NO_DATA: &'static str = "no_data_loaded";

    /// Recalled text, when the backend actually found something
    pub fn usable_results(&self) -> Option<&str> {
        let status = self.status.as_deref();
        if status == Some(Self::NO_MATCHES) || status == Some(Self::NO_DATA) {
            return None;
        }
        self.results_for_injection
            .as_deref()
            .filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_results() {
        let r = RecallResponse {
            status: Some("ok".into()),
            query: Some("rust".into()),
            results_for_injection: Some("found it".into()),
        };
        assert_eq!(r.usable_results(), Some("found it"));

        let r = RecallResponse {
            status: Some(RecallResponse::NO_MATCHES.into()),
            results_for_injection: Some("ignored".into()),
            ..Default::default()
        };
        assert!(r.usable_results().is_none());

        let r: RecallResponse = serde_json::from_str("{}").unwrap();
        assert!(r.usable_results().is_none());
    }
}
