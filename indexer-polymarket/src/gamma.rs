//! Polymarket Gamma metadata client
//!
//! Resolves outcome-token ids to human-readable market questions. Only
//! the query surface uses this, never the ingest path.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use indexer_core::{IndexerError, IndexerResult};

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Clone, Deserialize)]
struct GammaMarket {
    #[serde(default)]
    question: Option<String>,
}

/// Gamma REST client
#[derive(Clone)]
pub struct GammaClient {
    client: Client,
    base_url: String,
}

impl GammaClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: GAMMA_API_BASE.to_string(),
        }
    }

    /// Resolve the market question for an outcome-token id
    pub async fn get_market_title(&self, token_id: &str) -> IndexerResult<Option<String>> {
        let url = format!("{}/markets?clob_token_ids={}", self.base_url, token_id);
        debug!("[Polymarket] Resolving title for token {}", token_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::network(format!("Gamma request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IndexerError::api(format!(
                "Gamma API error: {}",
                response.status()
            )));
        }

        let markets: Vec<GammaMarket> = response
            .json()
            .await
            .map_err(|e| IndexerError::parse(format!("Failed to parse Gamma response: {}", e)))?;

        Ok(markets.into_iter().next().and_then(|m| m.question))
    }
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}
