//! Kalshi REST client
//!
//! Wraps the trade and market endpoints the ingester needs. Requests are
//! signed when credentials are configured; the public market-data
//! endpoints also work unauthenticated.

use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use indexer_core::{IndexerError, IndexerResult};

use crate::auth::KalshiCredentials;
use crate::types::{MarketResponse, MarketsResponse, TradesResponse};

/// Base URL for the Kalshi API
const KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";
/// Path prefix used in the signing payload
const KALSHI_API_PATH_PREFIX: &str = "/trade-api/v2";

/// Kalshi API client
#[derive(Clone)]
pub struct KalshiClient {
    client: Client,
    base_url: String,
    credentials: Option<KalshiCredentials>,
}

impl KalshiClient {
    /// Create a new client; credentials are optional for the public
    /// market-data endpoints
    pub fn new(credentials: Option<KalshiCredentials>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: KALSHI_API_BASE.to_string(),
            credentials,
        }
    }

    /// Override the base URL (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    async fn get(&self, path: &str, query: &str) -> IndexerResult<reqwest::Response> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.get(&url);
        if let Some(ref credentials) = self.credentials {
            let signed_path = format!("{}{}", KALSHI_API_PATH_PREFIX, path);
            for (name, value) in credentials.request_headers("GET", &signed_path)? {
                request = request.header(name, value);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| IndexerError::network(format!("Kalshi request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::auth(format!(
                "Kalshi rejected credentials ({}): {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::api(format!(
                "Kalshi API error ({}): {}",
                status, body
            )));
        }

        Ok(response)
    }

    /// Fetch trades for a market, oldest-cursor pagination.
    ///
    /// `min_ts` is in unix seconds; trades at or after it are returned.
    #[instrument(skip(self))]
    pub async fn get_trades(
        &self,
        ticker: &str,
        min_ts: Option<i64>,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> IndexerResult<TradesResponse> {
        let mut params = vec![format!("ticker={}", ticker)];
        if let Some(ts) = min_ts {
            params.push(format!("min_ts={}", ts));
        }
        if let Some(l) = limit {
            params.push(format!("limit={}", l));
        }
        if let Some(c) = cursor {
            params.push(format!("cursor={}", c));
        }

        debug!("Fetching Kalshi trades for {}", ticker);

        let response = self.get("/markets/trades", &params.join("&")).await?;
        let trades: TradesResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::parse(format!("Failed to parse trades response: {}", e)))?;

        Ok(trades)
    }

    /// List open market tickers, for discovery bootstrap
    #[instrument(skip(self))]
    pub async fn list_open_markets(&self, limit: u32) -> IndexerResult<Vec<String>> {
        let query = format!("status=open&limit={}", limit);
        let response = self.get("/markets", &query).await?;

        let markets: MarketsResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::parse(format!("Failed to parse markets response: {}", e)))?;

        Ok(markets.markets.into_iter().map(|m| m.ticker).collect())
    }

    /// Resolve a market title (metadata, off the hot path)
    #[instrument(skip(self))]
    pub async fn get_market_title(&self, ticker: &str) -> IndexerResult<Option<String>> {
        let path = format!("/markets/{}", ticker);
        let response = self.get(&path, "").await?;

        let market: MarketResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::parse(format!("Failed to parse market response: {}", e)))?;

        Ok(market.market.title)
    }
}
