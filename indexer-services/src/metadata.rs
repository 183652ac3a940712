//! Market metadata cache
//!
//! Resolves market ids to human-readable titles via the upstream REST
//! APIs, lazily and off the hot path. Only the query surface consults
//! this; ingestion never waits on it.

use dashmap::DashMap;
use tracing::debug;

use indexer_core::Exchange;
use indexer_kalshi::KalshiClient;
use indexer_polymarket::GammaClient;

/// Lazy title cache keyed by `(exchange, market_id)`
pub struct MetadataCache {
    kalshi: KalshiClient,
    gamma: GammaClient,
    titles: DashMap<(Exchange, String), String>,
}

impl MetadataCache {
    pub fn new(kalshi: KalshiClient, gamma: GammaClient) -> Self {
        Self {
            kalshi,
            gamma,
            titles: DashMap::new(),
        }
    }

    /// Resolve a market title, hitting the upstream once per market.
    /// Failures are swallowed; a missing title is not an error.
    pub async fn title(&self, exchange: Exchange, market_id: &str) -> Option<String> {
        let key = (exchange, market_id.to_string());
        if let Some(title) = self.titles.get(&key) {
            return Some(title.clone());
        }

        let resolved = match exchange {
            Exchange::Kalshi => self
                .kalshi
                .get_market_title(market_id)
                .await
                .ok()
                .flatten(),
            Exchange::Polymarket => self
                .gamma
                .get_market_title(market_id)
                .await
                .ok()
                .flatten(),
        };

        match resolved {
            Some(title) => {
                debug!("Resolved title for {}/{}", exchange, market_id);
                self.titles.insert(key, title.clone());
                Some(title)
            }
            None => None,
        }
    }

    pub fn cached(&self) -> usize {
        self.titles.len()
    }
}
