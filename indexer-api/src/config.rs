//! Environment configuration

use anyhow::Context;
use indexer_kalshi::KalshiCredentials;

/// Runtime configuration, read once at startup
#[derive(Debug)]
pub struct Config {
    /// Path of the SQLite database file
    pub database_url: String,
    /// HTTP listen port
    pub port: u16,
    /// Chain log subscription endpoint; Polymarket ingestion is
    /// disabled when unset
    pub alchemy_ws_url: Option<String>,
    /// Kalshi signing credentials; the public endpoints work without
    /// them
    pub kalshi_credentials: Option<KalshiCredentials>,
    /// Tracked Kalshi tickers; empty bootstraps from discovery
    pub kalshi_markets: Vec<String>,
    /// Additional CORS origin for the frontend
    pub frontend_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "data/indexer.db".to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {}", raw))?,
            Err(_) => 3000,
        };

        let kalshi_markets = std::env::var("KALSHI_MARKETS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            port,
            alchemy_ws_url: std::env::var("ALCHEMY_WS_URL").ok(),
            kalshi_credentials: KalshiCredentials::from_env(),
            kalshi_markets,
            frontend_url: std::env::var("FRONTEND_URL").ok(),
        })
    }
}
