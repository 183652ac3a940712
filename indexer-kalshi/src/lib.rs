//! Kalshi upstream client for the Prediction Market Indexer
//!
//! REST access to the trade and market endpoints with RSA-PSS request
//! signing, plus normalization of Kalshi's trade shape into the
//! canonical record.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::KalshiCredentials;
pub use client::KalshiClient;
pub use types::{ApiMarket, ApiTrade, MarketsResponse, TradesResponse};
