//! Pipeline services for the Prediction Market Indexer
//!
//! This crate wires the upstream clients into the pipeline: the trade
//! event bus, the two ingesters, the candle aggregator, the WebSocket
//! hub and the performance tracker. The API binary owns the lifecycle;
//! everything here is a value it creates once and passes around.

pub mod aggregator;
pub mod bus;
pub mod kalshi_ingester;
pub mod metadata;
pub mod perf;
pub mod polymarket_ingester;
pub mod websocket;

pub use aggregator::{run_backfill, CandleAggregator};
pub use bus::{BusSubscriber, Mailbox, TradeBus};
pub use kalshi_ingester::{IngestState, KalshiIngester, KalshiIngesterConfig};
pub use metadata::MetadataCache;
pub use perf::{ExchangeStats, PerfSnapshot, PerfTracker};
pub use polymarket_ingester::PolymarketIngester;
pub use websocket::{ConnectionId, HubConfig, SubscriptionIndex, TradeHub};
