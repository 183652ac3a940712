//! Core types for the Prediction Market Indexer
//!
//! This crate defines the shared data structures used across the
//! pipeline: the canonical trade record, OHLCV candles and bucket
//! arithmetic, the exchange enum, and the WebSocket feed protocol.

pub mod candle;
pub mod error;
pub mod exchange;
pub mod protocol;
pub mod trade;

pub use candle::{Candle, CandleInterval};
pub use error::{IndexerError, IndexerResult};
pub use exchange::Exchange;
pub use protocol::{ClientMessage, ServerMessage};
pub use trade::{Trade, TradeSide};
