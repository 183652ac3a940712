//! Polymarket upstream client for the Prediction Market Indexer
//!
//! Subscribes to the CTF Exchange contract's `OrderFilled` logs over a
//! WebSocket RPC endpoint, decodes fills into canonical trades, and
//! provides the HTTP RPC replay path plus a thin Gamma metadata client.

pub mod gamma;
pub mod logs;
pub mod rpc;
pub mod stream;
pub mod types;

pub use gamma::GammaClient;
pub use logs::{decode_order_filled, order_filled_topic, CTF_EXCHANGE_ADDRESS};
pub use rpc::{http_url_from_ws, RpcHttpClient};
pub use stream::{ChainEvent, ChainLogStream, ChainStreamConfig};
pub use types::LogEntry;
