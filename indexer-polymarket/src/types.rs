//! Ethereum JSON-RPC wire types
//!
//! Just enough of the protocol to subscribe to logs, follow new heads,
//! and replay missed ranges.

use serde::{Deserialize, Serialize};

use indexer_core::{IndexerError, IndexerResult};

/// Outgoing JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: &'static str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Response to a request (carries an `id`)
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Push notification for an active subscription
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionMessage {
    pub method: String,
    pub params: SubscriptionParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    pub result: serde_json::Value,
}

/// A log entry, as delivered by `eth_subscribe("logs")` / `eth_getLogs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

/// A new-heads notification; only the fields the timestamp cache needs
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHead {
    pub number: String,
    pub timestamp: String,
}

/// Parse a 0x-prefixed hex quantity
pub fn parse_hex_u64(s: &str) -> IndexerResult<u64> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| IndexerError::parse(format!("Bad hex quantity '{}': {}", s, e)))
}
