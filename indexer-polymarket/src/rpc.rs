//! HTTP JSON-RPC client
//!
//! Used for the catch-up path: replaying missed logs after a reconnect
//! and resolving block timestamps that the heads cache does not cover.

use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use chrono::{DateTime, Utc};
use indexer_core::{IndexerError, IndexerResult};

use crate::logs::{order_filled_topic, CTF_EXCHANGE_ADDRESS};
use crate::types::{parse_hex_u64, LogEntry, RpcRequest, RpcResponse};

/// Derive the HTTP endpoint from a WebSocket RPC URL
pub fn http_url_from_ws(ws_url: &str) -> String {
    if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        ws_url.to_string()
    }
}

/// JSON-RPC over HTTP
pub struct RpcHttpClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcHttpClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> IndexerResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexerError::network(format!("RPC request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IndexerError::api(format!(
                "RPC HTTP error: {}",
                response.status()
            )));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| IndexerError::parse(format!("Bad RPC response: {}", e)))?;

        if let Some(err) = rpc.error {
            return Err(IndexerError::api(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        rpc.result
            .ok_or_else(|| IndexerError::parse("RPC response missing result".to_string()))
    }

    /// Current chain head number
    pub async fn latest_block_number(&self) -> IndexerResult<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| IndexerError::parse("eth_blockNumber result not a string"))?;
        parse_hex_u64(hex)
    }

    /// Timestamp of a block, UTC
    pub async fn block_timestamp(&self, number: u64) -> IndexerResult<DateTime<Utc>> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", number), false]),
            )
            .await?;
        let ts_hex = result
            .get("timestamp")
            .and_then(|t| t.as_str())
            .ok_or_else(|| IndexerError::parse(format!("Block {} has no timestamp", number)))?;
        let secs = parse_hex_u64(ts_hex)? as i64;
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| IndexerError::parse(format!("Block timestamp out of range: {}", secs)))
    }

    /// `OrderFilled` logs of the exchange contract in a block range
    pub async fn get_order_filled_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<LogEntry>> {
        debug!(
            "[Polymarket] Fetching logs from block {} to {}",
            from_block, to_block
        );
        let result = self
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", to_block),
                    "address": CTF_EXCHANGE_ADDRESS,
                    "topics": [format!("{}", order_filled_topic())],
                }]),
            )
            .await?;

        serde_json::from_value(result)
            .map_err(|e| IndexerError::parse(format!("Bad eth_getLogs result: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_from_ws() {
        assert_eq!(
            http_url_from_ws("wss://polygon-mainnet.g.alchemy.com/v2/key"),
            "https://polygon-mainnet.g.alchemy.com/v2/key"
        );
        assert_eq!(http_url_from_ws("ws://localhost:8546"), "http://localhost:8546");
        assert_eq!(http_url_from_ws("https://rpc"), "https://rpc");
    }
}
