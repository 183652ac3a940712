//! Chain log stream
//!
//! Long-lived subscription to the exchange contract's `OrderFilled` logs
//! over a WebSocket RPC endpoint, with automatic reconnection. New-heads
//! notifications feed a block-timestamp cache so fills can be stamped
//! with block time rather than wall clock; cache misses fall back to an
//! HTTP lookup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use indexer_core::Trade;

use crate::logs::{decode_order_filled, order_filled_topic, CTF_EXCHANGE_ADDRESS};
use crate::rpc::{http_url_from_ws, RpcHttpClient};
use crate::types::{parse_hex_u64, BlockHead, LogEntry, RpcRequest, SubscriptionMessage};

/// Reconnect delay base
const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(1);
/// Reconnect delay cap
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);
/// Blocks kept in the timestamp cache
const BLOCK_CACHE_DEPTH: usize = 4096;

/// Events emitted by the stream
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// Subscription established; the consumer should replay the gap
    /// since its persisted block cursor
    Connected,
    /// Connection lost; a reconnect is scheduled
    Disconnected,
    /// A decoded fill from the live subscription
    Fill(Trade),
}

/// Configuration for the chain log stream
#[derive(Debug, Clone)]
pub struct ChainStreamConfig {
    /// WebSocket RPC endpoint (e.g. an Alchemy wss:// URL)
    pub ws_url: String,
}

/// Chain log stream client
pub struct ChainLogStream {
    config: ChainStreamConfig,
    event_tx: mpsc::Sender<ChainEvent>,
}

impl ChainLogStream {
    /// Create a stream and the receiver its events arrive on
    pub fn new(config: ChainStreamConfig) -> (Self, mpsc::Receiver<ChainEvent>) {
        let (event_tx, event_rx) = mpsc::channel(1024);
        (Self { config, event_tx }, event_rx)
    }

    /// Spawn the connection loop
    pub fn start(&self, shutdown: watch::Receiver<bool>) {
        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            Self::connection_loop(config, event_tx, shutdown).await;
        });
    }

    /// Main connection loop with reconnection logic
    async fn connection_loop(
        config: ChainStreamConfig,
        event_tx: mpsc::Sender<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let http = Arc::new(RpcHttpClient::new(http_url_from_ws(&config.ws_url)));
        let mut delay = RECONNECT_DELAY_BASE;

        loop {
            if *shutdown.borrow() {
                return;
            }

            info!("[Polymarket] Connecting to chain RPC");
            match connect_async(&config.ws_url).await {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();

                    // subscribe to OrderFilled logs and to new heads
                    let log_sub = RpcRequest::new(
                        1,
                        "eth_subscribe",
                        json!(["logs", {
                            "address": CTF_EXCHANGE_ADDRESS,
                            "topics": [format!("{}", order_filled_topic())],
                        }]),
                    );
                    let heads_sub = RpcRequest::new(2, "eth_subscribe", json!(["newHeads"]));

                    let mut subscribed = true;
                    for request in [&log_sub, &heads_sub] {
                        let json = match serde_json::to_string(request) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("[Polymarket] Failed to encode subscribe: {}", e);
                                subscribed = false;
                                break;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            warn!("[Polymarket] Failed to send subscribe: {}", e);
                            subscribed = false;
                            break;
                        }
                    }

                    if subscribed {
                        info!("[Polymarket] Subscribed to OrderFilled logs");
                        delay = RECONNECT_DELAY_BASE;
                        if event_tx.send(ChainEvent::Connected).await.is_err() {
                            return;
                        }

                        let mut block_times: BTreeMap<u64, DateTime<Utc>> = BTreeMap::new();

                        loop {
                            tokio::select! {
                                _ = shutdown.changed() => {
                                    if *shutdown.borrow() {
                                        info!("[Polymarket] Shutdown, closing stream");
                                        let _ = write.send(Message::Close(None)).await;
                                        return;
                                    }
                                }
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(Message::Text(text))) => {
                                            Self::handle_message(
                                                &text,
                                                &event_tx,
                                                &http,
                                                &mut block_times,
                                            )
                                            .await;
                                        }
                                        Some(Ok(Message::Ping(data))) => {
                                            if let Err(e) = write.send(Message::Pong(data)).await {
                                                warn!("[Polymarket] Failed to send pong: {}", e);
                                                break;
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) => {
                                            info!("[Polymarket] Connection closed by server");
                                            break;
                                        }
                                        Some(Err(e)) => {
                                            error!("[Polymarket] Stream error: {}", e);
                                            break;
                                        }
                                        None => {
                                            info!("[Polymarket] Stream ended");
                                            break;
                                        }
                                        _ => {}
                                    }
                                }
                            }
                        }
                    }

                    if event_tx.send(ChainEvent::Disconnected).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("[Polymarket] Connection failed: {}", e);
                }
            }

            info!("[Polymarket] Reconnecting in {:?}", delay);
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(RECONNECT_DELAY_MAX);
        }
    }

    /// Handle one incoming frame
    async fn handle_message(
        text: &str,
        event_tx: &mpsc::Sender<ChainEvent>,
        http: &RpcHttpClient,
        block_times: &mut BTreeMap<u64, DateTime<Utc>>,
    ) {
        let notification: SubscriptionMessage = match serde_json::from_str(text) {
            Ok(n) => n,
            // subscribe acks and errors land here; nothing to do
            Err(_) => {
                debug!("[Polymarket] Non-subscription frame: {}", text);
                return;
            }
        };
        if notification.method != "eth_subscription" {
            return;
        }

        let result = notification.params.result;
        if result.get("logIndex").is_some() {
            let log: LogEntry = match serde_json::from_value(result) {
                Ok(l) => l,
                Err(e) => {
                    warn!("[Polymarket] Bad log entry: {}", e);
                    return;
                }
            };
            Self::handle_log(&log, event_tx, http, block_times).await;
        } else if result.get("timestamp").is_some() {
            let head: BlockHead = match serde_json::from_value(result) {
                Ok(h) => h,
                Err(e) => {
                    warn!("[Polymarket] Bad block head: {}", e);
                    return;
                }
            };
            Self::cache_head(&head, block_times);
        }
    }

    async fn handle_log(
        log: &LogEntry,
        event_tx: &mpsc::Sender<ChainEvent>,
        http: &RpcHttpClient,
        block_times: &mut BTreeMap<u64, DateTime<Utc>>,
    ) {
        let block_number = match parse_hex_u64(&log.block_number) {
            Ok(n) => n,
            Err(e) => {
                warn!("[Polymarket] Log with bad block number: {}", e);
                return;
            }
        };

        let block_ts = match block_times.get(&block_number) {
            Some(ts) => *ts,
            None => match http.block_timestamp(block_number).await {
                Ok(ts) => {
                    block_times.insert(block_number, ts);
                    ts
                }
                Err(e) => {
                    warn!(
                        "[Polymarket] Failed to resolve timestamp for block {}: {}",
                        block_number, e
                    );
                    return;
                }
            },
        };

        match decode_order_filled(log, block_ts) {
            Ok(Some(trade)) => {
                let _ = event_tx.send(ChainEvent::Fill(trade)).await;
            }
            Ok(None) => {}
            Err(e) => warn!("[Polymarket] Failed to decode OrderFilled: {}", e),
        }
    }

    fn cache_head(head: &BlockHead, block_times: &mut BTreeMap<u64, DateTime<Utc>>) {
        let number = match parse_hex_u64(&head.number) {
            Ok(n) => n,
            Err(_) => return,
        };
        let secs = match parse_hex_u64(&head.timestamp) {
            Ok(s) => s as i64,
            Err(_) => return,
        };
        if let Some(ts) = DateTime::from_timestamp(secs, 0) {
            block_times.insert(number, ts);
            while block_times.len() > BLOCK_CACHE_DEPTH {
                let oldest = *block_times.keys().next().expect("non-empty cache");
                block_times.remove(&oldest);
            }
        }
    }
}

impl std::fmt::Debug for ChainLogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLogStream")
            .field("config", &self.config)
            .finish()
    }
}
