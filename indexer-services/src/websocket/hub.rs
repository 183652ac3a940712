//! WebSocket hub
//!
//! Owns the subscription index and the dispatch task that fans trades
//! out from the bus to subscribed connections. The transport lives in
//! the API layer; the hub only sees text frames in and mailboxes out.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use indexer_core::{ClientMessage, ServerMessage, Trade};

use crate::bus::{BusSubscriber, Mailbox};
use crate::websocket::subscription::{ConnectionId, SubscriptionIndex};

/// Hub tuning knobs
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per connection
    pub outbox_capacity: usize,
    /// Dropped frames after which a connection is closed as too slow
    pub max_dropped_frames: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            max_dropped_frames: 4096,
        }
    }
}

/// The hub
pub struct TradeHub {
    index: SubscriptionIndex,
    config: HubConfig,
}

impl TradeHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            index: SubscriptionIndex::new(),
            config,
        }
    }

    /// Accept a connection: allocates its id and outbox and queues the
    /// greeting frame
    pub fn connect(&self) -> (ConnectionId, Arc<Mailbox<ServerMessage>>) {
        let (id, outbox) = self.index.register(self.config.outbox_capacity);
        info!("New WebSocket connection: {}", id);
        outbox.offer(ServerMessage::Connected {
            message: "connected to trade feed".to_string(),
        });
        (id, outbox)
    }

    /// Handle one text frame from a client.
    ///
    /// Malformed frames get an error reply and the connection stays
    /// open; re-subscribing to a market is a no-op.
    pub fn handle_frame(&self, id: ConnectionId, text: &str) {
        let Some(outbox) = self.index.outbox(id) else {
            return;
        };

        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                outbox.offer(ServerMessage::Error {
                    message: format!("invalid frame: {}", e),
                });
                return;
            }
        };

        match message {
            ClientMessage::Subscribe {
                exchange,
                market_id,
            } => {
                self.index.subscribe(id, (exchange, market_id.clone()));
                outbox.offer(ServerMessage::Subscribed {
                    exchange,
                    market_id,
                });
            }
            ClientMessage::Unsubscribe {
                exchange,
                market_id,
            } => {
                self.index.unsubscribe(id, &(exchange, market_id.clone()));
                outbox.offer(ServerMessage::Unsubscribed {
                    exchange,
                    market_id,
                });
            }
        }
    }

    /// Drop a connection and its subscriptions
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(outbox) = self.index.remove(id) {
            outbox.close();
        }
    }

    /// Route one trade to the subscribers of its market
    pub fn route(&self, trade: Trade) {
        let key = (trade.exchange, trade.market_id.clone());
        let subscribers = self.index.subscribers_of(&key);
        if subscribers.is_empty() {
            return;
        }

        let frame = ServerMessage::Trade { data: trade };
        for (id, outbox) in subscribers {
            outbox.offer(frame.clone());
            if outbox.dropped() > self.config.max_dropped_frames && !outbox.is_closed() {
                // slowness alone never closes a connection, exceeding
                // the drop budget does
                warn!(
                    "{} exceeded drop budget ({} frames), closing",
                    id,
                    outbox.dropped()
                );
                outbox.offer(ServerMessage::Error {
                    message: "connection too slow, closing".to_string(),
                });
                outbox.close();
            }
        }
    }

    /// Consume the bus and fan out until shutdown
    pub async fn dispatch(
        self: Arc<Self>,
        subscriber: BusSubscriber,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("[Hub] dispatch started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while let Some(trade) = subscriber.try_recv() {
                            self.route(trade);
                        }
                        break;
                    }
                }
                trade = subscriber.recv() => {
                    match trade {
                        Some(trade) => self.route(trade),
                        None => break,
                    }
                }
            }
        }
        self.close_all();
        info!("[Hub] dispatch stopped");
    }

    /// Close every connection's outbox; writers flush and send a normal
    /// close frame
    pub fn close_all(&self) {
        for outbox in self.index.all_outboxes() {
            outbox.close();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.index.connection_count()
    }
}

impl Default for TradeHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
