//! Subscription index for WebSocket connections
//!
//! Maps `(exchange, market)` to the set of subscribed connections and
//! back, so fan-out touches only the subscribers of the traded market,
//! never the whole connection table.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use indexer_core::{Exchange, ServerMessage};

use crate::bus::Mailbox;

/// Unique identifier for a WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Key a connection subscribes under
pub type MarketKey = (Exchange, String);

/// The two-way subscription index
pub struct SubscriptionIndex {
    next_id: AtomicU64,
    /// market -> subscribed connections
    subscriptions: DashMap<MarketKey, HashSet<ConnectionId>>,
    /// connection -> markets it subscribes to
    connection_markets: DashMap<ConnectionId, HashSet<MarketKey>>,
    /// connection -> its outbound mailbox
    outboxes: DashMap<ConnectionId, Arc<Mailbox<ServerMessage>>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            connection_markets: DashMap::new(),
            outboxes: DashMap::new(),
        }
    }

    /// Register a new connection and its bounded outbox
    pub fn register(&self, outbox_capacity: usize) -> (ConnectionId, Arc<Mailbox<ServerMessage>>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let outbox = Arc::new(Mailbox::new(id.to_string(), outbox_capacity));
        self.outboxes.insert(id, Arc::clone(&outbox));
        self.connection_markets.insert(id, HashSet::new());
        (id, outbox)
    }

    /// Subscribe a connection to a market; `false` if it already was
    pub fn subscribe(&self, id: ConnectionId, key: MarketKey) -> bool {
        let newly = self
            .subscriptions
            .entry(key.clone())
            .or_default()
            .insert(id);
        if newly {
            self.connection_markets.entry(id).or_default().insert(key.clone());
            debug!("{} subscribed to {}/{}", id, key.0, key.1);
        }
        newly
    }

    /// Unsubscribe a connection; `false` if it was not subscribed
    pub fn unsubscribe(&self, id: ConnectionId, key: &MarketKey) -> bool {
        let removed = if let Some(mut subscribers) = self.subscriptions.get_mut(key) {
            let removed = subscribers.remove(&id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.subscriptions.remove(key);
            }
            removed
        } else {
            false
        };

        if removed {
            if let Some(mut markets) = self.connection_markets.get_mut(&id) {
                markets.remove(key);
            }
            debug!("{} unsubscribed from {}/{}", id, key.0, key.1);
        }
        removed
    }

    /// Remove a connection and every index entry pointing at it
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Mailbox<ServerMessage>>> {
        if let Some((_, markets)) = self.connection_markets.remove(&id) {
            for key in markets {
                if let Some(mut subscribers) = self.subscriptions.get_mut(&key) {
                    subscribers.remove(&id);
                    if subscribers.is_empty() {
                        drop(subscribers);
                        self.subscriptions.remove(&key);
                    }
                }
            }
        }
        let outbox = self.outboxes.remove(&id).map(|(_, outbox)| outbox);
        info!("{} disconnected, subscriptions cleaned up", id);
        outbox
    }

    /// Outbox handle for a connection
    pub fn outbox(&self, id: ConnectionId) -> Option<Arc<Mailbox<ServerMessage>>> {
        self.outboxes.get(&id).map(|entry| Arc::clone(&entry))
    }

    /// Outboxes of every connection subscribed to a market.
    /// O(subscribers-for-that-market).
    pub fn subscribers_of(
        &self,
        key: &MarketKey,
    ) -> Vec<(ConnectionId, Arc<Mailbox<ServerMessage>>)> {
        let Some(subscribers) = self.subscriptions.get(key) else {
            return Vec::new();
        };
        subscribers
            .iter()
            .filter_map(|id| self.outboxes.get(id).map(|o| (*id, Arc::clone(&o))))
            .collect()
    }

    /// All outbox handles (used for shutdown close frames)
    pub fn all_outboxes(&self) -> Vec<Arc<Mailbox<ServerMessage>>> {
        self.outboxes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionIndex")
            .field("connections", &self.connection_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
