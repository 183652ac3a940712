//! Trade event bus
//!
//! In-process many-to-many dispatch of normalized trades. Each
//! subscriber owns a bounded mailbox; publishing never blocks, and a
//! full mailbox sheds its oldest undelivered item so a slow consumer
//! only ever hurts itself. Delivery is FIFO per subscriber.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use indexer_core::Trade;

/// Bounded single-consumer mailbox with drop-oldest overflow.
///
/// Producers push from any task without blocking; exactly one consumer
/// drains it. Closing wakes the consumer, which drains what is queued
/// and then observes the end of the stream.
pub struct Mailbox<T> {
    name: String,
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity > 0, "mailbox capacity must be positive");
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueue an item, shedding the oldest queued one on overflow.
    /// Returns `true` if something was dropped to make room.
    pub fn offer(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let dropped_one = {
            let mut queue = self.queue.lock().expect("mailbox mutex");
            let dropped_one = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(item);
            dropped_one
        };

        if dropped_one {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("[Bus] mailbox '{}' overflow, {} dropped so far", self.name, total);
        }
        self.notify.notify_one();
        dropped_one
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<T> {
        self.queue.lock().expect("mailbox mutex").pop_front()
    }

    /// Receive the next item; `None` once the mailbox is closed and
    /// drained
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            notified.await;
        }
    }

    /// Close the mailbox and wake the consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("mailbox mutex").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items shed due to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The in-process trade bus
pub struct TradeBus {
    subscribers: Mutex<Vec<Arc<Mailbox<Trade>>>>,
    published: AtomicU64,
}

impl TradeBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }

    /// Register a subscriber with its own bounded mailbox
    pub fn subscribe(&self, name: impl Into<String>, capacity: usize) -> BusSubscriber {
        let mailbox = Arc::new(Mailbox::new(name, capacity));
        self.subscribers
            .lock()
            .expect("bus mutex")
            .push(Arc::clone(&mailbox));
        BusSubscriber { mailbox }
    }

    /// Deliver a trade to every subscriber without blocking.
    ///
    /// Subscribers see trades in publish order; an overflowing mailbox
    /// loses its oldest undelivered trade, never its ordering.
    pub fn publish(&self, trade: &Trade) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.subscribers.lock().expect("bus mutex");
        for mailbox in subscribers.iter() {
            mailbox.offer(trade.clone());
        }
    }

    /// Trades accepted by the bus since creation
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total trades shed across all subscriber mailboxes
    pub fn dropped(&self) -> u64 {
        self.subscribers
            .lock()
            .expect("bus mutex")
            .iter()
            .map(|m| m.dropped())
            .sum()
    }

    /// Close every subscriber mailbox; consumers drain and stop
    pub fn close(&self) {
        for mailbox in self.subscribers.lock().expect("bus mutex").iter() {
            mailbox.close();
        }
    }
}

impl Default for TradeBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's handle onto its mailbox
pub struct BusSubscriber {
    mailbox: Arc<Mailbox<Trade>>,
}

impl BusSubscriber {
    /// Next trade, FIFO; `None` once the bus is closed and drained
    pub async fn recv(&self) -> Option<Trade> {
        self.mailbox.recv().await
    }

    pub fn try_recv(&self) -> Option<Trade> {
        self.mailbox.try_recv()
    }

    /// Trades this subscriber lost to overflow
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped()
    }
}
