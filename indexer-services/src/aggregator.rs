//! Candle aggregator
//!
//! Consumes the trade bus and folds every trade into its second, minute
//! and hour candles. All three upserts for a trade complete before the
//! next trade is taken, so per-trade candle updates are atomic at the
//! application level; ordering across concurrent trades is resolved by
//! the gateway's upsert semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use indexer_core::{CandleInterval, Trade};
use indexer_storage::{StorageError, StorageGateway};

use crate::bus::BusSubscriber;

/// Rebuild all candles from persisted trades.
///
/// Runs at startup, after the store is reachable and before any
/// ingester begins, so live upserts never race the rebuild.
pub fn run_backfill(storage: &StorageGateway) -> Result<usize, StorageError> {
    let mut total = 0;
    for interval in CandleInterval::ALL {
        total += storage.rebuild_candles(interval)?;
    }
    info!("[Aggregator] backfill complete, {} candles", total);
    Ok(total)
}

/// The bus-consuming aggregation task
pub struct CandleAggregator {
    storage: Arc<StorageGateway>,
    processed: AtomicU64,
    upsert_errors: AtomicU64,
}

impl CandleAggregator {
    pub fn new(storage: Arc<StorageGateway>) -> Self {
        Self {
            storage,
            processed: AtomicU64::new(0),
            upsert_errors: AtomicU64::new(0),
        }
    }

    /// Trades fully folded into all three resolutions
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Failed upserts; the trade itself is already persisted, so a
    /// later backfill repairs the candle
    pub fn upsert_errors(&self) -> u64 {
        self.upsert_errors.load(Ordering::Relaxed)
    }

    /// Fold one trade into its three candles
    pub fn apply(&self, trade: &Trade) {
        let mut failed = false;
        for interval in CandleInterval::ALL {
            if let Err(e) = self.storage.upsert_candle(
                trade.exchange,
                &trade.market_id,
                interval,
                trade.price,
                trade.quantity,
                trade.timestamp,
            ) {
                failed = true;
                self.upsert_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    "[Aggregator] upsert failed for {}/{} {}: {}",
                    trade.exchange, trade.market_id, interval, e
                );
            }
        }
        if !failed {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Consume the bus until shutdown, draining the mailbox on the way
    /// out
    pub async fn run(self: Arc<Self>, subscriber: BusSubscriber, mut shutdown: watch::Receiver<bool>) {
        info!("[Aggregator] started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while let Some(trade) = subscriber.try_recv() {
                            self.apply(&trade);
                        }
                        break;
                    }
                }
                trade = subscriber.recv() => {
                    match trade {
                        Some(trade) => self.apply(&trade),
                        None => break,
                    }
                }
            }
        }
        info!(
            "[Aggregator] stopped after {} trades ({} upsert errors)",
            self.processed(),
            self.upsert_errors()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use indexer_core::{Exchange, TradeSide};
    use rust_decimal_macros::dec;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_trade_creates_three_candles() {
        let storage = Arc::new(StorageGateway::open_in_memory().unwrap());
        let aggregator = CandleAggregator::new(Arc::clone(&storage));

        let trade = Trade::kalshi(
            "M",
            "t1",
            dec!(0.55),
            dec!(10),
            TradeSide::Buy,
            ts("2024-01-01T12:34:56.789Z"),
        );
        aggregator.apply(&trade);

        let expectations = [
            (CandleInterval::OneSecond, "2024-01-01T12:34:56Z"),
            (CandleInterval::OneMinute, "2024-01-01T12:34:00Z"),
            (CandleInterval::OneHour, "2024-01-01T12:00:00Z"),
        ];
        for (interval, open_time) in expectations {
            let candle = storage
                .get_candle(Exchange::Kalshi, "M", interval, ts(open_time))
                .unwrap()
                .unwrap_or_else(|| panic!("missing {} candle", interval));
            assert_eq!(candle.open, dec!(0.55));
            assert_eq!(candle.high, dec!(0.55));
            assert_eq!(candle.low, dec!(0.55));
            assert_eq!(candle.close, dec!(0.55));
            assert_eq!(candle.volume, dec!(10));
        }
        assert_eq!(aggregator.processed(), 1);
    }

    #[test]
    fn test_ohlc_within_one_minute() {
        let storage = Arc::new(StorageGateway::open_in_memory().unwrap());
        let aggregator = CandleAggregator::new(Arc::clone(&storage));

        let fills = [
            (dec!(0.50), dec!(1), "2024-01-01T12:34:01Z"),
            (dec!(0.60), dec!(2), "2024-01-01T12:34:15Z"),
            (dec!(0.45), dec!(3), "2024-01-01T12:34:30Z"),
            (dec!(0.55), dec!(4), "2024-01-01T12:34:59Z"),
        ];
        for (i, (price, quantity, when)) in fills.iter().enumerate() {
            let trade = Trade::kalshi(
                "M",
                &format!("t{}", i),
                *price,
                *quantity,
                TradeSide::Buy,
                ts(when),
            );
            aggregator.apply(&trade);
        }

        let candle = storage
            .get_candle(
                Exchange::Kalshi,
                "M",
                CandleInterval::OneMinute,
                ts("2024-01-01T12:34:00Z"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(candle.open, dec!(0.50));
        assert_eq!(candle.high, dec!(0.60));
        assert_eq!(candle.low, dec!(0.45));
        assert_eq!(candle.close, dec!(0.55));
        assert_eq!(candle.volume, dec!(10));
    }

    #[test]
    fn test_backfill_runs_all_intervals() {
        let storage = Arc::new(StorageGateway::open_in_memory().unwrap());
        let trade = Trade::kalshi(
            "M",
            "t1",
            dec!(0.5),
            dec!(2),
            TradeSide::Buy,
            ts("2024-01-01T12:00:00Z"),
        );
        storage.insert_trade(&trade).unwrap();

        let count = run_backfill(&storage).unwrap();
        assert_eq!(count, 3);
    }
}
