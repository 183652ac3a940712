//! Performance tracker
//!
//! In-memory counters updated as trades are published: per-exchange
//! totals, a rolling sixty-second window, and a bounded tail of
//! indexing-latency samples. A pure observer of the hot path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use indexer_core::Exchange;

/// Rolling window width
const WINDOW_MS: i64 = 60_000;
/// Latency samples kept per exchange
const LATENCY_SAMPLE_CAP: usize = 1000;

#[derive(Default)]
struct ExchangeCounters {
    total: AtomicU64,
    /// Publish instants (unix ms) within the rolling window
    window: Mutex<VecDeque<i64>>,
    /// `indexed_at - source_timestamp` samples in ms, newest last
    latencies: Mutex<VecDeque<i64>>,
}

impl ExchangeCounters {
    fn record(&self, source_ts: DateTime<Utc>, now_ms: i64) {
        self.total.fetch_add(1, Ordering::Relaxed);

        {
            let mut window = self.window.lock().expect("perf mutex");
            window.push_back(now_ms);
            while window.front().is_some_and(|t| now_ms - t > WINDOW_MS) {
                window.pop_front();
            }
        }

        {
            let mut latencies = self.latencies.lock().expect("perf mutex");
            latencies.push_back(now_ms - source_ts.timestamp_millis());
            while latencies.len() > LATENCY_SAMPLE_CAP {
                latencies.pop_front();
            }
        }
    }

    fn stats(&self, now_ms: i64) -> ExchangeStats {
        let trades_last_minute = {
            let mut window = self.window.lock().expect("perf mutex");
            while window.front().is_some_and(|t| now_ms - t > WINDOW_MS) {
                window.pop_front();
            }
            window.len()
        };

        let (avg_latency_ms, max_latency_ms, latency_samples) = {
            let latencies = self.latencies.lock().expect("perf mutex");
            if latencies.is_empty() {
                (None, None, 0)
            } else {
                let sum: i64 = latencies.iter().sum();
                (
                    Some(sum / latencies.len() as i64),
                    latencies.iter().max().copied(),
                    latencies.len(),
                )
            }
        };

        ExchangeStats {
            total_trades: self.total.load(Ordering::Relaxed),
            trades_last_minute,
            avg_latency_ms,
            max_latency_ms,
            latency_samples,
        }
    }
}

/// Snapshot of one exchange's counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeStats {
    pub total_trades: u64,
    pub trades_last_minute: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<i64>,
    pub latency_samples: usize,
}

/// Snapshot for the operational endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSnapshot {
    pub kalshi: ExchangeStats,
    pub polymarket: ExchangeStats,
}

/// The tracker itself; cheap atomics and short critical sections only
#[derive(Default)]
pub struct PerfTracker {
    kalshi: ExchangeCounters,
    polymarket: ExchangeCounters,
}

impl PerfTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, exchange: Exchange) -> &ExchangeCounters {
        match exchange {
            Exchange::Kalshi => &self.kalshi,
            Exchange::Polymarket => &self.polymarket,
        }
    }

    /// Record one published trade
    pub fn record(&self, exchange: Exchange, source_ts: DateTime<Utc>) {
        self.counters(exchange)
            .record(source_ts, Utc::now().timestamp_millis());
    }

    /// Current counters for `/stats`
    pub fn snapshot(&self) -> PerfSnapshot {
        let now_ms = Utc::now().timestamp_millis();
        PerfSnapshot {
            kalshi: self.kalshi.stats(now_ms),
            polymarket: self.polymarket.stats(now_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_and_snapshot() {
        let tracker = PerfTracker::new();
        let source = Utc::now() - Duration::milliseconds(250);

        for _ in 0..3 {
            tracker.record(Exchange::Kalshi, source);
        }
        tracker.record(Exchange::Polymarket, source);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.kalshi.total_trades, 3);
        assert_eq!(snapshot.kalshi.trades_last_minute, 3);
        assert_eq!(snapshot.polymarket.total_trades, 1);
        assert!(snapshot.kalshi.avg_latency_ms.unwrap() >= 250);
    }

    #[test]
    fn test_latency_tail_is_bounded() {
        let tracker = PerfTracker::new();
        let source = Utc::now();
        for _ in 0..(LATENCY_SAMPLE_CAP + 100) {
            tracker.record(Exchange::Kalshi, source);
        }

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.kalshi.latency_samples, LATENCY_SAMPLE_CAP);
        assert_eq!(
            snapshot.kalshi.total_trades,
            (LATENCY_SAMPLE_CAP + 100) as u64
        );
    }
}
