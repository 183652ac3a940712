//! Kalshi ingester
//!
//! Polls the Kalshi trades endpoint per tracked market, normalizes new
//! trades, persists them idempotently and publishes them onto the bus.
//! The watermark for each market only advances after a successful
//! insert, so a store error just means the same trades are retried next
//! cycle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use indexer_core::{Exchange, IndexerError, IndexerResult};
use indexer_kalshi::KalshiClient;
use indexer_storage::{InsertOutcome, StorageGateway};

use crate::bus::TradeBus;
use crate::perf::PerfTracker;

/// Backoff base after a transient failure
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff cap
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Ingester lifecycle, exposed for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Polling,
    Publishing,
    Backoff,
    Stopped,
}

/// Configuration for the Kalshi ingester
#[derive(Debug, Clone)]
pub struct KalshiIngesterConfig {
    /// How often to poll for new trades
    pub poll_interval: Duration,
    /// Maximum trades fetched per market per cycle
    pub trades_per_request: u32,
    /// Tracked market tickers; empty means bootstrap from the open
    /// markets listing
    pub markets: Vec<String>,
    /// Markets pulled when bootstrapping
    pub discovery_limit: u32,
    /// Cycles between discovery refreshes (bootstrap mode only)
    pub discovery_refresh_cycles: u64,
}

impl Default for KalshiIngesterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            trades_per_request: 100,
            markets: Vec::new(),
            discovery_limit: 50,
            discovery_refresh_cycles: 300,
        }
    }
}

/// Per-market watermark: the newest upstream trade already observed
#[derive(Debug, Clone)]
struct Watermark {
    ts_ms: i64,
    trade_id: String,
}

impl Watermark {
    fn encode(&self) -> String {
        format!("{}:{}", self.ts_ms, self.trade_id)
    }

    fn decode(value: &str) -> Option<Self> {
        let (ts, id) = value.split_once(':')?;
        Some(Self {
            ts_ms: ts.parse().ok()?,
            trade_id: id.to_string(),
        })
    }
}

/// The polling ingester task
pub struct KalshiIngester {
    client: KalshiClient,
    storage: Arc<StorageGateway>,
    bus: Arc<TradeBus>,
    perf: Arc<PerfTracker>,
    config: KalshiIngesterConfig,
    tracked: RwLock<HashSet<String>>,
    watermarks: Mutex<HashMap<String, Watermark>>,
    state: std::sync::Mutex<IngestState>,
    insert_errors: AtomicU64,
}

impl KalshiIngester {
    pub fn new(
        client: KalshiClient,
        storage: Arc<StorageGateway>,
        bus: Arc<TradeBus>,
        perf: Arc<PerfTracker>,
        config: KalshiIngesterConfig,
    ) -> Self {
        let tracked = config.markets.iter().cloned().collect();
        Self {
            client,
            storage,
            bus,
            perf,
            config,
            tracked: RwLock::new(tracked),
            watermarks: Mutex::new(HashMap::new()),
            state: std::sync::Mutex::new(IngestState::Idle),
            insert_errors: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> IngestState {
        *self.state.lock().expect("state mutex")
    }

    fn set_state(&self, state: IngestState) {
        *self.state.lock().expect("state mutex") = state;
    }

    pub fn insert_errors(&self) -> u64 {
        self.insert_errors.load(Ordering::Relaxed)
    }

    /// Run until shutdown. Auth failures are fatal to this ingester
    /// only; transient errors back off exponentially.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[Kalshi] ingester started, polling every {:?}",
            self.config.poll_interval
        );

        let mut delay = Duration::ZERO;
        let mut backoff = BACKOFF_BASE;
        let mut cycle = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            if self.config.markets.is_empty()
                && (cycle == 0 || cycle % self.config.discovery_refresh_cycles == 0)
            {
                self.refresh_tracked().await;
            }
            cycle += 1;

            match self.cycle().await {
                Ok(inserted) => {
                    if inserted > 0 {
                        debug!("[Kalshi] cycle stored {} new trades", inserted);
                    }
                    delay = self.config.poll_interval;
                    backoff = BACKOFF_BASE;
                }
                Err(e) if e.is_fatal() => {
                    error!("[Kalshi] fatal error, stopping ingester: {}", e);
                    self.set_state(IngestState::Stopped);
                    return;
                }
                Err(e) => {
                    warn!("[Kalshi] transient error, backing off {:?}: {}", backoff, e);
                    self.set_state(IngestState::Backoff);
                    delay = backoff;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }

        self.set_state(IngestState::Stopped);
        info!("[Kalshi] ingester stopped");
    }

    /// One poll across all tracked markets
    async fn cycle(&self) -> IndexerResult<usize> {
        self.set_state(IngestState::Polling);
        let markets: Vec<String> = {
            let tracked = self.tracked.read().await;
            tracked.iter().cloned().collect()
        };

        if markets.is_empty() {
            debug!("[Kalshi] no tracked markets, skipping cycle");
            self.set_state(IngestState::Idle);
            return Ok(0);
        }

        let mut inserted = 0;
        for market in markets {
            inserted += self.poll_market(&market).await?;
        }

        self.set_state(IngestState::Idle);
        Ok(inserted)
    }

    /// Poll one market for trades newer than its watermark
    async fn poll_market(&self, market: &str) -> IndexerResult<usize> {
        let watermark = self.load_watermark(market).await?;
        // min_ts is inclusive and second-granular; the overlap at the
        // boundary is absorbed by the dedupe key
        let min_ts = watermark.as_ref().map(|w| w.ts_ms / 1000);

        let response = self
            .client
            .get_trades(
                market,
                min_ts,
                Some(self.config.trades_per_request),
                None,
            )
            .await?;

        if response.trades.is_empty() {
            return Ok(0);
        }

        let mut batch = response.trades;
        batch.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.trade_id.cmp(&b.trade_id))
        });

        self.set_state(IngestState::Publishing);
        let mut inserted = 0;
        for raw in batch {
            let mut trade = match raw.to_trade() {
                Ok(trade) => trade,
                Err(e) => {
                    warn!("[Kalshi] skipping unparseable trade: {}", e);
                    continue;
                }
            };

            match self.storage.insert_trade(&trade) {
                Ok(InsertOutcome::Inserted(id)) => {
                    trade.id = Some(id);
                    self.bus.publish(&trade);
                    self.perf.record(Exchange::Kalshi, trade.timestamp);
                    inserted += 1;
                    self.advance_watermark(market, &raw.trade_id, trade.timestamp.timestamp_millis())
                        .await?;
                }
                Ok(InsertOutcome::Duplicate { .. }) => {
                    self.advance_watermark(market, &raw.trade_id, trade.timestamp.timestamp_millis())
                        .await?;
                }
                Err(e) => {
                    // watermark stays put; this trade is retried next cycle
                    self.insert_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(IndexerError::internal(format!(
                        "insert failed for {}: {}",
                        trade.dedupe_key, e
                    )));
                }
            }
        }

        Ok(inserted)
    }

    async fn load_watermark(&self, market: &str) -> IndexerResult<Option<Watermark>> {
        {
            let watermarks = self.watermarks.lock().await;
            if let Some(w) = watermarks.get(market) {
                return Ok(Some(w.clone()));
            }
        }

        let cursor_name = format!("trades:{}", market);
        let stored = self
            .storage
            .load_cursor(Exchange::Kalshi, &cursor_name)
            .map_err(|e| IndexerError::internal(format!("cursor load failed: {}", e)))?;

        let watermark = stored.as_deref().and_then(Watermark::decode);
        if let Some(ref w) = watermark {
            self.watermarks
                .lock()
                .await
                .insert(market.to_string(), w.clone());
        }
        Ok(watermark)
    }

    async fn advance_watermark(
        &self,
        market: &str,
        trade_id: &str,
        ts_ms: i64,
    ) -> IndexerResult<()> {
        let watermark = Watermark {
            ts_ms,
            trade_id: trade_id.to_string(),
        };
        self.storage
            .store_cursor(
                Exchange::Kalshi,
                &format!("trades:{}", market),
                &watermark.encode(),
            )
            .map_err(|e| IndexerError::internal(format!("cursor store failed: {}", e)))?;
        self.watermarks
            .lock()
            .await
            .insert(market.to_string(), watermark);
        Ok(())
    }

    /// Bootstrap / refresh the tracked set from the open markets listing
    async fn refresh_tracked(&self) {
        match self
            .client
            .list_open_markets(self.config.discovery_limit)
            .await
        {
            Ok(tickers) => {
                let mut tracked = self.tracked.write().await;
                for ticker in tickers {
                    tracked.insert(ticker);
                }
                info!(
                    "[Kalshi] discovery refreshed, {} markets tracked",
                    tracked.len()
                );
            }
            Err(e) => warn!("[Kalshi] discovery failed: {}", e),
        }
    }

    /// Add a market to the tracked set
    pub async fn track_market(&self, ticker: impl Into<String>) {
        let ticker = ticker.into();
        self.tracked.write().await.insert(ticker.clone());
        info!("[Kalshi] now tracking {}", ticker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_roundtrip() {
        let watermark = Watermark {
            ts_ms: 1704110096789,
            trade_id: "abc:def".to_string(),
        };
        let decoded = Watermark::decode(&watermark.encode()).unwrap();
        assert_eq!(decoded.ts_ms, watermark.ts_ms);
        assert_eq!(decoded.trade_id, watermark.trade_id);
    }

    #[test]
    fn test_watermark_decode_rejects_garbage() {
        assert!(Watermark::decode("no-separator").is_none());
        assert!(Watermark::decode("notanumber:id").is_none());
    }
}
