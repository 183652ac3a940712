//! Polymarket ingester
//!
//! Consumes decoded fills from the chain log stream, persists them
//! idempotently and publishes them onto the bus. Every (re)connect
//! triggers a replay of the block range since the persisted cursor, so
//! logs missed while disconnected are recovered; the dedupe key makes
//! the overlap harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use indexer_core::{Exchange, IndexerError, IndexerResult, Trade};
use indexer_polymarket::{decode_order_filled, ChainEvent, RpcHttpClient};
use indexer_storage::{InsertOutcome, StorageGateway};

use crate::bus::TradeBus;
use crate::perf::PerfTracker;

/// Cursor name under which the last covered block is persisted
const BLOCK_CURSOR: &str = "last_block";

/// The chain-event-consuming ingester task
pub struct PolymarketIngester {
    storage: Arc<StorageGateway>,
    bus: Arc<TradeBus>,
    perf: Arc<PerfTracker>,
    http: RpcHttpClient,
    insert_errors: AtomicU64,
}

impl PolymarketIngester {
    pub fn new(
        storage: Arc<StorageGateway>,
        bus: Arc<TradeBus>,
        perf: Arc<PerfTracker>,
        http: RpcHttpClient,
    ) -> Self {
        Self {
            storage,
            bus,
            perf,
            http,
            insert_errors: AtomicU64::new(0),
        }
    }

    pub fn insert_errors(&self) -> u64 {
        self.insert_errors.load(Ordering::Relaxed)
    }

    /// Run until shutdown or until the stream ends
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("[Polymarket] ingester started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(ChainEvent::Connected) => {
                            if let Err(e) = self.replay().await {
                                warn!("[Polymarket] replay failed, will retry on next connect: {}", e);
                            }
                        }
                        Some(ChainEvent::Fill(trade)) => {
                            self.handle_trade(trade);
                        }
                        Some(ChainEvent::Disconnected) => {
                            debug!("[Polymarket] stream disconnected");
                        }
                        None => break,
                    }
                }
            }
        }
        info!("[Polymarket] ingester stopped");
    }

    /// Persist and publish one fill
    pub fn handle_trade(&self, mut trade: Trade) {
        match self.storage.insert_trade(&trade) {
            Ok(InsertOutcome::Inserted(id)) => {
                trade.id = Some(id);
                if let Some(block) = trade.block_number {
                    self.advance_block_cursor(block as u64);
                }
                self.bus.publish(&trade);
                self.perf.record(Exchange::Polymarket, trade.timestamp);
            }
            Ok(InsertOutcome::Duplicate { existing_block }) => {
                if existing_block.is_some() && existing_block != trade.block_number {
                    // a fill we already indexed reappeared from another
                    // block; the row is kept as-is (no reorg rewrite)
                    warn!(
                        "[Polymarket] duplicate {} seen in block {:?}, stored block {:?}",
                        trade.dedupe_key, trade.block_number, existing_block
                    );
                }
            }
            Err(e) => {
                self.insert_errors.fetch_add(1, Ordering::Relaxed);
                warn!("[Polymarket] insert failed for {}: {}", trade.dedupe_key, e);
            }
        }
    }

    /// Catch up on logs since the persisted block cursor.
    ///
    /// The live subscription is already established when this runs, so
    /// the range `[cursor+1, latest]` plus the live feed covers every
    /// block.
    async fn replay(&self) -> IndexerResult<usize> {
        let cursor = self
            .storage
            .load_cursor(Exchange::Polymarket, BLOCK_CURSOR)
            .map_err(|e| IndexerError::internal(format!("cursor load failed: {}", e)))?
            .and_then(|v| v.parse::<u64>().ok());

        let latest = self.http.latest_block_number().await?;

        let Some(from) = cursor else {
            // first run: nothing persisted yet, start from the live head
            self.store_block_cursor(latest)?;
            info!("[Polymarket] no block cursor, starting live at {}", latest);
            return Ok(0);
        };

        if from >= latest {
            return Ok(0);
        }

        let logs = self.http.get_order_filled_logs(from + 1, latest).await?;
        info!(
            "[Polymarket] replaying {} logs from blocks {}..={}",
            logs.len(),
            from + 1,
            latest
        );

        let mut block_times: HashMap<u64, DateTime<Utc>> = HashMap::new();
        let mut recovered = 0;
        for log in &logs {
            let block_number =
                indexer_polymarket::types::parse_hex_u64(&log.block_number)?;
            let block_ts = match block_times.get(&block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.http.block_timestamp(block_number).await?;
                    block_times.insert(block_number, ts);
                    ts
                }
            };

            match decode_order_filled(log, block_ts) {
                Ok(Some(trade)) => {
                    self.handle_trade(trade);
                    recovered += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("[Polymarket] bad log during replay: {}", e),
            }
        }

        self.store_block_cursor(latest)?;
        Ok(recovered)
    }

    fn advance_block_cursor(&self, block: u64) {
        let current = self
            .storage
            .load_cursor(Exchange::Polymarket, BLOCK_CURSOR)
            .ok()
            .flatten()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        if block > current {
            if let Err(e) = self.store_block_cursor(block) {
                warn!("[Polymarket] failed to advance block cursor: {}", e);
            }
        }
    }

    fn store_block_cursor(&self, block: u64) -> IndexerResult<()> {
        self.storage
            .store_cursor(Exchange::Polymarket, BLOCK_CURSOR, &block.to_string())
            .map_err(|e| IndexerError::internal(format!("cursor store failed: {}", e)))
    }
}
