//! Candle backfill
//!
//! Rebuilds every candle row for one interval from the persisted trades.
//! Runs at startup before the ingesters begin, so live upserts never race
//! a rebuild over the same bucket. Idempotent: re-running produces the
//! same rows.

use indexer_core::{Candle, CandleInterval};
use tracing::info;

use crate::gateway::{StorageError, StorageGateway};

impl StorageGateway {
    /// Rebuild all candles at one resolution from the trades table.
    ///
    /// Trades are scanned in `(exchange, market_id, timestamp, id)` order
    /// and folded per bucket with the same decimal arithmetic the live
    /// upsert uses, so a rebuild reproduces incremental aggregation
    /// byte for byte. The recomputed rows replace existing ones in a
    /// single transaction.
    pub fn rebuild_candles(&self, interval: CandleInterval) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        let tx = conn.transaction().map_err(StorageError::Database)?;

        let mut candles: Vec<Candle> = Vec::new();
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    SELECT exchange, market_id, price, quantity, timestamp
                    FROM trades
                    ORDER BY exchange ASC, market_id ASC, timestamp ASC, id ASC
                    "#,
                )
                .map_err(StorageError::Database)?;

            let mut rows = stmt.query([]).map_err(StorageError::Database)?;
            let mut current: Option<Candle> = None;

            while let Some(row) = rows.next().map_err(StorageError::Database)? {
                let exchange: String = row.get(0).map_err(StorageError::Database)?;
                let exchange = exchange
                    .parse()
                    .map_err(|_| StorageError::Corrupt("unknown exchange in trades"))?;
                let market_id: String = row.get(1).map_err(StorageError::Database)?;
                let price = row
                    .get::<_, String>(2)
                    .map_err(StorageError::Database)?
                    .parse()
                    .map_err(|_| StorageError::Corrupt("bad price in trades"))?;
                let quantity = row
                    .get::<_, String>(3)
                    .map_err(StorageError::Database)?
                    .parse()
                    .map_err(|_| StorageError::Corrupt("bad quantity in trades"))?;
                let ts_ms: i64 = row.get(4).map_err(StorageError::Database)?;
                let ts = chrono::DateTime::from_timestamp_millis(ts_ms)
                    .ok_or(StorageError::Corrupt("timestamp out of range"))?;
                let open_time = interval.truncate(ts);

                match current {
                    Some(ref mut candle)
                        if candle.exchange == exchange
                            && candle.market_id == market_id
                            && candle.open_time == open_time =>
                    {
                        candle.apply(price, quantity, ts);
                    }
                    _ => {
                        if let Some(done) = current.take() {
                            candles.push(done);
                        }
                        current = Some(Candle::open_with(
                            exchange, market_id, interval, price, quantity, ts,
                        ));
                    }
                }
            }

            if let Some(done) = current {
                candles.push(done);
            }
        }

        let count = candles.len();
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT OR REPLACE INTO candles
                        (exchange, market_id, interval, open_time,
                         open, high, low, close, volume, close_time)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )
                .map_err(StorageError::Database)?;

            for candle in &candles {
                stmt.execute(rusqlite::params![
                    candle.exchange.as_str(),
                    candle.market_id,
                    interval.as_str(),
                    candle.open_time.timestamp_millis(),
                    candle.open.to_string(),
                    candle.high.to_string(),
                    candle.low.to_string(),
                    candle.close.to_string(),
                    candle.volume.to_string(),
                    candle.close_time.timestamp_millis(),
                ])
                .map_err(StorageError::Database)?;
            }
        }

        tx.commit().map_err(StorageError::Database)?;
        info!("[Storage] rebuilt {} {} candles", count, interval);
        Ok(count)
    }
}
