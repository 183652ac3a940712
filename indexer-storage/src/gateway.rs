//! Storage gateway
//!
//! The only component that talks to the relational store. Trades are
//! idempotent on their dedupe key, candle upserts are atomic per
//! `(exchange, market, interval, open_time)`, and every decimal crosses
//! the boundary as an exact string.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;

use indexer_core::{Candle, CandleInterval, Exchange, Trade, TradeSide};

/// Query limit caps (see the HTTP surface for the matching defaults)
pub const CANDLE_LIMIT_CAP: usize = 5000;
pub const TRADE_LIMIT_CAP: usize = 1000;
pub const LATEST_TRADE_LIMIT_CAP: usize = 200;

/// Window that counts as "recent activity" when ranking markets
const RECENT_ACTIVITY_SECS: i64 = 600;

/// Outcome of an idempotent trade insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row was inserted; carries the store-assigned id
    Inserted(i64),
    /// The dedupe key already existed; nothing was written
    Duplicate {
        /// Block number of the previously stored row, for reorg warnings
        existing_block: Option<i64>,
    },
}

/// A market ranked by its trade activity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketActivity {
    pub exchange: Exchange,
    pub market_id: String,
    /// Trades in the last ten minutes
    pub recent_trades: i64,
    pub total_trades: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Storage gateway over SQLite
///
/// A single mutex-guarded connection is the serialization point for
/// concurrent candle upserts on the same key; every multi-statement
/// operation runs inside one transaction under that mutex.
pub struct StorageGateway {
    pub(crate) conn: Mutex<Connection>,
}

impl StorageGateway {
    /// Open (or create) the database at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(StorageError::Database)?;
        let gateway = Self {
            conn: Mutex::new(conn),
        };
        gateway.init_schema()?;
        Ok(gateway)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::Database)?;
        let gateway = Self {
            conn: Mutex::new(conn),
        };
        gateway.init_schema()?;
        Ok(gateway)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                market_id TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                side TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                tx_hash TEXT,
                block_number INTEGER,
                dedupe_key TEXT NOT NULL UNIQUE
            );

            CREATE INDEX IF NOT EXISTS idx_trades_market
            ON trades(exchange, market_id, timestamp);

            CREATE INDEX IF NOT EXISTS idx_trades_timestamp
            ON trades(timestamp);

            CREATE TABLE IF NOT EXISTS candles (
                exchange TEXT NOT NULL,
                market_id TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                close_time INTEGER NOT NULL,
                PRIMARY KEY (exchange, market_id, interval, open_time)
            );

            CREATE TABLE IF NOT EXISTS cursors (
                exchange TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (exchange, name)
            );
            "#,
        )
        .map_err(StorageError::Database)?;

        Ok(())
    }

    /// Liveness probe for the health endpoint
    pub fn ping(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(StorageError::Database)?;
        Ok(())
    }

    // ========================================================================
    // Trades
    // ========================================================================

    /// Insert a trade, idempotent on its dedupe key.
    ///
    /// A conflicting key reports [`InsertOutcome::Duplicate`] without
    /// raising; the stored block number is returned so on-chain callers
    /// can spot reorged duplicates.
    pub fn insert_trade(&self, trade: &Trade) -> Result<InsertOutcome, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;

        let changed = conn
            .execute(
                r#"
                INSERT INTO trades
                    (exchange, market_id, price, quantity, side, timestamp,
                     tx_hash, block_number, dedupe_key)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(dedupe_key) DO NOTHING
                "#,
                params![
                    trade.exchange.as_str(),
                    trade.market_id,
                    trade.price.to_string(),
                    trade.quantity.to_string(),
                    trade.side.as_str(),
                    trade.timestamp.timestamp_millis(),
                    trade.tx_hash,
                    trade.block_number,
                    trade.dedupe_key,
                ],
            )
            .map_err(StorageError::Database)?;

        if changed == 0 {
            let existing_block: Option<i64> = conn
                .query_row(
                    "SELECT block_number FROM trades WHERE dedupe_key = ?1",
                    params![trade.dedupe_key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StorageError::Database)?
                .flatten();
            return Ok(InsertOutcome::Duplicate { existing_block });
        }

        Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
    }

    /// Range scan of trades, newest first
    pub fn query_trades(
        &self,
        exchange: Exchange,
        market_id: &str,
        side: Option<TradeSide>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Trade>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        let limit = limit.min(TRADE_LIMIT_CAP);

        let start_ms = start.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let end_ms = end.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX);
        let side_str = side.map(|s| s.as_str().to_string());

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, exchange, market_id, price, quantity, side,
                       timestamp, tx_hash, block_number, dedupe_key
                FROM trades
                WHERE exchange = ?1 AND market_id = ?2
                  AND (?3 IS NULL OR side = ?3)
                  AND timestamp >= ?4 AND timestamp <= ?5
                ORDER BY timestamp DESC, id DESC
                LIMIT ?6
                "#,
            )
            .map_err(StorageError::Database)?;

        let trades = stmt
            .query_map(
                params![
                    exchange.as_str(),
                    market_id,
                    side_str,
                    start_ms,
                    end_ms,
                    limit as i64
                ],
                trade_from_row,
            )
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        Ok(trades)
    }

    /// Latest trades across markets, optionally filtered by exchange
    pub fn latest_trades(
        &self,
        exchange: Option<Exchange>,
        limit: usize,
    ) -> Result<Vec<Trade>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        let limit = limit.min(LATEST_TRADE_LIMIT_CAP);
        let exchange_str = exchange.map(|e| e.as_str().to_string());

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, exchange, market_id, price, quantity, side,
                       timestamp, tx_hash, block_number, dedupe_key
                FROM trades
                WHERE (?1 IS NULL OR exchange = ?1)
                ORDER BY timestamp DESC, id DESC
                LIMIT ?2
                "#,
            )
            .map_err(StorageError::Database)?;

        let trades = stmt
            .query_map(params![exchange_str, limit as i64], trade_from_row)
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        Ok(trades)
    }

    /// Markets with persisted trades, ranked by recent activity then
    /// total trade count
    pub fn trade_markets(
        &self,
        exchange: Option<Exchange>,
    ) -> Result<Vec<MarketActivity>, StorageError> {
        self.market_activity(exchange, false)
    }

    /// Markets with persisted candles, same ranking as [`Self::trade_markets`]
    pub fn candle_markets(
        &self,
        exchange: Option<Exchange>,
    ) -> Result<Vec<MarketActivity>, StorageError> {
        self.market_activity(exchange, true)
    }

    fn market_activity(
        &self,
        exchange: Option<Exchange>,
        require_candles: bool,
    ) -> Result<Vec<MarketActivity>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        let exchange_str = exchange.map(|e| e.as_str().to_string());
        let recent_cutoff = Utc::now().timestamp_millis() - RECENT_ACTIVITY_SECS * 1000;

        let sql = if require_candles {
            r#"
            SELECT t.exchange, t.market_id,
                   SUM(CASE WHEN t.timestamp >= ?2 THEN 1 ELSE 0 END),
                   COUNT(*)
            FROM trades t
            WHERE (?1 IS NULL OR t.exchange = ?1)
              AND EXISTS (
                  SELECT 1 FROM candles c
                  WHERE c.exchange = t.exchange AND c.market_id = t.market_id
              )
            GROUP BY t.exchange, t.market_id
            ORDER BY 3 DESC, 4 DESC
            "#
        } else {
            r#"
            SELECT t.exchange, t.market_id,
                   SUM(CASE WHEN t.timestamp >= ?2 THEN 1 ELSE 0 END),
                   COUNT(*)
            FROM trades t
            WHERE (?1 IS NULL OR t.exchange = ?1)
            GROUP BY t.exchange, t.market_id
            ORDER BY 3 DESC, 4 DESC
            "#
        };

        let mut stmt = conn.prepare(sql).map_err(StorageError::Database)?;
        let markets = stmt
            .query_map(params![exchange_str, recent_cutoff], |row| {
                let exchange: String = row.get(0)?;
                Ok(MarketActivity {
                    exchange: parse_exchange(0, &exchange)?,
                    market_id: row.get(1)?,
                    recent_trades: row.get(2)?,
                    total_trades: row.get(3)?,
                    title: None,
                })
            })
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        Ok(markets)
    }

    // ========================================================================
    // Candles
    // ========================================================================

    /// Fold one trade into the candle for the given bucket, atomically.
    ///
    /// First trade in a bucket seeds the row; later trades update
    /// high/low/volume and move `close` forward under the
    /// `trade_ts >= close_time` rule. `open` is never modified.
    pub fn upsert_candle(
        &self,
        exchange: Exchange,
        market_id: &str,
        interval: CandleInterval,
        price: Decimal,
        quantity: Decimal,
        trade_ts: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let open_time = interval.truncate(trade_ts);
        let mut conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        let tx = conn.transaction().map_err(StorageError::Database)?;

        let existing = tx
            .query_row(
                r#"
                SELECT open, high, low, close, volume, close_time
                FROM candles
                WHERE exchange = ?1 AND market_id = ?2 AND interval = ?3
                  AND open_time = ?4
                "#,
                params![
                    exchange.as_str(),
                    market_id,
                    interval.as_str(),
                    open_time.timestamp_millis()
                ],
                |row| {
                    Ok((
                        parse_decimal(0, row.get::<_, String>(0)?)?,
                        parse_decimal(1, row.get::<_, String>(1)?)?,
                        parse_decimal(2, row.get::<_, String>(2)?)?,
                        parse_decimal(3, row.get::<_, String>(3)?)?,
                        parse_decimal(4, row.get::<_, String>(4)?)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(StorageError::Database)?;

        let candle = match existing {
            Some((open, high, low, close, volume, close_time_ms)) => {
                let close_time = DateTime::from_timestamp_millis(close_time_ms)
                    .ok_or(StorageError::Corrupt("close_time out of range"))?;
                let mut candle = Candle {
                    exchange,
                    market_id: market_id.to_string(),
                    interval,
                    open_time,
                    open,
                    high,
                    low,
                    close,
                    volume,
                    close_time,
                };
                candle.apply(price, quantity, trade_ts);
                candle
            }
            None => Candle::open_with(exchange, market_id, interval, price, quantity, trade_ts),
        };

        if !candle.is_consistent() {
            // Impossible by construction; a hit means the fold itself is
            // broken, so fail the upsert rather than persist a bad row.
            error!(
                "[Storage] candle invariant violated for {}/{} {} @ {}: o={} h={} l={} c={}",
                exchange, market_id, interval, open_time, candle.open, candle.high, candle.low,
                candle.close
            );
            return Err(StorageError::InvariantViolation {
                key: format!("{}/{}/{}/{}", exchange, market_id, interval, open_time),
            });
        }

        tx.execute(
            r#"
            INSERT OR REPLACE INTO candles
                (exchange, market_id, interval, open_time,
                 open, high, low, close, volume, close_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                exchange.as_str(),
                market_id,
                interval.as_str(),
                open_time.timestamp_millis(),
                candle.open.to_string(),
                candle.high.to_string(),
                candle.low.to_string(),
                candle.close.to_string(),
                candle.volume.to_string(),
                candle.close_time.timestamp_millis(),
            ],
        )
        .map_err(StorageError::Database)?;

        tx.commit().map_err(StorageError::Database)?;
        Ok(())
    }

    /// Range scan of candles, oldest first
    pub fn query_candles(
        &self,
        exchange: Exchange,
        market_id: &str,
        interval: CandleInterval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        let limit = limit.min(CANDLE_LIMIT_CAP);

        let start_ms = start.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let end_ms = end.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX);

        let mut stmt = conn
            .prepare(
                r#"
                SELECT exchange, market_id, interval, open_time,
                       open, high, low, close, volume, close_time
                FROM candles
                WHERE exchange = ?1 AND market_id = ?2 AND interval = ?3
                  AND open_time >= ?4 AND open_time <= ?5
                ORDER BY open_time ASC
                LIMIT ?6
                "#,
            )
            .map_err(StorageError::Database)?;

        let candles = stmt
            .query_map(
                params![
                    exchange.as_str(),
                    market_id,
                    interval.as_str(),
                    start_ms,
                    end_ms,
                    limit as i64
                ],
                candle_from_row,
            )
            .map_err(StorageError::Database)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)?;

        Ok(candles)
    }

    /// Fetch a single candle row (primarily for tests and diagnostics)
    pub fn get_candle(
        &self,
        exchange: Exchange,
        market_id: &str,
        interval: CandleInterval,
        open_time: DateTime<Utc>,
    ) -> Result<Option<Candle>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;

        conn.query_row(
            r#"
            SELECT exchange, market_id, interval, open_time,
                   open, high, low, close, volume, close_time
            FROM candles
            WHERE exchange = ?1 AND market_id = ?2 AND interval = ?3
              AND open_time = ?4
            "#,
            params![
                exchange.as_str(),
                market_id,
                interval.as_str(),
                open_time.timestamp_millis()
            ],
            candle_from_row,
        )
        .optional()
        .map_err(StorageError::Database)
    }

    // ========================================================================
    // Ingest cursors
    // ========================================================================

    /// Persist an ingester watermark
    pub fn store_cursor(
        &self,
        exchange: Exchange,
        name: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        conn.execute(
            r#"
            INSERT INTO cursors (exchange, name, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(exchange, name) DO UPDATE SET value = excluded.value
            "#,
            params![exchange.as_str(), name, value],
        )
        .map_err(StorageError::Database)?;
        Ok(())
    }

    /// Load an ingester watermark, if one was ever stored
    pub fn load_cursor(
        &self,
        exchange: Exchange,
        name: &str,
    ) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Lock)?;
        conn.query_row(
            "SELECT value FROM cursors WHERE exchange = ?1 AND name = ?2",
            params![exchange.as_str(), name],
            |row| row.get(0),
        )
        .optional()
        .map_err(StorageError::Database)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_decimal(idx: usize, s: String) -> rusqlite::Result<Decimal> {
    s.parse().map_err(|e: rust_decimal::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_exchange(idx: usize, s: &str) -> rusqlite::Result<Exchange> {
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_timestamp(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn trade_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
    let exchange: String = row.get(1)?;
    let side: String = row.get(5)?;
    Ok(Trade {
        id: Some(row.get(0)?),
        exchange: parse_exchange(1, &exchange)?,
        market_id: row.get(2)?,
        price: parse_decimal(3, row.get::<_, String>(3)?)?,
        quantity: parse_decimal(4, row.get::<_, String>(4)?)?,
        side: side.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?,
        timestamp: parse_timestamp(6, row.get(6)?)?,
        tx_hash: row.get(7)?,
        block_number: row.get(8)?,
        dedupe_key: row.get(9)?,
    })
}

fn candle_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candle> {
    let exchange: String = row.get(0)?;
    let interval: String = row.get(2)?;
    Ok(Candle {
        exchange: parse_exchange(0, &exchange)?,
        market_id: row.get(1)?,
        interval: interval.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        open_time: parse_timestamp(3, row.get(3)?)?,
        open: parse_decimal(4, row.get::<_, String>(4)?)?,
        high: parse_decimal(5, row.get::<_, String>(5)?)?,
        low: parse_decimal(6, row.get::<_, String>(6)?)?,
        close: parse_decimal(7, row.get::<_, String>(7)?)?,
        volume: parse_decimal(8, row.get::<_, String>(8)?)?,
        close_time: parse_timestamp(9, row.get(9)?)?,
    })
}

/// Errors that can occur in the storage gateway
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to acquire database lock")]
    Lock,

    #[error("Corrupt row: {0}")]
    Corrupt(&'static str),

    #[error("Candle invariant violated: {key}")]
    InvariantViolation { key: String },
}
