//! The canonical trade record flowing through the pipeline
//!
//! Every upstream event is normalized into a [`Trade`] before it touches
//! the store or the event bus. Prices and quantities are `Decimal`
//! end-to-end; they are persisted as exact strings and no binary float
//! ever enters the arithmetic.

use crate::exchange::Exchange;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a trade (from the taker's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Taker bought the outcome
    Buy,
    /// Taker sold the outcome
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            _ => Err(format!("Unknown trade side: {}", s)),
        }
    }
}

/// A normalized trade from either upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Store-assigned id; absent until the trade is persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Exchange the trade came from
    pub exchange: Exchange,
    /// Market identifier, unique within the exchange
    pub market_id: String,
    /// Execution price
    pub price: Decimal,
    /// Quantity traded
    pub quantity: Decimal,
    /// Taker side
    pub side: TradeSide,
    /// Source-provided instant (UTC, millisecond resolution)
    pub timestamp: DateTime<Utc>,
    /// On-chain transaction hash; always present for Polymarket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Block the trade was observed in (Polymarket only)
    #[serde(skip)]
    pub block_number: Option<i64>,
    /// The key under which the store absorbs duplicates
    #[serde(skip)]
    pub dedupe_key: String,
}

impl Trade {
    /// Build a Kalshi trade; the dedupe key is `market_id:upstream_trade_id`
    pub fn kalshi(
        market_id: impl Into<String>,
        upstream_trade_id: &str,
        price: Decimal,
        quantity: Decimal,
        side: TradeSide,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let market_id = market_id.into();
        let dedupe_key = format!("{}:{}", market_id, upstream_trade_id);
        Self {
            id: None,
            exchange: Exchange::Kalshi,
            market_id,
            price,
            quantity,
            side,
            timestamp,
            tx_hash: None,
            block_number: None,
            dedupe_key,
        }
    }

    /// Build a Polymarket trade; the dedupe key is `tx_hash:log_index`
    pub fn polymarket(
        market_id: impl Into<String>,
        tx_hash: impl Into<String>,
        log_index: u64,
        block_number: i64,
        price: Decimal,
        quantity: Decimal,
        side: TradeSide,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let tx_hash = tx_hash.into();
        let dedupe_key = format!("{}:{}", tx_hash, log_index);
        Self {
            id: None,
            exchange: Exchange::Polymarket,
            market_id: market_id.into(),
            price,
            quantity,
            side,
            timestamp,
            tx_hash: Some(tx_hash),
            block_number: Some(block_number),
            dedupe_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kalshi_dedupe_key() {
        let trade = Trade::kalshi(
            "KXBTC-100K",
            "t-123",
            dec!(0.55),
            dec!(10),
            TradeSide::Buy,
            Utc::now(),
        );
        assert_eq!(trade.dedupe_key, "KXBTC-100K:t-123");
        assert!(trade.tx_hash.is_none());
        assert!(trade.id.is_none());
    }

    #[test]
    fn test_polymarket_dedupe_key() {
        let trade = Trade::polymarket(
            "123456789",
            "0xabc",
            7,
            1000,
            dec!(0.75),
            dec!(100),
            TradeSide::Sell,
            Utc::now(),
        );
        assert_eq!(trade.dedupe_key, "0xabc:7");
        assert_eq!(trade.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(trade.block_number, Some(1000));
    }

    #[test]
    fn test_trade_serializes_decimals_as_strings() {
        let trade = Trade::kalshi(
            "M",
            "t1",
            dec!(0.55),
            dec!(10),
            TradeSide::Buy,
            "2024-01-01T12:34:56.789Z".parse().unwrap(),
        );
        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["price"], "0.55");
        assert_eq!(json["quantity"], "10");
        assert_eq!(json["marketId"], "M");
        assert_eq!(json["side"], "buy");
        // internal fields never cross the wire
        assert!(json.get("dedupeKey").is_none());
        assert!(json.get("blockNumber").is_none());
    }
}
