//! Kalshi API response types and normalization

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use indexer_core::{IndexerError, IndexerResult, Trade, TradeSide};

/// Response from `GET /markets/trades`
#[derive(Debug, Clone, Deserialize)]
pub struct TradesResponse {
    pub trades: Vec<ApiTrade>,
    /// Pagination cursor; empty string means no more pages
    #[serde(default)]
    pub cursor: Option<String>,
}

/// A raw trade as Kalshi reports it
#[derive(Debug, Clone, Deserialize)]
pub struct ApiTrade {
    pub trade_id: String,
    pub ticker: String,
    /// Contracts traded
    pub count: i64,
    /// YES price in cents
    pub yes_price: i64,
    /// NO price in cents
    #[serde(default)]
    pub no_price: i64,
    /// "yes" or "no"
    pub taker_side: String,
    /// RFC3339 execution time
    pub created_time: DateTime<Utc>,
}

impl ApiTrade {
    /// Normalize into the canonical trade record.
    ///
    /// Prices are quoted in cents of the YES contract; `taker_side`
    /// names the contract the taker went long, so "no" is recorded as a
    /// sell of YES at the YES price.
    pub fn to_trade(&self) -> IndexerResult<Trade> {
        let side = match self.taker_side.as_str() {
            "yes" => TradeSide::Buy,
            "no" => TradeSide::Sell,
            other => {
                return Err(IndexerError::parse(format!(
                    "Unknown taker_side '{}' on trade {}",
                    other, self.trade_id
                )))
            }
        };

        Ok(Trade::kalshi(
            self.ticker.clone(),
            &self.trade_id,
            Decimal::new(self.yes_price, 2),
            Decimal::from(self.count),
            side,
            self.created_time,
        ))
    }
}

/// Response from `GET /markets`
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsResponse {
    pub markets: Vec<ApiMarket>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Subset of the market object the indexer cares about
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMarket {
    pub ticker: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response from `GET /markets/{ticker}`
#[derive(Debug, Clone, Deserialize)]
pub struct MarketResponse {
    pub market: ApiMarket,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::Exchange;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_yes_taker() {
        let raw: ApiTrade = serde_json::from_str(
            r#"{
                "trade_id": "abc-123",
                "ticker": "KXBTC-100K",
                "count": 25,
                "yes_price": 55,
                "no_price": 45,
                "taker_side": "yes",
                "created_time": "2024-01-01T12:34:56.789Z"
            }"#,
        )
        .unwrap();

        let trade = raw.to_trade().unwrap();
        assert_eq!(trade.exchange, Exchange::Kalshi);
        assert_eq!(trade.market_id, "KXBTC-100K");
        assert_eq!(trade.price, dec!(0.55));
        assert_eq!(trade.quantity, dec!(25));
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.dedupe_key, "KXBTC-100K:abc-123");
        assert_eq!(
            trade.timestamp,
            "2024-01-01T12:34:56.789Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_normalize_no_taker_is_sell() {
        let raw = ApiTrade {
            trade_id: "t".into(),
            ticker: "M".into(),
            count: 1,
            yes_price: 7,
            no_price: 93,
            taker_side: "no".into(),
            created_time: Utc::now(),
        };
        let trade = raw.to_trade().unwrap();
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.price, dec!(0.07));
    }

    #[test]
    fn test_unknown_taker_side_rejected() {
        let raw = ApiTrade {
            trade_id: "t".into(),
            ticker: "M".into(),
            count: 1,
            yes_price: 50,
            no_price: 50,
            taker_side: "maybe".into(),
            created_time: Utc::now(),
        };
        assert!(raw.to_trade().is_err());
    }
}
