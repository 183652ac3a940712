//! OHLCV candle types and bucket arithmetic

use crate::exchange::Exchange;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle resolutions maintained by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    /// 1 second candles
    #[serde(rename = "1s")]
    OneSecond,
    /// 1 minute candles
    #[serde(rename = "1m")]
    OneMinute,
    /// 1 hour candles
    #[serde(rename = "1h")]
    OneHour,
}

impl CandleInterval {
    /// All maintained resolutions, finest first
    pub const ALL: [CandleInterval; 3] = [
        CandleInterval::OneSecond,
        CandleInterval::OneMinute,
        CandleInterval::OneHour,
    ];

    /// Interval width in seconds
    pub fn to_seconds(&self) -> i64 {
        match self {
            CandleInterval::OneSecond => 1,
            CandleInterval::OneMinute => 60,
            CandleInterval::OneHour => 3600,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneSecond => "1s",
            CandleInterval::OneMinute => "1m",
            CandleInterval::OneHour => "1h",
        }
    }

    /// Truncate an instant to this interval's bucket open time.
    ///
    /// Truncation operates on the UTC instant (whole unix seconds); the
    /// process timezone never enters the computation.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.to_seconds();
        let bucket = ts.timestamp().div_euclid(secs) * secs;
        DateTime::from_timestamp(bucket, 0).expect("bucket open time in range")
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CandleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1s" => Ok(CandleInterval::OneSecond),
            "1m" => Ok(CandleInterval::OneMinute),
            "1h" => Ok(CandleInterval::OneHour),
            _ => Err(format!("Unknown candle interval: {}", s)),
        }
    }
}

/// An OHLCV bucket for one market at one resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub exchange: Exchange,
    pub market_id: String,
    pub interval: CandleInterval,
    /// Left edge of the bucket, UTC, truncated by the interval
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Timestamp of the trade currently reflected in `close`
    #[serde(skip)]
    pub close_time: DateTime<Utc>,
}

impl Candle {
    /// Seed a candle from the first trade observed in its bucket
    pub fn open_with(
        exchange: Exchange,
        market_id: impl Into<String>,
        interval: CandleInterval,
        price: Decimal,
        quantity: Decimal,
        trade_ts: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            market_id: market_id.into(),
            interval,
            open_time: interval.truncate(trade_ts),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity,
            close_time: trade_ts,
        }
    }

    /// Fold a subsequent trade into the candle.
    ///
    /// `open` is never modified. `close` follows the latest trade
    /// timestamp; a tie is won by the later arrival, which matches the
    /// backfill fold order so incremental and rebuilt candles agree.
    pub fn apply(&mut self, price: Decimal, quantity: Decimal, trade_ts: DateTime<Utc>) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        if trade_ts >= self.close_time {
            self.close = price;
            self.close_time = trade_ts;
        }
        self.volume += quantity;
    }

    /// Check the OHLC ordering invariant
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_truncate_boundaries() {
        let t = ts("2024-01-01T12:34:56.789Z");
        assert_eq!(
            CandleInterval::OneSecond.truncate(t),
            ts("2024-01-01T12:34:56Z")
        );
        assert_eq!(
            CandleInterval::OneMinute.truncate(t),
            ts("2024-01-01T12:34:00Z")
        );
        assert_eq!(
            CandleInterval::OneHour.truncate(t),
            ts("2024-01-01T12:00:00Z")
        );
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let t = ts("2024-06-15T23:59:59.999Z");
        for interval in CandleInterval::ALL {
            let once = interval.truncate(t);
            assert_eq!(interval.truncate(once), once);
        }
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("1s".parse::<CandleInterval>().unwrap(), CandleInterval::OneSecond);
        assert_eq!("1m".parse::<CandleInterval>().unwrap(), CandleInterval::OneMinute);
        assert_eq!("1h".parse::<CandleInterval>().unwrap(), CandleInterval::OneHour);
        assert!("5m".parse::<CandleInterval>().is_err());
    }

    #[test]
    fn test_fold_ohlcv() {
        let t0 = ts("2024-01-01T12:34:01Z");
        let mut candle = Candle::open_with(
            Exchange::Kalshi,
            "M",
            CandleInterval::OneMinute,
            dec!(0.50),
            dec!(1),
            t0,
        );
        candle.apply(dec!(0.60), dec!(2), ts("2024-01-01T12:34:02Z"));
        candle.apply(dec!(0.45), dec!(3), ts("2024-01-01T12:34:03Z"));
        candle.apply(dec!(0.55), dec!(4), ts("2024-01-01T12:34:04Z"));

        assert_eq!(candle.open_time, ts("2024-01-01T12:34:00Z"));
        assert_eq!(candle.open, dec!(0.50));
        assert_eq!(candle.high, dec!(0.60));
        assert_eq!(candle.low, dec!(0.45));
        assert_eq!(candle.close, dec!(0.55));
        assert_eq!(candle.volume, dec!(10));
        assert!(candle.is_consistent());
    }

    #[test]
    fn test_close_ignores_out_of_order_trade() {
        let mut candle = Candle::open_with(
            Exchange::Polymarket,
            "M",
            CandleInterval::OneHour,
            dec!(0.70),
            dec!(5),
            ts("2024-01-01T12:30:00Z"),
        );
        // earlier-timestamped trade arriving late must not rewind close
        candle.apply(dec!(0.20), dec!(1), ts("2024-01-01T12:10:00Z"));
        assert_eq!(candle.close, dec!(0.70));
        assert_eq!(candle.low, dec!(0.20));
        assert_eq!(candle.volume, dec!(6));
    }
}
