//! WebSocket message types for the live trade feed
//!
//! These types define the protocol between the hub and its subscribers.
//! Client frames carry an `action`, server frames a `type`; trades cross
//! the wire with decimals as exact strings and RFC3339 UTC timestamps.

use serde::{Deserialize, Serialize};

use crate::{Exchange, Trade};

// ============================================================================
// Client -> Server Frames
// ============================================================================

/// Frames sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Subscribe to live trades for a market
    Subscribe {
        exchange: Exchange,
        #[serde(rename = "marketId")]
        market_id: String,
    },
    /// Unsubscribe from a market
    Unsubscribe {
        exchange: Exchange,
        #[serde(rename = "marketId")]
        market_id: String,
    },
}

// ============================================================================
// Server -> Client Frames
// ============================================================================

/// Frames sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once when the connection is accepted
    Connected { message: String },
    /// Subscription confirmed
    Subscribed {
        exchange: Exchange,
        #[serde(rename = "marketId")]
        market_id: String,
    },
    /// Unsubscription confirmed
    Unsubscribed {
        exchange: Exchange,
        #[serde(rename = "marketId")]
        market_id: String,
    },
    /// A trade on a subscribed market
    Trade { data: Trade },
    /// Protocol or server error; the connection stays open unless the
    /// server is closing it for exceeding the drop budget
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TradeSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscribe_frame_parses() {
        let frame = r#"{ "action": "subscribe", "exchange": "kalshi", "marketId": "KXBTC-100K" }"#;
        let msg: ClientMessage = serde_json::from_str(frame).unwrap();
        match msg {
            ClientMessage::Subscribe {
                exchange,
                market_id,
            } => {
                assert_eq!(exchange, Exchange::Kalshi);
                assert_eq!(market_id, "KXBTC-100K");
            }
            _ => panic!("expected subscribe"),
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let frame = r#"{ "action": "ping" }"#;
        assert!(serde_json::from_str::<ClientMessage>(frame).is_err());
    }

    #[test]
    fn test_trade_frame_shape() {
        let trade = Trade::kalshi(
            "M",
            "t1",
            dec!(0.55),
            dec!(10),
            TradeSide::Buy,
            "2024-01-01T12:34:56.789Z".parse().unwrap(),
        );
        let json = serde_json::to_value(ServerMessage::Trade { data: trade }).unwrap();
        assert_eq!(json["type"], "trade");
        assert_eq!(json["data"]["price"], "0.55");
        assert_eq!(json["data"]["exchange"], "kalshi");
    }

    #[test]
    fn test_subscribed_frame_shape() {
        let json = serde_json::to_value(ServerMessage::Subscribed {
            exchange: Exchange::Polymarket,
            market_id: "123".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["exchange"], "polymarket");
        assert_eq!(json["marketId"], "123");
    }
}
