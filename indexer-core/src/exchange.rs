//! Exchange definitions for the indexed upstreams

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream exchanges the pipeline ingests trades from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Kalshi - US regulated prediction market (REST upstream)
    Kalshi,
    /// Polymarket - on-chain prediction market (chain log upstream)
    Polymarket,
}

impl Exchange {
    /// Identifier used in the store and in API query parameters
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Kalshi => "kalshi",
            Exchange::Polymarket => "polymarket",
        }
    }

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            Exchange::Kalshi => "Kalshi",
            Exchange::Polymarket => "Polymarket",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalshi" => Ok(Exchange::Kalshi),
            "polymarket" => Ok(Exchange::Polymarket),
            _ => Err(format!("Unknown exchange: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_roundtrip() {
        assert_eq!("kalshi".parse::<Exchange>().unwrap(), Exchange::Kalshi);
        assert_eq!(
            "Polymarket".parse::<Exchange>().unwrap(),
            Exchange::Polymarket
        );
        assert_eq!(Exchange::Kalshi.as_str(), "kalshi");
        assert!("nyse".parse::<Exchange>().is_err());
    }
}
