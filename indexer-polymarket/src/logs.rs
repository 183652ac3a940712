//! CTF Exchange `OrderFilled` log decoding
//!
//! A fill pairs an outcome-token leg against a collateral (USDC) leg.
//! The zero asset id marks the collateral leg; the other leg's token id
//! is the market identifier. Both amounts are 6-decimal fixed-point
//! integers, so price = collateral / tokens and quantity = tokens, each
//! rescaled into exact decimals.

use alloy::primitives::{keccak256, B256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use indexer_core::{IndexerError, IndexerResult, Trade, TradeSide};

use crate::types::{parse_hex_u64, LogEntry};

/// The Polymarket CTF Exchange contract on Polygon
pub const CTF_EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Fixed scale of both collateral (USDC) and outcome-token amounts
const ONCHAIN_SCALE: u32 = 6;

/// topic0 of `OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)`
pub fn order_filled_topic() -> B256 {
    keccak256(
        "OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)".as_bytes(),
    )
}

/// Decode an `OrderFilled` log into a canonical trade.
///
/// Returns `Ok(None)` for logs that are not priced fills: removed
/// (reorged) entries, foreign topics, and token-for-token fills.
pub fn decode_order_filled(
    log: &LogEntry,
    block_ts: DateTime<Utc>,
) -> IndexerResult<Option<Trade>> {
    if log.removed {
        return Ok(None);
    }

    let topic0 = match log.topics.first() {
        Some(t) => t
            .parse::<B256>()
            .map_err(|e| IndexerError::parse(format!("Bad topic '{}': {}", t, e)))?,
        None => return Ok(None),
    };
    if topic0 != order_filled_topic() {
        return Ok(None);
    }

    // data words: makerAssetId, takerAssetId, makerAmountFilled,
    // takerAmountFilled, fee
    let words = decode_data_words(&log.data, 5)?;
    let maker_asset = words[0];
    let taker_asset = words[1];
    let maker_amount = words[2];
    let taker_amount = words[3];

    let (token_id, collateral, tokens, side) = if maker_asset.is_zero() {
        // maker paid collateral for the taker's outcome tokens: the
        // taker sold
        (taker_asset, maker_amount, taker_amount, TradeSide::Sell)
    } else if taker_asset.is_zero() {
        // taker paid collateral for the maker's outcome tokens: the
        // taker bought
        (maker_asset, taker_amount, maker_amount, TradeSide::Buy)
    } else {
        // token-for-token fill (position merge), carries no price
        return Ok(None);
    };

    if tokens.is_zero() {
        return Ok(None);
    }

    let quantity = scale_fixed_point(tokens)?.normalize();
    let collateral = scale_fixed_point(collateral)?;
    let price = (collateral / quantity).round_dp(6).normalize();

    let block_number = parse_hex_u64(&log.block_number)? as i64;
    let log_index = parse_hex_u64(&log.log_index)?;

    Ok(Some(Trade::polymarket(
        token_id.to_string(),
        log.transaction_hash.clone(),
        log_index,
        block_number,
        price,
        quantity,
        side,
        block_ts,
    )))
}

/// Split ABI-encoded event data into 32-byte words
fn decode_data_words(data: &str, expected: usize) -> IndexerResult<Vec<U256>> {
    let hex = data.strip_prefix("0x").unwrap_or(data);
    if hex.len() < expected * 64 {
        return Err(IndexerError::parse(format!(
            "OrderFilled data too short: {} hex chars, expected {}",
            hex.len(),
            expected * 64
        )));
    }

    (0..expected)
        .map(|i| {
            let word = &hex[i * 64..(i + 1) * 64];
            U256::from_str_radix(word, 16)
                .map_err(|e| IndexerError::parse(format!("Bad data word '{}': {}", word, e)))
        })
        .collect()
}

/// Rescale a 6-decimal fixed-point integer into an exact decimal
fn scale_fixed_point(value: U256) -> IndexerResult<Decimal> {
    let raw: u128 = value
        .try_into()
        .map_err(|_| IndexerError::parse(format!("On-chain amount out of range: {}", value)))?;
    let raw = i128::try_from(raw)
        .map_err(|_| IndexerError::parse(format!("On-chain amount out of range: {}", value)))?;
    Decimal::try_from_i128_with_scale(raw, ONCHAIN_SCALE)
        .map_err(|e| IndexerError::parse(format!("On-chain amount out of range: {}", e)))
}
