//! Candle query endpoints

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use indexer_storage::MarketActivity;

use crate::routes::{
    parse_exchange, parse_interval, parse_limit, parse_optional_exchange, parse_time, require,
    ApiError, DataResponse,
};
use crate::AppState;

const DEFAULT_LIMIT: usize = 1000;
const LIMIT_CAP: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    pub exchange: Option<String>,
    #[serde(rename = "marketId")]
    pub market_id: Option<String>,
    pub interval: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub exchange: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/candles", get(list_candles))
        .route("/candles/markets", get(list_candle_markets))
}

/// List candles for one market at one resolution
async fn list_candles(
    State(state): State<AppState>,
    Query(params): Query<CandlesQuery>,
) -> Result<Json<DataResponse<indexer_core::Candle>>, ApiError> {
    let exchange = parse_exchange(require(&params.exchange, "exchange")?)?;
    let market_id = require(&params.market_id, "marketId")?;
    let interval = parse_interval(require(&params.interval, "interval")?)?;
    let start = parse_time(&params.start, "start")?;
    let end = parse_time(&params.end, "end")?;
    let limit = parse_limit(&params.limit, DEFAULT_LIMIT, LIMIT_CAP)?;

    let candles = state
        .storage
        .query_candles(exchange, market_id, interval, start, end, limit)
        .map_err(|e| {
            error!("candle query failed: {}", e);
            ApiError::internal("candle query failed")
        })?;

    Ok(Json(DataResponse { data: candles }))
}

/// Markets that have candle data, ranked by activity
async fn list_candle_markets(
    State(state): State<AppState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<DataResponse<MarketActivity>>, ApiError> {
    let exchange = parse_optional_exchange(&params.exchange)?;

    let mut markets = state.storage.candle_markets(exchange).map_err(|e| {
        error!("candle markets query failed: {}", e);
        ApiError::internal("market query failed")
    })?;

    for market in &mut markets {
        market.title = state.metadata.title(market.exchange, &market.market_id).await;
    }

    Ok(Json(DataResponse { data: markets }))
}
