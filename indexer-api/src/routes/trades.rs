//! Trade query endpoints

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use indexer_core::Trade;
use indexer_storage::MarketActivity;

use crate::routes::{
    parse_exchange, parse_limit, parse_optional_exchange, parse_side, parse_time, require,
    ApiError, DataResponse,
};
use crate::AppState;

const DEFAULT_LIMIT: usize = 100;
const LIMIT_CAP: usize = 1000;
const LATEST_DEFAULT_LIMIT: usize = 50;
const LATEST_LIMIT_CAP: usize = 200;

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub exchange: Option<String>,
    #[serde(rename = "marketId")]
    pub market_id: Option<String>,
    pub side: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub exchange: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub exchange: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/trades", get(list_trades))
        .route("/trades/latest", get(latest_trades))
        .route("/trades/markets", get(list_trade_markets))
}

/// List trades for one market, newest first
async fn list_trades(
    State(state): State<AppState>,
    Query(params): Query<TradesQuery>,
) -> Result<Json<DataResponse<Trade>>, ApiError> {
    let exchange = parse_exchange(require(&params.exchange, "exchange")?)?;
    let market_id = require(&params.market_id, "marketId")?;
    let side = parse_side(&params.side)?;
    let start = parse_time(&params.start, "start")?;
    let end = parse_time(&params.end, "end")?;
    let limit = parse_limit(&params.limit, DEFAULT_LIMIT, LIMIT_CAP)?;

    let trades = state
        .storage
        .query_trades(exchange, market_id, side, start, end, limit)
        .map_err(|e| {
            error!("trade query failed: {}", e);
            ApiError::internal("trade query failed")
        })?;

    Ok(Json(DataResponse { data: trades }))
}

/// Most recent trades across markets
async fn latest_trades(
    State(state): State<AppState>,
    Query(params): Query<LatestQuery>,
) -> Result<Json<DataResponse<Trade>>, ApiError> {
    let exchange = parse_optional_exchange(&params.exchange)?;
    let limit = parse_limit(&params.limit, LATEST_DEFAULT_LIMIT, LATEST_LIMIT_CAP)?;

    let trades = state.storage.latest_trades(exchange, limit).map_err(|e| {
        error!("latest trades query failed: {}", e);
        ApiError::internal("trade query failed")
    })?;

    Ok(Json(DataResponse { data: trades }))
}

/// Markets that have trade data, ranked by activity
async fn list_trade_markets(
    State(state): State<AppState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<DataResponse<MarketActivity>>, ApiError> {
    let exchange = parse_optional_exchange(&params.exchange)?;

    let mut markets = state.storage.trade_markets(exchange).map_err(|e| {
        error!("trade markets query failed: {}", e);
        ApiError::internal("market query failed")
    })?;

    for market in &mut markets {
        market.title = state.metadata.title(market.exchange, &market.market_id).await;
    }

    Ok(Json(DataResponse { data: markets }))
}
