//! HTTP route definitions and shared response plumbing

mod candles;
mod health;
mod stats;
mod trades;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use indexer_core::{CandleInterval, Exchange, TradeSide};

use crate::AppState;

/// Create the query routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(candles::routes())
        .merge(trades::routes())
        .merge(health::routes())
        .merge(stats::routes())
}

/// Create the WebSocket route
pub fn ws_routes() -> Router<AppState> {
    ws::routes()
}

/// Every successful list response is `{"data": [...]}`
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: Vec<T>,
}

/// Every failure is `{"error": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Query parameter parsing
// ============================================================================

pub(crate) fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing required parameter '{}'", name)))
}

pub(crate) fn parse_exchange(raw: &str) -> Result<Exchange, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid exchange '{}'", raw)))
}

pub(crate) fn parse_optional_exchange(
    value: &Option<String>,
) -> Result<Option<Exchange>, ApiError> {
    value.as_deref().map(parse_exchange).transpose()
}

pub(crate) fn parse_interval(raw: &str) -> Result<CandleInterval, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid interval '{}', expected 1s|1m|1h", raw)))
}

pub(crate) fn parse_side(value: &Option<String>) -> Result<Option<TradeSide>, ApiError> {
    value
        .as_deref()
        .map(|raw| {
            raw.parse()
                .map_err(|_| ApiError::bad_request(format!("invalid side '{}'", raw)))
        })
        .transpose()
}

pub(crate) fn parse_time(
    value: &Option<String>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .as_deref()
        .map(|raw| {
            raw.parse().map_err(|_| {
                ApiError::bad_request(format!("invalid {} '{}', expected ISO-8601", name, raw))
            })
        })
        .transpose()
}

pub(crate) fn parse_limit(
    value: &Option<String>,
    default: usize,
    cap: usize,
) -> Result<usize, ApiError> {
    match value.as_deref() {
        None => Ok(default),
        Some(raw) => {
            let limit: usize = raw
                .parse()
                .map_err(|_| ApiError::bad_request(format!("invalid limit '{}'", raw)))?;
            if limit == 0 {
                return Err(ApiError::bad_request("limit must be positive"));
            }
            Ok(limit.min(cap))
        }
    }
}
