use super::{parse_timeframe, ApiMeta, ApiResponse};
use crate::error::{AppError, Result};
use crate::services::CandleStore;
use crate::types::{Candle, Timeframe};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    timeframe: Option<String>,
    limit: Option<usize>,
}

/// Most recent stored candles for a symbol, oldest first.
async fn get_candles(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<CandlesQuery>,
) -> Result<Json<ApiResponse<Vec<Candle>>>> {
    let timeframe = parse_timeframe(query.timeframe.as_deref(), Timeframe::D1)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let candles = state.store.recent_candles(&symbol, timeframe, limit)?;
    if candles.is_empty() {
        return Err(AppError::NotFound(format!(
            "No {} candles for {}",
            timeframe,
            symbol.to_uppercase()
        )));
    }

    let meta = ApiMeta {
        total: Some(candles.len()),
        limit: Some(limit),
        timeframe: Some(timeframe),
    };
    Ok(Json(ApiResponse::with_meta(candles, meta)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:symbol", get(get_candles))
}
