use super::{ApiMeta, ApiResponse};
use crate::error::{AppError, Result};
use crate::services::{CandleStore, MetadataStore};
use crate::types::{
    Coin, ConfidenceRating, CoverageQuality, EmaAnalysis, PriceRange, QualityLabel, Timeframe,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CoinsQuery {
    limit: Option<usize>,
}

/// Coin plus stored coverage, latest snapshots, daily price range and a
/// confidence rating.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinDetails {
    pub coin: Coin,
    pub coverage: Vec<CoverageQuality>,
    pub overall_quality: u8,
    pub overall_label: QualityLabel,
    pub analysis: Vec<EmaAnalysis>,
    pub price_range: PriceRange,
    #[serde(flatten)]
    pub rating: ConfidenceRating,
}

/// List tracked coins by market cap rank.
async fn list_coins(
    State(state): State<AppState>,
    Query(query): Query<CoinsQuery>,
) -> Result<Json<ApiResponse<Vec<Coin>>>> {
    let coins = state.store.list_coins(query.limit)?;
    let meta = ApiMeta {
        total: Some(coins.len()),
        limit: query.limit,
        ..Default::default()
    };
    Ok(Json(ApiResponse::with_meta(coins, meta)))
}

async fn get_coin(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<Coin>>> {
    let coin = state
        .store
        .get_coin(&symbol)?
        .ok_or_else(|| AppError::NotFound(format!("Coin not found: {}", symbol)))?;
    Ok(Json(ApiResponse::new(coin)))
}

/// Daily low/high over all history, five years and one year before `now`.
fn daily_price_range(state: &AppState, symbol: &str, now: DateTime<Utc>) -> Result<PriceRange> {
    let range_since = |months: u32| -> Result<Option<(f64, f64)>> {
        let since = now.checked_sub_months(Months::new(months));
        state.store.price_range(symbol, Timeframe::D1, since)
    };
    let current_price = state
        .store
        .latest_candle(symbol, Timeframe::D1)?
        .map(|c| c.close);

    Ok(PriceRange::new(
        state.store.price_range(symbol, Timeframe::D1, None)?,
        range_since(60)?,
        range_since(12)?,
        current_price,
    ))
}

async fn get_coin_details(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<CoinDetails>>> {
    let coin = state
        .store
        .get_coin(&symbol)?
        .ok_or_else(|| AppError::NotFound(format!("Coin not found: {}", symbol)))?;

    let coverage: Vec<CoverageQuality> = state
        .store
        .coverage(&coin.symbol)?
        .into_iter()
        .map(CoverageQuality::score)
        .collect();
    let overall_quality = CoverageQuality::overall(&coverage);
    let analysis = state.store.analysis_for_symbol(&coin.symbol)?;
    let price_range = daily_price_range(&state, &coin.symbol, Utc::now())?;
    let rating = ConfidenceRating::assess(overall_quality, &analysis);

    Ok(Json(ApiResponse::new(CoinDetails {
        coin,
        coverage,
        overall_quality,
        overall_label: QualityLabel::from_score(overall_quality),
        analysis,
        price_range,
        rating,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coins))
        .route("/:symbol", get(get_coin))
        .route("/:symbol/details", get(get_coin_details))
}
