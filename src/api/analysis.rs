//! EMA snapshot views: per timeframe, per symbol, alignment and strategy lists.

use super::{parse_timeframe, ApiMeta, ApiResponse};
use crate::error::{AppError, Result};
use crate::services::MetadataStore;
use crate::types::{
    Coin, EmaAnalysis, StrategicEntry, StrategicSummary, Timeframe, TimeframeAlignment, TrendLabel,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    timeframe: Option<String>,
}

/// Snapshot joined with coin metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRow {
    #[serde(flatten)]
    pub analysis: EmaAnalysis,
    pub name: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub trend: TrendLabel,
}

fn coins_by_symbol(state: &AppState) -> Result<HashMap<String, Coin>> {
    Ok(state
        .store
        .list_coins(None)?
        .into_iter()
        .map(|c| (c.symbol.clone(), c))
        .collect())
}

fn join_rows(rows: Vec<EmaAnalysis>, coins: &HashMap<String, Coin>) -> Vec<AnalysisRow> {
    let mut joined: Vec<AnalysisRow> = rows
        .into_iter()
        .map(|analysis| {
            let coin = coins.get(&analysis.symbol);
            AnalysisRow {
                trend: analysis.trend(),
                name: coin.map(|c| c.name.clone()),
                market_cap_rank: coin.and_then(|c| c.market_cap_rank),
                analysis,
            }
        })
        .collect();
    joined.sort_by_key(|r| (r.market_cap_rank.unwrap_or(u32::MAX), r.analysis.symbol.clone()));
    joined
}

/// Latest snapshot per coin for one timeframe (default weekly).
async fn get_analysis(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<ApiResponse<Vec<AnalysisRow>>>> {
    let timeframe = parse_timeframe(query.timeframe.as_deref(), Timeframe::W1)?;
    let coins = coins_by_symbol(&state)?;
    let rows = join_rows(state.store.latest_analysis(timeframe)?, &coins);

    let meta = ApiMeta {
        total: Some(rows.len()),
        timeframe: Some(timeframe),
        ..Default::default()
    };
    Ok(Json(ApiResponse::with_meta(rows, meta)))
}

/// Snapshots of one symbol. Served from the Redis mirror when connected;
/// timeframes the mirror lacks are read from the store.
async fn symbol_snapshots(state: &AppState, symbol: &str) -> Result<Vec<EmaAnalysis>> {
    let tracked = state.scanner.timeframes();
    let mut rows = state.cache.get_all(symbol, tracked).await;
    if rows.len() < tracked.len() {
        let mirrored: Vec<Timeframe> = rows.iter().map(|r| r.timeframe).collect();
        rows.extend(
            state
                .store
                .analysis_for_symbol(symbol)?
                .into_iter()
                .filter(|r| !mirrored.contains(&r.timeframe)),
        );
    }
    Ok(rows)
}

async fn get_symbol_analysis(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<Vec<AnalysisRow>>>> {
    let rows = symbol_snapshots(&state, &symbol).await?;
    if rows.is_empty() {
        return Err(AppError::NotFound(format!("No analysis for {}", symbol)));
    }
    let coins = coins_by_symbol(&state)?;
    let mut rows = join_rows(rows, &coins);
    rows.sort_by_key(|r| r.analysis.timeframe);
    Ok(Json(ApiResponse::new(rows)))
}

/// Latest snapshots for every tracked timeframe, grouped by symbol.
fn snapshots_by_symbol(state: &AppState) -> Result<BTreeMap<String, Vec<EmaAnalysis>>> {
    let mut grouped: BTreeMap<String, Vec<EmaAnalysis>> = BTreeMap::new();
    for &timeframe in state.scanner.timeframes() {
        for row in state.store.latest_analysis(timeframe)? {
            grouped.entry(row.symbol.clone()).or_default().push(row);
        }
    }
    Ok(grouped)
}

/// Multi-timeframe alignment, strongest agreement first.
async fn get_alignment(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<TimeframeAlignment>>>> {
    let mut alignment: Vec<TimeframeAlignment> = snapshots_by_symbol(&state)?
        .iter()
        .filter_map(|(symbol, rows)| TimeframeAlignment::from_snapshots(symbol, rows))
        .collect();
    alignment.sort_by(|a, b| {
        b.alignment_score
            .total_cmp(&a.alignment_score)
            .then(b.total_timeframes.cmp(&a.total_timeframes))
            .then(a.symbol.cmp(&b.symbol))
    });

    let meta = ApiMeta {
        total: Some(alignment.len()),
        ..Default::default()
    };
    Ok(Json(ApiResponse::with_meta(alignment, meta)))
}

/// Evaluate / trade-now / avoid lists from weekly and 4h snapshots.
async fn get_strategic_summary(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StrategicSummary>>> {
    let coins = coins_by_symbol(&state)?;

    let weekly: Vec<StrategicEntry> = state
        .store
        .latest_analysis(Timeframe::W1)?
        .into_iter()
        .map(|a| {
            let coin = coins.get(&a.symbol);
            StrategicEntry {
                name: coin.map(|c| c.name.clone()),
                market_cap_rank: coin.and_then(|c| c.market_cap_rank),
                symbol: a.symbol,
                current_price: a.current_price,
                ema50: a.ema50,
                pct_from_ema50: a.pct_from_ema50,
                above_ema50: a.above_ema50,
                four_h_pct_from_ema: None,
            }
        })
        .collect();

    let four_h: BTreeMap<String, f64> = state
        .store
        .latest_analysis(Timeframe::H4)?
        .into_iter()
        .map(|a| (a.symbol, a.pct_from_ema50))
        .collect();

    Ok(Json(ApiResponse::new(StrategicSummary::build(weekly, &four_h))))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/ema-analysis", get(get_analysis))
        .route("/api/ema-analysis/:symbol", get(get_symbol_analysis))
        .route("/api/alignment", get(get_alignment))
        .route("/api/strategic-summary", get(get_strategic_summary))
}
