use super::{ApiMeta, ApiResponse};
use crate::error::Result;
use crate::services::{MetadataStore, RetryPolicy};
use crate::types::{DatabaseStats, PairStatus, ScanRecord, ScanStatus, Timeframe};
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub scan: ScanStatus,
    pub timeframes: Vec<Timeframe>,
    pub retry_policy: RetryPolicy,
    pub pairs_tracked: usize,
    /// Pairs whose last sync failed or found no provider data.
    pub failing_pairs: Vec<PairStatus>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    let pairs = state.engine.pair_statuses();
    let pairs_tracked = pairs.len();
    let failing_pairs = pairs
        .into_iter()
        .filter(|p| p.consecutive_failures > 0)
        .collect();

    Json(ApiResponse::new(StatusResponse {
        scan: state.scanner.status().await,
        timeframes: state.scanner.timeframes().to_vec(),
        retry_policy: state.scanner.retry_policy(),
        pairs_tracked,
        failing_pairs,
    }))
}

async fn get_scan_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<ScanRecord>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 100);
    let history = state.store.scan_history(limit)?;
    let meta = ApiMeta {
        total: Some(history.len()),
        limit: Some(limit),
        ..Default::default()
    };
    Ok(Json(ApiResponse::with_meta(history, meta)))
}

async fn get_database_stats(State(state): State<AppState>) -> Result<Json<ApiResponse<DatabaseStats>>> {
    Ok(Json(ApiResponse::new(state.store.database_stats()?)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/scan-history", get(get_scan_history))
        .route("/api/database-stats", get(get_database_stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_serialization() {
        let json = serde_json::to_string(&RetryPolicy::NextTick).unwrap();
        assert_eq!(json, r#"{"kind":"next_tick"}"#);

        let json = serde_json::to_string(&RetryPolicy::Bounded {
            max_failures: 3,
            cooldown_ticks: 5,
        })
        .unwrap();
        assert!(json.contains(r#""kind":"bounded""#));
        assert!(json.contains(r#""max_failures":3"#));
    }
}
