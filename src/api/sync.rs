//! Manual sync trigger for a single (symbol, timeframe) pair.

use super::ApiResponse;
use crate::error::Result;
use crate::types::SyncReport;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use tracing::info;

/// Run one sync cycle now and return what it did.
///
/// Shares the per-pair lock with the scanner, so a concurrent scheduled sync
/// of the same pair finishes first.
async fn sync_pair(
    State(state): State<AppState>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Result<Json<ApiResponse<SyncReport>>> {
    info!("Manual sync requested for {} {}", symbol, timeframe);
    let report = state.engine.sync_one(&symbol, &timeframe).await?;
    Ok(Json(ApiResponse::new(report)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:symbol/:timeframe", post(sync_pair))
}
