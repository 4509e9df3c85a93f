pub mod analysis;
pub mod candles;
pub mod coins;
pub mod health;
pub mod status;
pub mod sync;

use crate::error::{AppError, Result};
use crate::types::Timeframe;
use crate::AppState;
use axum::Router;
use serde::Serialize;

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub meta: ApiMeta,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            meta: ApiMeta::default(),
        }
    }

    pub fn with_meta(data: T, meta: ApiMeta) -> Self {
        Self { data, meta }
    }
}

/// Parse an optional timeframe query value.
pub(crate) fn parse_timeframe(value: Option<&str>, default: Timeframe) -> Result<Timeframe> {
    match value {
        None => Ok(default),
        Some(key) => Timeframe::from_key(key)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown timeframe: {}", key))),
    }
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/coins", coins::router())
        .nest("/api/candles", candles::router())
        .nest("/api/sync", sync::router())
        .merge(analysis::router())
        .merge(status::router())
}
