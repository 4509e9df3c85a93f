//! Integration tests for the HTTP API, driven through the router in-process.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use common::*;
use emascan::api;
use emascan::types::{MarketVariant, Timeframe};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let exchange = Arc::new(MockExchange::new());
    let today = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    exchange.list(
        "BTCUSDT",
        MarketVariant::Spot,
        Timeframe::D1,
        bars(Timeframe::D1, today, 120, |i| 30_000.0 + i as f64 * 100.0),
    );
    let state = app_state(test_config(), exchange, &[("BTC", "Bitcoin")]);
    api::router().with_state(state)
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ============================================================================
// Health and Status
// ============================================================================

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["redisConnected"], false);
    assert_eq!(body["scanning"], false);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_status_before_first_scan() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["scan"]["message"], "Ready");
    assert_eq!(body["data"]["timeframes"], serde_json::json!(["1d"]));
    assert_eq!(body["data"]["retryPolicy"]["kind"], "next_tick");
    assert_eq!(body["data"]["pairsTracked"], 0);
}

// ============================================================================
// Manual Sync
// ============================================================================

#[tokio::test]
async fn test_manual_sync_then_read_back() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/api/sync/btc/1d").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbol"], "BTC");
    assert_eq!(body["data"]["phase"], "needs_backfill");
    assert_eq!(body["data"]["outcome"], "updated");
    assert_eq!(body["data"]["storedTotal"], 120);
    assert_eq!(body["data"]["resolution"]["providerSymbol"], "BTCUSDT");

    let (status, body) = send(&app, Method::GET, "/api/candles/BTC?timeframe=1d&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let candles = body["data"].as_array().unwrap();
    assert_eq!(candles.len(), 10);
    assert!(candles.iter().all(|c| c["ema50"].is_number()));
    assert_eq!(body["meta"]["limit"], 10);
    assert_eq!(body["meta"]["timeframe"], "1d");

    let (status, body) = send(&app, Method::GET, "/api/ema-analysis?timeframe=1d").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["symbol"], "BTC");
    assert_eq!(rows[0]["aboveEma50"], true);

    let (status, body) = send(&app, Method::GET, "/api/ema-analysis/btc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["timeframe"], "1d");

    let (status, body) = send(&app, Method::GET, "/api/coins/BTC").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["binanceSymbol"], "BTCUSDT");

    let (status, body) = send(&app, Method::GET, "/api/database-stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["candles"], 120);

    let (_, body) = send(&app, Method::GET, "/api/status").await;
    assert_eq!(body["data"]["pairsTracked"], 1);
    assert!(body["data"]["failingPairs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_sync_of_unlisted_symbol() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/api/sync/NOPE/1d").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "unavailable");

    let (_, body) = send(&app, Method::GET, "/api/status").await;
    let failing = body["data"]["failingPairs"].as_array().unwrap();
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0]["symbol"], "NOPE");
    assert_eq!(failing[0]["consecutiveFailures"], 1);
}

#[tokio::test]
async fn test_coin_details_after_sync() {
    let app = app();
    send(&app, Method::POST, "/api/sync/BTC/1d").await;

    let (status, body) = send(&app, Method::GET, "/api/coins/BTC/details").await;
    assert_eq!(status, StatusCode::OK);
    let details = &body["data"];
    assert_eq!(details["analysis"].as_array().unwrap().len(), 1);

    // 120 daily bars are far short of five years
    assert_eq!(details["confidence"], "LOW");
    assert_eq!(
        details["confidenceFactors"],
        serde_json::json!(["Limited historical data", "Strong bullish trend"])
    );

    let range = &details["priceRange"];
    let low = range["allTimeLow"].as_f64().unwrap();
    assert!((low - 29_700.0).abs() < 1e-6);
    assert_eq!(range["fiveYearLow"], range["allTimeLow"]);
    assert_eq!(range["oneYearHigh"], range["allTimeHigh"]);
    assert_eq!(range["currentPrice"].as_f64().unwrap(), 41_900.0);
    let position = range["pricePosition5y"].as_f64().unwrap();
    assert!(position > 90.0 && position < 100.0, "{}", position);
}

#[tokio::test]
async fn test_symbol_analysis_read_from_store_without_redis() {
    let app = app();
    let (_, health) = send(&app, Method::GET, "/api/health").await;
    assert_eq!(health["redisConnected"], false);

    send(&app, Method::POST, "/api/sync/BTC/1d").await;
    let (status, body) = send(&app, Method::GET, "/api/ema-analysis/btc").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["symbol"], "BTC");
    assert_eq!(rows[0]["aboveEma50"], true);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_unknown_timeframe_is_bad_request() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/api/sync/BTC/2h").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains("2h"));

    let (status, _) = send(&app, Method::GET, "/api/candles/BTC?timeframe=3d").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_data_is_not_found() {
    let app = app();

    for uri in ["/api/candles/BTC", "/api/coins/NOPE", "/api/ema-analysis/BTC"] {
        let (status, body) = send(&app, Method::GET, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["status"], 404);
    }
}

#[tokio::test]
async fn test_empty_lists_are_ok() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/api/scan-history").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
    assert_eq!(body["meta"]["limit"], 10);

    let (status, body) = send(&app, Method::GET, "/api/alignment").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}
