use super::{body_excerpt, KlineSource};
use crate::error::{AppError, Result};
use crate::types::time::from_millis;
use crate::types::{MarketVariant, RawKline, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const BINANCE_SPOT_KLINES_URL: &str = "https://api.binance.com/api/v3/klines";
const BINANCE_FUTURES_KLINES_URL: &str = "https://fapi.binance.com/fapi/v1/klines";

/// Largest page either kline endpoint accepts.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Binance REST client for spot and USDⓈ-M futures klines.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    api_key: Option<String>,
}

impl BinanceClient {
    /// Create a new Binance client with a bounded request timeout.
    pub fn new(api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .user_agent("emascan/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    fn klines_url(market: MarketVariant) -> &'static str {
        match market {
            MarketVariant::Spot => BINANCE_SPOT_KLINES_URL,
            MarketVariant::Futures => BINANCE_FUTURES_KLINES_URL,
        }
    }
}

#[async_trait]
impl KlineSource for BinanceClient {
    async fn fetch_klines(
        &self,
        market: MarketVariant,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawKline>> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", pair.to_string()),
            ("interval", timeframe.binance_interval().to_string()),
            ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
        ];
        if let Some(start) = start {
            query.push(("startTime", start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            query.push(("endTime", end.timestamp_millis().to_string()));
        }

        let mut request = self.client.get(Self::klines_url(market)).query(&query);
        if let Some(ref key) = self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(
                "Binance {} klines for {} returned {}: {}",
                market,
                pair,
                status,
                body_excerpt(&text)
            );
            return Err(AppError::ExternalApi(format!(
                "Binance {} error for {}: {}",
                market, pair, status
            )));
        }

        let rows: Vec<Vec<Value>> = response.json().await?;
        let klines = parse_klines(&rows);
        debug!(
            "Binance {} {} {}: {} rows, {} valid",
            market,
            pair,
            timeframe,
            rows.len(),
            klines.len()
        );
        Ok(klines)
    }
}

/// Numbers arrive as strings, but accept JSON numbers too.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_row(row: &[Value]) -> Option<RawKline> {
    let open_time = from_millis(row.first()?.as_i64()?)?;
    Some(RawKline {
        open_time,
        open: number(row.get(1)?)?,
        high: number(row.get(2)?)?,
        low: number(row.get(3)?)?,
        close: number(row.get(4)?)?,
        volume: number(row.get(5)?)?,
    })
}

/// Convert kline rows, dropping malformed or invalid ones.
pub fn parse_klines(rows: &[Vec<Value>]) -> Vec<RawKline> {
    rows.iter()
        .filter_map(|row| {
            let kline = parse_row(row).filter(RawKline::is_valid);
            if kline.is_none() {
                debug!("Dropping malformed kline row: {:?}", row);
            }
            kline
        })
        .collect()
}
