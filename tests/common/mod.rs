//! Shared fixtures: an in-process exchange and a store that refuses writes.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use emascan::config::Config;
use emascan::error::{AppError, Result};
use emascan::services::{AnalysisCache, CandleStore, StaticCoinList};
use emascan::sources::KlineSource;
use emascan::types::{Candle, CandleCoverage, MarketVariant, RawKline, Timeframe};
use emascan::AppState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One request seen by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub market: MarketVariant,
    pub pair: String,
    pub limit: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Serves klines the way Binance does: with `start`, the first `limit` bars
/// at or after it; otherwise the last `limit` bars up to `end`. Unknown
/// pairs are an error. Bars opening after the exchange clock are hidden.
#[derive(Default)]
pub struct MockExchange {
    books: Mutex<HashMap<(String, MarketVariant, Timeframe), Vec<RawKline>>>,
    clock: Mutex<Option<DateTime<Utc>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bars of one pair.
    pub fn list(&self, pair: &str, market: MarketVariant, timeframe: Timeframe, bars: Vec<RawKline>) {
        self.books
            .lock()
            .unwrap()
            .insert((pair.to_string(), market, timeframe), bars);
    }

    /// Change the close of the bar opening at `time`.
    pub fn revise_close(&self, pair: &str, market: MarketVariant, timeframe: Timeframe, time: DateTime<Utc>, close: f64) {
        let mut books = self.books.lock().unwrap();
        let bars = books.get_mut(&(pair.to_string(), market, timeframe)).unwrap();
        let bar = bars.iter_mut().find(|b| b.open_time == time).unwrap();
        bar.close = close;
    }

    pub fn set_clock(&self, now: DateTime<Utc>) {
        *self.clock.lock().unwrap() = Some(now);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl KlineSource for MockExchange {
    async fn fetch_klines(
        &self,
        market: MarketVariant,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawKline>> {
        self.calls.lock().unwrap().push(Call {
            market,
            pair: pair.to_string(),
            limit,
            start,
            end,
        });

        let clock = *self.clock.lock().unwrap();
        let books = self.books.lock().unwrap();
        let bars = books
            .get(&(pair.to_string(), market, timeframe))
            .ok_or_else(|| AppError::ExternalApi(format!("Invalid symbol {}", pair)))?;

        let visible = bars.iter().copied().filter(|b| {
            clock.map_or(true, |now| b.open_time <= now) && end.map_or(true, |end| b.open_time <= end)
        });

        Ok(match start {
            Some(start) => visible.filter(|b| b.open_time >= start).take(limit).collect(),
            None => {
                let all: Vec<RawKline> = visible.collect();
                all[all.len().saturating_sub(limit)..].to_vec()
            }
        })
    }
}

/// Candle store whose writes always fail.
pub struct BrokenStore;

impl CandleStore for BrokenStore {
    fn upsert_candles(&self, _candles: &[Candle]) -> Result<usize> {
        Err(AppError::Internal("disk I/O error".to_string()))
    }

    fn latest_time(&self, _symbol: &str, _timeframe: Timeframe) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    fn read_closes(&self, _symbol: &str, _timeframe: Timeframe) -> Result<Vec<(DateTime<Utc>, f64)>> {
        Ok(Vec::new())
    }

    fn write_ema(&self, _symbol: &str, _timeframe: Timeframe, _time: DateTime<Utc>, _value: f64) -> Result<()> {
        Err(AppError::Internal("disk I/O error".to_string()))
    }

    fn latest_candle(&self, _symbol: &str, _timeframe: Timeframe) -> Result<Option<Candle>> {
        Ok(None)
    }

    fn recent_candles(&self, _symbol: &str, _timeframe: Timeframe, _limit: usize) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    fn coverage(&self, _symbol: &str) -> Result<Vec<CandleCoverage>> {
        Ok(Vec::new())
    }

    fn price_range(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Option<(f64, f64)>> {
        Ok(None)
    }
}

pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// `count` consecutive bars, the last one opening at `last_open`.
pub fn bars(timeframe: Timeframe, last_open: DateTime<Utc>, count: usize, close: impl Fn(usize) -> f64) -> Vec<RawKline> {
    (0..count)
        .map(|i| {
            let back = (count - 1 - i) as i64;
            let price = close(i);
            RawKline {
                open_time: last_open - Duration::milliseconds(back * timeframe.millis()),
                open: price,
                high: price * 1.01,
                low: price * 0.99,
                close: price,
                volume: 1_000.0,
            }
        })
        .collect()
}

pub fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        top_n: 10,
        static_universe: true,
        timeframes: vec![Timeframe::D1],
        request_delay_ms: 0,
        max_concurrent_syncs: 2,
        sync_on_startup: false,
        ..Config::default()
    }
}

pub fn app_state(config: Config, exchange: Arc<MockExchange>, coins: &[(&str, &str)]) -> AppState {
    let store = Arc::new(emascan::services::SqliteStore::new_in_memory().unwrap());
    let universe = StaticCoinList::new(
        coins
            .iter()
            .map(|(s, n)| (s.to_string(), n.to_string()))
            .collect(),
        config.top_n,
    );
    AppState::new(
        Arc::new(config),
        store,
        exchange,
        Arc::new(universe),
        AnalysisCache::disabled(),
    )
}
