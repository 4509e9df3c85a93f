//! Candle fetching with symbol/market fallback, resolution caching and a
//! global request rate limit.

use crate::sources::binance::MAX_PAGE_SIZE;
use crate::sources::KlineSource;
use crate::types::{Candle, MarketVariant, SymbolResolution, Timeframe};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum candles for an incremental fetch to count as a hit.
pub const MIN_CANDLES_INCREMENTAL: usize = 10;
/// Minimum candles for analysis-quality data (one full EMA period).
pub const MIN_CANDLES_ANALYSIS: usize = 50;

/// Quote assets tried, in order, when guessing a provider ticker.
pub const QUOTE_ASSETS: [&str; 4] = ["USDT", "BUSD", "FDUSD", "USDC"];

/// Enforces a minimum delay between consecutive outbound requests.
pub struct RateLimiter {
    min_delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last: Mutex::new(None),
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Candles from one provider variant.
#[derive(Debug, Clone)]
pub struct FetchedCandles {
    pub candles: Vec<Candle>,
    pub resolution: SymbolResolution,
}

/// Every (ticker, market) combination for a symbol, in fallback order.
pub fn symbol_variants(symbol: &str) -> Vec<SymbolResolution> {
    let symbol = symbol.to_uppercase();
    QUOTE_ASSETS
        .iter()
        .flat_map(|quote| {
            let symbol = symbol.clone();
            MarketVariant::ORDER.into_iter().map(move |market| SymbolResolution {
                symbol: symbol.clone(),
                provider_symbol: format!("{}{}", symbol, quote),
                market,
            })
        })
        .collect()
}

/// Fetches candles for logical symbols from a [`KlineSource`].
pub struct ProviderClient {
    source: Arc<dyn KlineSource>,
    limiter: RateLimiter,
    resolutions: DashMap<String, SymbolResolution>,
}

impl ProviderClient {
    pub fn new(source: Arc<dyn KlineSource>, request_delay: Duration) -> Self {
        Self {
            source,
            limiter: RateLimiter::new(request_delay),
            resolutions: DashMap::new(),
        }
    }

    /// Seed the resolution cache, e.g. from persisted coin rows.
    pub fn seed_resolution(&self, resolution: SymbolResolution) {
        self.resolutions
            .insert(resolution.symbol.to_uppercase(), resolution);
    }

    pub fn cached_resolution(&self, symbol: &str) -> Option<SymbolResolution> {
        self.resolutions
            .get(&symbol.to_uppercase())
            .map(|r| r.value().clone())
    }

    /// Fetch candles through the fallback chain.
    ///
    /// The first variant returning at least `min(min_candles, limit)` valid
    /// candles wins; a cached resolution is tried before the full chain.
    /// Returns `None` when every variant fails.
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        min_candles: usize,
    ) -> Option<FetchedCandles> {
        let symbol = symbol.to_uppercase();
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let threshold = min_candles.min(limit);

        let cached = self.cached_resolution(&symbol);
        if let Some(ref resolution) = cached {
            if let Some(fetched) = self
                .try_variant(resolution, timeframe, limit, start, end, threshold)
                .await
            {
                return Some(fetched);
            }
            debug!(
                "Cached resolution {} ({}) missed for {} {}, trying all variants",
                resolution.provider_symbol, resolution.market, symbol, timeframe
            );
        }

        for variant in symbol_variants(&symbol) {
            if cached.as_ref() == Some(&variant) {
                continue;
            }
            if let Some(fetched) = self
                .try_variant(&variant, timeframe, limit, start, end, threshold)
                .await
            {
                self.resolutions.insert(symbol.clone(), variant);
                return Some(fetched);
            }
        }

        warn!("No provider data for {} {} on any variant", symbol, timeframe);
        None
    }

    /// Fetch one page from a known variant. Errors collapse to `None`.
    pub async fn fetch_resolved(
        &self,
        resolution: &SymbolResolution,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.request(resolution, timeframe, limit, start, end).await
    }

    async fn try_variant(
        &self,
        resolution: &SymbolResolution,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        threshold: usize,
    ) -> Option<FetchedCandles> {
        let candles = self.request(resolution, timeframe, limit, start, end).await?;
        if candles.len() < threshold {
            debug!(
                "{} ({}) returned {} candles, need {}",
                resolution.provider_symbol,
                resolution.market,
                candles.len(),
                threshold
            );
            return None;
        }
        Some(FetchedCandles {
            candles,
            resolution: resolution.clone(),
        })
    }

    async fn request(
        &self,
        resolution: &SymbolResolution,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<Vec<Candle>> {
        self.limiter.acquire().await;
        match self
            .source
            .fetch_klines(
                resolution.market,
                &resolution.provider_symbol,
                timeframe,
                limit,
                start,
                end,
            )
            .await
        {
            Ok(klines) => Some(
                klines
                    .into_iter()
                    .filter(|k| k.is_valid())
                    .map(|k| k.into_candle(&resolution.symbol, timeframe))
                    .collect(),
            ),
            Err(e) => {
                debug!(
                    "{} ({}) {} fetch failed: {}",
                    resolution.provider_symbol, resolution.market, timeframe, e
                );
                None
            }
        }
    }
}
