//! Long-horizon history fetched backwards in provider-sized pages.

use super::provider::{ProviderClient, MIN_CANDLES_ANALYSIS};
use crate::sources::binance::MAX_PAGE_SIZE;
use crate::types::{Candle, SymbolResolution, Timeframe};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on pages per backfill.
pub const MAX_BATCHES: usize = 250;

/// Deduplicated history, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBatch {
    pub candles: Vec<Candle>,
    pub resolution: SymbolResolution,
    pub pages: usize,
}

pub struct BatchFetcher {
    provider: Arc<ProviderClient>,
}

impl BatchFetcher {
    pub fn new(provider: Arc<ProviderClient>) -> Self {
        Self { provider }
    }

    /// Fetch up to `total_needed` candles ending at `now`.
    ///
    /// The first page resolves the provider variant through the fallback
    /// chain; `None` means no variant had data. Later pages reuse that
    /// variant and a failure there keeps what was already fetched.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        total_needed: usize,
        now: DateTime<Utc>,
    ) -> Option<HistoryBatch> {
        let mut by_time: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        let mut resolution: Option<SymbolResolution> = None;
        let mut end = now;
        let mut pages = 0;

        while pages < MAX_BATCHES && by_time.len() < total_needed {
            let page_size = (total_needed - by_time.len()).min(MAX_PAGE_SIZE);

            let page = match resolution {
                None => {
                    let fetched = self
                        .provider
                        .fetch_candles(
                            symbol,
                            timeframe,
                            page_size,
                            None,
                            Some(end),
                            MIN_CANDLES_ANALYSIS,
                        )
                        .await?;
                    resolution = Some(fetched.resolution);
                    fetched.candles
                }
                Some(ref res) => {
                    match self
                        .provider
                        .fetch_resolved(res, timeframe, page_size, None, Some(end))
                        .await
                    {
                        Some(candles) => candles,
                        None => {
                            warn!(
                                "Page {} for {} {} failed, keeping {} candles",
                                pages + 1,
                                symbol,
                                timeframe,
                                by_time.len()
                            );
                            break;
                        }
                    }
                }
            };
            pages += 1;

            let Some(earliest) = page.iter().map(|c| c.time).min() else {
                debug!("Empty page for {} {}, history exhausted", symbol, timeframe);
                break;
            };
            let page_len = page.len();
            for candle in page {
                by_time.insert(candle.time, candle);
            }

            if page_len < page_size {
                debug!(
                    "Short page for {} {} ({} < {}), history exhausted",
                    symbol, timeframe, page_len, page_size
                );
                break;
            }
            // a provider that ignores the end bound would loop forever
            if earliest > end {
                break;
            }
            end = earliest - Duration::milliseconds(1);
        }

        let resolution = resolution?;
        let candles: Vec<Candle> = by_time.into_values().collect();
        info!(
            "Fetched {} {} candles for {} in {} pages via {} ({})",
            candles.len(),
            timeframe,
            symbol,
            pages,
            resolution.provider_symbol,
            resolution.market
        );

        Some(HistoryBatch {
            candles,
            resolution,
            pages,
        })
    }
}
