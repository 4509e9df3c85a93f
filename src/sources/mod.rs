pub mod binance;
pub mod coingecko;

pub use binance::BinanceClient;
pub use coingecko::CoinGeckoUniverse;

use crate::error::Result;
use crate::types::{MarketVariant, RawKline, Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Raw kline access for one market of a provider.
///
/// `start` and `end` are inclusive bounds on bar open time. With a `start`
/// the provider returns the first `limit` bars at or after it; with only an
/// `end` it returns the last `limit` bars up to it.
#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch_klines(
        &self,
        market: MarketVariant,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawKline>>;
}

/// Longest slice of an error body kept in a log line.
const EXCERPT_CHARS: usize = 200;

/// First characters of a provider error body. Cuts on a character boundary
/// so a multibyte body never splits a code point.
pub(crate) fn body_excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}
