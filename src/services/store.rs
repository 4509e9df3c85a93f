//! Storage seams used by the sync engine and the API.
//!
//! Both traits are synchronous; implementations guard their connection with a
//! mutex and are called directly from async code, the same way the SQLite
//! store is used everywhere else in the service.

use crate::error::Result;
use crate::types::{
    Candle, CandleCoverage, Coin, DatabaseStats, EmaAnalysis, ScanRecord, SymbolResolution,
    Timeframe,
};
use chrono::{DateTime, Utc};

/// Candle persistence keyed by `(symbol, timeframe, time)`.
pub trait CandleStore: Send + Sync {
    /// Insert or update candles. Returns the number of rows written.
    ///
    /// An incoming row without an EMA keeps the stored EMA.
    fn upsert_candles(&self, candles: &[Candle]) -> Result<usize>;

    /// Open time of the newest stored candle.
    fn latest_time(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>>;

    /// Every stored close, oldest first.
    fn read_closes(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<(DateTime<Utc>, f64)>>;

    fn write_ema(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        time: DateTime<Utc>,
        value: f64,
    ) -> Result<()>;

    /// Write a whole EMA series.
    fn write_ema_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        series: &[(DateTime<Utc>, f64)],
    ) -> Result<()> {
        for (time, value) in series {
            self.write_ema(symbol, timeframe, *time, *value)?;
        }
        Ok(())
    }

    fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>>;

    /// The newest `limit` candles, oldest first.
    fn recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;

    /// Stored range per timeframe for a symbol.
    fn coverage(&self, symbol: &str) -> Result<Vec<CandleCoverage>>;

    /// Lowest low and highest high of candles opened at or after `since`,
    /// or of every stored candle when `since` is `None`.
    fn price_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<(f64, f64)>>;
}

/// Coins, resolutions, analysis snapshots and scan history.
pub trait MetadataStore: Send + Sync {
    /// Insert or refresh market data for coins. Cached resolutions are kept.
    fn upsert_coins(&self, coins: &[Coin]) -> Result<usize>;

    /// Coins ordered by market cap rank.
    fn list_coins(&self, limit: Option<usize>) -> Result<Vec<Coin>>;

    fn get_coin(&self, symbol: &str) -> Result<Option<Coin>>;

    /// Record which provider variant served a symbol.
    fn save_resolution(&self, resolution: &SymbolResolution) -> Result<()>;

    fn get_resolution(&self, symbol: &str) -> Result<Option<SymbolResolution>>;

    /// Upsert on `(symbol, timeframe, analysis_date)`.
    fn upsert_analysis(&self, analysis: &EmaAnalysis) -> Result<()>;

    /// Newest snapshot per symbol for one timeframe.
    fn latest_analysis(&self, timeframe: Timeframe) -> Result<Vec<EmaAnalysis>>;

    /// Newest snapshot per timeframe for one symbol.
    fn analysis_for_symbol(&self, symbol: &str) -> Result<Vec<EmaAnalysis>>;

    fn record_scan(&self, record: &ScanRecord) -> Result<()>;

    /// Most recent scans first.
    fn scan_history(&self, limit: usize) -> Result<Vec<ScanRecord>>;

    fn database_stats(&self) -> Result<DatabaseStats>;
}
