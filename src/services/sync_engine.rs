//! Per-pair candle synchronization and EMA maintenance.
//!
//! A pair with no stored candles is backfilled over its long horizon; a pair
//! with history fetches only the bars since its newest stored candle. Either
//! way the fetched bars are upserted, EMA50 is recomputed over the full stored
//! series and written back, and the latest analysis snapshot is refreshed.

use super::analysis_cache::AnalysisCache;
use super::batch_fetcher::BatchFetcher;
use super::ema::{compute_ema, EMA_PERIOD};
use super::provider::{ProviderClient, MIN_CANDLES_ANALYSIS, MIN_CANDLES_INCREMENTAL};
use super::store::{CandleStore, MetadataStore};
use crate::error::{AppError, Result};
use crate::sources::binance::MAX_PAGE_SIZE;
use crate::types::{
    Candle, EmaAnalysis, PairStatus, SymbolResolution, SyncOutcome, SyncPhase, SyncReport,
    Timeframe,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extra bars requested on top of the elapsed-time estimate.
pub const SAFETY_BUFFER: usize = 2;

/// Bars to request for an incremental update since `latest`.
///
/// `floor(elapsed / bar) + SAFETY_BUFFER`, capped at one provider page.
/// Never less than `SAFETY_BUFFER`, non-decreasing in `now`.
pub fn calculate_candles_needed(latest: DateTime<Utc>, now: DateTime<Utc>, timeframe: Timeframe) -> usize {
    let elapsed_ms = (now - latest).num_milliseconds().max(0);
    let bars = usize::try_from(elapsed_ms / timeframe.millis()).unwrap_or(usize::MAX);
    bars.saturating_add(SAFETY_BUFFER).min(MAX_PAGE_SIZE)
}

/// Candles a provider variant must return for an incremental fetch of
/// `needed` bars. A `startTime` query cannot return more than the bars that
/// exist from the latest stored one up to now.
fn incremental_min_candles(needed: usize) -> usize {
    let possible = needed.saturating_sub(SAFETY_BUFFER) + 1;
    MIN_CANDLES_INCREMENTAL.min(possible)
}

type PairKey = (String, Timeframe);

/// Keeps stored candles, EMA50 and analysis snapshots in step with the provider.
pub struct SyncEngine {
    candles: Arc<dyn CandleStore>,
    metadata: Arc<dyn MetadataStore>,
    provider: Arc<ProviderClient>,
    fetcher: BatchFetcher,
    cache: AnalysisCache,
    locks: DashMap<PairKey, Arc<Mutex<()>>>,
    statuses: DashMap<PairKey, PairStatus>,
}

impl SyncEngine {
    pub fn new(
        candles: Arc<dyn CandleStore>,
        metadata: Arc<dyn MetadataStore>,
        provider: Arc<ProviderClient>,
        cache: AnalysisCache,
    ) -> Self {
        Self {
            candles,
            metadata,
            fetcher: BatchFetcher::new(provider.clone()),
            provider,
            cache,
            locks: DashMap::new(),
            statuses: DashMap::new(),
        }
    }

    /// Load persisted symbol resolutions into the provider cache.
    pub fn seed_resolutions(&self) -> Result<usize> {
        let mut seeded = 0;
        for coin in self.metadata.list_coins(None)? {
            if let Some(resolution) = coin.resolution() {
                self.provider.seed_resolution(resolution);
                seeded += 1;
            }
        }
        debug!("Seeded {} symbol resolutions", seeded);
        Ok(seeded)
    }

    /// Sync one pair now. `timeframe` is a key such as `"4h"`.
    pub async fn sync_one(&self, symbol: &str, timeframe: &str) -> Result<SyncReport> {
        let timeframe = Timeframe::from_key(timeframe)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown timeframe: {}", timeframe)))?;
        self.sync_pair(symbol, timeframe, Utc::now()).await
    }

    /// Sync one pair as of `now`.
    ///
    /// Provider unavailability is `Ok` with [`SyncOutcome::Unavailable`];
    /// storage failures are `Err`.
    pub async fn sync_pair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let symbol = normalize_symbol(symbol)?;
        let key = (symbol.clone(), timeframe);

        let lock = self.locks.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;

        self.mark_running(&key, now);
        let result = self.run_cycle(&key, now).await;
        self.mark_finished(&key, &result);

        match &result {
            Ok(report) => debug!(
                "Synced {} {}: {:?}, fetched {}, stored {}",
                symbol, timeframe, report.outcome, report.fetched, report.stored_total
            ),
            Err(e) => warn!("Sync failed for {} {}: {}", symbol, timeframe, e),
        }
        result
    }

    async fn run_cycle(&self, key: &PairKey, now: DateTime<Utc>) -> Result<SyncReport> {
        let (symbol, timeframe) = (key.0.as_str(), key.1);
        let latest = self.candles.latest_time(symbol, timeframe)?;

        let mut report = SyncReport {
            symbol: symbol.to_string(),
            timeframe,
            phase: if latest.is_some() {
                SyncPhase::Incremental
            } else {
                SyncPhase::NeedsBackfill
            },
            outcome: SyncOutcome::Unavailable,
            requested: 0,
            fetched: 0,
            stored_total: 0,
            latest_time: latest,
            resolution: None,
            ema50: None,
        };

        let fetched = match latest {
            None => self.fetch_backfill(key, now, &mut report).await,
            Some(latest) => self.fetch_incremental(key, latest, now, &mut report).await,
        };
        let Some((candles, resolution)) = fetched else {
            return Ok(report);
        };

        report.fetched = candles.len();
        self.candles.upsert_candles(&candles)?;
        self.remember_resolution(&resolution)?;
        report.resolution = Some(resolution);

        self.recompute(key, now, &mut report).await?;
        Ok(report)
    }

    async fn fetch_backfill(
        &self,
        key: &PairKey,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Option<(Vec<Candle>, SymbolResolution)> {
        let (symbol, timeframe) = (key.0.as_str(), key.1);
        self.set_phase(key, SyncPhase::Backfilling);

        let target = timeframe.long_horizon();
        report.requested = target;
        info!("Backfilling {} {} ({} candles)", symbol, timeframe, target);

        let batch = self.fetcher.fetch_history(symbol, timeframe, target, now).await?;
        if batch.candles.len() < MIN_CANDLES_ANALYSIS {
            warn!(
                "Backfill for {} {} returned only {} candles, marking unavailable",
                symbol,
                timeframe,
                batch.candles.len()
            );
            return None;
        }
        Some((batch.candles, batch.resolution))
    }

    async fn fetch_incremental(
        &self,
        key: &PairKey,
        latest: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Option<(Vec<Candle>, SymbolResolution)> {
        let (symbol, timeframe) = (key.0.as_str(), key.1);
        let needed = calculate_candles_needed(latest, now, timeframe);
        report.requested = needed;

        let min_candles = incremental_min_candles(needed);

        let fetched = self
            .provider
            .fetch_candles(symbol, timeframe, needed, Some(latest), None, min_candles)
            .await?;
        Some((fetched.candles, fetched.resolution))
    }

    fn remember_resolution(&self, resolution: &SymbolResolution) -> Result<()> {
        let stored = self.metadata.get_resolution(&resolution.symbol)?;
        if stored.as_ref() != Some(resolution) {
            info!(
                "{} resolved to {} ({})",
                resolution.symbol, resolution.provider_symbol, resolution.market
            );
            self.metadata.save_resolution(resolution)?;
        }
        Ok(())
    }

    /// Recompute EMA50 over the whole stored series and refresh the snapshot.
    async fn recompute(&self, key: &PairKey, now: DateTime<Utc>, report: &mut SyncReport) -> Result<()> {
        let (symbol, timeframe) = (key.0.as_str(), key.1);
        let series = self.candles.read_closes(symbol, timeframe)?;
        report.stored_total = series.len();
        report.latest_time = series.last().map(|(t, _)| *t);

        let closes: Vec<f64> = series.iter().map(|(_, close)| *close).collect();
        let Some(ema) = compute_ema(&closes, EMA_PERIOD) else {
            debug!(
                "{} {} has {} candles, EMA{} needs {}",
                symbol,
                timeframe,
                series.len(),
                EMA_PERIOD,
                EMA_PERIOD
            );
            report.outcome = SyncOutcome::InsufficientHistory;
            return Ok(());
        };

        let points: Vec<(DateTime<Utc>, f64)> = series
            .iter()
            .map(|(time, _)| *time)
            .zip(ema.iter().copied())
            .collect();
        self.candles.write_ema_series(symbol, timeframe, &points)?;

        let (Some(&(time, price)), Some(&ema50)) = (series.last(), ema.last()) else {
            report.outcome = SyncOutcome::InsufficientHistory;
            return Ok(());
        };
        report.ema50 = Some(ema50);

        if let Some(analysis) = EmaAnalysis::from_latest(symbol, timeframe, price, ema50, time, now) {
            self.metadata.upsert_analysis(&analysis)?;
            self.cache.publish(&analysis).await;
        }
        report.outcome = SyncOutcome::Updated;
        Ok(())
    }

    // ========== Pair status ==========

    fn mark_running(&self, key: &PairKey, now: DateTime<Utc>) {
        let mut status = self.statuses.entry(key.clone()).or_insert_with(|| PairStatus {
            symbol: key.0.clone(),
            timeframe: key.1,
            phase: SyncPhase::NeedsBackfill,
            running: false,
            last_outcome: None,
            last_error: None,
            consecutive_failures: 0,
            updated_at: now,
        });
        status.running = true;
        status.updated_at = now;
    }

    fn set_phase(&self, key: &PairKey, phase: SyncPhase) {
        if let Some(mut status) = self.statuses.get_mut(key) {
            status.phase = phase;
        }
    }

    fn mark_finished(&self, key: &PairKey, result: &Result<SyncReport>) {
        let Some(mut status) = self.statuses.get_mut(key) else {
            return;
        };
        status.running = false;
        status.updated_at = Utc::now();

        match result {
            Ok(report) => {
                status.last_outcome = Some(report.outcome);
                status.last_error = None;
                status.phase = if report.stored_total > 0 {
                    SyncPhase::Incremental
                } else {
                    report.phase
                };
                if report.outcome == SyncOutcome::Unavailable {
                    status.consecutive_failures += 1;
                } else {
                    status.consecutive_failures = 0;
                }
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                status.consecutive_failures += 1;
            }
        }
    }

    pub fn pair_status(&self, symbol: &str, timeframe: Timeframe) -> Option<PairStatus> {
        self.statuses
            .get(&(symbol.to_uppercase(), timeframe))
            .map(|s| s.value().clone())
    }

    /// Every known pair status, ordered by symbol then timeframe.
    pub fn pair_statuses(&self) -> Vec<PairStatus> {
        let mut all: Vec<PairStatus> = self.statuses.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.timeframe.cmp(&b.timeframe)));
        all
    }
}

fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::BadRequest(format!("Invalid symbol: {:?}", symbol)));
    }
    Ok(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_candles_needed_minimum() {
        assert_eq!(calculate_candles_needed(t0(), t0(), Timeframe::H1), 2);
        // clock skew: latest in the future
        assert_eq!(
            calculate_candles_needed(t0(), t0() - Duration::hours(5), Timeframe::H1),
            2
        );
    }

    #[test]
    fn test_candles_needed_counts_whole_bars() {
        let now = t0() + Duration::minutes(59);
        assert_eq!(calculate_candles_needed(t0(), now, Timeframe::H1), 2);
        let now = t0() + Duration::hours(3) + Duration::minutes(30);
        assert_eq!(calculate_candles_needed(t0(), now, Timeframe::H1), 5);
        let now = t0() + Duration::days(14);
        assert_eq!(calculate_candles_needed(t0(), now, Timeframe::W1), 4);
    }

    #[test]
    fn test_candles_needed_after_130_minutes() {
        let now = t0() + Duration::minutes(130);
        assert_eq!(calculate_candles_needed(t0(), now, Timeframe::H1), 4);
    }

    #[test]
    fn test_candles_needed_from_naive_timestamp() {
        // a stored value without offset is read as UTC, not local time
        let latest = crate::types::time::parse_timestamp("2024-03-01 09:50:00").unwrap();
        assert_eq!(calculate_candles_needed(latest, t0(), Timeframe::H1), 4);
    }

    #[test]
    fn test_candles_needed_monotonic_and_capped() {
        for tf in Timeframe::ALL {
            let mut previous = 0;
            for minutes in (0..200_000).step_by(997) {
                let needed = calculate_candles_needed(t0(), t0() + Duration::minutes(minutes), tf);
                assert!(needed >= previous);
                assert!(needed >= SAFETY_BUFFER);
                assert!(needed <= MAX_PAGE_SIZE);
                previous = needed;
            }
        }
    }

    #[test]
    fn test_incremental_min_candles() {
        assert_eq!(incremental_min_candles(SAFETY_BUFFER), 1);
        assert_eq!(incremental_min_candles(5), 4);
        assert_eq!(incremental_min_candles(MAX_PAGE_SIZE), MIN_CANDLES_INCREMENTAL);
        // never underflows, whatever the sizing function returns
        assert_eq!(incremental_min_candles(0), 1);
        assert_eq!(incremental_min_candles(1), 1);
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" btc ").unwrap(), "BTC");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("BTC/USDT").is_err());
    }
}
