//! Scheduled scans over the coin universe.
//!
//! Each tick evaluates the scheduler once, then syncs every (coin, due
//! timeframe) pair with bounded concurrency. A failing pair is counted and
//! left to the retry policy; it never aborts the scan.

use super::retry::{RetryLedger, RetryPolicy};
use super::scheduler::ScheduleTracker;
use super::store::MetadataStore;
use super::sync_engine::SyncEngine;
use super::universe::CoinUniverse;
use crate::config::Config;
use crate::error::Result;
use crate::types::{Coin, EmaAnalysis, ScanRecord, ScanStatus, SyncOutcome, Timeframe};
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Scanner {
    engine: Arc<SyncEngine>,
    metadata: Arc<dyn MetadataStore>,
    universe: Arc<dyn CoinUniverse>,
    tracker: ScheduleTracker,
    ledger: RetryLedger,
    status: RwLock<ScanStatus>,
    coins: RwLock<Vec<Coin>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    timeframes: Vec<Timeframe>,
    top_n: usize,
    max_concurrent: usize,
    universe_refresh: Duration,
    check_interval: std::time::Duration,
    sync_on_startup: bool,
}

impl Scanner {
    pub fn new(
        engine: Arc<SyncEngine>,
        metadata: Arc<dyn MetadataStore>,
        universe: Arc<dyn CoinUniverse>,
        config: &Config,
    ) -> Self {
        Self {
            engine,
            metadata,
            universe,
            tracker: ScheduleTracker::new(),
            ledger: RetryLedger::new(config.retry),
            status: RwLock::new(ScanStatus::idle()),
            coins: RwLock::new(Vec::new()),
            last_refresh: RwLock::new(None),
            timeframes: config.timeframes.clone(),
            top_n: config.top_n,
            max_concurrent: config.max_concurrent_syncs.max(1),
            universe_refresh: Duration::minutes(config.universe_refresh_minutes.max(1)),
            check_interval: std::time::Duration::from_secs(config.check_interval_secs.max(1)),
            sync_on_startup: config.sync_on_startup,
        }
    }

    /// Snapshot of the current or last scan.
    pub async fn status(&self) -> ScanStatus {
        self.status.read().await.clone()
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.ledger.policy()
    }

    /// Drive scans forever, one scheduler evaluation per tick.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Scanner started: timeframes {:?}, tick {}s, concurrency {}",
            self.timeframes.iter().map(|tf| tf.key()).collect::<Vec<_>>(),
            self.check_interval.as_secs(),
            self.max_concurrent
        );

        if self.sync_on_startup {
            let status = self.run_scan(self.timeframes.clone(), Utc::now()).await;
            info!("Startup sync: {}", status.message);
        }

        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let status = self.sync_due(Utc::now()).await;
            if status.total_pairs > 0 {
                info!("Scan {}: {}", status.scan_id, status.message);
            }
        }
    }

    /// Sync every pair whose timeframe is due at `now`.
    ///
    /// Returns the finished scan status; with nothing due it is an empty,
    /// finished status and no scan is recorded.
    pub async fn sync_due(&self, now: DateTime<Utc>) -> ScanStatus {
        let due = self.tracker.take_due(&self.timeframes, now);
        if due.is_empty() {
            let mut status = ScanStatus::start(now, Vec::new(), 0);
            status.finish(now);
            status.message = "Nothing due".to_string();
            return status;
        }
        debug!("Due at {}: {:?}", now, due);
        self.run_scan(due, now).await
    }

    /// Sync every tracked coin for `timeframes` as of `now`.
    pub async fn run_scan(&self, timeframes: Vec<Timeframe>, now: DateTime<Utc>) -> ScanStatus {
        let started = std::time::Instant::now();
        self.refresh_universe(now).await;
        let coins = self.tracked_coins().await;

        let mut skipped = 0;
        let mut pairs = Vec::with_capacity(coins.len() * timeframes.len());
        for coin in &coins {
            for &tf in &timeframes {
                if self.ledger.should_attempt(&coin.symbol, tf) {
                    pairs.push((coin.symbol.clone(), tf));
                } else {
                    skipped += 1;
                }
            }
        }

        let mut status = ScanStatus::start(now, timeframes, pairs.len());
        status.skipped = skipped;
        *self.status.write().await = status.clone();
        info!(
            "Scan {} started: {} pairs ({} cooling down)",
            status.scan_id,
            pairs.len(),
            skipped
        );

        let engine = self.engine.clone();
        let mut results = stream::iter(pairs)
            .map(move |(symbol, tf)| {
                let engine = engine.clone();
                async move {
                    let result = engine.sync_pair(&symbol, tf, now).await;
                    (symbol, tf, result)
                }
            })
            .buffer_unordered(self.max_concurrent);

        while let Some((symbol, tf, result)) = results.next().await {
            let outcome = match result {
                Ok(report) => {
                    if report.outcome == SyncOutcome::Unavailable {
                        self.ledger.record_failure(&symbol, tf);
                    } else {
                        self.ledger.record_success(&symbol, tf);
                    }
                    Ok(report.outcome)
                }
                Err(e) => {
                    let failures = self.ledger.record_failure(&symbol, tf);
                    error!("{} {} failed ({} in a row): {}", symbol, tf, failures, e);
                    Err(e.to_string())
                }
            };
            status.record(&outcome);
            *self.status.write().await = status.clone();
        }

        let elapsed = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
        status.finish(now + elapsed);
        if let Err(e) = self.record_history(&status) {
            error!("Failed to record scan history: {}", e);
        }
        *self.status.write().await = status.clone();
        info!("Scan {} finished: {}", status.scan_id, status.message);
        status
    }

    /// Refresh the coin universe when the refresh interval has passed.
    async fn refresh_universe(&self, now: DateTime<Utc>) {
        let due = match *self.last_refresh.read().await {
            Some(last) => now - last >= self.universe_refresh,
            None => true,
        };
        if !due {
            return;
        }

        match self.universe.top_coins().await {
            Ok(coins) => {
                if let Err(e) = self.metadata.upsert_coins(&coins) {
                    error!("Failed to store coin universe: {}", e);
                }
                if let Err(e) = self.engine.seed_resolutions() {
                    warn!("Failed to seed resolutions: {}", e);
                }
                info!("Coin universe refreshed from {}: {} coins", self.universe.name(), coins.len());
                *self.coins.write().await = coins;
                *self.last_refresh.write().await = Some(now);
            }
            Err(e) => warn!("Coin universe refresh failed: {}", e),
        }
    }

    /// The last refreshed universe, or the stored coins when none was loaded.
    async fn tracked_coins(&self) -> Vec<Coin> {
        let coins = self.coins.read().await;
        if !coins.is_empty() {
            return coins.iter().take(self.top_n).cloned().collect();
        }
        drop(coins);

        match self.metadata.list_coins(Some(self.top_n)) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to load stored coins: {}", e);
                Vec::new()
            }
        }
    }

    fn record_history(&self, status: &ScanStatus) -> Result<()> {
        let weekly = self.metadata.latest_analysis(Timeframe::W1)?;
        let daily = self.metadata.latest_analysis(Timeframe::D1)?;
        let above = |rows: &[EmaAnalysis]| rows.iter().filter(|a| a.above_ema50).count();

        self.metadata.record_scan(&ScanRecord {
            scan_id: status.scan_id.to_string(),
            scan_date: status.started_at,
            timeframes: status
                .due_timeframes
                .iter()
                .map(|tf| tf.key())
                .collect::<Vec<_>>()
                .join(","),
            pairs_attempted: status.total_pairs,
            pairs_updated: status.updated,
            pairs_unavailable: status.unavailable,
            pairs_failed: status.failed,
            coins_above_weekly: above(&weekly),
            coins_below_weekly: weekly.len() - above(&weekly),
            coins_above_daily: above(&daily),
            coins_below_daily: daily.len() - above(&daily),
            scan_duration_seconds: status.duration_secs(),
        })
    }
}
