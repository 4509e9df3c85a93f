use super::{SymbolResolution, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a (symbol, timeframe) pair is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No candle has ever been stored.
    NeedsBackfill,
    /// Initial long-horizon fetch in progress.
    Backfilling,
    /// History exists; only new bars are fetched.
    Incremental,
}

/// Result of one sync cycle for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Candles stored, EMA recomputed and snapshot updated.
    Updated,
    /// Candles stored but the series is shorter than the EMA period.
    InsufficientHistory,
    /// Every provider variant failed; retried at the next tick.
    Unavailable,
}

/// What a single `sync_one` call did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Phase the pair was in when the cycle started.
    pub phase: SyncPhase,
    pub outcome: SyncOutcome,
    pub requested: usize,
    pub fetched: usize,
    pub stored_total: usize,
    pub latest_time: Option<DateTime<Utc>>,
    pub resolution: Option<SymbolResolution>,
    pub ema50: Option<f64>,
}

/// Last known status of a pair, kept in a keyed map.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStatus {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub phase: SyncPhase,
    pub running: bool,
    pub last_outcome: Option<SyncOutcome>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub updated_at: DateTime<Utc>,
}

/// Progress of one `sync_due` scan. Owned by the scanner and returned to
/// the caller when the scan finishes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub scan_id: Uuid,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub due_timeframes: Vec<Timeframe>,
    pub total_pairs: usize,
    pub completed: usize,
    pub updated: usize,
    pub insufficient: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub skipped: usize,
    pub message: String,
}

impl ScanStatus {
    pub fn start(now: DateTime<Utc>, due_timeframes: Vec<Timeframe>, total_pairs: usize) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            running: true,
            started_at: now,
            finished_at: None,
            due_timeframes,
            total_pairs,
            completed: 0,
            updated: 0,
            insufficient: 0,
            unavailable: 0,
            failed: 0,
            skipped: 0,
            message: "Scanning".to_string(),
        }
    }

    /// Idle status reported before the first scan.
    pub fn idle() -> Self {
        let mut status = Self::start(Utc::now(), Vec::new(), 0);
        status.running = false;
        status.message = "Ready".to_string();
        status
    }

    /// Count one finished pair.
    pub fn record(&mut self, result: &std::result::Result<SyncOutcome, String>) {
        self.completed += 1;
        match result {
            Ok(SyncOutcome::Updated) => self.updated += 1,
            Ok(SyncOutcome::InsufficientHistory) => self.insufficient += 1,
            Ok(SyncOutcome::Unavailable) => self.unavailable += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.running = false;
        self.finished_at = Some(now);
        self.message = format!(
            "Completed {} pairs: {} updated, {} unavailable, {} failed",
            self.completed, self.updated, self.unavailable, self.failed
        );
    }

    pub fn duration_secs(&self) -> i64 {
        self.finished_at
            .map(|f| (f - self.started_at).num_seconds())
            .unwrap_or(0)
    }
}

/// Persisted summary of a completed scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub scan_id: String,
    pub scan_date: DateTime<Utc>,
    pub timeframes: String,
    pub pairs_attempted: usize,
    pub pairs_updated: usize,
    pub pairs_unavailable: usize,
    pub pairs_failed: usize,
    pub coins_above_weekly: usize,
    pub coins_below_weekly: usize,
    pub coins_above_daily: usize,
    pub coins_below_daily: usize,
    pub scan_duration_seconds: i64,
}

/// Row counts for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub candles: i64,
    pub coins: i64,
    pub ema_analysis: i64,
    pub scans: i64,
    pub latest_scan: Option<DateTime<Utc>>,
    pub oldest_candle: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_status_counts() {
        let mut status = ScanStatus::start(Utc::now(), vec![Timeframe::H1], 4);
        status.record(&Ok(SyncOutcome::Updated));
        status.record(&Ok(SyncOutcome::Unavailable));
        status.record(&Ok(SyncOutcome::InsufficientHistory));
        status.record(&Err("disk full".to_string()));
        status.finish(Utc::now());

        assert!(!status.running);
        assert_eq!(status.completed, 4);
        assert_eq!(status.updated, 1);
        assert_eq!(status.unavailable, 1);
        assert_eq!(status.insufficient, 1);
        assert_eq!(status.failed, 1);
        assert!(status.message.contains("4 pairs"));
    }

    #[test]
    fn test_idle_status() {
        let status = ScanStatus::idle();
        assert!(!status.running);
        assert_eq!(status.message, "Ready");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&SyncOutcome::InsufficientHistory).unwrap();
        assert_eq!(json, "\"insufficient_history\"");
        let json = serde_json::to_string(&SyncPhase::NeedsBackfill).unwrap();
        assert_eq!(json, "\"needs_backfill\"");
    }
}
