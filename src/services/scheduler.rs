//! When each timeframe is due for a sync.
//!
//! Slots sit a few minutes after the bar close so the provider has finalized
//! the bar: 15m at minute 1 of each quarter hour, 1h at minute 2, 4h at
//! minute 3 of hours divisible by four, 1d at 00:05 and 1w on Monday at 00:10.
//! All times are UTC.
//!
//! A slot that passes while a long scan is still running is not lost: the
//! tracker fires it at the next tick.

use crate::types::Timeframe;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
/// 1970-01-05, the first Monday after the epoch.
const FIRST_MONDAY: i64 = 4 * DAY;

/// Slot period and the epoch offset of one slot, in seconds.
fn slot_grid(timeframe: Timeframe) -> (i64, i64) {
    match timeframe {
        Timeframe::M15 => (15 * MINUTE, MINUTE),
        Timeframe::H1 => (HOUR, 2 * MINUTE),
        Timeframe::H4 => (4 * HOUR, 3 * MINUTE),
        Timeframe::D1 => (DAY, 5 * MINUTE),
        Timeframe::W1 => (7 * DAY, FIRST_MONDAY + 10 * MINUTE),
    }
}

/// Start of the most recent slot of `timeframe` at or before `now`.
pub fn latest_slot(timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
    let (period, anchor) = slot_grid(timeframe);
    let into_slot = (now.timestamp() - anchor).rem_euclid(period);
    now - Duration::seconds(into_slot) - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()))
}

/// Whether `now` falls inside the slot minute of `timeframe`.
pub fn is_due(timeframe: Timeframe, now: DateTime<Utc>) -> bool {
    now - latest_slot(timeframe, now) < Duration::minutes(1)
}

/// Every tracked timeframe due at `now`, evaluated against the same instant.
pub fn due_timeframes(tracked: &[Timeframe], now: DateTime<Utc>) -> Vec<Timeframe> {
    tracked.iter().copied().filter(|tf| is_due(*tf, now)).collect()
}

/// Remembers the last slot fired per timeframe, so each slot runs exactly
/// once even when ticks are late.
#[derive(Default)]
pub struct ScheduleTracker {
    fired: DashMap<Timeframe, i64>,
}

impl ScheduleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeframes whose latest slot has passed and not fired yet. Marks the
    /// returned ones as fired.
    ///
    /// The first call for a timeframe only fires when `now` is inside its
    /// slot minute; otherwise it records the latest slot as a baseline so
    /// a restart does not sync every timeframe at once.
    pub fn take_due(&self, tracked: &[Timeframe], now: DateTime<Utc>) -> Vec<Timeframe> {
        tracked
            .iter()
            .copied()
            .filter(|&tf| {
                let slot = latest_slot(tf, now).timestamp();
                match self.fired.entry(tf) {
                    Entry::Occupied(mut last) => {
                        if slot > *last.get() {
                            last.insert(slot);
                            true
                        } else {
                            false
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(slot);
                        is_due(tf, now)
                    }
                }
            })
            .collect()
    }
}
