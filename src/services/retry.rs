//! What happens to a pair after a failed sync.

use crate::types::Timeframe;
use dashmap::DashMap;
use serde::Serialize;

/// Retry behaviour for pairs whose sync fails or finds no provider data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry at every due slot, forever.
    NextTick,
    /// After `max_failures` consecutive failures, skip the pair for
    /// `cooldown_ticks` due slots, then try again.
    Bounded { max_failures: u32, cooldown_ticks: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Entry {
    failures: u32,
    cooldown: u32,
}

/// Consecutive failures per (symbol, timeframe).
pub struct RetryLedger {
    policy: RetryPolicy,
    entries: DashMap<(String, Timeframe), Entry>,
}

impl RetryLedger {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: DashMap::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Whether the pair should be attempted at this due slot. Consumes one
    /// cooldown slot when it is skipped.
    pub fn should_attempt(&self, symbol: &str, timeframe: Timeframe) -> bool {
        if self.policy == RetryPolicy::NextTick {
            return true;
        }
        match self.entries.get_mut(&(symbol.to_uppercase(), timeframe)) {
            Some(mut entry) if entry.cooldown > 0 => {
                entry.cooldown -= 1;
                false
            }
            _ => true,
        }
    }

    pub fn record_success(&self, symbol: &str, timeframe: Timeframe) {
        self.entries.remove(&(symbol.to_uppercase(), timeframe));
    }

    /// Count a failure. Returns the consecutive failure count.
    pub fn record_failure(&self, symbol: &str, timeframe: Timeframe) -> u32 {
        let mut entry = self
            .entries
            .entry((symbol.to_uppercase(), timeframe))
            .or_default();
        entry.failures += 1;
        let failures = entry.failures;

        if let RetryPolicy::Bounded {
            max_failures,
            cooldown_ticks,
        } = self.policy
        {
            if entry.failures >= max_failures {
                entry.cooldown = cooldown_ticks;
                entry.failures = 0;
            }
        }
        failures
    }

    pub fn failures(&self, symbol: &str, timeframe: Timeframe) -> u32 {
        self.entries
            .get(&(symbol.to_uppercase(), timeframe))
            .map(|e| e.failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_tick_always_retries() {
        let ledger = RetryLedger::new(RetryPolicy::NextTick);
        for i in 1..=10 {
            assert!(ledger.should_attempt("BTC", Timeframe::H1));
            assert_eq!(ledger.record_failure("BTC", Timeframe::H1), i);
        }
        ledger.record_success("btc", Timeframe::H1);
        assert_eq!(ledger.failures("BTC", Timeframe::H1), 0);
    }

    #[test]
    fn test_bounded_cools_down_then_retries() {
        let ledger = RetryLedger::new(RetryPolicy::Bounded {
            max_failures: 2,
            cooldown_ticks: 3,
        });

        ledger.record_failure("ETH", Timeframe::D1);
        assert!(ledger.should_attempt("ETH", Timeframe::D1));
        ledger.record_failure("ETH", Timeframe::D1);

        // three skipped slots, then attempted again
        assert!(!ledger.should_attempt("ETH", Timeframe::D1));
        assert!(!ledger.should_attempt("ETH", Timeframe::D1));
        assert!(!ledger.should_attempt("ETH", Timeframe::D1));
        assert!(ledger.should_attempt("ETH", Timeframe::D1));

        // other pairs are unaffected
        assert!(ledger.should_attempt("ETH", Timeframe::H1));
    }

    #[test]
    fn test_success_resets_count() {
        let ledger = RetryLedger::new(RetryPolicy::Bounded {
            max_failures: 3,
            cooldown_ticks: 1,
        });
        ledger.record_failure("SOL", Timeframe::H4);
        ledger.record_failure("SOL", Timeframe::H4);
        ledger.record_success("SOL", Timeframe::H4);
        assert_eq!(ledger.record_failure("SOL", Timeframe::H4), 1);
        assert!(ledger.should_attempt("SOL", Timeframe::H4));
    }
}
