use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle timeframe tracked by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    /// All timeframes, finest first.
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// Parse a timeframe key such as `"4h"`.
    pub fn from_key(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            "1w" => Some(Timeframe::W1),
            _ => None,
        }
    }

    /// Key used in storage and the API.
    pub fn key(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// Binance kline interval code.
    pub fn binance_interval(&self) -> &'static str {
        // Binance uses the same codes for these intervals
        self.key()
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15-Min",
            Timeframe::H1 => "1-Hour",
            Timeframe::H4 => "4-Hour",
            Timeframe::D1 => "Daily",
            Timeframe::W1 => "Weekly",
        }
    }

    /// Bar duration in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
        }
    }

    /// Bar duration in milliseconds.
    pub fn millis(&self) -> i64 {
        self.seconds() * 1000
    }

    /// Number of bars covering roughly five years.
    ///
    /// Used for initial backfill sizing and for coverage quality scoring.
    pub fn long_horizon(&self) -> usize {
        match self {
            Timeframe::M15 => 175_200,
            Timeframe::H1 => 43_800,
            Timeframe::H4 => 10_950,
            Timeframe::D1 => 1_825,
            Timeframe::W1 => 260,
        }
    }

    /// Sort position, finest first.
    pub fn rank(&self) -> u8 {
        match self {
            Timeframe::M15 => 1,
            Timeframe::H1 => 2,
            Timeframe::H4 => 3,
            Timeframe::D1 => 4,
            Timeframe::W1 => 5,
        }
    }

    /// Parse a comma separated list, skipping unknown keys.
    pub fn parse_list(s: &str) -> Vec<Timeframe> {
        let mut list: Vec<Timeframe> = s.split(',').filter_map(Timeframe::from_key).collect();
        list.sort();
        list.dedup();
        list
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
