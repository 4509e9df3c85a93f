use super::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market variant a provider symbol was resolved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketVariant {
    Spot,
    Futures,
}

impl MarketVariant {
    /// Fallback order: spot before derivatives.
    pub const ORDER: [MarketVariant; 2] = [MarketVariant::Spot, MarketVariant::Futures];

    /// Label persisted on the coin row.
    pub fn label(&self) -> &'static str {
        match self {
            MarketVariant::Spot => "Binance Spot",
            MarketVariant::Futures => "Binance Futures",
        }
    }

    /// Parse a persisted label.
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "Binance Spot" | "spot" => Some(MarketVariant::Spot),
            "Binance Futures" | "futures" => Some(MarketVariant::Futures),
            _ => None,
        }
    }
}

impl fmt::Display for MarketVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which provider ticker and market returned data for a logical symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolResolution {
    pub symbol: String,
    pub provider_symbol: String,
    pub market: MarketVariant,
}

/// One bar as returned by a provider, before it is bound to a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawKline {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl RawKline {
    /// Prices must be finite and positive, volume finite and non-negative.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
            && self.volume.is_finite()
            && self.volume >= 0.0
    }

    /// Bind this bar to a symbol and timeframe.
    pub fn into_candle(self, symbol: &str, timeframe: Timeframe) -> Candle {
        Candle {
            symbol: symbol.to_uppercase(),
            timeframe,
            time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            ema50: None,
        }
    }
}

/// One stored OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ema50: Option<f64>,
}

/// Stored candle range for one timeframe of a symbol.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleCoverage {
    pub timeframe: Timeframe,
    pub candle_count: usize,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}
