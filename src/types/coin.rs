use super::{MarketVariant, SymbolResolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked coin and its cached provider resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    pub symbol: String,
    pub name: String,
    pub market_cap_rank: Option<u32>,
    pub market_cap: Option<f64>,
    pub current_price: Option<f64>,
    pub binance_symbol: Option<String>,
    pub data_source: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl Coin {
    /// Create a coin with no market data.
    pub fn new(symbol: &str, name: &str, market_cap_rank: Option<u32>) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            name: name.to_string(),
            market_cap_rank,
            market_cap: None,
            current_price: None,
            binance_symbol: None,
            data_source: None,
            last_updated: Utc::now(),
        }
    }

    /// The cached resolution, if one was recorded.
    pub fn resolution(&self) -> Option<SymbolResolution> {
        let provider_symbol = self.binance_symbol.clone()?;
        let market = self.data_source.as_deref().and_then(MarketVariant::from_label)?;
        Some(SymbolResolution {
            symbol: self.symbol.clone(),
            provider_symbol,
            market,
        })
    }
}
