//! Where the set of tracked coins comes from.

use crate::error::Result;
use crate::types::Coin;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// A source of tracked coins, ranked by market cap.
#[async_trait]
pub trait CoinUniverse: Send + Sync {
    async fn top_coins(&self) -> Result<Vec<Coin>>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Built-in list of large-cap coins (symbol, name), in rank order.
pub const DEFAULT_COINS: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("BNB", "BNB"),
    ("SOL", "Solana"),
    ("XRP", "XRP"),
    ("DOGE", "Dogecoin"),
    ("ADA", "Cardano"),
    ("TRX", "TRON"),
    ("AVAX", "Avalanche"),
    ("LINK", "Chainlink"),
    ("DOT", "Polkadot"),
    ("TON", "Toncoin"),
    ("SHIB", "Shiba Inu"),
    ("LTC", "Litecoin"),
    ("BCH", "Bitcoin Cash"),
    ("NEAR", "NEAR Protocol"),
    ("UNI", "Uniswap"),
    ("APT", "Aptos"),
    ("ATOM", "Cosmos Hub"),
    ("XLM", "Stellar"),
];

/// Fixed coin list; never fails.
#[derive(Debug, Clone)]
pub struct StaticCoinList {
    coins: Vec<(String, String)>,
    top_n: usize,
}

impl StaticCoinList {
    pub fn new(coins: Vec<(String, String)>, top_n: usize) -> Self {
        Self { coins, top_n }
    }

    /// The built-in list truncated to `top_n`.
    pub fn defaults(top_n: usize) -> Self {
        let coins = DEFAULT_COINS
            .iter()
            .map(|(s, n)| (s.to_string(), n.to_string()))
            .collect();
        Self::new(coins, top_n)
    }
}

#[async_trait]
impl CoinUniverse for StaticCoinList {
    async fn top_coins(&self) -> Result<Vec<Coin>> {
        Ok(self
            .coins
            .iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, (symbol, name))| Coin::new(symbol, name, Some(i as u32 + 1)))
            .collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Tries `primary`, then `fallback` when it fails or returns nothing.
pub struct FallbackUniverse {
    primary: Arc<dyn CoinUniverse>,
    fallback: Arc<dyn CoinUniverse>,
}

impl FallbackUniverse {
    pub fn new(primary: Arc<dyn CoinUniverse>, fallback: Arc<dyn CoinUniverse>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl CoinUniverse for FallbackUniverse {
    async fn top_coins(&self) -> Result<Vec<Coin>> {
        match self.primary.top_coins().await {
            Ok(coins) if !coins.is_empty() => return Ok(coins),
            Ok(_) => warn!("{} returned no coins, using {}", self.primary.name(), self.fallback.name()),
            Err(e) => warn!(
                "{} universe failed ({}), using {}",
                self.primary.name(),
                e,
                self.fallback.name()
            ),
        }
        self.fallback.top_coins().await
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    struct Failing;

    #[async_trait]
    impl CoinUniverse for Failing {
        async fn top_coins(&self) -> Result<Vec<Coin>> {
            Err(AppError::ExternalApi("down".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_static_list_ranks_and_truncates() {
        let coins = StaticCoinList::defaults(3).top_coins().await.unwrap();
        assert_eq!(coins.len(), 3);
        assert_eq!(coins[0].symbol, "BTC");
        assert_eq!(coins[2].market_cap_rank, Some(3));
    }

    #[tokio::test]
    async fn test_fallback_on_error() {
        let universe = FallbackUniverse::new(Arc::new(Failing), Arc::new(StaticCoinList::defaults(5)));
        let coins = universe.top_coins().await.unwrap();
        assert_eq!(coins.len(), 5);
    }

    #[tokio::test]
    async fn test_fallback_on_empty() {
        let empty = StaticCoinList::new(Vec::new(), 10);
        let universe = FallbackUniverse::new(Arc::new(empty), Arc::new(StaticCoinList::defaults(2)));
        assert_eq!(universe.top_coins().await.unwrap().len(), 2);
    }

    #[test]
    fn test_default_symbols_uppercase() {
        for (symbol, _) in DEFAULT_COINS {
            assert_eq!(*symbol, symbol.to_uppercase());
        }
    }
}
