use super::body_excerpt;
use crate::error::{AppError, Result};
use crate::services::universe::CoinUniverse;
use crate::types::time::parse_timestamp;
use crate::types::Coin;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
const COINGECKO_PRO_API_URL: &str = "https://pro-api.coingecko.com/api/v3";
const PER_PAGE: usize = 50;
const PAGE_DELAY_MS: u64 = 1000; // free tier allows roughly 30 calls/min

/// One row of `/coins/markets`.
#[derive(Debug, Deserialize)]
struct CoinGeckoMarket {
    symbol: String,
    name: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    market_cap_rank: Option<u32>,
    last_updated: Option<String>,
}

impl CoinGeckoMarket {
    fn into_coin(self) -> Coin {
        let mut coin = Coin::new(&self.symbol, &self.name, self.market_cap_rank);
        coin.current_price = self.current_price;
        coin.market_cap = self.market_cap;
        coin.last_updated = self
            .last_updated
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        coin
    }
}

/// Top-N coins by market cap from CoinGecko.
#[derive(Clone)]
pub struct CoinGeckoUniverse {
    client: Client,
    api_key: Option<String>,
    top_n: usize,
}

impl CoinGeckoUniverse {
    pub fn new(api_key: Option<String>, top_n: usize, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .user_agent("emascan/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            top_n,
        }
    }

    fn base_url(&self) -> &str {
        if self.api_key.is_some() {
            COINGECKO_PRO_API_URL
        } else {
            COINGECKO_API_URL
        }
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<CoinGeckoMarket>> {
        let url = format!("{}/coins/markets", self.base_url());
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[
                ("vs_currency", "usd".to_string()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                ("sparkline", "false".to_string()),
            ]);
        if let Some(ref key) = self.api_key {
            request = request.header("x-cg-pro-api-key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("CoinGecko API returned {}: {}", status, body_excerpt(&text));
            return Err(AppError::ExternalApi(format!("CoinGecko API error: {}", status)));
        }

        Ok(response.json().await?)
    }
}

/// Pages needed to cover `top_n` coins.
fn pages_needed(top_n: usize) -> usize {
    top_n.div_ceil(PER_PAGE)
}

#[async_trait]
impl CoinUniverse for CoinGeckoUniverse {
    async fn top_coins(&self) -> Result<Vec<Coin>> {
        let pages = pages_needed(self.top_n);
        info!("Fetching top {} coins from CoinGecko ({} pages)", self.top_n, pages);

        let mut coins = Vec::with_capacity(self.top_n);
        let mut last_error = None;

        for page in 1..=pages {
            match self.fetch_page(page).await {
                Ok(markets) => {
                    debug!("CoinGecko page {}/{}: {} coins", page, pages, markets.len());
                    coins.extend(markets.into_iter().map(CoinGeckoMarket::into_coin));
                }
                Err(e) => {
                    warn!("CoinGecko page {} failed: {}", page, e);
                    last_error = Some(e);
                }
            }
            if page < pages {
                tokio::time::sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
            }
        }

        if coins.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| AppError::ExternalApi("CoinGecko returned no coins".to_string())));
        }

        coins.truncate(self.top_n);
        Ok(coins)
    }

    fn name(&self) -> &'static str {
        "CoinGecko"
    }
}
