//! Optional Redis mirror of the latest EMA snapshot per (symbol, timeframe).

use crate::types::{EmaAnalysis, Timeframe};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const ANALYSIS_PREFIX: &str = "emascan:analysis:";
const ANALYSIS_TTL_SECS: u64 = 2 * 24 * 60 * 60;

fn analysis_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("{}{}:{}", ANALYSIS_PREFIX, symbol.to_uppercase(), timeframe.key())
}

/// Redis-backed snapshot cache. Every operation is a no-op without Redis.
#[derive(Clone, Default)]
pub struct AnalysisCache {
    conn: Arc<RwLock<Option<ConnectionManager>>>,
}

impl AnalysisCache {
    /// A cache that never connects.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Connect to Redis, running without the mirror on failure.
    pub async fn connect(redis_url: &str) -> Self {
        let cache = Self::default();
        match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!("Analysis cache connected to Redis");
                    *cache.conn.write().await = Some(conn);
                }
                Err(e) => warn!("Failed to connect analysis cache to Redis: {}", e),
            },
            Err(e) => warn!("Invalid Redis URL for analysis cache: {}", e),
        }
        cache
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    /// Store the snapshot under its (symbol, timeframe) key.
    pub async fn publish(&self, analysis: &EmaAnalysis) {
        let conn_guard = self.conn.read().await;
        let Some(ref conn) = *conn_guard else {
            return;
        };

        let json = match serde_json::to_string(analysis) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize analysis snapshot: {}", e);
                return;
            }
        };

        let key = analysis_key(&analysis.symbol, analysis.timeframe);
        let mut conn = conn.clone();
        if let Err(e) = redis::cmd("SET")
            .arg(&key)
            .arg(json)
            .arg("EX")
            .arg(ANALYSIS_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await
        {
            error!("Failed to mirror analysis to Redis: {}", e);
            return;
        }
        debug!("Mirrored {} to Redis", key);
    }

    /// Read a mirrored snapshot.
    pub async fn get(&self, symbol: &str, timeframe: Timeframe) -> Option<EmaAnalysis> {
        let conn_guard = self.conn.read().await;
        let conn = conn_guard.as_ref()?;

        let mut conn = conn.clone();
        let json: Option<String> = redis::cmd("GET")
            .arg(analysis_key(symbol, timeframe))
            .query_async(&mut conn)
            .await
            .map_err(|e| error!("Failed to read analysis from Redis: {}", e))
            .ok()?;

        json.and_then(|j| serde_json::from_str(&j).ok())
    }

    /// Mirrored snapshots of `symbol` for each of `timeframes`, skipping
    /// missing keys. Empty without Redis.
    pub async fn get_all(&self, symbol: &str, timeframes: &[Timeframe]) -> Vec<EmaAnalysis> {
        if !self.is_connected().await {
            return Vec::new();
        }
        let mut found = Vec::with_capacity(timeframes.len());
        for &timeframe in timeframes {
            if let Some(analysis) = self.get(symbol, timeframe).await {
                found.push(analysis);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_analysis_key() {
        assert_eq!(analysis_key("btc", Timeframe::W1), "emascan:analysis:BTC:1w");
        assert_eq!(analysis_key("ETH", Timeframe::M15), "emascan:analysis:ETH:15m");
    }

    #[tokio::test]
    async fn test_disabled_cache_is_noop() {
        let cache = AnalysisCache::disabled();
        assert!(!cache.is_connected().await);

        let now = Utc::now();
        let analysis = EmaAnalysis::from_latest("BTC", Timeframe::D1, 2.0, 1.0, now, now).unwrap();
        cache.publish(&analysis).await;
        assert!(cache.get("BTC", Timeframe::D1).await.is_none());
        assert!(cache.get_all("BTC", &Timeframe::ALL).await.is_empty());
    }
}
