use crate::services::retry::RetryPolicy;
use crate::types::Timeframe;
use std::env;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite database file.
    pub database_path: String,
    /// Redis URL for mirroring analysis snapshots (optional).
    pub redis_url: Option<String>,
    /// CoinGecko API key (optional, for pro tier).
    pub coingecko_api_key: Option<String>,
    /// Binance API key (optional, public endpoints work without).
    pub binance_api_key: Option<String>,
    /// Number of coins to track, ranked by market cap.
    pub top_n: usize,
    /// Use the built-in coin list instead of the live market-cap ranking.
    pub static_universe: bool,
    /// Timeframes kept in sync.
    pub timeframes: Vec<Timeframe>,
    /// Scheduler tick interval (seconds).
    pub check_interval_secs: u64,
    /// Minimum delay between consecutive provider requests (ms).
    pub request_delay_ms: u64,
    /// Per-request timeout for provider calls (seconds).
    pub request_timeout_secs: u64,
    /// Upper bound on pairs synced concurrently.
    pub max_concurrent_syncs: usize,
    /// How often the coin universe is refreshed (minutes).
    pub universe_refresh_minutes: i64,
    /// Retry policy for pairs that keep failing.
    pub retry: RetryPolicy,
    /// Sync every tracked timeframe once at startup.
    pub sync_on_startup: bool,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let timeframes = env::var("TRACKED_TIMEFRAMES")
            .ok()
            .map(|s| Timeframe::parse_list(&s))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| Timeframe::ALL.to_vec());

        // 0 keeps retrying every tick
        let max_failures: u32 = parse_env("MAX_CONSECUTIVE_FAILURES", 0);
        let retry = if max_failures == 0 {
            RetryPolicy::NextTick
        } else {
            RetryPolicy::Bounded {
                max_failures,
                cooldown_ticks: parse_env("RETRY_COOLDOWN_TICKS", 5),
            }
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 5001),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "emascan.db".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            coingecko_api_key: env::var("COINGECKO_API_KEY").ok(),
            binance_api_key: env::var("BINANCE_API_KEY").ok(),
            top_n: parse_env("TOP_N_COINS", 200),
            static_universe: parse_flag("STATIC_UNIVERSE", false),
            timeframes,
            check_interval_secs: parse_env("CHECK_INTERVAL_SECS", 60),
            request_delay_ms: parse_env("REQUEST_DELAY_MS", 250),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 10),
            max_concurrent_syncs: parse_env::<usize>("MAX_CONCURRENT_SYNCS", 4).max(1),
            universe_refresh_minutes: parse_env("UNIVERSE_REFRESH_MINUTES", 60),
            retry,
            sync_on_startup: parse_flag("SYNC_ON_STARTUP", true),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            database_path: "emascan.db".to_string(),
            redis_url: None,
            coingecko_api_key: None,
            binance_api_key: None,
            top_n: 200,
            static_universe: false,
            timeframes: Timeframe::ALL.to_vec(),
            check_interval_secs: 60,
            request_delay_ms: 250,
            request_timeout_secs: 10,
            max_concurrent_syncs: 4,
            universe_refresh_minutes: 60,
            retry: RetryPolicy::NextTick,
            sync_on_startup: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5001);
        assert_eq!(config.top_n, 200);
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.timeframes.len(), 5);
        assert_eq!(config.retry, RetryPolicy::NextTick);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_config_custom() {
        let config = Config {
            top_n: 10,
            static_universe: true,
            timeframes: vec![Timeframe::D1, Timeframe::W1],
            retry: RetryPolicy::Bounded {
                max_failures: 3,
                cooldown_ticks: 2,
            },
            ..Config::default()
        };

        assert_eq!(config.top_n, 10);
        assert!(config.static_universe);
        assert_eq!(config.timeframes, vec![Timeframe::D1, Timeframe::W1]);
    }

    #[test]
    fn test_config_clone() {
        let config = Config {
            database_path: ":memory:".to_string(),
            ..Config::default()
        };

        let cloned = config.clone();
        assert_eq!(cloned.database_path, config.database_path);
        assert_eq!(cloned.port, config.port);
    }
}
