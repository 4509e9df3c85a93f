//! emascan - incremental candle sync and EMA50 scanner for crypto markets

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use config::Config;
use services::{
    AnalysisCache, CandleStore, CoinUniverse, MetadataStore, ProviderClient, Scanner, SqliteStore,
    SyncEngine,
};
use sources::KlineSource;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub engine: Arc<SyncEngine>,
    pub scanner: Arc<Scanner>,
    pub cache: AnalysisCache,
}

impl AppState {
    /// Wire the sync engine and scanner on top of a store, a kline source
    /// and a coin universe.
    pub fn new(
        config: Arc<Config>,
        store: Arc<SqliteStore>,
        source: Arc<dyn KlineSource>,
        universe: Arc<dyn CoinUniverse>,
        cache: AnalysisCache,
    ) -> Self {
        let provider = Arc::new(ProviderClient::new(
            source,
            Duration::from_millis(config.request_delay_ms),
        ));
        let candles: Arc<dyn CandleStore> = store.clone();
        let metadata: Arc<dyn MetadataStore> = store.clone();

        let engine = Arc::new(SyncEngine::new(candles, metadata.clone(), provider, cache.clone()));
        let scanner = Arc::new(Scanner::new(engine.clone(), metadata, universe, &config));

        Self {
            config,
            store,
            engine,
            scanner,
            cache,
        }
    }
}
