pub mod analysis_cache;
pub mod batch_fetcher;
pub mod ema;
pub mod provider;
pub mod retry;
pub mod scanner;
pub mod scheduler;
pub mod sqlite_store;
pub mod store;
pub mod sync_engine;
pub mod universe;

pub use analysis_cache::AnalysisCache;
pub use batch_fetcher::{BatchFetcher, HistoryBatch};
pub use ema::{compute_ema, latest_ema, EMA_PERIOD};
pub use provider::{FetchedCandles, ProviderClient, RateLimiter};
pub use retry::{RetryLedger, RetryPolicy};
pub use scanner::Scanner;
pub use scheduler::{due_timeframes, is_due, latest_slot, ScheduleTracker};
pub use sqlite_store::SqliteStore;
pub use store::{CandleStore, MetadataStore};
pub use sync_engine::{calculate_candles_needed, SyncEngine};
pub use universe::{CoinUniverse, FallbackUniverse, StaticCoinList};
