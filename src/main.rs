use anyhow::Context;
use axum::Router;
use emascan::config::Config;
use emascan::services::{AnalysisCache, CoinUniverse, FallbackUniverse, SqliteStore, StaticCoinList};
use emascan::sources::{BinanceClient, CoinGeckoUniverse};
use emascan::{api, AppState};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emascan=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting emascan on {}:{}", config.host, config.port);

    let store = Arc::new(
        SqliteStore::new(&config.database_path)
            .with_context(|| format!("opening database {}", config.database_path))?,
    );

    let cache = match config.redis_url {
        Some(ref url) => AnalysisCache::connect(url).await,
        None => {
            info!("REDIS_URL not set, analysis mirror disabled");
            AnalysisCache::disabled()
        }
    };

    let source = Arc::new(BinanceClient::new(
        config.binance_api_key.clone(),
        config.request_timeout_secs,
    ));

    let fallback: Arc<dyn CoinUniverse> = Arc::new(StaticCoinList::defaults(config.top_n));
    let universe: Arc<dyn CoinUniverse> = if config.static_universe {
        fallback
    } else {
        let live = Arc::new(CoinGeckoUniverse::new(
            config.coingecko_api_key.clone(),
            config.top_n,
            config.request_timeout_secs,
        ));
        Arc::new(FallbackUniverse::new(live, fallback))
    };

    let state = AppState::new(config.clone(), store, source, universe, cache);
    let seeded = state.engine.seed_resolutions()?;
    info!("Loaded {} cached symbol resolutions", seeded);

    // Start the scheduled scanner
    tokio::spawn(state.scanner.clone().run());

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("emascan listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
