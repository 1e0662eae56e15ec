use pumpwatch::{
    config::MonitorConfig,
    engine::Engine,
    error::{ConfigError, NotifyError},
    exchange::{
        MarketDataClient, binance::BinanceClient, build_http_client, bybit::BybitClient,
    },
    limiter::RateLimiter,
    metric::{MetricResolver, coinglass::CoinglassSource, free::FreeSource},
    notify::Notifier,
    store::{InMemoryStore, UserProfile},
};
use async_trait::async_trait;
use smol_str::SmolStr;
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};

/// Fallback symbol universe when SYMBOLS is unset.
const DEFAULT_SYMBOLS: &str = "BTCUSDT,ETHUSDT,SOLUSDT,XRPUSDT,DOGEUSDT";

#[derive(Debug, Error)]
enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read profiles file: {0}")]
    ProfilesRead(#[from] std::io::Error),

    #[error("failed to parse profiles file: {0}")]
    ProfilesParse(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(error) = run().await {
        error!(%error, "monitor failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MonitorError> {
    let config = config_from_env();
    info!(
        interval_secs = config.cycle_interval.as_secs(),
        symbols = ?config.symbols,
        coinglass = config.coinglass_api_key.is_some(),
        "starting pump/dump monitor"
    );

    let http = build_http_client(config.request_timeout)?;

    // One permit pool per venue so a slow venue cannot starve the other
    let binance = Arc::new(BinanceClient::new(
        http.clone(),
        RateLimiter::new(config.requests_in_flight),
    ));
    let bybit = Arc::new(BybitClient::new(
        http.clone(),
        RateLimiter::new(config.requests_in_flight),
    ));
    let clients: Vec<Arc<dyn MarketDataClient>> = vec![binance.clone(), bybit.clone()];

    // Paid aggregator first when configured, free exchange-derived fallback
    let mut resolver = MetricResolver::new();
    if let Some(api_key) = config.coinglass_api_key.clone() {
        resolver.push_all(Arc::new(CoinglassSource::new(http.clone(), api_key)));
    }
    resolver.push_all(Arc::new(FreeSource::new(clients.iter().cloned())));

    let store = Arc::new(InMemoryStore::new(load_profiles()?));
    let notifier = Arc::new(LogNotifier);

    let engine = Engine::new(config, clients, Arc::new(resolver), store, notifier)?;

    engine
        .run(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                error!(%error, "failed to listen for shutdown signal");
            }
        })
        .await;

    Ok(())
}

/// Build configuration from environment variables, falling back to defaults
/// for anything unset.
fn config_from_env() -> MonitorConfig {
    let defaults = MonitorConfig::default();

    let symbols = std::env::var("SYMBOLS")
        .unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string())
        .split(',')
        .map(str::trim)
        .filter(|symbol| !symbol.is_empty())
        .map(SmolStr::new)
        .collect();

    MonitorConfig {
        cycle_interval: env_secs("CYCLE_INTERVAL_SECS").unwrap_or(defaults.cycle_interval),
        symbols,
        requests_in_flight: std::env::var("REQUESTS_IN_FLIGHT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.requests_in_flight),
        request_timeout: env_secs("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout),
        coinglass_api_key: std::env::var("COINGLASS_API_KEY").ok(),
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
}

/// Load user profiles from the JSON file named by PROFILES_PATH. Without a
/// profiles file the monitor runs with an empty roster and dispatches
/// nothing, which is only useful for connectivity checks.
fn load_profiles() -> Result<Vec<UserProfile>, MonitorError> {
    let Ok(path) = std::env::var("PROFILES_PATH") else {
        warn!("PROFILES_PATH is unset, starting with no user profiles");
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(Path::new(&path))?;
    let profiles: Vec<UserProfile> = serde_json::from_str(&raw)?;
    info!(path = %path, count = profiles.len(), "loaded user profiles");
    Ok(profiles)
}

/// Delivery stand-in that writes formatted signals to the log. Swap for a
/// messenger-backed [`Notifier`] to push signals to real users.
struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, user_id: i64, text: &str) -> Result<(), NotifyError> {
        info!(user = user_id, "\n{text}");
        Ok(())
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
