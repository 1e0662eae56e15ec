use crate::{
    candle::{Candle, Timeframe},
    error::FetchError,
};
use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;

/// [`BinanceClient`](binance::BinanceClient) REST market data integration.
pub mod binance;

/// [`BybitClient`](bybit::BybitClient) REST market data integration.
pub mod bybit;

/// Default bound on every outbound market data request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier for a supported venue.
///
/// Declaration order doubles as the fixed venue priority used when breaking
/// duplicate-signal ties, so `Binance` sorts before `Bybit`.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    #[display("Binance")]
    Binance,
    #[display("Bybit")]
    Bybit,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "Binance",
            ExchangeId::Bybit => "Bybit",
        }
    }
}

/// Uniquely identifies one fetch target.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub struct SymbolKey {
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

impl SymbolKey {
    pub fn new(exchange: ExchangeId, symbol: impl Into<SmolStr>, timeframe: Timeframe) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// Normalised REST market data capability set for one venue.
///
/// Every call acquires a [`RateLimiter`](crate::limiter::RateLimiter) permit
/// for its venue before issuing the network request; the permit is an RAII
/// guard, so it releases on all exit paths. Implementations return:
/// - [`FetchError::UnknownSymbol`] when the venue does not trade the symbol,
/// - [`FetchError::Transient`] on network/timeout/5xx failures (the next
///   cycle naturally retries),
/// - `Ok(None)` from the auxiliary metric endpoints when the venue simply
///   has no data, never a placeholder zero.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    /// Fetch the most recent `limit` candles, ordered oldest -> newest.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError>;

    /// Fetch the latest perpetual funding rate for `symbol`, as a percentage.
    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<f64>, FetchError>;

    /// Fetch the open-position split for `symbol` as `(long_pct, short_pct)`.
    async fn fetch_long_short_ratio(&self, symbol: &str)
    -> Result<Option<(f64, f64)>, FetchError>;

    /// Fetch the latest perpetual open interest for `symbol`, in base units.
    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, FetchError>;

    /// Fetch the bid/ask volume ratio over the top of the `symbol` order
    /// book. `None` when the ask side is empty.
    async fn fetch_orderbook_ratio(&self, symbol: &str) -> Result<Option<f64>, FetchError>;
}

/// Construct the shared HTTP client used by all venue integrations, with the
/// bounded per-request timeout that surfaces as [`FetchError::Transient`].
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Bid/ask volume ratio over `["price", "quantity"]` order book levels, the
/// shape both venues use. Quantities are summed per side; an empty ask side
/// yields `None`, never a placeholder zero.
pub(crate) fn bid_ask_ratio(
    bids: &[(String, String)],
    asks: &[(String, String)],
) -> Option<f64> {
    let side_volume = |levels: &[(String, String)]| {
        levels
            .iter()
            .filter_map(|(_, quantity)| quantity.parse::<f64>().ok())
            .sum::<f64>()
    };

    let total_asks = side_volume(asks);
    (total_asks > 0.0).then(|| side_volume(bids) / total_asks)
}
