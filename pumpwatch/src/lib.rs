/// Pumpwatch - Market Signal Detection Pipeline
///
/// Detects abrupt pump and dump moves on spot pairs by comparing the two most
/// recent candles per (exchange, symbol) against each user's configured
/// threshold, then enriches qualifying signals with supplementary metrics and
/// dispatches them under a per-user daily quota.
///
/// The library is organised around a recurring detection cycle:
/// - [`engine`]: the dispatch scheduler driving concurrent per-user,
///   per-venue, per-symbol evaluation tasks
/// - [`exchange`]: normalised REST market data clients for Binance and Bybit
/// - [`signal`]: the pure pump/dump evaluation rule
/// - [`metric`]: cascading metric resolution (paid aggregator first, free
///   exchange-derived fallback) with per-cycle caching
/// - [`quota`]: daily signal quota with UTC-midnight epoch reset
/// - [`notify`]: signal text formatting and the delivery seam
/// - [`store`]: user profile persistence seam and short-lived state
///
/// Collaborator seams ([`exchange::MarketDataClient`], [`metric::MetricSource`],
/// [`store::SettingsStore`], [`notify::Notifier`]) are trait objects so the
/// scheduler stays independent of any concrete venue, aggregator, store or
/// transport.
pub mod candle;
pub mod config;
pub mod de;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod limiter;
pub mod metric;
pub mod notify;
pub mod quota;
pub mod signal;
pub mod store;

// Re-export the types most callers wire together
pub use candle::{Candle, Timeframe};
pub use config::MonitorConfig;
pub use engine::{CycleSummary, Engine};
pub use exchange::ExchangeId;
pub use signal::{Direction, Signal};
