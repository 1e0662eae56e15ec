use crate::exchange::ExchangeId;
use smol_str::SmolStr;
use thiserror::Error;

/// Fatal configuration errors surfaced during startup validation, never at
/// runtime.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    #[error("symbol universe is empty")]
    EmptySymbolUniverse,

    #[error("malformed symbol in universe: {0}")]
    InvalidSymbol(String),

    #[error("cycle interval must be non-zero")]
    ZeroCycleInterval,
}

/// Per-tuple market data fetch errors. Fully contained: a failed tuple is
/// logged and skipped, it never aborts sibling requests or the cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("symbol {symbol} is not tradable on {exchange}")]
    UnknownSymbol {
        exchange: ExchangeId,
        symbol: SmolStr,
    },

    #[error("transient fetch failure on {exchange}: {message}")]
    Transient {
        exchange: ExchangeId,
        message: String,
    },

    #[error("malformed {exchange} response: {message}")]
    Malformed {
        exchange: ExchangeId,
        message: String,
    },
}

impl FetchError {
    pub(crate) fn transient(exchange: ExchangeId, error: impl std::fmt::Display) -> Self {
        Self::Transient {
            exchange,
            message: error.to_string(),
        }
    }

    pub(crate) fn malformed(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::Malformed {
            exchange,
            message: message.into(),
        }
    }
}

/// Resolver-internal errors that drive the fallback to the next metric
/// source. Never surfaced to the scheduler: exhausting all sources yields an
/// absent metric field instead.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("malformed metric value: {0}")]
    Malformed(String),

    #[error("metric fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("source has no data for this request")]
    Unavailable,
}

/// Settings store collaborator failure.
#[derive(Debug, Error)]
#[error("settings store error: {0}")]
pub struct StoreError(pub String);

/// Delivery collaborator failure. Logged, never retried by the core.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Errors produced by the dispatch scheduler itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A cycle was requested while the previous one was still running. The
    /// caller should skip this tick, not queue it.
    #[error("detection cycle already in progress")]
    CycleInProgress,

    #[error(transparent)]
    Store(#[from] StoreError),
}
