use crate::{
    candle::{Candle, Timeframe},
    error::MetricError,
    exchange::ExchangeId,
};
use async_trait::async_trait;
use derive_more::Display;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Paid aggregator [`MetricSource`] backed by CoinGlass.
pub mod coinglass;

/// Free [`MetricSource`] derived from public exchange endpoints and the
/// candles already fetched for evaluation.
pub mod free;

/// Relative-strength oscillator math.
pub mod momentum;

/// Accepted deviation from 100 for a long/short percentage pair.
pub const LONG_SHORT_SUM_TOLERANCE: f64 = 0.1;

/// Supplementary metrics attached to a qualifying signal. Every field is
/// independently optional: a value is either validated numeric or absent,
/// never a placeholder zero standing in for "unknown".
///
/// Produced per (exchange, symbol) and shared across users within one
/// dispatch cycle via [`CycleMetricCache`].
#[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct MetricBundle {
    pub momentum: Option<f64>,
    pub funding_rate_pct: Option<f64>,
    pub long_short: Option<LongShortSplit>,
    pub open_interest: Option<f64>,
    pub orderbook_ratio: Option<f64>,
}

/// Percentage split of open positions betting up vs down.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct LongShortSplit {
    pub long_pct: f64,
    pub short_pct: f64,
}

/// The supplementary metric kinds the resolver knows how to cascade.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub enum MetricKind {
    #[display("momentum")]
    Momentum,
    #[display("funding_rate")]
    FundingRate,
    #[display("long_short_ratio")]
    LongShortRatio,
    #[display("open_interest")]
    OpenInterest,
    #[display("orderbook_ratio")]
    OrderbookRatio,
}

/// A single resolved metric value, tagged by kind.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub enum MetricValue {
    Momentum(f64),
    FundingRate(f64),
    LongShort(LongShortSplit),
    OpenInterest(f64),
    OrderbookRatio(f64),
}

/// One metric resolution request. Carries the candles already fetched for
/// evaluation so free computation can reuse them without re-fetching.
#[derive(Clone, Debug)]
pub struct MetricRequest {
    pub kind: MetricKind,
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    pub candles: Arc<[Candle]>,
}

/// A single candidate data source for one or more metric kinds.
///
/// Sources are tried strictly in configuration order; returning an error of
/// any flavour makes the resolver fall through to the next candidate.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, request: &MetricRequest) -> Result<MetricValue, MetricError>;
}

/// Cascading metric resolver: per metric kind, an ordered list of candidate
/// sources (paid aggregator first when configured, then the free
/// exchange-derived source). The first source returning a well-formed value
/// wins; exhausting all candidates yields an absent field.
#[derive(Default)]
pub struct MetricResolver {
    momentum: Vec<Arc<dyn MetricSource>>,
    funding_rate: Vec<Arc<dyn MetricSource>>,
    long_short: Vec<Arc<dyn MetricSource>>,
    open_interest: Vec<Arc<dyn MetricSource>>,
    orderbook_ratio: Vec<Arc<dyn MetricSource>>,
}

impl MetricResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `source` to the candidate chain for `kind`.
    pub fn push(&mut self, kind: MetricKind, source: Arc<dyn MetricSource>) {
        self.chain_mut(kind).push(source);
    }

    /// Append `source` to the candidate chains of every kind.
    pub fn push_all(&mut self, source: Arc<dyn MetricSource>) {
        self.push(MetricKind::Momentum, Arc::clone(&source));
        self.push(MetricKind::FundingRate, Arc::clone(&source));
        self.push(MetricKind::LongShortRatio, Arc::clone(&source));
        self.push(MetricKind::OpenInterest, Arc::clone(&source));
        self.push(MetricKind::OrderbookRatio, source);
    }

    fn chain_mut(&mut self, kind: MetricKind) -> &mut Vec<Arc<dyn MetricSource>> {
        match kind {
            MetricKind::Momentum => &mut self.momentum,
            MetricKind::FundingRate => &mut self.funding_rate,
            MetricKind::LongShortRatio => &mut self.long_short,
            MetricKind::OpenInterest => &mut self.open_interest,
            MetricKind::OrderbookRatio => &mut self.orderbook_ratio,
        }
    }

    fn chain(&self, kind: MetricKind) -> &[Arc<dyn MetricSource>] {
        match kind {
            MetricKind::Momentum => &self.momentum,
            MetricKind::FundingRate => &self.funding_rate,
            MetricKind::LongShortRatio => &self.long_short,
            MetricKind::OpenInterest => &self.open_interest,
            MetricKind::OrderbookRatio => &self.orderbook_ratio,
        }
    }

    /// Resolve the full [`MetricBundle`] for one (exchange, symbol) pair.
    pub async fn resolve_bundle(
        &self,
        exchange: ExchangeId,
        symbol: &SmolStr,
        timeframe: Timeframe,
        candles: Arc<[Candle]>,
    ) -> MetricBundle {
        let request = |kind| MetricRequest {
            kind,
            exchange,
            symbol: symbol.clone(),
            timeframe,
            candles: Arc::clone(&candles),
        };

        // The kinds cascade independently, so resolve them concurrently
        let (momentum, funding_rate_pct, long_short, open_interest, orderbook_ratio) = futures::join!(
            self.resolve(request(MetricKind::Momentum)),
            self.resolve(request(MetricKind::FundingRate)),
            self.resolve(request(MetricKind::LongShortRatio)),
            self.resolve(request(MetricKind::OpenInterest)),
            self.resolve(request(MetricKind::OrderbookRatio)),
        );

        MetricBundle {
            momentum: match momentum {
                Some(MetricValue::Momentum(value)) => Some(value),
                _ => None,
            },
            funding_rate_pct: match funding_rate_pct {
                Some(MetricValue::FundingRate(value)) => Some(value),
                _ => None,
            },
            long_short: match long_short {
                Some(MetricValue::LongShort(split)) => Some(split),
                _ => None,
            },
            open_interest: match open_interest {
                Some(MetricValue::OpenInterest(value)) => Some(value),
                _ => None,
            },
            orderbook_ratio: match orderbook_ratio {
                Some(MetricValue::OrderbookRatio(value)) => Some(value),
                _ => None,
            },
        }
    }

    /// Try candidate sources in order, returning the first well-formed value
    /// or `None` once the chain is exhausted.
    async fn resolve(&self, request: MetricRequest) -> Option<MetricValue> {
        for source in self.chain(request.kind) {
            match source.resolve(&request).await.and_then(validate) {
                Ok(value) => return Some(value),
                Err(error) => {
                    debug!(
                        source = source.name(),
                        kind = %request.kind,
                        exchange = %request.exchange,
                        symbol = %request.symbol,
                        %error,
                        "metric source failed, trying next candidate"
                    );
                }
            }
        }
        None
    }
}

/// Reject values that are numerically present but not well-formed: momentum
/// outside [0, 100], non-finite funding rates, long/short splits that do not
/// sum to 100 within tolerance, negative or non-finite open interest and
/// orderbook ratios.
fn validate(value: MetricValue) -> Result<MetricValue, MetricError> {
    match value {
        MetricValue::Momentum(momentum) => {
            if momentum.is_finite() && (0.0..=100.0).contains(&momentum) {
                Ok(value)
            } else {
                Err(MetricError::Malformed(format!(
                    "momentum {momentum} outside [0, 100]"
                )))
            }
        }
        MetricValue::FundingRate(rate) => {
            if rate.is_finite() {
                Ok(value)
            } else {
                Err(MetricError::Malformed(format!(
                    "funding rate {rate} is not finite"
                )))
            }
        }
        MetricValue::LongShort(split) => {
            let sum = split.long_pct + split.short_pct;
            if sum.is_finite() && (sum - 100.0).abs() <= LONG_SHORT_SUM_TOLERANCE {
                Ok(value)
            } else {
                Err(MetricError::Malformed(format!(
                    "long/short percentages sum to {sum}, expected 100"
                )))
            }
        }
        MetricValue::OpenInterest(interest) => {
            if interest.is_finite() && interest >= 0.0 {
                Ok(value)
            } else {
                Err(MetricError::Malformed(format!(
                    "open interest {interest} is negative or not finite"
                )))
            }
        }
        MetricValue::OrderbookRatio(ratio) => {
            if ratio.is_finite() && ratio >= 0.0 {
                Ok(value)
            } else {
                Err(MetricError::Malformed(format!(
                    "orderbook ratio {ratio} is negative or not finite"
                )))
            }
        }
    }
}

/// Per-cycle cache of resolved bundles, keyed by (exchange, symbol).
///
/// The first requester of a key computes the bundle; concurrent and later
/// requesters within the same cycle await the same `OnceCell` instead of
/// racing duplicate resolutions. Dropped at the end of the cycle.
pub struct CycleMetricCache {
    resolver: Arc<MetricResolver>,
    cells: Mutex<FnvHashMap<(ExchangeId, SmolStr), Arc<OnceCell<MetricBundle>>>>,
}

impl CycleMetricCache {
    pub fn new(resolver: Arc<MetricResolver>) -> Self {
        Self {
            resolver,
            cells: Mutex::new(FnvHashMap::default()),
        }
    }

    pub async fn bundle(
        &self,
        exchange: ExchangeId,
        symbol: &SmolStr,
        timeframe: Timeframe,
        candles: Arc<[Candle]>,
    ) -> MetricBundle {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(
                cells
                    .entry((exchange, symbol.clone()))
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        *cell
            .get_or_init(|| {
                self.resolver
                    .resolve_bundle(exchange, symbol, timeframe, candles)
            })
            .await
    }
}
