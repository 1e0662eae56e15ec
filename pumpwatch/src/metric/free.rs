use super::{
    LongShortSplit, MetricKind, MetricRequest, MetricSource, MetricValue,
    momentum::{self, MOMENTUM_PERIOD},
};
use crate::{
    error::MetricError,
    exchange::{ExchangeId, MarketDataClient},
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use std::sync::Arc;

/// Free [`MetricSource`]: momentum is computed locally from the candles
/// already fetched for evaluation (no re-fetch); funding, long/short, open
/// interest and the orderbook ratio come from the venue's own public
/// endpoints, which sit behind the per-venue rate limiters inside each
/// client.
pub struct FreeSource {
    clients: FnvHashMap<ExchangeId, Arc<dyn MarketDataClient>>,
}

impl FreeSource {
    pub fn new(clients: impl IntoIterator<Item = Arc<dyn MarketDataClient>>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.exchange(), client))
                .collect(),
        }
    }

    fn client(&self, exchange: ExchangeId) -> Result<&Arc<dyn MarketDataClient>, MetricError> {
        self.clients.get(&exchange).ok_or(MetricError::Unavailable)
    }
}

#[async_trait]
impl MetricSource for FreeSource {
    fn name(&self) -> &'static str {
        "exchange-free"
    }

    async fn resolve(&self, request: &MetricRequest) -> Result<MetricValue, MetricError> {
        match request.kind {
            MetricKind::Momentum => {
                momentum::relative_strength_index(&request.candles, MOMENTUM_PERIOD)
                    .map(MetricValue::Momentum)
                    .ok_or(MetricError::Unavailable)
            }
            MetricKind::FundingRate => self
                .client(request.exchange)?
                .fetch_funding_rate(&request.symbol)
                .await?
                .map(MetricValue::FundingRate)
                .ok_or(MetricError::Unavailable),
            MetricKind::LongShortRatio => self
                .client(request.exchange)?
                .fetch_long_short_ratio(&request.symbol)
                .await?
                .map(|(long_pct, short_pct)| {
                    MetricValue::LongShort(LongShortSplit {
                        long_pct,
                        short_pct,
                    })
                })
                .ok_or(MetricError::Unavailable),
            MetricKind::OpenInterest => self
                .client(request.exchange)?
                .fetch_open_interest(&request.symbol)
                .await?
                .map(MetricValue::OpenInterest)
                .ok_or(MetricError::Unavailable),
            MetricKind::OrderbookRatio => self
                .client(request.exchange)?
                .fetch_orderbook_ratio(&request.symbol)
                .await?
                .map(MetricValue::OrderbookRatio)
                .ok_or(MetricError::Unavailable),
        }
    }
}
