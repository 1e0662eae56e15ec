use super::{LongShortSplit, MetricKind, MetricRequest, MetricSource, MetricValue};
use crate::{candle::Timeframe, error::MetricError, limiter::RateLimiter};
use async_trait::async_trait;
use serde_json::Value;

/// CoinGlass v4 base url, used for the per-timeframe momentum list.
pub const HTTP_BASE_URL_COINGLASS_V4: &str = "https://open-api-v4.coinglass.com/api";

/// CoinGlass v2 base url, used for funding and long/short indicators.
pub const HTTP_BASE_URL_COINGLASS_V2: &str = "https://open-api.coinglass.com/public/v2";

/// Paid aggregator [`MetricSource`] for all three metric kinds. Configured
/// only when an API key is present; carries its own request ceiling
/// independent of the per-venue limiters.
pub struct CoinglassSource {
    http: reqwest::Client,
    limiter: RateLimiter,
    api_key: String,
    v4_url: String,
    v2_url: String,
}

impl CoinglassSource {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            limiter: RateLimiter::default(),
            api_key,
            v4_url: HTTP_BASE_URL_COINGLASS_V4.to_string(),
            v2_url: HTTP_BASE_URL_COINGLASS_V2.to_string(),
        }
    }

    async fn get_json(&self, url: String, query: &[(&str, &str)]) -> Result<Value, MetricError> {
        let _permit = self.limiter.acquire().await;

        let response = self
            .http
            .get(url)
            .query(query)
            .header("accept", "application/json")
            .header("coinglassSecret", &self.api_key)
            .send()
            .await
            .map_err(|error| MetricError::Malformed(format!("coinglass request: {error}")))?;

        if !response.status().is_success() {
            return Err(MetricError::Malformed(format!(
                "coinglass http {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| MetricError::Malformed(format!("coinglass body: {error}")))
    }

    /// Momentum list keyed per symbol with one entry per timeframe, eg/
    /// `{"data": {"BTCUSDT": {"rsi_15m": 62.4, "rsi_1h": 55.1}}}`.
    async fn momentum(&self, request: &MetricRequest) -> Result<MetricValue, MetricError> {
        let payload = self
            .get_json(
                format!("{}/futures/rsi/list", self.v4_url),
                &[("symbol", request.symbol.as_str())],
            )
            .await?;

        let key = format!("rsi_{}", request.timeframe.as_str());
        let value = payload
            .get("data")
            .and_then(|data| data.get(request.symbol.as_str()))
            .and_then(|entry| entry.get(&key))
            .ok_or(MetricError::Unavailable)?;

        numeric(value)
            .map(MetricValue::Momentum)
            .ok_or_else(|| MetricError::Malformed(format!("momentum field {key}: {value}")))
    }

    /// Funding indicator, eg/ `{"data": [{"fundingRate": 0.01}]}`.
    async fn funding_rate(&self, request: &MetricRequest) -> Result<MetricValue, MetricError> {
        let payload = self
            .get_json(
                format!("{}/indicator/funding", self.v2_url),
                &[
                    ("ex", request.exchange.as_str()),
                    ("pair", request.symbol.as_str()),
                    ("interval", interval_code(request.timeframe)),
                    ("limit", "1"),
                ],
            )
            .await?;

        let value = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("fundingRate"))
            .ok_or(MetricError::Unavailable)?;

        numeric(value)
            .map(MetricValue::FundingRate)
            .ok_or_else(|| MetricError::Malformed(format!("fundingRate field: {value}")))
    }

    /// Aggregated long/short split, eg/
    /// `{"data": [{"longVolPct": 60.0, "shortVolPct": 40.0}]}`.
    async fn long_short(&self, request: &MetricRequest) -> Result<MetricValue, MetricError> {
        let payload = self
            .get_json(
                format!("{}/long_short", self.v2_url),
                &[("symbol", request.symbol.as_str()), ("time_type", "h1")],
            )
            .await?;

        let entry = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .ok_or(MetricError::Unavailable)?;

        let long_pct = entry.get("longVolPct").and_then(numeric);
        let short_pct = entry.get("shortVolPct").and_then(numeric);

        match (long_pct, short_pct) {
            (Some(long_pct), Some(short_pct)) => Ok(MetricValue::LongShort(LongShortSplit {
                long_pct,
                short_pct,
            })),
            _ => Err(MetricError::Malformed(format!(
                "long/short entry missing percentages: {entry}"
            ))),
        }
    }
}

#[async_trait]
impl MetricSource for CoinglassSource {
    fn name(&self) -> &'static str {
        "coinglass"
    }

    async fn resolve(&self, request: &MetricRequest) -> Result<MetricValue, MetricError> {
        match request.kind {
            MetricKind::Momentum => self.momentum(request).await,
            MetricKind::FundingRate => self.funding_rate(request).await,
            MetricKind::LongShortRatio => self.long_short(request).await,
            // Venue-derived kinds: defer straight to the free source
            MetricKind::OpenInterest | MetricKind::OrderbookRatio => {
                Err(MetricError::Unavailable)
            }
        }
    }
}

/// CoinGlass interval code for the funding indicator endpoint.
fn interval_code(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "m1",
        Timeframe::M5 => "m5",
        Timeframe::M15 => "m15",
        Timeframe::M30 => "m30",
        Timeframe::H1 => "h1",
    }
}

/// Aggregator payloads encode numbers inconsistently: accept both JSON
/// numbers and string-encoded values.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_accepts_numbers_and_strings() {
        assert_eq!(numeric(&serde_json::json!(62.4)), Some(62.4));
        assert_eq!(numeric(&serde_json::json!("62.4")), Some(62.4));
        assert_eq!(numeric(&serde_json::json!(null)), None);
        assert_eq!(numeric(&serde_json::json!("n/a")), None);
    }

    #[test]
    fn test_interval_code() {
        assert_eq!(interval_code(Timeframe::M15), "m15");
        assert_eq!(interval_code(Timeframe::H1), "h1");
    }
}
