use super::{ExchangeId, MarketDataClient, bid_ask_ratio};
use crate::{
    candle::{Candle, Timeframe},
    de,
    error::FetchError,
    limiter::RateLimiter,
};
use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use smol_str::ToSmolStr;

/// [`BybitClient`] v5 market data base url.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/intro>
pub const HTTP_BASE_URL_BYBIT: &str = "https://api.bybit.com/v5/market";

/// Bybit return code for malformed request parameters, including symbols
/// absent from the tradable set.
const RET_CODE_PARAMS_ERROR: i64 = 10001;

/// Aggregation window for the long/short account ratio endpoint.
const ACCOUNT_RATIO_PERIOD: &str = "5min";

/// Aggregation window for the open interest endpoint.
const OPEN_INTEREST_PERIOD: &str = "5min";

/// Price levels per side summed for the orderbook bid/ask ratio.
const ORDERBOOK_DEPTH: &str = "50";

/// Bybit REST [`MarketDataClient`]. Candles come from the spot category; the
/// auxiliary metrics come from the linear perpetual category.
#[derive(Debug, Clone)]
pub struct BybitClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    base_url: String,
}

impl BybitClient {
    pub fn new(http: reqwest::Client, limiter: RateLimiter) -> Self {
        Self {
            http,
            limiter,
            base_url: HTTP_BASE_URL_BYBIT.to_string(),
        }
    }

    /// Translate a [`Timeframe`] into the venue's minute-count interval code.
    pub fn interval_code(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1",
            Timeframe::M5 => "5",
            Timeframe::M15 => "15",
            Timeframe::M30 => "30",
            Timeframe::H1 => "60",
        }
    }

    /// Issue a rate-limited GET and unwrap the venue's `retCode` envelope.
    async fn send<T>(
        &self,
        request: reqwest::RequestBuilder,
        symbol: &str,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let _permit = self.limiter.acquire().await;

        let response = request
            .send()
            .await
            .map_err(|error| FetchError::transient(ExchangeId::Bybit, error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::transient(
                ExchangeId::Bybit,
                format!("http {status}"),
            ));
        }

        let envelope = response
            .json::<BybitResponse<T>>()
            .await
            .map_err(|error| FetchError::malformed(ExchangeId::Bybit, error.to_string()))?;

        if envelope.ret_code != 0 {
            if envelope.ret_code == RET_CODE_PARAMS_ERROR
                && envelope.ret_msg.to_lowercase().contains("symbol")
            {
                return Err(FetchError::UnknownSymbol {
                    exchange: ExchangeId::Bybit,
                    symbol: symbol.to_smolstr(),
                });
            }
            return Err(FetchError::transient(
                ExchangeId::Bybit,
                format!(
                    "retCode={} retMsg={}",
                    envelope.ret_code, envelope.ret_msg
                ),
            ));
        }

        envelope.result.ok_or_else(|| {
            FetchError::malformed(ExchangeId::Bybit, "successful response missing result")
        })
    }
}

#[async_trait]
impl MarketDataClient for BybitClient {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        let request = self.http.get(format!("{}/kline", self.base_url)).query(&[
            ("category", "spot"),
            ("symbol", symbol),
            ("interval", Self::interval_code(timeframe)),
            ("limit", &limit.to_string()),
        ]);

        let result = self.send::<BybitKlineResult>(request, symbol).await?;

        // The venue returns rows newest-first; normalise to oldest -> newest.
        result
            .list
            .into_iter()
            .rev()
            .map(|row| candle_from_row(&row))
            .collect()
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<f64>, FetchError> {
        let request = self
            .http
            .get(format!("{}/funding/history", self.base_url))
            .query(&[("category", "linear"), ("symbol", symbol), ("limit", "1")]);

        let result = self.send::<BybitFundingResult>(request, symbol).await?;

        // Bybit reports the rate as a decimal fraction, eg/ 0.0001 -> 0.01%
        Ok(result.list.first().map(|entry| entry.funding_rate * 100.0))
    }

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
    ) -> Result<Option<(f64, f64)>, FetchError> {
        let request = self
            .http
            .get(format!("{}/account-ratio", self.base_url))
            .query(&[
                ("category", "linear"),
                ("symbol", symbol),
                ("period", ACCOUNT_RATIO_PERIOD),
                ("limit", "1"),
            ]);

        let result = self.send::<BybitAccountRatioResult>(request, symbol).await?;

        Ok(result
            .list
            .first()
            .map(|entry| (entry.buy_ratio * 100.0, entry.sell_ratio * 100.0)))
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, FetchError> {
        let request = self
            .http
            .get(format!("{}/open-interest", self.base_url))
            .query(&[
                ("category", "linear"),
                ("symbol", symbol),
                ("intervalTime", OPEN_INTEREST_PERIOD),
                ("limit", "1"),
            ]);

        let result = self.send::<BybitOpenInterestResult>(request, symbol).await?;

        Ok(result.list.first().map(|entry| entry.open_interest))
    }

    async fn fetch_orderbook_ratio(&self, symbol: &str) -> Result<Option<f64>, FetchError> {
        let request = self
            .http
            .get(format!("{}/orderbook", self.base_url))
            .query(&[
                ("category", "linear"),
                ("symbol", symbol),
                ("limit", ORDERBOOK_DEPTH),
            ]);

        let result = self.send::<BybitOrderbookResult>(request, symbol).await?;

        Ok(bid_ask_ratio(&result.bids, &result.asks))
    }
}

/// Bybit v5 response envelope wrapping every REST result.
///
/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/market/kline>
/// ```json
/// {"retCode":0,"retMsg":"OK","result":{...},"time":1672025956592}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

/// Kline rows shaped `["startTime", "open", "high", "low", "close", "volume",
/// "turnover"]`, newest first.
#[derive(Clone, Debug, Deserialize)]
struct BybitKlineResult {
    list: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize)]
struct BybitFundingResult {
    list: Vec<BybitFundingRate>,
}

/// ### Raw Payload Examples
/// ```json
/// {"symbol":"BTCUSDT","fundingRate":"0.0001","fundingRateTimestamp":"1672041600000"}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BybitFundingRate {
    #[serde(rename = "fundingRate", deserialize_with = "de::de_str")]
    funding_rate: f64,
}

#[derive(Clone, Debug, Deserialize)]
struct BybitAccountRatioResult {
    list: Vec<BybitAccountRatio>,
}

#[derive(Clone, Debug, Deserialize)]
struct BybitOpenInterestResult {
    list: Vec<BybitOpenInterest>,
}

/// ### Raw Payload Examples
/// ```json
/// {"openInterest":"118.73","timestamp":"1698768000000"}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BybitOpenInterest {
    #[serde(rename = "openInterest", deserialize_with = "de::de_str")]
    open_interest: f64,
}

/// Order book snapshot, levels as `["price", "size"]` per side.
///
/// ### Raw Payload Examples
/// ```json
/// {"s":"BTCUSDT","b":[["34100.00","4.30"]],"a":[["34101.00","2.15"]],"ts":1698768000000,"u":1027024}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BybitOrderbookResult {
    #[serde(rename = "b")]
    bids: Vec<(String, String)>,
    #[serde(rename = "a")]
    asks: Vec<(String, String)>,
}

/// ### Raw Payload Examples
/// ```json
/// {"symbol":"BTCUSDT","buyRatio":"0.6","sellRatio":"0.4","timestamp":"1672041600000"}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BybitAccountRatio {
    #[serde(rename = "buyRatio", deserialize_with = "de::de_str")]
    buy_ratio: f64,
    #[serde(rename = "sellRatio", deserialize_with = "de::de_str")]
    sell_ratio: f64,
}

fn candle_from_row(row: &[String]) -> Result<Candle, FetchError> {
    let field = |index: usize| -> Result<f64, FetchError> {
        row.get(index)
            .and_then(|field| field.parse::<f64>().ok())
            .ok_or_else(|| {
                FetchError::malformed(
                    ExchangeId::Bybit,
                    format!("kline row field {index} is not a string-encoded number"),
                )
            })
    };

    Ok(Candle {
        open_time: row
            .first()
            .and_then(|start| de::datetime_utc_from_epoch_ms_str(start))
            .ok_or_else(|| {
                FetchError::malformed(ExchangeId::Bybit, "kline row missing start time")
            })?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod de {
        use super::*;
        use crate::de::datetime_utc_from_epoch_ms;

        #[test]
        fn test_bybit_kline_result() {
            let input = r#"
                {
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {
                        "category": "spot",
                        "symbol": "BTCUSDT",
                        "list": [
                            ["1698768000000", "34250.00", "34500.00", "34200.00", "34450.00", "98.75", "3400000.0"],
                            ["1698764400000", "34100.00", "34300.00", "34050.00", "34250.00", "120.50", "4123000.0"]
                        ]
                    },
                    "time": 1698770000000
                }
            "#;

            let envelope = serde_json::from_str::<BybitResponse<BybitKlineResult>>(input).unwrap();
            assert_eq!(envelope.ret_code, 0);

            // Re-create the client normalisation: reverse to oldest -> newest
            let candles = envelope
                .result
                .unwrap()
                .list
                .into_iter()
                .rev()
                .map(|row| candle_from_row(&row))
                .collect::<Result<Vec<_>, _>>()
                .unwrap();

            assert_eq!(
                candles,
                vec![
                    Candle {
                        open_time: datetime_utc_from_epoch_ms(1698764400000).unwrap(),
                        open: 34100.0,
                        high: 34300.0,
                        low: 34050.0,
                        close: 34250.0,
                        volume: 120.5,
                    },
                    Candle {
                        open_time: datetime_utc_from_epoch_ms(1698768000000).unwrap(),
                        open: 34250.0,
                        high: 34500.0,
                        low: 34200.0,
                        close: 34450.0,
                        volume: 98.75,
                    },
                ]
            );
        }

        #[test]
        fn test_bybit_funding_result() {
            let input = r#"
                {
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {
                        "category": "linear",
                        "list": [
                            {"symbol": "BTCUSDT", "fundingRate": "0.0001", "fundingRateTimestamp": "1672041600000"}
                        ]
                    }
                }
            "#;

            let envelope =
                serde_json::from_str::<BybitResponse<BybitFundingResult>>(input).unwrap();
            let result = envelope.result.unwrap();
            assert_eq!(result.list[0].funding_rate, 0.0001);
        }

        #[test]
        fn test_bybit_account_ratio_result() {
            let input = r#"
                {
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {
                        "list": [
                            {"symbol": "BTCUSDT", "buyRatio": "0.6", "sellRatio": "0.4", "timestamp": "1672041600000"}
                        ]
                    }
                }
            "#;

            let envelope =
                serde_json::from_str::<BybitResponse<BybitAccountRatioResult>>(input).unwrap();
            let result = envelope.result.unwrap();
            assert_eq!(result.list[0].buy_ratio, 0.6);
            assert_eq!(result.list[0].sell_ratio, 0.4);
        }

        #[test]
        fn test_bybit_open_interest_result() {
            let input = r#"
                {
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {
                        "category": "linear",
                        "symbol": "BTCUSDT",
                        "list": [
                            {"openInterest": "118.73", "timestamp": "1698768000000"}
                        ]
                    }
                }
            "#;

            let envelope =
                serde_json::from_str::<BybitResponse<BybitOpenInterestResult>>(input).unwrap();
            let result = envelope.result.unwrap();
            assert_eq!(result.list[0].open_interest, 118.73);
        }

        #[test]
        fn test_bybit_orderbook_result() {
            let input = r#"
                {
                    "retCode": 0,
                    "retMsg": "OK",
                    "result": {
                        "s": "BTCUSDT",
                        "b": [["34100.00", "4.00"], ["34099.00", "2.00"]],
                        "a": [["34101.00", "2.00"], ["34102.00", "1.00"]],
                        "ts": 1698768000000,
                        "u": 1027024
                    }
                }
            "#;

            let envelope =
                serde_json::from_str::<BybitResponse<BybitOrderbookResult>>(input).unwrap();
            let result = envelope.result.unwrap();

            // 6.0 bid volume over 3.0 ask volume
            assert_eq!(bid_ask_ratio(&result.bids, &result.asks), Some(2.0));
        }

        #[test]
        fn test_bybit_params_error_envelope() {
            let input = r#"{"retCode":10001,"retMsg":"params error: Symbol Is Invalid","result":{},"time":1672025956592}"#;
            let envelope =
                serde_json::from_str::<BybitResponse<serde_json::Value>>(input).unwrap();
            assert_eq!(envelope.ret_code, RET_CODE_PARAMS_ERROR);
            assert!(envelope.ret_msg.to_lowercase().contains("symbol"));
        }
    }

    #[test]
    fn test_interval_code_mapping() {
        struct TestCase {
            input: Timeframe,
            expected: &'static str,
        }

        let tests = vec![
            // TC0: one minute
            TestCase {
                input: Timeframe::M1,
                expected: "1",
            },
            // TC1: thirty minutes
            TestCase {
                input: Timeframe::M30,
                expected: "30",
            },
            // TC2: one hour maps to a minute count
            TestCase {
                input: Timeframe::H1,
                expected: "60",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                BybitClient::interval_code(test.input),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }
}
