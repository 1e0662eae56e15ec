use super::{ExchangeId, MarketDataClient, bid_ask_ratio};
use crate::{
    candle::{Candle, Timeframe},
    de,
    error::FetchError,
    limiter::RateLimiter,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use smol_str::ToSmolStr;

/// [`BinanceClient`] spot market data base url.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api>
pub const HTTP_BASE_URL_BINANCE_SPOT: &str = "https://api.binance.com/api/v3";

/// [`BinanceClient`] USDT-margined futures base url, used for the auxiliary
/// funding rate and long/short ratio endpoints.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/general-info>
pub const HTTP_BASE_URL_BINANCE_FUTURES: &str = "https://fapi.binance.com";

/// Binance error code returned for a symbol absent from the tradable set.
const ERROR_CODE_INVALID_SYMBOL: i64 = -1121;

/// Aggregation window for the global long/short account ratio endpoint.
const LONG_SHORT_PERIOD: &str = "5m";

/// Price levels per side summed for the orderbook bid/ask ratio.
const ORDERBOOK_DEPTH: &str = "50";

/// Binance REST [`MarketDataClient`]. Candles come from the spot API; the
/// auxiliary metrics come from the public futures API.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    spot_url: String,
    futures_url: String,
}

impl BinanceClient {
    pub fn new(http: reqwest::Client, limiter: RateLimiter) -> Self {
        Self {
            http,
            limiter,
            spot_url: HTTP_BASE_URL_BINANCE_SPOT.to_string(),
            futures_url: HTTP_BASE_URL_BINANCE_FUTURES.to_string(),
        }
    }

    /// Issue a rate-limited GET, mapping venue error envelopes onto the
    /// [`FetchError`] taxonomy.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        symbol: &str,
    ) -> Result<Value, FetchError> {
        let _permit = self.limiter.acquire().await;

        let response = request
            .send()
            .await
            .map_err(|error| FetchError::transient(ExchangeId::Binance, error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| FetchError::transient(ExchangeId::Binance, error))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<BinanceHttpError>(&body) {
                if error.code == ERROR_CODE_INVALID_SYMBOL {
                    return Err(FetchError::UnknownSymbol {
                        exchange: ExchangeId::Binance,
                        symbol: symbol.to_smolstr(),
                    });
                }
                return Err(FetchError::transient(
                    ExchangeId::Binance,
                    format!("http {status}: code={} msg={}", error.code, error.msg),
                ));
            }
            return Err(FetchError::transient(
                ExchangeId::Binance,
                format!("http {status}"),
            ));
        }

        serde_json::from_str(&body)
            .map_err(|error| FetchError::malformed(ExchangeId::Binance, error.to_string()))
    }
}

#[async_trait]
impl MarketDataClient for BinanceClient {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        let request = self.http.get(format!("{}/klines", self.spot_url)).query(&[
            ("symbol", symbol),
            ("interval", timeframe.as_str()),
            ("limit", &limit.to_string()),
        ]);

        let payload = self.send(request, symbol).await?;
        parse_klines(&payload)
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<f64>, FetchError> {
        let request = self
            .http
            .get(format!("{}/fapi/v1/fundingRate", self.futures_url))
            .query(&[("symbol", symbol), ("limit", "1")]);

        let payload = self.send(request, symbol).await?;
        let rates = serde_json::from_value::<Vec<BinanceFundingRate>>(payload)
            .map_err(|error| FetchError::malformed(ExchangeId::Binance, error.to_string()))?;

        // Binance reports the rate as a decimal fraction, eg/ 0.0001 -> 0.01%
        Ok(rates.first().map(|rate| rate.funding_rate * 100.0))
    }

    async fn fetch_long_short_ratio(
        &self,
        symbol: &str,
    ) -> Result<Option<(f64, f64)>, FetchError> {
        let request = self
            .http
            .get(format!(
                "{}/futures/data/globalLongShortAccountRatio",
                self.futures_url
            ))
            .query(&[
                ("symbol", symbol),
                ("period", LONG_SHORT_PERIOD),
                ("limit", "1"),
            ]);

        let payload = self.send(request, symbol).await?;
        let ratios = serde_json::from_value::<Vec<BinanceLongShortRatio>>(payload)
            .map_err(|error| FetchError::malformed(ExchangeId::Binance, error.to_string()))?;

        Ok(ratios.first().map(|entry| {
            // ratio r means r longs for every short: long% = r / (r + 1)
            let long_pct = (entry.long_short_ratio / (entry.long_short_ratio + 1.0)) * 100.0;
            (long_pct, 100.0 - long_pct)
        }))
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, FetchError> {
        let request = self
            .http
            .get(format!("{}/fapi/v1/openInterest", self.futures_url))
            .query(&[("symbol", symbol)]);

        let payload = self.send(request, symbol).await?;
        let entry = serde_json::from_value::<BinanceOpenInterest>(payload)
            .map_err(|error| FetchError::malformed(ExchangeId::Binance, error.to_string()))?;

        Ok(Some(entry.open_interest))
    }

    async fn fetch_orderbook_ratio(&self, symbol: &str) -> Result<Option<f64>, FetchError> {
        let request = self
            .http
            .get(format!("{}/fapi/v1/depth", self.futures_url))
            .query(&[("symbol", symbol), ("limit", ORDERBOOK_DEPTH)]);

        let payload = self.send(request, symbol).await?;
        let book = serde_json::from_value::<BinanceOrderBook>(payload)
            .map_err(|error| FetchError::malformed(ExchangeId::Binance, error.to_string()))?;

        Ok(bid_ask_ratio(&book.bids, &book.asks))
    }
}

/// Binance REST error envelope.
///
/// ### Raw Payload Examples
/// ```json
/// {"code":-1121,"msg":"Invalid symbol."}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BinanceHttpError {
    code: i64,
    msg: String,
}

/// Latest funding rate entry from the futures API.
///
/// ### Raw Payload Examples
/// ```json
/// {"symbol":"BTCUSDT","fundingTime":1698768000000,"fundingRate":"0.00010000","markPrice":"34287.54"}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BinanceFundingRate {
    #[serde(rename = "fundingRate", deserialize_with = "de::de_str")]
    funding_rate: f64,
}

/// Global long/short account ratio entry from the futures API.
///
/// ### Raw Payload Examples
/// ```json
/// {"symbol":"BTCUSDT","longShortRatio":"1.5000","longAccount":"0.6000","shortAccount":"0.4000","timestamp":1698768000000}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BinanceLongShortRatio {
    #[serde(rename = "longShortRatio", deserialize_with = "de::de_str")]
    long_short_ratio: f64,
}

/// Current open interest from the futures API.
///
/// ### Raw Payload Examples
/// ```json
/// {"symbol":"BTCUSDT","openInterest":"10659.509","time":1698768000000}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BinanceOpenInterest {
    #[serde(rename = "openInterest", deserialize_with = "de::de_str")]
    open_interest: f64,
}

/// Order book snapshot from the futures API, levels as `["price", "qty"]`.
///
/// ### Raw Payload Examples
/// ```json
/// {"lastUpdateId":1027024,"bids":[["34100.00","4.30"]],"asks":[["34101.00","2.15"]]}
/// ```
#[derive(Clone, Debug, Deserialize)]
struct BinanceOrderBook {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

/// Parse the spot kline payload: an array of rows shaped
/// `[open_time, "open", "high", "low", "close", "volume", ...]`, ordered
/// oldest -> newest.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api#klinecandlestick-data>
fn parse_klines(payload: &Value) -> Result<Vec<Candle>, FetchError> {
    let rows = payload
        .as_array()
        .ok_or_else(|| FetchError::malformed(ExchangeId::Binance, "klines payload is not an array"))?;

    rows.iter()
        .map(|row| {
            let row = row.as_array().ok_or_else(|| {
                FetchError::malformed(ExchangeId::Binance, "kline row is not an array")
            })?;

            Ok(Candle {
                open_time: row
                    .first()
                    .and_then(Value::as_i64)
                    .and_then(de::datetime_utc_from_epoch_ms)
                    .ok_or_else(|| {
                        FetchError::malformed(ExchangeId::Binance, "kline row missing open time")
                    })?,
                open: kline_field_f64(row, 1)?,
                high: kline_field_f64(row, 2)?,
                low: kline_field_f64(row, 3)?,
                close: kline_field_f64(row, 4)?,
                volume: kline_field_f64(row, 5)?,
            })
        })
        .collect()
}

fn kline_field_f64(row: &[Value], index: usize) -> Result<f64, FetchError> {
    row.get(index)
        .and_then(Value::as_str)
        .and_then(|field| field.parse::<f64>().ok())
        .ok_or_else(|| {
            FetchError::malformed(
                ExchangeId::Binance,
                format!("kline row field {index} is not a string-encoded number"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod de {
        use super::*;
        use crate::de::datetime_utc_from_epoch_ms;

        #[test]
        fn test_parse_klines() {
            struct TestCase {
                input: &'static str,
                expected: Result<Vec<Candle>, FetchError>,
            }

            let tests = vec![
                // TC0: valid two-row kline payload is parsed oldest -> newest
                TestCase {
                    input: r#"
                        [
                            [1698764400000, "34100.00", "34300.00", "34050.00", "34250.00", "120.50", 1698767999999, "4123000.0", 1000, "60.25", "2061500.0", "0"],
                            [1698768000000, "34250.00", "34500.00", "34200.00", "34450.00", "98.75", 1698771599999, "3400000.0", 900, "49.30", "1700000.0", "0"]
                        ]
                    "#,
                    expected: Ok(vec![
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
                    ]),
                },
                // TC1: non-array payload is malformed
                TestCase {
                    input: r#"{"code":-1121,"msg":"Invalid symbol."}"#,
                    expected: Err(FetchError::Malformed {
                        exchange: ExchangeId::Binance,
                        message: "".to_string(),
                    }),
                },
                // TC2: row with a numeric (non-string) price field is malformed
                TestCase {
                    input: r#"[[1698764400000, 34100.0, "34300.00", "34050.00", "34250.00", "120.50"]]"#,
                    expected: Err(FetchError::Malformed {
                        exchange: ExchangeId::Binance,
                        message: "".to_string(),
                    }),
                },
            ];

            for (index, test) in tests.into_iter().enumerate() {
                let payload = serde_json::from_str::<Value>(test.input).unwrap();
                let actual = parse_klines(&payload);
                match (actual, test.expected) {
                    (Ok(actual), Ok(expected)) => {
                        assert_eq!(actual, expected, "TC{} failed", index)
                    }
                    (Err(_), Err(_)) => {
                        // Test passed
                    }
                    (actual, expected) => {
                        panic!(
                            "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                        );
                    }
                }
            }
        }

        #[test]
        fn test_binance_funding_rate() {
            let input = r#"
                [{"symbol":"BTCUSDT","fundingTime":1698768000000,"fundingRate":"0.00010000","markPrice":"34287.54"}]
            "#;
            let actual = serde_json::from_str::<Vec<BinanceFundingRate>>(input).unwrap();
            assert_eq!(actual.len(), 1);
            assert_eq!(actual[0].funding_rate, 0.0001);
        }

        #[test]
        fn test_binance_long_short_ratio() {
            let input = r#"
                [{"symbol":"BTCUSDT","longShortRatio":"1.5000","longAccount":"0.6000","shortAccount":"0.4000","timestamp":1698768000000}]
            "#;
            let actual = serde_json::from_str::<Vec<BinanceLongShortRatio>>(input).unwrap();
            assert_eq!(actual[0].long_short_ratio, 1.5);
        }

        #[test]
        fn test_binance_open_interest() {
            let input = r#"{"symbol":"BTCUSDT","openInterest":"10659.509","time":1698768000000}"#;
            let actual = serde_json::from_str::<BinanceOpenInterest>(input).unwrap();
            assert_eq!(actual.open_interest, 10659.509);
        }

        #[test]
        fn test_binance_order_book_ratio() {
            let input = r#"
                {"lastUpdateId":1027024,"bids":[["34100.00","4.00"],["34099.00","2.00"]],"asks":[["34101.00","2.00"],["34102.00","1.00"]]}
            "#;
            let book = serde_json::from_str::<BinanceOrderBook>(input).unwrap();

            // 6.0 bid volume over 3.0 ask volume
            assert_eq!(bid_ask_ratio(&book.bids, &book.asks), Some(2.0));
            // Empty ask side yields absent, never zero
            assert_eq!(bid_ask_ratio(&book.bids, &[]), None);
        }

        #[test]
        fn test_binance_http_error() {
            let input = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
            let actual = serde_json::from_str::<BinanceHttpError>(input).unwrap();
            assert_eq!(actual.code, ERROR_CODE_INVALID_SYMBOL);
            assert_eq!(actual.msg, "Invalid symbol.");
        }
    }
}
