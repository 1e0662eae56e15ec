use crate::error::ConfigError;
use smol_str::SmolStr;
use std::time::Duration;

/// Default wall-clock period between detection cycles.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(300);

/// Candles fetched per (exchange, symbol, timeframe) tuple: two for the
/// evaluation pair, plus enough history for the 14-period momentum window to
/// be computed from the same fetch.
pub const CANDLE_FETCH_COUNT: u32 = 16;

/// Configuration inputs the pipeline accepts at start. Validated once via
/// [`MonitorConfig::validate`]; configuration problems are fatal at startup,
/// never at runtime.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Wall-clock period between cycles. Overrunning cycles cause skipped
    /// ticks, never queued ones.
    pub cycle_interval: Duration,
    /// Tracked symbol universe, injected rather than hardcoded so it can be
    /// revalidated externally without code changes.
    pub symbols: Vec<SmolStr>,
    /// Ceiling on concurrent in-flight requests per venue.
    pub requests_in_flight: usize,
    /// Bound on every outbound network call.
    pub request_timeout: Duration,
    /// Enables the paid aggregator metric source when present.
    pub coinglass_api_key: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            symbols: Vec::new(),
            requests_in_flight: crate::limiter::DEFAULT_REQUESTS_IN_FLIGHT,
            request_timeout: crate::exchange::DEFAULT_REQUEST_TIMEOUT,
            coinglass_api_key: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval.is_zero() {
            return Err(ConfigError::ZeroCycleInterval);
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::EmptySymbolUniverse);
        }
        for symbol in &self.symbols {
            if symbol.is_empty()
                || !symbol
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            {
                return Err(ConfigError::InvalidSymbol(symbol.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::ToSmolStr;

    #[test]
    fn test_validate() {
        struct TestCase {
            config: MonitorConfig,
            expected: Result<(), ConfigError>,
        }

        let valid = MonitorConfig {
            symbols: vec!["BTCUSDT".to_smolstr(), "1INCHUSDT".to_smolstr()],
            ..MonitorConfig::default()
        };

        let tests = vec![
            // TC0: well-formed universe passes
            TestCase {
                config: valid.clone(),
                expected: Ok(()),
            },
            // TC1: empty universe is fatal
            TestCase {
                config: MonitorConfig {
                    symbols: Vec::new(),
                    ..valid.clone()
                },
                expected: Err(ConfigError::EmptySymbolUniverse),
            },
            // TC2: lowercase symbol is malformed
            TestCase {
                config: MonitorConfig {
                    symbols: vec!["btcusdt".to_smolstr()],
                    ..valid.clone()
                },
                expected: Err(ConfigError::InvalidSymbol("btcusdt".to_string())),
            },
            // TC3: zero interval is fatal
            TestCase {
                config: MonitorConfig {
                    cycle_interval: Duration::ZERO,
                    ..valid
                },
                expected: Err(ConfigError::ZeroCycleInterval),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.config.validate(), test.expected, "TC{} failed", index);
        }
    }
}
