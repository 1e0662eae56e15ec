use crate::{candle::Candle, exchange::ExchangeId, metric::MetricBundle};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Direction of a qualifying price move.
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
pub enum Direction {
    #[display("🟢 PUMP")]
    Pump,
    #[display("🔴 DUMP")]
    Dump,
}

/// Output of evaluating one consecutive candle pair against a threshold.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Evaluation {
    /// `Some` only when the move meets the threshold (inclusive boundary).
    pub direction: Option<Direction>,
    pub price_change_pct: f64,
    pub volume_change_pct: f64,
    /// Latest close, reported in the alert.
    pub price: f64,
    /// Latest candle volume, reported in the alert.
    pub volume: f64,
}

/// Evaluate a consecutive `(previous, current)` candle pair against a user's
/// pump/dump threshold. Pure and deterministic: no I/O, no side effects.
///
/// `price_change_pct = (current.close - previous.open) / previous.open * 100`,
/// pump when >= +threshold, dump when <= -threshold, both inclusive.
/// Both change percentages are defined as 0 over a degenerate baseline:
/// `price_change_pct` when `previous.open` is 0, `volume_change_pct` when
/// `previous.volume` is 0, keeping the evaluator total (no NaN/infinity).
pub fn evaluate(previous: &Candle, current: &Candle, threshold_pct: f64) -> Evaluation {
    let price_change_pct = if previous.open == 0.0 {
        0.0
    } else {
        ((current.close - previous.open) / previous.open) * 100.0
    };

    let volume_change_pct = if previous.volume == 0.0 {
        0.0
    } else {
        ((current.volume - previous.volume) / previous.volume) * 100.0
    };

    let direction = if price_change_pct >= threshold_pct {
        Some(Direction::Pump)
    } else if price_change_pct <= -threshold_pct {
        Some(Direction::Dump)
    } else {
        None
    };

    Evaluation {
        direction,
        price_change_pct,
        volume_change_pct,
        price: current.close,
        volume: current.volume,
    }
}

/// Fully assembled alert for one qualifying (user, symbol, direction) event.
/// Transient: constructed, possibly delivered, then discarded.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Signal {
    pub user_id: i64,
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub direction: Direction,
    pub price_change_pct: f64,
    pub volume_change_pct: f64,
    pub price: f64,
    pub volume: f64,
    pub metrics: MetricBundle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(open: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: Utc.with_ymd_and_hms(2023, 10, 31, 12, 0, 0).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    #[test]
    fn test_evaluate() {
        struct TestCase {
            previous: Candle,
            current: Candle,
            threshold_pct: f64,
            expected_direction: Option<Direction>,
            expected_price_change_pct: f64,
            expected_volume_change_pct: f64,
        }

        let tests = vec![
            // TC0: +2.0% move at 2.0% threshold is a pump (inclusive boundary)
            TestCase {
                previous: candle(100.0, 101.0, 50.0),
                current: candle(101.0, 102.0, 75.0),
                threshold_pct: 2.0,
                expected_direction: Some(Direction::Pump),
                expected_price_change_pct: 2.0,
                expected_volume_change_pct: 50.0,
            },
            // TC1: +1.99% move at 2.0% threshold yields no signal
            TestCase {
                previous: candle(100.0, 101.0, 50.0),
                current: candle(101.0, 101.99, 75.0),
                threshold_pct: 2.0,
                expected_direction: None,
                expected_price_change_pct: 1.99,
                expected_volume_change_pct: 50.0,
            },
            // TC2: -5.0% move is a dump
            TestCase {
                previous: candle(100.0, 98.0, 50.0),
                current: candle(98.0, 95.0, 40.0),
                threshold_pct: 2.0,
                expected_direction: Some(Direction::Dump),
                expected_price_change_pct: -5.0,
                expected_volume_change_pct: -20.0,
            },
            // TC3: zero previous volume reports 0% volume change, no panic
            TestCase {
                previous: candle(100.0, 101.0, 0.0),
                current: candle(101.0, 103.0, 75.0),
                threshold_pct: 2.0,
                expected_direction: Some(Direction::Pump),
                expected_price_change_pct: 3.0,
                expected_volume_change_pct: 0.0,
            },
            // TC4: zero previous open reports 0% price change, never NaN
            TestCase {
                previous: candle(0.0, 0.0, 50.0),
                current: candle(0.0, 103.0, 75.0),
                threshold_pct: 2.0,
                expected_direction: None,
                expected_price_change_pct: 0.0,
                expected_volume_change_pct: 50.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = evaluate(&test.previous, &test.current, test.threshold_pct);
            assert_eq!(
                actual.direction, test.expected_direction,
                "TC{} failed",
                index
            );
            assert!(
                (actual.price_change_pct - test.expected_price_change_pct).abs() < 1e-9,
                "TC{} failed: price_change_pct {} != {}",
                index,
                actual.price_change_pct,
                test.expected_price_change_pct
            );
            assert!(
                (actual.volume_change_pct - test.expected_volume_change_pct).abs() < 1e-9,
                "TC{} failed: volume_change_pct {} != {}",
                index,
                actual.volume_change_pct,
                test.expected_volume_change_pct
            );
            assert_eq!(actual.price, test.current.close, "TC{} failed", index);
        }
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let previous = candle(100.0, 101.0, 50.0);
        let current = candle(101.0, 104.0, 80.0);

        let first = evaluate(&previous, &current, 2.0);
        let second = evaluate(&previous, &current, 2.0);
        assert_eq!(first, second);
    }
}
