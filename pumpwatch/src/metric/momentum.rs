use crate::candle::Candle;

/// Trailing delta count for the relative-strength oscillator.
pub const MOMENTUM_PERIOD: usize = 14;

/// Compute a bounded [0, 100] relative-strength oscillator over the trailing
/// `period` close-to-close deltas of `candles` (ordered oldest -> newest).
///
/// `RS = avg_gain / avg_loss`, oscillator `= 100 - 100 / (1 + RS)`, exactly
/// 100 when the window holds no losses. `None` when fewer than `period + 1`
/// candles are available.
pub fn relative_strength_index(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let closes = &candles[candles.len() - (period + 1)..];

    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for pair in closes.windows(2) {
        let delta = pair[1].close - pair[0].close;
        if delta >= 0.0 {
            gain_sum += delta;
        } else {
            loss_sum += -delta;
        }
    }

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
