use crate::{error::NotifyError, signal::Signal};
use async_trait::async_trait;

/// External delivery collaborator: hands formatted alert text to a
/// recipient. Failures are logged by the scheduler, never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, user_id: i64, text: &str) -> Result<(), NotifyError>;
}

/// Build the Markdown alert text for one qualifying signal.
///
/// The symbol line links to its CoinGlass currency page (USDT suffix
/// stripped from the base). Metric lines are appended only for present
/// values; an absent metric is an omitted line, never a zero.
pub fn format_signal(signal: &Signal) -> String {
    let base = signal
        .symbol
        .strip_suffix("USDT")
        .unwrap_or(signal.symbol.as_str());

    let mut lines = vec![
        format!(
            "{}! [{}](https://www.coinglass.com/currencies/{})",
            signal.direction, signal.symbol, base
        ),
        format!("💱 Exchange: {}", signal.exchange),
        format!("💵 Price: {:.4}", signal.price),
        format!("📉 Change: {:+.2}%", signal.price_change_pct),
        format!(
            "📊 Volume: {:.2} ({:+.2}%)",
            signal.volume, signal.volume_change_pct
        ),
    ];

    if let Some(momentum) = signal.metrics.momentum {
        lines.push(format!("❗️ RSI: {momentum:.2}"));
    }
    if let Some(funding) = signal.metrics.funding_rate_pct {
        lines.push(format!("❕ Funding: {funding:+.4}%"));
    }
    if let Some(split) = signal.metrics.long_short {
        lines.push(format!(
            "🔄 Long/Short ratio: {:.2}% / {:.2}%",
            split.long_pct, split.short_pct
        ));
    }
    if let Some(interest) = signal.metrics.open_interest {
        lines.push(format!("💰 Open interest: {interest:.2}"));
    }
    if let Some(ratio) = signal.metrics.orderbook_ratio {
        lines.push(format!("📊 Orderbook ratio (bid/ask): {ratio:.2}"));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exchange::ExchangeId,
        metric::{LongShortSplit, MetricBundle},
        signal::Direction,
    };
    use smol_str::ToSmolStr;

    fn signal(metrics: MetricBundle) -> Signal {
        Signal {
            user_id: 7,
            exchange: ExchangeId::Binance,
            symbol: "CRVUSDT".to_smolstr(),
            direction: Direction::Pump,
            price_change_pct: 2.35,
            volume_change_pct: 40.1,
            price: 0.5432,
            volume: 1234.5,
            metrics,
        }
    }

    #[test]
    fn test_format_signal_full_bundle() {
        let text = format_signal(&signal(MetricBundle {
            momentum: Some(71.25),
            funding_rate_pct: Some(0.01),
            long_short: Some(LongShortSplit {
                long_pct: 60.0,
                short_pct: 40.0,
            }),
            open_interest: Some(10659.5),
            orderbook_ratio: Some(2.0),
        }));

        let expected = "\
            🟢 PUMP! [CRVUSDT](https://www.coinglass.com/currencies/CRV)\n\
            💱 Exchange: Binance\n\
            💵 Price: 0.5432\n\
            📉 Change: +2.35%\n\
            📊 Volume: 1234.50 (+40.10%)\n\
            ❗️ RSI: 71.25\n\
            ❕ Funding: +0.0100%\n\
            🔄 Long/Short ratio: 60.00% / 40.00%\n\
            💰 Open interest: 10659.50\n\
            📊 Orderbook ratio (bid/ask): 2.00";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_format_signal_omits_absent_metrics() {
        let text = format_signal(&signal(MetricBundle::default()));

        assert!(!text.contains("RSI"));
        assert!(!text.contains("Funding"));
        assert!(!text.contains("Long/Short"));
        assert!(!text.contains("Open interest"));
        assert!(!text.contains("Orderbook"));
        // Absent metrics are omitted lines, never rendered as zero
        assert_eq!(text.lines().count(), 5);
    }
}
