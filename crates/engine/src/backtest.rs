//! Deterministic replay over a fixed historical bar sequence.
//!
//! Each step feeds the growing prefix through the same cycle functions
//! the live runner uses; fills come from the paper gateway at the bar
//! close, stamped with bar time, so two runs over the same bars and
//! configuration produce identical ledgers.

use tracing::info;

use common::{Bar, Result, TradeRecord};
use paper::PaperGateway;

use crate::cycle::{run_pair_cycle, run_single_cycle, PairInstance, StrategyInstance};

/// Completed-trade ledger plus summary statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub trades: Vec<TradeRecord>,
    pub total_pnl: f64,
    pub win_rate_pct: f64,
    pub avg_return_pct: f64,
}

impl BacktestReport {
    pub fn from_trades(trades: Vec<TradeRecord>) -> Self {
        let count = trades.len();
        let total_pnl = trades.iter().map(|t| t.realized_pnl).sum();
        let wins = trades.iter().filter(|t| t.realized_pnl > 0.0).count();
        let (win_rate_pct, avg_return_pct) = if count > 0 {
            (
                wins as f64 / count as f64 * 100.0,
                trades.iter().map(|t| t.return_pct).sum::<f64>() / count as f64,
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            trades,
            total_pnl,
            win_rate_pct,
            avg_return_pct,
        }
    }

    pub fn has_trades(&self) -> bool {
        !self.trades.is_empty()
    }

    /// Human-readable summary for the console, including the explicit
    /// no-trades case.
    pub fn summary(&self) -> String {
        if !self.has_trades() {
            return "No trades executed. Try adjusting thresholds or the time window.".to_string();
        }
        format!(
            "Total trades: {} | Total PnL: ${:.2} | Avg return per trade: {:.2}% | Win rate: {:.2}%",
            self.trades.len(),
            self.total_pnl,
            self.avg_return_pct,
            self.win_rate_pct
        )
    }
}

/// Replay one single-instrument strategy over `bars`.
pub async fn run_single_backtest(
    instance: &mut StrategyInstance,
    bars: &[Bar],
    slippage_bps: f64,
) -> Result<BacktestReport> {
    info!(
        strategy = %instance.name,
        bars = bars.len(),
        "backtest starting"
    );
    let gateway = PaperGateway::new(slippage_bps);
    let mut trades = Vec::new();

    for i in 0..bars.len() {
        gateway.update_price(&instance.symbol, bars[i].close).await;
        if let Some(outcome) = run_single_cycle(instance, &bars[..=i], &gateway).await? {
            if let Some(trade) = outcome.trade {
                trades.push(trade);
            }
        }
    }

    let report = BacktestReport::from_trades(trades);
    info!(strategy = %instance.name, "{}", report.summary());
    Ok(report)
}

/// Replay one pair strategy over two bar histories.
pub async fn run_pair_backtest(
    instance: &mut PairInstance,
    bars_a: &[Bar],
    bars_b: &[Bar],
    slippage_bps: f64,
) -> Result<BacktestReport> {
    let (aligned_a, aligned_b) = crate::cycle::align_pair_bars(bars_a, bars_b);
    info!(
        pair = %instance.name,
        bars = aligned_a.len(),
        "pair backtest starting"
    );
    let gateway = PaperGateway::new(slippage_bps);
    let mut trades = Vec::new();
    let symbol_a = instance.tracker.settings().symbol_a.clone();
    let symbol_b = instance.tracker.settings().symbol_b.clone();

    for i in 0..aligned_a.len() {
        gateway.update_price(&symbol_a, aligned_a[i].close).await;
        gateway.update_price(&symbol_b, aligned_b[i].close).await;
        if let Some(outcome) =
            run_pair_cycle(instance, &aligned_a[..=i], &aligned_b[..=i], &gateway).await?
        {
            trades.extend(outcome.trades);
        }
    }

    let report = BacktestReport::from_trades(trades);
    info!(pair = %instance.name, "{}", report.summary());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::ExitReason;
    use strategy::StrategyFileConfig;

    fn make_bars(closes: &[f64]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: t0 + Duration::minutes(i as i64),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    fn instance(toml_src: &str) -> StrategyInstance {
        let cfg: StrategyFileConfig = toml::from_str(toml_src).unwrap();
        StrategyInstance::from_config(&cfg.strategies[0])
    }

    const BAND_STRATEGY: &str = r#"
        [[strategy]]
        type = "band_reversion"
        name = "band"
        symbol = "QQQ"
        quantity = 100.0

        [strategy.params]
        bb_window = 3
        bb_mult = 1.0
    "#;

    #[tokio::test]
    async fn band_entry_and_reversal_round_trip() {
        // Lower band pierced at the 98 close opens the long; the 105
        // close pierces the upper band and reverses it out.
        let bars = make_bars(&[100.0, 99.0, 98.0, 97.0, 105.0]);
        let mut inst = instance(BAND_STRATEGY);
        let report = run_single_backtest(&mut inst, &bars, 0.0).await.unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.entry_price, 98.0);
        assert_eq!(trade.exit_price, 105.0);
        assert_eq!(trade.exit_reason, ExitReason::SignalReversal);
        assert!((report.total_pnl - 700.0).abs() < 1e-9);
        assert_eq!(report.win_rate_pct, 100.0);
    }

    #[tokio::test]
    async fn trailing_stop_exit_end_to_end() {
        // RSI rule that can only ever buy; the 5% trail does the exit.
        // Entry at 94 (all-loss RSI = 0), peak at 100, stop at 95.
        let bars = make_bars(&[100.0, 98.0, 96.0, 94.0, 92.0, 100.0, 94.0]);
        let mut inst = instance(
            r#"
            [[strategy]]
            type = "rsi_reversion"
            name = "rsi"
            symbol = "QQQ"
            quantity = 10.0
            trail_pct = 0.05

            [strategy.params]
            period = 3
            oversold = 50.0
            overbought = 1000.0
            "#,
        );
        let report = run_single_backtest(&mut inst, &bars, 0.0).await.unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.entry_price, 94.0);
        assert_eq!(trade.exit_price, 94.0);
        assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
    }

    #[tokio::test]
    async fn no_trades_is_an_explicit_result() {
        let bars = make_bars(&[100.0; 30]);
        let mut inst = instance(BAND_STRATEGY);
        let report = run_single_backtest(&mut inst, &bars, 0.0).await.unwrap();
        assert!(!report.has_trades());
        assert!(report.summary().contains("No trades"));
        assert_eq!(report.total_pnl, 0.0);
    }

    #[tokio::test]
    async fn backtest_is_deterministic() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.37).sin() * 4.0 + (i as f64 * 0.11).cos() * 2.0)
            .collect();
        let bars = make_bars(&closes);

        let mut first = instance(BAND_STRATEGY);
        let mut second = instance(BAND_STRATEGY);
        let a = run_single_backtest(&mut first, &bars, 5.0).await.unwrap();
        let b = run_single_backtest(&mut second, &bars, 5.0).await.unwrap();

        assert_eq!(a.trades, b.trades, "replays must produce identical ledgers");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn pair_backtest_enters_and_exits_on_reversion() {
        // Spread flat at 0 for seven bars, spikes to +3 (entry: short A /
        // long B), then dips negative (zero-cross exit).
        let closes_a = [
            100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 103.0, 99.5,
        ];
        let closes_b = [100.0; 9];
        let bars_a = make_bars(&closes_a);
        let bars_b = make_bars(&closes_b);

        let cfg: StrategyFileConfig = toml::from_str(
            r#"
            [[pair]]
            name = "A/B"
            symbol_a = "AAA"
            symbol_b = "BBB"
            lookback = 7
            z_enter = 2.0
            notional_usd = 5000.0
            target_usd = 1000000.0
            stop_usd = 1000000.0
            "#,
        )
        .unwrap();
        let mut inst = PairInstance::from_config(&cfg.pairs[0]);
        let report = run_pair_backtest(&mut inst, &bars_a, &bars_b, 0.0)
            .await
            .unwrap();

        assert_eq!(report.trades.len(), 2, "both legs close together");
        assert!(report
            .trades
            .iter()
            .all(|t| t.exit_reason == ExitReason::ZeroCross));
        // Short A entered at 103, exited at 99.5: profitable leg
        let leg_a = report.trades.iter().find(|t| t.symbol == "AAA").unwrap();
        assert!(leg_a.realized_pnl > 0.0);
        assert!(inst.tracker.is_flat());
    }

    #[tokio::test]
    async fn pair_backtest_is_deterministic() {
        let closes_a: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.45).sin() * 1.5)
            .collect();
        let closes_b: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.30).cos() * 1.5)
            .collect();
        let bars_a = make_bars(&closes_a);
        let bars_b = make_bars(&closes_b);

        let cfg: StrategyFileConfig = toml::from_str(
            r#"
            [[pair]]
            name = "A/B"
            symbol_a = "AAA"
            symbol_b = "BBB"
            lookback = 10
            z_enter = 1.5
            notional_usd = 2000.0
            target_usd = 50.0
            stop_usd = 30.0
            "#,
        )
        .unwrap();
        let mut first = PairInstance::from_config(&cfg.pairs[0]);
        let mut second = PairInstance::from_config(&cfg.pairs[0]);
        let a = run_pair_backtest(&mut first, &bars_a, &bars_b, 0.0)
            .await
            .unwrap();
        let b = run_pair_backtest(&mut second, &bars_a, &bars_b, 0.0)
            .await
            .unwrap();
        assert_eq!(a.trades, b.trades);
    }
}
