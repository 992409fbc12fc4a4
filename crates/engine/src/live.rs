//! Live polling loop.
//!
//! Each cycle re-fetches the recent bar window and pushes it through the
//! same cycle functions the backtest uses; only the bar feeding and time
//! gating live here. Cancellation is cooperative: the stop flag is
//! checked at cycle boundaries, never mid-cycle.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use common::{BarSource, Config, ExecutionGateway, Notifier, SessionHours, TradeRecord};
use paper::PaperGateway;

use crate::audit::AuditLog;
use crate::cycle::{run_pair_cycle, run_single_cycle, PairInstance, StrategyInstance};

/// Pacing and gating knobs shared by every live loop in the process.
#[derive(Clone)]
pub struct LiveSettings {
    pub poll_interval: Duration,
    pub session: SessionHours,
}

impl LiveSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            session: cfg.session,
        }
    }

    /// Outside the session the loop sleeps five poll intervals between
    /// checks instead of one.
    fn off_session_pause(&self) -> Duration {
        self.poll_interval * 5
    }
}

/// Execution seam for the live loop. Paper mode needs the latest close
/// pushed before each submission; real venues ignore prices entirely.
#[derive(Clone)]
pub enum LiveGateway {
    Real(Arc<dyn ExecutionGateway>),
    Paper(Arc<PaperGateway>),
}

impl LiveGateway {
    fn gateway(&self) -> &dyn ExecutionGateway {
        match self {
            LiveGateway::Real(g) => g.as_ref(),
            LiveGateway::Paper(g) => g.as_ref(),
        }
    }

    async fn push_price(&self, symbol: &str, close: f64) {
        if let LiveGateway::Paper(g) = self {
            g.update_price(symbol, close).await;
        }
    }
}

/// Log anything the venue still reports open at startup. Trackers start
/// flat, so a leftover lot from a previous run is surfaced rather than
/// silently adopted.
pub async fn startup_position_audit(gateway: &LiveGateway) {
    match gateway.gateway().open_positions().await {
        Ok(positions) if positions.is_empty() => {
            info!("startup audit: venue reports no open positions");
        }
        Ok(positions) => {
            for p in positions {
                warn!(
                    symbol = %p.symbol,
                    side = %p.side,
                    qty = p.quantity,
                    entry = p.entry_price,
                    "startup audit: open lot at the venue is not managed by this run"
                );
            }
        }
        Err(e) => warn!(error = %e, "startup position audit failed"),
    }
}

/// Sleep until the next cycle boundary or until the stop flag flips.
/// Returns true when the loop should exit.
async fn pause(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = sleep(duration) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

async fn record_trades(
    audit: &AuditLog,
    notifier: Option<&Arc<dyn Notifier>>,
    strategy: &str,
    trades: &[TradeRecord],
) {
    for trade in trades {
        if let Err(e) = audit.record_trade(strategy, trade).await {
            error!(strategy, error = %e, "failed to persist trade");
        }
        if let Some(notifier) = notifier {
            notifier
                .notify(
                    &format!("{strategy}: {} round-trip closed", trade.symbol),
                    &format!(
                        "entry {:.2} exit {:.2} qty {} pnl ${:.2} ({})",
                        trade.entry_price,
                        trade.exit_price,
                        trade.quantity,
                        trade.realized_pnl,
                        trade.exit_reason
                    ),
                )
                .await;
        }
    }
}

/// Poll one single-instrument strategy until the stop flag flips.
pub async fn run_single_live(
    mut instance: StrategyInstance,
    source: Arc<dyn BarSource>,
    gateway: LiveGateway,
    notifier: Option<Arc<dyn Notifier>>,
    audit: Arc<AuditLog>,
    settings: LiveSettings,
    mut stop: watch::Receiver<bool>,
) {
    info!(
        strategy = %instance.name,
        symbol = %instance.symbol,
        interval_secs = settings.poll_interval.as_secs(),
        "live loop starting"
    );

    loop {
        if *stop.borrow() {
            break;
        }
        let now = Utc::now();
        if !settings.session.contains(now) {
            info!(strategy = %instance.name, "outside trading session; pausing");
            if pause(&mut stop, settings.off_session_pause()).await {
                break;
            }
            continue;
        }

        let window = instance.timeframe.bar_width() * instance.bars_wanted() as i32;
        let bars = match source
            .get_bars(&instance.symbol, instance.timeframe, now - window, now)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(strategy = %instance.name, error = %e, "bar fetch failed; cycle skipped");
                if pause(&mut stop, settings.poll_interval).await {
                    break;
                }
                continue;
            }
        };
        if bars.len() < instance.evaluator.min_bars() {
            // Short windows still advance the machine: price-driven exits
            // must keep working while indicator lookbacks refill.
            warn!(
                strategy = %instance.name,
                got = bars.len(),
                want = instance.evaluator.min_bars(),
                "bar window below lookback"
            );
        }
        if let Some(latest) = bars.last() {
            gateway.push_price(&instance.symbol, latest.close).await;
        }

        match run_single_cycle(&mut instance, &bars, gateway.gateway()).await {
            Ok(Some(outcome)) => {
                if let Err(e) = audit
                    .record_cycle(&instance.name, &instance.symbol, &outcome)
                    .await
                {
                    error!(strategy = %instance.name, error = %e, "failed to persist cycle");
                }
                if let Some(trade) = &outcome.trade {
                    record_trades(
                        &audit,
                        notifier.as_ref(),
                        &instance.name,
                        std::slice::from_ref(trade),
                    )
                    .await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // Submission transport failure; the tracker already rolled
                // back, so the next cycle may retry.
                error!(strategy = %instance.name, error = %e, "cycle failed");
            }
        }

        if pause(&mut stop, settings.poll_interval).await {
            break;
        }
    }

    info!(strategy = %instance.name, "live loop stopped");
}

/// Poll one pair strategy until the stop flag flips.
pub async fn run_pair_live(
    mut instance: PairInstance,
    source: Arc<dyn BarSource>,
    gateway: LiveGateway,
    notifier: Option<Arc<dyn Notifier>>,
    audit: Arc<AuditLog>,
    settings: LiveSettings,
    mut stop: watch::Receiver<bool>,
) {
    let symbol_a = instance.tracker.settings().symbol_a.clone();
    let symbol_b = instance.tracker.settings().symbol_b.clone();
    info!(
        pair = %instance.name,
        a = %symbol_a,
        b = %symbol_b,
        interval_secs = settings.poll_interval.as_secs(),
        "live pair loop starting"
    );

    loop {
        if *stop.borrow() {
            break;
        }
        let now = Utc::now();
        if !settings.session.contains(now) {
            info!(pair = %instance.name, "outside trading session; pausing");
            if pause(&mut stop, settings.off_session_pause()).await {
                break;
            }
            continue;
        }

        let window = instance.timeframe.bar_width() * instance.bars_wanted() as i32;
        let fetched = tokio::try_join!(
            source.get_bars(&symbol_a, instance.timeframe, now - window, now),
            source.get_bars(&symbol_b, instance.timeframe, now - window, now),
        );
        let (bars_a, bars_b) = match fetched {
            Ok(pair) => pair,
            Err(e) => {
                warn!(pair = %instance.name, error = %e, "bar fetch failed; cycle skipped");
                if pause(&mut stop, settings.poll_interval).await {
                    break;
                }
                continue;
            }
        };

        if let (Some(a), Some(b)) = (bars_a.last(), bars_b.last()) {
            gateway.push_price(&symbol_a, a.close).await;
            gateway.push_price(&symbol_b, b.close).await;
        }

        match run_pair_cycle(&mut instance, &bars_a, &bars_b, gateway.gateway()).await {
            Ok(Some(outcome)) => {
                if let Err(e) = audit.record_pair_cycle(&instance.name, &outcome).await {
                    error!(pair = %instance.name, error = %e, "failed to persist cycle");
                }
                record_trades(&audit, notifier.as_ref(), &instance.name, &outcome.trades).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(pair = %instance.name, error = %e, "cycle failed");
            }
        }

        if pause(&mut stop, settings.poll_interval).await {
            break;
        }
    }

    info!(pair = %instance.name, "live pair loop stopped");
}
