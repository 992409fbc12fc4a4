//! The per-cycle pipeline shared by the backtest and live runners:
//! evaluate indicators at the latest bar, advance the state machine, and
//! resolve any resulting submission against the execution gateway.
//!
//! Both runners call these functions and nothing else makes trading
//! decisions; only bar feeding and time gating differ between modes.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use common::{
    Bar, ExecutionGateway, Fill, Order, Result, TimeInForce, Timeframe, TradeRecord,
};
use position::{PairSettings, PairTracker, PositionConfig, PositionTracker};
use strategy::{Evaluator, PairConfig, SignalResult, StrategyConfig};

/// One configured single-instrument strategy: evaluator plus its owned
/// position state, persisted across cycles for the lifetime of the run.
pub struct StrategyInstance {
    pub name: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub time_in_force: TimeInForce,
    pub evaluator: Evaluator,
    pub tracker: PositionTracker,
}

impl StrategyInstance {
    /// Build from config. Unknown rule types are configuration defects
    /// and abort startup.
    pub fn from_config(cfg: &StrategyConfig) -> Self {
        let evaluator = Evaluator::from_config(cfg)
            .unwrap_or_else(|e| panic!("Strategy '{}': {e}", cfg.name));
        info!(
            name = %cfg.name,
            symbol = %cfg.symbol,
            rule = evaluator.rule_name(),
            "registered strategy"
        );
        Self {
            name: cfg.name.clone(),
            symbol: cfg.symbol.clone(),
            timeframe: cfg.timeframe,
            time_in_force: cfg.time_in_force,
            evaluator,
            tracker: PositionTracker::new(PositionConfig {
                symbol: cfg.symbol.clone(),
                quantity: cfg.quantity,
                trail_pct: cfg.trail_pct,
                target_usd: cfg.target_usd,
                stop_usd: cfg.stop_usd,
                allow_short: cfg.allow_short,
            }),
        }
    }

    /// Bars the evaluator wants before every condition is evaluable,
    /// plus headroom for provider gaps.
    pub fn bars_wanted(&self) -> usize {
        self.evaluator.min_bars() + 20
    }
}

/// One configured pair strategy.
pub struct PairInstance {
    pub name: String,
    pub timeframe: Timeframe,
    pub time_in_force: TimeInForce,
    pub lookback: usize,
    pub tracker: PairTracker,
}

impl PairInstance {
    pub fn from_config(cfg: &PairConfig) -> Self {
        info!(
            name = %cfg.name,
            a = %cfg.symbol_a,
            b = %cfg.symbol_b,
            lookback = cfg.lookback,
            "registered pair strategy"
        );
        Self {
            name: cfg.name.clone(),
            timeframe: cfg.timeframe,
            time_in_force: cfg.time_in_force,
            lookback: cfg.lookback,
            tracker: PairTracker::new(PairSettings {
                symbol_a: cfg.symbol_a.clone(),
                symbol_b: cfg.symbol_b.clone(),
                z_enter: cfg.z_enter,
                notional_usd: cfg.notional_usd,
                target_usd: cfg.target_usd,
                stop_usd: cfg.stop_usd,
            }),
        }
    }

    pub fn bars_wanted(&self) -> usize {
        self.lookback + 20
    }
}

/// What one cycle produced, for audit and reporting.
#[derive(Debug)]
pub struct CycleOutcome {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub signal: SignalResult,
    /// Latest indicator values as "name=value" pairs, for the audit row.
    pub indicators: String,
    pub trade: Option<TradeRecord>,
    /// Tracker status after the cycle resolved.
    pub status: &'static str,
}

/// Advance one single-instrument strategy by one cycle.
///
/// Returns `Ok(None)` when there is nothing to evaluate (empty bar
/// window) — a skip, not an error. A neutral signal still reaches the
/// state machine so price-driven exits (trailing stop, target, stop-loss)
/// keep working while indicator lookbacks refill.
pub async fn run_single_cycle(
    instance: &mut StrategyInstance,
    bars: &[Bar],
    gateway: &dyn ExecutionGateway,
) -> Result<Option<CycleOutcome>> {
    let Some(latest) = bars.last() else {
        warn!(strategy = %instance.name, "cycle skipped: no bars returned");
        return Ok(None);
    };

    let (frame, signal) = instance.evaluator.evaluate_latest(bars);
    let indicators = frame
        .names()
        .filter_map(|name| frame.latest(name).map(|v| format!("{name}={v:.4}")))
        .collect::<Vec<_>>()
        .join(" ");
    let intent = instance
        .tracker
        .on_bar(latest.timestamp, latest.close, signal.buy, signal.sell);

    let mut trade = None;
    if let Some(intent) = intent {
        let order = Order::market(
            &instance.symbol,
            intent.side,
            intent.quantity,
            instance.time_in_force,
            latest.timestamp,
        );
        info!(
            strategy = %instance.name,
            side = %intent.side,
            qty = intent.quantity,
            close = latest.close,
            conditions = %signal.describe(),
            "submitting order"
        );
        match gateway.submit_order(&order).await {
            Ok(fill) => {
                trade = instance.tracker.confirm(&fill)?;
            }
            Err(e) if e.is_rejection() => {
                warn!(strategy = %instance.name, error = %e, "order rejected; state rolled back");
                instance.tracker.reject();
            }
            Err(e) => {
                error!(strategy = %instance.name, error = %e, "order submission failed");
                instance.tracker.reject();
                return Err(e);
            }
        }
    }

    Ok(Some(CycleOutcome {
        timestamp: latest.timestamp,
        close: latest.close,
        signal,
        indicators,
        trade,
        status: instance.tracker.status(),
    }))
}

/// What one pair cycle produced.
#[derive(Debug)]
pub struct PairCycleOutcome {
    pub timestamp: DateTime<Utc>,
    pub close_a: f64,
    pub close_b: f64,
    pub z: Option<f64>,
    pub unrealized: Option<f64>,
    pub trades: Vec<TradeRecord>,
    pub status: &'static str,
}

/// Inner-join two bar sequences on timestamp. Both inputs are ordered,
/// so a single merge pass suffices; bars present on only one side are
/// dropped, mirroring how misaligned provider responses are handled.
pub fn align_pair_bars(bars_a: &[Bar], bars_b: &[Bar]) -> (Vec<Bar>, Vec<Bar>) {
    let mut out_a = Vec::with_capacity(bars_a.len().min(bars_b.len()));
    let mut out_b = Vec::with_capacity(out_a.capacity());
    let (mut i, mut j) = (0, 0);
    while i < bars_a.len() && j < bars_b.len() {
        match bars_a[i].timestamp.cmp(&bars_b[j].timestamp) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out_a.push(bars_a[i]);
                out_b.push(bars_b[j]);
                i += 1;
                j += 1;
            }
        }
    }
    (out_a, out_b)
}

/// Advance one pair strategy by one cycle.
///
/// Entries submit both legs inside the cycle; if the second leg fails
/// after the first filled, the filled leg is unwound immediately so no
/// one-legged exposure survives the cycle. Exits confirm leg by leg and
/// the state machine re-issues unacknowledged legs on later cycles.
pub async fn run_pair_cycle(
    instance: &mut PairInstance,
    bars_a: &[Bar],
    bars_b: &[Bar],
    gateway: &dyn ExecutionGateway,
) -> Result<Option<PairCycleOutcome>> {
    let (aligned_a, aligned_b) = align_pair_bars(bars_a, bars_b);
    let Some(latest_a) = aligned_a.last() else {
        warn!(pair = %instance.name, "cycle skipped: no overlapping bars");
        return Ok(None);
    };
    let latest_b = aligned_b.last().expect("aligned sequences have equal length");

    let closes_a: Vec<f64> = aligned_a.iter().map(|b| b.close).collect();
    let closes_b: Vec<f64> = aligned_b.iter().map(|b| b.close).collect();
    let z_series = position::spread_zscore(&closes_a, &closes_b, instance.lookback);
    let n = z_series.len();
    let z = z_series[n - 1];
    let prev_z = if n >= 2 { z_series[n - 2] } else { None };

    let timestamp = latest_a.timestamp;
    let orders = instance
        .tracker
        .on_bar(timestamp, latest_a.close, latest_b.close, prev_z, z);

    let mut trades = Vec::new();
    if let Some(orders) = orders {
        match instance.tracker.status() {
            "pending-open" => {
                submit_pair_entry(instance, &orders, timestamp, gateway).await?;
            }
            "closing" => {
                for leg in &orders {
                    let order = Order::market(
                        &leg.symbol,
                        leg.side,
                        leg.quantity,
                        instance.time_in_force,
                        timestamp,
                    );
                    match gateway.submit_order(&order).await {
                        Ok(fill) => {
                            if let Some(records) = instance.tracker.confirm_close_leg(&fill)? {
                                trades = records;
                            }
                        }
                        Err(e) => {
                            // the tracker re-issues this leg next cycle
                            warn!(
                                pair = %instance.name,
                                symbol = %leg.symbol,
                                error = %e,
                                "closing leg failed; will retry"
                            );
                        }
                    }
                }
            }
            other => {
                warn!(pair = %instance.name, status = other, "unexpected intent state");
            }
        }
    }

    Ok(Some(PairCycleOutcome {
        timestamp,
        close_a: latest_a.close,
        close_b: latest_b.close,
        z,
        unrealized: instance.tracker.unrealized(latest_a.close, latest_b.close),
        trades,
        status: instance.tracker.status(),
    }))
}

async fn submit_pair_entry(
    instance: &mut PairInstance,
    orders: &[position::LegOrder],
    timestamp: DateTime<Utc>,
    gateway: &dyn ExecutionGateway,
) -> Result<()> {
    let mut fills: Vec<Fill> = Vec::with_capacity(orders.len());
    let mut failure = None;

    for leg in orders {
        let order = Order::market(
            &leg.symbol,
            leg.side,
            leg.quantity,
            instance.time_in_force,
            timestamp,
        );
        info!(
            pair = %instance.name,
            symbol = %leg.symbol,
            side = %leg.side,
            qty = leg.quantity,
            "submitting pair entry leg"
        );
        match gateway.submit_order(&order).await {
            Ok(fill) => fills.push(fill),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    match failure {
        None => {
            let fills: [Fill; 2] = fills
                .try_into()
                .map_err(|_| common::Error::Other("pair entry expects two legs".into()))?;
            instance.tracker.confirm_open(&fills)?;
            Ok(())
        }
        Some(e) => {
            // unwind any filled leg so both legs stay flat together
            for fill in &fills {
                let unwind = Order::market(
                    &fill.symbol,
                    fill.side.opposite(),
                    fill.quantity,
                    instance.time_in_force,
                    timestamp,
                );
                if let Err(unwind_err) = gateway.submit_order(&unwind).await {
                    error!(
                        pair = %instance.name,
                        symbol = %fill.symbol,
                        error = %unwind_err,
                        "failed to unwind partial pair entry; manual intervention required"
                    );
                }
            }
            instance.tracker.reject_open();
            if e.is_rejection() {
                warn!(pair = %instance.name, error = %e, "pair entry rejected; staying flat");
                Ok(())
            } else {
                error!(pair = %instance.name, error = %e, "pair entry failed");
                Err(e)
            }
        }
    }
}
