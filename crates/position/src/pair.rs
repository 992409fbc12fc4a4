use chrono::{DateTime, Utc};
use tracing::{info, warn};

use common::{Error, ExitReason, Fill, OrderSide, Result, TradeRecord};

/// Parameters governing one two-leg spread position.
#[derive(Debug, Clone)]
pub struct PairSettings {
    pub symbol_a: String,
    pub symbol_b: String,
    /// |z| threshold that opens the pair.
    pub z_enter: f64,
    /// Dollar notional per leg; quantities are notional / price, min 1.
    pub notional_usd: f64,
    /// Combined P&L target that closes the pair.
    pub target_usd: f64,
    /// Combined loss (positive) that closes the pair.
    pub stop_usd: f64,
}

/// Rolling z-score of the spread `a − b` over `lookback` bars, using the
/// sample standard deviation. `None` until the window fills or when the
/// window has zero variance.
pub fn spread_zscore(closes_a: &[f64], closes_b: &[f64], lookback: usize) -> Vec<Option<f64>> {
    assert_eq!(
        closes_a.len(),
        closes_b.len(),
        "pair legs must be aligned bar-for-bar"
    );
    assert!(lookback >= 2, "z-score lookback must be >= 2");

    let spreads: Vec<f64> = closes_a
        .iter()
        .zip(closes_b)
        .map(|(a, b)| a - b)
        .collect();
    let mut out = vec![None; spreads.len()];

    for i in 0..spreads.len() {
        if i + 1 < lookback {
            continue;
        }
        let window = &spreads[i + 1 - lookback..=i];
        let mean = window.iter().sum::<f64>() / lookback as f64;
        let variance = window
            .iter()
            .map(|s| {
                let d = s - mean;
                d * d
            })
            .sum::<f64>()
            / (lookback - 1) as f64;
        let stddev = variance.sqrt();
        if stddev > 0.0 {
            out[i] = Some((spreads[i] - mean) / stddev);
        }
    }
    out
}

/// One leg of an open pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub quantity: f64,
}

impl Leg {
    fn unrealized(&self, close: f64) -> f64 {
        match self.side {
            OrderSide::Buy => (close - self.entry_price) * self.quantity,
            OrderSide::Sell => (self.entry_price - close) * self.quantity,
        }
    }
}

/// An order the runner should submit for one leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Flat,
    /// Both entry legs are in flight; resolved within the same cycle.
    PendingOpen { planned: [LegOrder; 2] },
    Open {
        legs: [Leg; 2],
        entry_time: DateTime<Utc>,
    },
    /// Exit decided; legs close independently and the pair is only flat
    /// once both fills are acknowledged. Outstanding legs are re-issued
    /// every cycle until they fill.
    PendingClose {
        legs: [Leg; 2],
        entry_time: DateTime<Utc>,
        fills: [Option<Fill>; 2],
        reason: ExitReason,
    },
}

/// Two-leg spread position state machine.
///
/// Legs are always opposite-signed while open and transition as a unit:
/// an entry where the second leg fails is aborted (the runner unwinds the
/// first leg and calls `reject_open`), and an exit keeps the pair in a
/// closing state until every leg's fill is acknowledged — at no resting
/// state is one leg open and the other closed.
#[derive(Debug, Clone)]
pub struct PairTracker {
    settings: PairSettings,
    state: State,
}

impl PairTracker {
    pub fn new(settings: PairSettings) -> Self {
        Self {
            settings,
            state: State::Flat,
        }
    }

    pub fn settings(&self) -> &PairSettings {
        &self.settings
    }

    pub fn is_flat(&self) -> bool {
        self.state == State::Flat
    }

    pub fn legs(&self) -> Option<&[Leg; 2]> {
        match &self.state {
            State::Open { legs, .. } | State::PendingClose { legs, .. } => Some(legs),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.state {
            State::Flat => "flat",
            State::PendingOpen { .. } => "pending-open",
            State::Open { .. } => "open",
            State::PendingClose { .. } => "closing",
        }
    }

    /// Combined unrealized P&L at the given closes, when open.
    pub fn unrealized(&self, close_a: f64, close_b: f64) -> Option<f64> {
        let legs = self.legs()?;
        Some(legs[0].unrealized(close_a) + legs[1].unrealized(close_b))
    }

    /// Advance one cycle.
    ///
    /// Entry wants the current z; the reversion exit wants the previous
    /// bar's z as well and fires only on a strict sign change. P&L exits
    /// are checked before the z-cross, mirroring the single-instrument
    /// trigger priority.
    pub fn on_bar(
        &mut self,
        _timestamp: DateTime<Utc>,
        close_a: f64,
        close_b: f64,
        prev_z: Option<f64>,
        z: Option<f64>,
    ) -> Option<Vec<LegOrder>> {
        match &self.state {
            State::Flat => {
                let z = z?;
                if z.abs() <= self.settings.z_enter {
                    return None;
                }
                // Positive z: spread rich → short A, long B. Mirror below.
                let (side_a, side_b) = if z > 0.0 {
                    (OrderSide::Sell, OrderSide::Buy)
                } else {
                    (OrderSide::Buy, OrderSide::Sell)
                };
                let planned = [
                    LegOrder {
                        symbol: self.settings.symbol_a.clone(),
                        side: side_a,
                        quantity: leg_quantity(self.settings.notional_usd, close_a),
                    },
                    LegOrder {
                        symbol: self.settings.symbol_b.clone(),
                        side: side_b,
                        quantity: leg_quantity(self.settings.notional_usd, close_b),
                    },
                ];
                let orders = planned.to_vec();
                self.state = State::PendingOpen { planned };
                Some(orders)
            }
            State::Open { legs, entry_time } => {
                let pnl = legs[0].unrealized(close_a) + legs[1].unrealized(close_b);
                let reason = if pnl >= self.settings.target_usd {
                    ExitReason::Target
                } else if pnl <= -self.settings.stop_usd {
                    ExitReason::StopLoss
                } else if matches!((prev_z, z), (Some(p), Some(c)) if p * c < 0.0) {
                    ExitReason::ZeroCross
                } else {
                    return None;
                };

                let legs = legs.clone();
                let entry_time = *entry_time;
                let orders = closing_orders(&legs, [true, true]);
                self.state = State::PendingClose {
                    legs,
                    entry_time,
                    fills: [None, None],
                    reason,
                };
                Some(orders)
            }
            State::PendingClose { legs, fills, .. } => {
                let outstanding = [fills[0].is_none(), fills[1].is_none()];
                let orders = closing_orders(legs, outstanding);
                if orders.is_empty() {
                    None
                } else {
                    warn!(
                        pair = %self.describe(),
                        "re-issuing unacknowledged closing legs"
                    );
                    Some(orders)
                }
            }
            State::PendingOpen { .. } => {
                warn!(pair = %self.describe(), "cycle skipped: entry submission unresolved");
                None
            }
        }
    }

    /// Apply both acknowledged entry fills; the pair is only open once
    /// the two legs are confirmed together.
    pub fn confirm_open(&mut self, fills: &[Fill; 2]) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Flat) {
            State::PendingOpen { planned } => {
                let mut legs: Vec<Leg> = Vec::with_capacity(2);
                for plan in &planned {
                    let fill = fills
                        .iter()
                        .find(|f| f.symbol == plan.symbol)
                        .ok_or_else(|| {
                            Error::Other(format!("no entry fill for leg '{}'", plan.symbol))
                        })?;
                    legs.push(Leg {
                        symbol: plan.symbol.clone(),
                        side: plan.side,
                        entry_price: fill.fill_price,
                        quantity: plan.quantity,
                    });
                }
                let legs: [Leg; 2] = match legs.try_into() {
                    Ok(l) => l,
                    Err(_) => unreachable!("exactly two legs are planned"),
                };
                info!(
                    pair = %self.describe(),
                    a = legs[0].entry_price,
                    b = legs[1].entry_price,
                    "pair opened"
                );
                self.state = State::Open {
                    legs,
                    entry_time: fills[0].timestamp,
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(Error::Other(
                    "pair entry confirmed with no submission outstanding".into(),
                ))
            }
        }
    }

    /// Abort a pending entry after a submission failure. The runner is
    /// responsible for unwinding any leg that did fill before calling.
    pub fn reject_open(&mut self) {
        if matches!(self.state, State::PendingOpen { .. }) {
            warn!(pair = %self.describe(), "pair entry aborted; staying flat");
            self.state = State::Flat;
        }
    }

    /// Acknowledge one closing fill. Returns the two leg round-trips once
    /// every leg has closed; until then the pair stays in its closing
    /// state and outstanding legs are re-issued by `on_bar`.
    pub fn confirm_close_leg(&mut self, fill: &Fill) -> Result<Option<Vec<TradeRecord>>> {
        let State::PendingClose { legs, fills, .. } = &mut self.state else {
            return Err(Error::Other(
                "pair close confirmed with no submission outstanding".into(),
            ));
        };
        let Some(index) = legs.iter().position(|l| l.symbol == fill.symbol) else {
            return Err(Error::Other(format!(
                "closing fill for unknown leg '{}'",
                fill.symbol
            )));
        };
        fills[index] = Some(fill.clone());

        if fills.iter().any(|f| f.is_none()) {
            return Ok(None);
        }

        let State::PendingClose {
            legs,
            entry_time,
            fills,
            reason,
        } = std::mem::replace(&mut self.state, State::Flat)
        else {
            unreachable!("state checked above");
        };
        let records: Vec<TradeRecord> = legs
            .iter()
            .zip(fills.iter())
            .map(|(leg, fill)| {
                let fill = fill.as_ref().expect("all legs filled");
                leg_round_trip(leg, fill, entry_time, reason)
            })
            .collect();
        info!(
            pair = %self.describe(),
            reason = %reason,
            pnl = records.iter().map(|r| r.realized_pnl).sum::<f64>(),
            "pair closed"
        );
        Ok(Some(records))
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.settings.symbol_a, self.settings.symbol_b)
    }
}

fn leg_quantity(notional_usd: f64, price: f64) -> f64 {
    (notional_usd / price).floor().max(1.0)
}

fn closing_orders(legs: &[Leg; 2], outstanding: [bool; 2]) -> Vec<LegOrder> {
    legs.iter()
        .zip(outstanding)
        .filter(|(_, open)| *open)
        .map(|(leg, _)| LegOrder {
            symbol: leg.symbol.clone(),
            side: leg.side.opposite(),
            quantity: leg.quantity,
        })
        .collect()
}

fn leg_round_trip(
    leg: &Leg,
    exit_fill: &Fill,
    entry_time: DateTime<Utc>,
    reason: ExitReason,
) -> TradeRecord {
    let signed = match leg.side {
        OrderSide::Buy => exit_fill.fill_price - leg.entry_price,
        OrderSide::Sell => leg.entry_price - exit_fill.fill_price,
    };
    TradeRecord {
        symbol: leg.symbol.clone(),
        entry_time,
        exit_time: exit_fill.timestamp,
        entry_price: leg.entry_price,
        exit_price: exit_fill.fill_price,
        quantity: leg.quantity,
        realized_pnl: signed * leg.quantity,
        return_pct: signed / leg.entry_price * 100.0,
        exit_reason: reason,
    }
}
