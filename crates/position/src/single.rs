use chrono::{DateTime, Utc};
use tracing::{info, warn};

use common::{Error, ExitReason, Fill, OrderSide, Result, TradeRecord};

/// Parameters governing one single-instrument position lifecycle.
#[derive(Debug, Clone)]
pub struct PositionConfig {
    pub symbol: String,
    /// Order quantity in instrument units.
    pub quantity: f64,
    /// Trailing-stop distance from the favorable extreme, e.g. 0.05.
    pub trail_pct: Option<f64>,
    /// Absolute profit target in currency units.
    pub target_usd: Option<f64>,
    /// Absolute stop-loss in currency units (positive).
    pub stop_usd: Option<f64>,
    /// Whether a sell signal while flat opens a short.
    pub allow_short: bool,
}

/// An open lot. `extreme` is the peak close since entry for longs and the
/// trough for shorts; it only ever moves in the favorable direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenLot {
    pub side: OrderSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub extreme: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Flat,
    /// An entry order is in flight; no new intents until it resolves.
    PendingEntry { side: OrderSide },
    Open(OpenLot),
    /// An exit order is in flight; the lot is retained for rollback.
    PendingExit { lot: OpenLot, reason: ExitReason },
}

/// What the runner should submit this cycle. Emitted only on a state
/// transition, never on a hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub quantity: f64,
}

/// Single-instrument position state machine.
///
/// `on_bar` is the pure decision step; it moves the machine into a
/// pending state and hands the runner an intent. The machine only
/// transitions for real when the runner reports the submission outcome
/// through `confirm` or `reject` — a failed order never leaves the
/// position half-transitioned, and a pending machine emits nothing, so
/// the same order cannot be submitted twice.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    config: PositionConfig,
    state: State,
}

impl PositionTracker {
    pub fn new(config: PositionConfig) -> Self {
        Self {
            config,
            state: State::Flat,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn is_flat(&self) -> bool {
        self.state == State::Flat
    }

    /// Side of the open (or pending-exit) lot, if any.
    pub fn side(&self) -> Option<OrderSide> {
        match &self.state {
            State::Open(lot) | State::PendingExit { lot, .. } => Some(lot.side),
            _ => None,
        }
    }

    /// The open lot, exposed for diagnostics and tests.
    pub fn lot(&self) -> Option<&OpenLot> {
        match &self.state {
            State::Open(lot) | State::PendingExit { lot, .. } => Some(lot),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.state {
            State::Flat => "flat",
            State::PendingEntry { .. } => "pending-entry",
            State::Open(lot) => match lot.side {
                OrderSide::Buy => "long",
                OrderSide::Sell => "short",
            },
            State::PendingExit { .. } => "pending-exit",
        }
    }

    /// Advance one cycle with the latest close and signal decision.
    ///
    /// While a lot is open the favorable extreme is ratcheted BEFORE the
    /// exit triggers run, so the trailing stop always trails the freshest
    /// peak. Exit triggers are evaluated in strict priority: target /
    /// stop-loss, then trailing stop, then signal reversal; the first
    /// satisfied trigger wins and the rest are not consulted this cycle.
    pub fn on_bar(
        &mut self,
        _timestamp: DateTime<Utc>,
        close: f64,
        buy: bool,
        sell: bool,
    ) -> Option<OrderIntent> {
        match &mut self.state {
            State::Flat => {
                let side = if buy {
                    OrderSide::Buy
                } else if sell && self.config.allow_short {
                    OrderSide::Sell
                } else {
                    return None;
                };
                self.state = State::PendingEntry { side };
                Some(OrderIntent {
                    side,
                    quantity: self.config.quantity,
                })
            }
            State::Open(lot) => {
                match lot.side {
                    OrderSide::Buy => lot.extreme = lot.extreme.max(close),
                    OrderSide::Sell => lot.extreme = lot.extreme.min(close),
                }
                let lot = *lot;
                let reason = self.exit_reason(&lot, close, buy, sell)?;
                self.state = State::PendingExit { lot, reason };
                Some(OrderIntent {
                    side: lot.side.opposite(),
                    quantity: self.config.quantity,
                })
            }
            // An order from a previous cycle has not resolved; emitting a
            // fresh intent here would risk double submission.
            State::PendingEntry { .. } | State::PendingExit { .. } => {
                warn!(
                    symbol = %self.config.symbol,
                    status = self.status(),
                    "cycle skipped: submission outcome still unresolved"
                );
                None
            }
        }
    }

    fn exit_reason(&self, lot: &OpenLot, close: f64, buy: bool, sell: bool) -> Option<ExitReason> {
        let pnl = match lot.side {
            OrderSide::Buy => (close - lot.entry_price) * self.config.quantity,
            OrderSide::Sell => (lot.entry_price - close) * self.config.quantity,
        };

        if let Some(target) = self.config.target_usd {
            if pnl >= target {
                return Some(ExitReason::Target);
            }
        }
        if let Some(stop) = self.config.stop_usd {
            if pnl <= -stop {
                return Some(ExitReason::StopLoss);
            }
        }
        if let Some(trail) = self.config.trail_pct {
            let breached = match lot.side {
                OrderSide::Buy => close <= lot.extreme * (1.0 - trail),
                OrderSide::Sell => close >= lot.extreme * (1.0 + trail),
            };
            if breached {
                return Some(ExitReason::TrailingStop);
            }
        }
        let reversal = match lot.side {
            OrderSide::Buy => sell,
            OrderSide::Sell => buy,
        };
        if reversal {
            return Some(ExitReason::SignalReversal);
        }
        None
    }

    /// Apply an acknowledged fill. Entry fills open the lot at the fill
    /// price; exit fills close it and return the completed round-trip.
    pub fn confirm(&mut self, fill: &Fill) -> Result<Option<TradeRecord>> {
        match std::mem::replace(&mut self.state, State::Flat) {
            State::PendingEntry { side } => {
                info!(
                    symbol = %self.config.symbol,
                    side = %side,
                    price = fill.fill_price,
                    "entry confirmed"
                );
                self.state = State::Open(OpenLot {
                    side,
                    entry_time: fill.timestamp,
                    entry_price: fill.fill_price,
                    extreme: fill.fill_price,
                });
                Ok(None)
            }
            State::PendingExit { lot, reason } => {
                let record = round_trip(&self.config.symbol, &lot, fill, reason, self.config.quantity);
                info!(
                    symbol = %self.config.symbol,
                    reason = %reason,
                    pnl = record.realized_pnl,
                    "exit confirmed"
                );
                Ok(Some(record))
            }
            other => {
                self.state = other;
                Err(Error::Other(
                    "fill confirmed with no submission outstanding".into(),
                ))
            }
        }
    }

    /// Roll back an unacknowledged submission. A rejected entry returns
    /// to flat; a rejected exit re-opens the lot with its extreme intact
    /// so the next cycle can retry.
    pub fn reject(&mut self) {
        match std::mem::replace(&mut self.state, State::Flat) {
            State::PendingEntry { side } => {
                warn!(symbol = %self.config.symbol, side = %side, "entry submission failed; staying flat");
            }
            State::PendingExit { lot, reason } => {
                warn!(symbol = %self.config.symbol, reason = %reason, "exit submission failed; position stays open");
                self.state = State::Open(lot);
            }
            other => self.state = other,
        }
    }
}

fn round_trip(
    symbol: &str,
    lot: &OpenLot,
    exit_fill: &Fill,
    reason: ExitReason,
    quantity: f64,
) -> TradeRecord {
    let signed = match lot.side {
        OrderSide::Buy => exit_fill.fill_price - lot.entry_price,
        OrderSide::Sell => lot.entry_price - exit_fill.fill_price,
    };
    TradeRecord {
        symbol: symbol.to_string(),
        entry_time: lot.entry_time,
        exit_time: exit_fill.timestamp,
        entry_price: lot.entry_price,
        exit_price: exit_fill.fill_price,
        quantity,
        realized_pnl: signed * quantity,
        return_pct: signed / lot.entry_price * 100.0,
        exit_reason: reason,
    }
}
