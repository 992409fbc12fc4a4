use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{TimeInForce, Timeframe};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "composite"
/// name = "QQQ scalp"
/// symbol = "QQQ"
/// quantity = 100.0
/// trail_pct = 0.05
///
/// [strategy.params]
/// bb_window = 10
/// bb_mult = 1.5
///
/// [[pair]]
/// name = "SPY/QQQ reversion"
/// symbol_a = "SPY"
/// symbol_b = "QQQ"
/// lookback = 60
/// z_enter = 2.0
/// notional_usd = 5000.0
/// target_usd = 100.0
/// stop_usd = 50.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(rename = "pair", default)]
    pub pairs: Vec<PairConfig>,
}

/// One single-instrument strategy instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Rule set identifier: "band_reversion", "momentum_cross" or "composite".
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Human-readable name shown in logs and audit rows.
    pub name: String,
    /// Instrument symbol, e.g. "QQQ" or "BTC/USD".
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    /// Order quantity in instrument units.
    pub quantity: f64,
    /// Trailing-stop distance from the peak, e.g. 0.05 for 5%.
    #[serde(default)]
    pub trail_pct: Option<f64>,
    /// Absolute profit target per round-trip in currency units.
    #[serde(default)]
    pub target_usd: Option<f64>,
    /// Absolute stop-loss per round-trip in currency units (positive).
    #[serde(default)]
    pub stop_usd: Option<f64>,
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default = "default_tif")]
    pub time_in_force: TimeInForce,
    /// Rule-specific parameters (windows, multipliers).
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyConfig {
    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params
            .get(key)
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .unwrap_or(default)
    }

    pub fn param_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(|v| v.as_integer())
            .map(|v| v as usize)
            .unwrap_or(default)
    }
}

/// One pair-trading strategy instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairConfig {
    pub name: String,
    pub symbol_a: String,
    pub symbol_b: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    /// Rolling window (bars) for spread mean/stddev.
    pub lookback: usize,
    /// |z| threshold to open the pair.
    pub z_enter: f64,
    /// Dollar notional per leg; quantities are notional / leg price, min 1.
    pub notional_usd: f64,
    /// Combined P&L target that closes the pair.
    pub target_usd: f64,
    /// Combined loss (positive number) that closes the pair.
    pub stop_usd: f64,
    #[serde(default = "default_tif")]
    pub time_in_force: TimeInForce,
}

fn default_timeframe() -> Timeframe {
    Timeframe::Minute
}

fn default_tif() -> TimeInForce {
    TimeInForce::Gtc
}

impl StrategyFileConfig {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read strategy config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse strategy config at '{path}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategies_and_pairs() {
        let cfg: StrategyFileConfig = toml::from_str(
            r#"
            [[strategy]]
            type = "composite"
            name = "QQQ scalp"
            symbol = "QQQ"
            quantity = 100.0
            trail_pct = 0.05

            [strategy.params]
            bb_window = 10
            bb_mult = 1.5

            [[pair]]
            name = "SPY/QQQ"
            symbol_a = "SPY"
            symbol_b = "QQQ"
            lookback = 60
            z_enter = 2.0
            notional_usd = 5000.0
            target_usd = 100.0
            stop_usd = 50.0
            "#,
        )
        .unwrap();

        assert_eq!(cfg.strategies.len(), 1);
        let s = &cfg.strategies[0];
        assert_eq!(s.rule_type, "composite");
        assert_eq!(s.param_usize("bb_window", 20), 10);
        assert!((s.param_f64("bb_mult", 2.0) - 1.5).abs() < 1e-12);
        assert_eq!(s.param_usize("missing", 7), 7);
        assert_eq!(s.trail_pct, Some(0.05));
        assert!(!s.allow_short);

        assert_eq!(cfg.pairs.len(), 1);
        assert_eq!(cfg.pairs[0].lookback, 60);
    }

    #[test]
    fn integer_params_read_as_floats() {
        let cfg: StrategyFileConfig = toml::from_str(
            r#"
            [[strategy]]
            type = "band_reversion"
            name = "t"
            symbol = "SPY"
            quantity = 1.0

            [strategy.params]
            bb_mult = 2
            "#,
        )
        .unwrap();
        assert!((cfg.strategies[0].param_f64("bb_mult", 1.0) - 2.0).abs() < 1e-12);
    }
}
