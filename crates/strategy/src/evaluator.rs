use std::collections::BTreeMap;

use common::{Bar, Error, Result};

use crate::config::StrategyConfig;
use crate::frame::IndicatorFrame;
use crate::indicators::{atr, bollinger, ema, macd, rolling_median, rsi, vwap};

/// Outcome of one named condition at the evaluation point.
///
/// A condition whose inputs are still inside their lookback window is
/// `Insufficient`, never `NotMet` — the distinction matters for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Met,
    NotMet,
    Insufficient,
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Met => write!(f, "met"),
            Condition::NotMet => write!(f, "not-met"),
            Condition::Insufficient => write!(f, "insufficient-data"),
        }
    }
}

/// Buy/sell decision at the latest bar, with every contributing condition
/// recorded for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalResult {
    pub buy: bool,
    pub sell: bool,
    pub conditions: BTreeMap<String, Condition>,
}

impl SignalResult {
    pub fn neutral() -> Self {
        Self {
            buy: false,
            sell: false,
            conditions: BTreeMap::new(),
        }
    }

    pub fn is_neutral(&self) -> bool {
        !self.buy && !self.sell
    }

    /// Compact "name=state" listing for log lines.
    pub fn describe(&self) -> String {
        self.conditions
            .iter()
            .map(|(name, c)| format!("{name}={c}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Column names shared between the evaluator and audit diagnostics.
pub mod columns {
    pub const BB_UPPER: &str = "bb_upper";
    pub const BB_MIDDLE: &str = "bb_middle";
    pub const BB_LOWER: &str = "bb_lower";
    pub const EMA_FAST: &str = "ema_fast";
    pub const EMA_SLOW: &str = "ema_slow";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const RSI: &str = "rsi";
    pub const ATR: &str = "atr";
    pub const ATR_MEDIAN: &str = "atr_median";
    pub const VWAP: &str = "vwap";
}

/// The configured rule set, an AND of named boolean conditions evaluated
/// at the latest fully-computed bar.
#[derive(Debug, Clone)]
enum Rule {
    /// Buy below the lower band, sell above the upper band.
    BandReversion { window: usize, mult: f64 },
    /// Strict sign change of (fast EMA − slow EMA) between the previous
    /// and current bar.
    MomentumCross { fast: usize, slow: usize },
    /// Buy oversold, sell overbought.
    RsiReversion {
        window: usize,
        overbought: f64,
        oversold: f64,
    },
    /// Trend + momentum + mean-reversion + volatility filters, all ANDed.
    Composite {
        bb_window: usize,
        bb_mult: f64,
        macd_fast: usize,
        macd_slow: usize,
        macd_signal: usize,
        vwap_window: usize,
        atr_window: usize,
        atr_median_window: usize,
    },
}

/// Reduces indicator values at the latest bar into a buy/sell decision.
#[derive(Debug, Clone)]
pub struct Evaluator {
    rule: Rule,
}

impl Evaluator {
    /// Build the evaluator from config. Unknown rule types and impossible
    /// parameters are configuration defects, not retryable conditions.
    pub fn from_config(cfg: &StrategyConfig) -> Result<Self> {
        let rule = match cfg.rule_type.as_str() {
            "band_reversion" => Rule::BandReversion {
                window: cfg.param_usize("bb_window", 20),
                mult: cfg.param_f64("bb_mult", 2.0),
            },
            "momentum_cross" => {
                let fast = cfg.param_usize("fast", 12);
                let slow = cfg.param_usize("slow", 26);
                if fast >= slow {
                    return Err(Error::Config(format!(
                        "momentum_cross fast ({fast}) must be < slow ({slow})"
                    )));
                }
                Rule::MomentumCross { fast, slow }
            }
            "rsi_reversion" => Rule::RsiReversion {
                window: cfg.param_usize("period", 14),
                overbought: cfg.param_f64("overbought", 70.0),
                oversold: cfg.param_f64("oversold", 30.0),
            },
            "composite" => Rule::Composite {
                bb_window: cfg.param_usize("bb_window", 20),
                bb_mult: cfg.param_f64("bb_mult", 2.0),
                macd_fast: cfg.param_usize("macd_fast", 12),
                macd_slow: cfg.param_usize("macd_slow", 26),
                macd_signal: cfg.param_usize("macd_signal", 9),
                vwap_window: cfg.param_usize("vwap_window", 15),
                atr_window: cfg.param_usize("atr_window", 5),
                atr_median_window: cfg.param_usize("atr_median_window", 15),
            },
            other => return Err(Error::Config(format!("unknown rule type '{other}'"))),
        };
        Ok(Self { rule })
    }

    pub fn rule_name(&self) -> &'static str {
        match self.rule {
            Rule::BandReversion { .. } => "band_reversion",
            Rule::MomentumCross { .. } => "momentum_cross",
            Rule::RsiReversion { .. } => "rsi_reversion",
            Rule::Composite { .. } => "composite",
        }
    }

    /// Bars required before every condition of this rule is evaluable.
    pub fn min_bars(&self) -> usize {
        match self.rule {
            Rule::BandReversion { window, .. } => window,
            // cross detection needs the previous bar's diff as well
            Rule::MomentumCross { slow, .. } => slow + 1,
            Rule::RsiReversion { window, .. } => window + 1,
            Rule::Composite {
                bb_window,
                macd_slow,
                macd_signal,
                vwap_window,
                atr_window,
                atr_median_window,
                ..
            } => bb_window
                .max(vwap_window)
                .max(macd_slow + macd_signal - 1)
                .max(atr_window + atr_median_window),
        }
    }

    /// Compute every indicator column this rule reads.
    pub fn compute(&self, bars: &[Bar]) -> IndicatorFrame {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let mut frame = IndicatorFrame::new(bars.len());

        match &self.rule {
            Rule::BandReversion { window, mult } => {
                let bands = bollinger(&closes, *window, *mult);
                frame.insert(columns::BB_UPPER, bands.upper);
                frame.insert(columns::BB_MIDDLE, bands.middle);
                frame.insert(columns::BB_LOWER, bands.lower);
            }
            Rule::MomentumCross { fast, slow } => {
                frame.insert(columns::EMA_FAST, ema(&closes, *fast));
                frame.insert(columns::EMA_SLOW, ema(&closes, *slow));
            }
            Rule::RsiReversion { window, .. } => {
                frame.insert(columns::RSI, rsi(&closes, *window));
            }
            Rule::Composite {
                bb_window,
                bb_mult,
                macd_fast,
                macd_slow,
                macd_signal,
                vwap_window,
                atr_window,
                atr_median_window,
            } => {
                let bands = bollinger(&closes, *bb_window, *bb_mult);
                frame.insert(columns::BB_UPPER, bands.upper);
                frame.insert(columns::BB_LOWER, bands.lower);

                let m = macd(&closes, *macd_fast, *macd_slow, *macd_signal);
                frame.insert(columns::MACD, m.macd);
                frame.insert(columns::MACD_SIGNAL, m.signal);

                frame.insert(columns::VWAP, vwap(bars, *vwap_window));

                let atr_series = atr(bars, *atr_window);
                frame.insert(
                    columns::ATR_MEDIAN,
                    rolling_median(&atr_series, *atr_median_window),
                );
                frame.insert(columns::ATR, atr_series);
            }
        }
        frame
    }

    /// Evaluate at the latest bar of `bars`/`frame`.
    ///
    /// Any condition with an unfilled lookback is recorded as
    /// `Insufficient` and forces a neutral result.
    pub fn evaluate(&self, bars: &[Bar], frame: &IndicatorFrame) -> SignalResult {
        let Some(latest) = bars.last() else {
            return SignalResult::neutral();
        };
        let close = latest.close;
        let mut set = ConditionSet::default();

        let (buy, sell) = match &self.rule {
            Rule::BandReversion { .. } => {
                let buy = set.check(
                    "close_below_lower_band",
                    frame.latest(columns::BB_LOWER).map(|lower| close < lower),
                );
                let sell = set.check(
                    "close_above_upper_band",
                    frame.latest(columns::BB_UPPER).map(|upper| close > upper),
                );
                (buy, sell)
            }
            Rule::MomentumCross { .. } => {
                let diff_prev = diff(
                    frame.previous(columns::EMA_FAST),
                    frame.previous(columns::EMA_SLOW),
                );
                let diff_curr = diff(
                    frame.latest(columns::EMA_FAST),
                    frame.latest(columns::EMA_SLOW),
                );
                let crossed = diff_prev.zip(diff_curr);
                let buy = set.check(
                    "fast_crossed_above_slow",
                    crossed.map(|(prev, curr)| prev <= 0.0 && curr > 0.0),
                );
                let sell = set.check(
                    "fast_crossed_below_slow",
                    crossed.map(|(prev, curr)| prev >= 0.0 && curr < 0.0),
                );
                (buy, sell)
            }
            Rule::RsiReversion {
                overbought,
                oversold,
                ..
            } => {
                let value = frame.latest(columns::RSI);
                let buy = set.check("rsi_oversold", value.map(|v| v <= *oversold));
                let sell = set.check("rsi_overbought", value.map(|v| v >= *overbought));
                (buy, sell)
            }
            Rule::Composite { .. } => {
                let above_vwap = set.check(
                    "close_above_vwap",
                    frame.latest(columns::VWAP).map(|v| close > v),
                );
                let below_vwap = set.check(
                    "close_below_vwap",
                    frame.latest(columns::VWAP).map(|v| close < v),
                );
                let macd_bullish = set.check(
                    "macd_above_signal",
                    diff(
                        frame.latest(columns::MACD),
                        frame.latest(columns::MACD_SIGNAL),
                    )
                    .map(|d| d > 0.0),
                );
                let macd_bearish = set.check(
                    "macd_below_signal",
                    diff(
                        frame.latest(columns::MACD),
                        frame.latest(columns::MACD_SIGNAL),
                    )
                    .map(|d| d < 0.0),
                );
                let below_lower = set.check(
                    "close_below_lower_band",
                    frame.latest(columns::BB_LOWER).map(|lower| close < lower),
                );
                let above_upper = set.check(
                    "close_above_upper_band",
                    frame.latest(columns::BB_UPPER).map(|upper| close > upper),
                );
                let volatile = set.check(
                    "atr_above_median",
                    diff(
                        frame.latest(columns::ATR),
                        frame.latest(columns::ATR_MEDIAN),
                    )
                    .map(|d| d > 0.0),
                );

                let buy = above_vwap & macd_bullish & below_lower & volatile;
                let sell = below_vwap & macd_bearish & above_upper & volatile;
                (buy, sell)
            }
        };

        if set.insufficient {
            return SignalResult {
                buy: false,
                sell: false,
                conditions: set.conditions,
            };
        }
        SignalResult {
            buy,
            sell,
            conditions: set.conditions,
        }
    }

    /// Convenience for the runners: compute the frame and evaluate in one
    /// step. Both modes go through this single code path.
    pub fn evaluate_latest(&self, bars: &[Bar]) -> (IndicatorFrame, SignalResult) {
        let frame = self.compute(bars);
        let result = self.evaluate(bars, &frame);
        (frame, result)
    }
}

fn diff(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

#[derive(Default)]
struct ConditionSet {
    conditions: BTreeMap<String, Condition>,
    insufficient: bool,
}

impl ConditionSet {
    /// Record a condition outcome; `None` means the inputs are not yet
    /// evaluable and poisons the whole result to neutral.
    fn check(&mut self, name: &str, value: Option<bool>) -> bool {
        match value {
            Some(true) => {
                self.conditions.insert(name.to_string(), Condition::Met);
                true
            }
            Some(false) => {
                self.conditions.insert(name.to_string(), Condition::NotMet);
                false
            }
            None => {
                self.conditions
                    .insert(name.to_string(), Condition::Insufficient);
                self.insufficient = true;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyFileConfig;
    use crate::indicators::test_support::make_bars;

    fn evaluator(toml_src: &str) -> Evaluator {
        let cfg: StrategyFileConfig = toml::from_str(toml_src).unwrap();
        Evaluator::from_config(&cfg.strategies[0]).unwrap()
    }

    fn band_reversion_3() -> Evaluator {
        evaluator(
            r#"
            [[strategy]]
            type = "band_reversion"
            name = "t"
            symbol = "SPY"
            quantity = 1.0

            [strategy.params]
            bb_window = 3
            bb_mult = 1.0
            "#,
        )
    }

    #[test]
    fn unknown_rule_type_is_an_error() {
        let cfg: StrategyFileConfig = toml::from_str(
            r#"
            [[strategy]]
            type = "astrology"
            name = "t"
            symbol = "SPY"
            quantity = 1.0
            "#,
        )
        .unwrap();
        assert!(Evaluator::from_config(&cfg.strategies[0]).is_err());
    }

    #[test]
    fn insufficient_data_is_neutral_not_false() {
        let eval = band_reversion_3();
        let bars = make_bars(&[100.0, 99.0]); // shorter than the window
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(result.is_neutral());
        assert_eq!(
            result.conditions.get("close_below_lower_band"),
            Some(&Condition::Insufficient)
        );
        assert_eq!(
            result.conditions.get("close_above_upper_band"),
            Some(&Condition::Insufficient)
        );
    }

    #[test]
    fn band_reversion_buys_below_lower_band() {
        let eval = band_reversion_3();
        // Steady then a sharp drop pierces the lower band
        let bars = make_bars(&[100.0, 100.0, 100.0, 100.0, 90.0]);
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(result.buy);
        assert!(!result.sell);
        assert_eq!(
            result.conditions.get("close_below_lower_band"),
            Some(&Condition::Met)
        );
    }

    #[test]
    fn band_reversion_sells_above_upper_band() {
        let eval = band_reversion_3();
        let bars = make_bars(&[100.0, 100.0, 100.0, 100.0, 110.0]);
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(result.sell);
        assert!(!result.buy);
    }

    #[test]
    fn momentum_cross_requires_strict_sign_change() {
        let eval = evaluator(
            r#"
            [[strategy]]
            type = "momentum_cross"
            name = "t"
            symbol = "SPY"
            quantity = 1.0

            [strategy.params]
            fast = 2
            slow = 4
            "#,
        );

        // Persistent uptrend: fast stays above slow with no fresh cross
        let trending: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&trending);
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(
            !result.buy,
            "fast > slow on the current bar alone must not fire a cross"
        );

        // Down leg then a single sharp reversal bar: the diff flips sign
        // on the last bar only
        let mut closes: Vec<f64> = (0..10).map(|i| 110.0 - i as f64 * 2.0).collect();
        closes.push(130.0);
        let bars = make_bars(&closes);
        let (frame, result) = eval.evaluate_latest(&bars);
        let prev = frame.previous(columns::EMA_FAST).unwrap()
            - frame.previous(columns::EMA_SLOW).unwrap();
        let curr =
            frame.latest(columns::EMA_FAST).unwrap() - frame.latest(columns::EMA_SLOW).unwrap();
        assert!(prev <= 0.0 && curr > 0.0, "test series must actually cross");
        assert!(result.buy);
        assert!(!result.sell);
    }

    #[test]
    fn rsi_reversion_buys_oversold() {
        let eval = evaluator(
            r#"
            [[strategy]]
            type = "rsi_reversion"
            name = "t"
            symbol = "SPY"
            quantity = 1.0

            [strategy.params]
            period = 3
            "#,
        );
        let bars = make_bars(&[110.0, 108.0, 106.0, 104.0, 102.0]);
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(result.buy);
        assert!(!result.sell);
    }

    #[test]
    fn composite_voids_signal_when_any_condition_fails() {
        let eval = evaluator(
            r#"
            [[strategy]]
            type = "composite"
            name = "t"
            symbol = "QQQ"
            quantity = 1.0

            [strategy.params]
            bb_window = 3
            bb_mult = 1.5
            macd_fast = 2
            macd_slow = 4
            macd_signal = 2
            vwap_window = 3
            atr_window = 2
            atr_median_window = 3
            "#,
        );
        // Long downtrend: close < vwap fails the buy's trend filter even
        // when the price sits below the lower band
        let closes: Vec<f64> = (0..20).map(|i| 120.0 - i as f64 * 2.0).collect();
        let bars = make_bars(&closes);
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(!result.buy);
        assert_eq!(
            result.conditions.get("close_above_vwap"),
            Some(&Condition::NotMet)
        );
        // every condition was evaluable at this depth
        assert!(result
            .conditions
            .values()
            .all(|c| *c != Condition::Insufficient));
    }

    #[test]
    fn composite_within_lookback_reports_insufficient() {
        let eval = evaluator(
            r#"
            [[strategy]]
            type = "composite"
            name = "t"
            symbol = "QQQ"
            quantity = 1.0

            [strategy.params]
            bb_window = 3
            macd_fast = 2
            macd_slow = 4
            macd_signal = 2
            vwap_window = 3
            atr_window = 2
            atr_median_window = 3
            "#,
        );
        let bars = make_bars(&[100.0, 101.0, 102.0, 101.0]); // below min_bars
        assert!(bars.len() < eval.min_bars());
        let (_, result) = eval.evaluate_latest(&bars);
        assert!(result.is_neutral());
        assert!(result
            .conditions
            .values()
            .any(|c| *c == Condition::Insufficient));
    }
}
