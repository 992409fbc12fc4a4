use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use common::Bar;
use strategy::indicators::{atr, bollinger, ema, rsi, sma, vwap};
use strategy::{Evaluator, StrategyFileConfig};

fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: t0 + Duration::minutes(i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 500.0,
        })
        .collect()
}

proptest! {
    /// Close-based indicators are undefined exactly while their lookback
    /// window is unfilled, and defined everywhere after.
    #[test]
    fn lookback_boundary_is_exact(
        window in 2usize..20,
        closes in prop::collection::vec(1.0f64..1000.0, 0..50),
    ) {
        for (series, first_defined) in [
            (sma(&closes, window), window - 1),
            (ema(&closes, window), window - 1),
            (rsi(&closes, window), window),
        ] {
            prop_assert_eq!(series.len(), closes.len());
            for (i, value) in series.iter().enumerate() {
                if i < first_defined {
                    prop_assert!(value.is_none(), "index {} should be inside the lookback", i);
                } else {
                    prop_assert!(value.is_some(), "index {} should be defined", i);
                }
            }
        }
    }

    #[test]
    fn bar_indicators_respect_lookback(
        window in 2usize..20,
        closes in prop::collection::vec(10.0f64..1000.0, 0..50),
    ) {
        let bars = make_bars(&closes);
        let atr_series = atr(&bars, window);
        let vwap_series = vwap(&bars, window);
        for i in 0..bars.len() {
            prop_assert_eq!(atr_series[i].is_some(), i >= window);
            prop_assert_eq!(vwap_series[i].is_some(), i + 1 >= window);
        }
    }

    /// Bands stay ordered lower <= middle <= upper wherever defined.
    #[test]
    fn bollinger_bands_are_ordered(
        window in 2usize..15,
        mult in 0.5f64..3.0,
        closes in prop::collection::vec(1.0f64..1000.0, 2..40),
    ) {
        let bands = bollinger(&closes, window, mult);
        for i in 0..closes.len() {
            if let (Some(u), Some(m), Some(l)) = (bands.upper[i], bands.middle[i], bands.lower[i]) {
                prop_assert!(l <= m + 1e-9);
                prop_assert!(m <= u + 1e-9);
            }
        }
    }

    /// Sequences shorter than the rule's lookback always evaluate neutral.
    #[test]
    fn evaluator_is_neutral_inside_lookback(
        closes in prop::collection::vec(1.0f64..1000.0, 0..19),
    ) {
        let cfg: StrategyFileConfig = toml::from_str(r#"
            [[strategy]]
            type = "band_reversion"
            name = "t"
            symbol = "SPY"
            quantity = 1.0

            [strategy.params]
            bb_window = 20
        "#).unwrap();
        let eval = Evaluator::from_config(&cfg.strategies[0]).unwrap();
        prop_assume!(closes.len() < eval.min_bars());
        let bars = make_bars(&closes);
        let (_, result) = eval.evaluate_latest(&bars);
        prop_assert!(result.is_neutral());
    }
}
