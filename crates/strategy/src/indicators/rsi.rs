/// Relative Strength Index using Wilder's smoothing, scaled 0–100.
/// Needs `window + 1` closes; defined from index `window`.
pub fn rsi(values: &[f64], window: usize) -> Vec<Option<f64>> {
    assert!(window >= 2, "RSI window must be >= 2");
    let mut out = vec![None; values.len()];
    if values.len() < window + 1 {
        return out;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..window]
        .iter()
        .filter(|&&c| c > 0.0)
        .sum::<f64>()
        / window as f64;
    let mut avg_loss = changes[..window]
        .iter()
        .filter(|&&c| c < 0.0)
        .map(|c| c.abs())
        .sum::<f64>()
        / window as f64;
    out[window] = Some(rsi_value(avg_gain, avg_loss));

    for (i, &change) in changes.iter().enumerate().skip(window) {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (window - 1) as f64 + gain) / window as f64;
        avg_loss = (avg_loss * (window - 1) as f64 + loss) / window as f64;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::assert_approx;

    #[test]
    fn rsi_undefined_until_window_plus_one() {
        let values: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&values, 14);
        assert!(out[13].is_none());
        assert!(out[14].is_some());
    }

    #[test]
    fn all_gains_is_100() {
        let out = rsi(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        assert_approx(out[4].unwrap(), 100.0);
    }

    #[test]
    fn all_losses_is_0() {
        let out = rsi(&[14.0, 13.0, 12.0, 11.0, 10.0], 3);
        assert_approx(out[4].unwrap(), 0.0);
    }

    #[test]
    fn rsi_stays_in_range_on_mixed_series() {
        let values = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09, 44.90,
        ];
        let out = rsi(&values, 14);
        let v = out[15].unwrap();
        assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
    }
}
