/// Simple moving average. Defined from index `window - 1`.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    assert!(window >= 1, "SMA window must be >= 1");
    let mut out = vec![None; values.len()];
    if values.len() < window {
        return out;
    }

    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = Some(sum / window as f64);
    }
    out
}

/// Exponential moving average with smoothing factor 2 / (window + 1),
/// seeded with the SMA of the first `window` values. Defined from index
/// `window - 1`.
pub fn ema(values: &[f64], window: usize) -> Vec<Option<f64>> {
    assert!(window >= 1, "EMA window must be >= 1");
    let mut out = vec![None; values.len()];
    if values.len() < window {
        return out;
    }

    let k = 2.0 / (window as f64 + 1.0);
    let mut current: f64 = values[..window].iter().sum::<f64>() / window as f64;
    out[window - 1] = Some(current);
    for i in window..values.len() {
        current = values[i] * k + current * (1.0 - k);
        out[i] = Some(current);
    }
    out
}

/// Rolling median over an already-windowed series. A window containing
/// any `None` yields `None`, so the output is defined only once the
/// underlying indicator has `window` consecutive values.
pub fn rolling_median(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    assert!(window >= 1, "median window must be >= 1");
    let mut out = vec![None; values.len()];

    for i in 0..values.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        let mut sorted: Vec<f64> = slice.iter().filter_map(|v| *v).collect();
        if sorted.len() < window {
            continue;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = window / 2;
        out[i] = Some(if window % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::assert_approx;

    #[test]
    fn sma_undefined_before_window_fills() {
        let out = sma(&[10.0, 11.0, 12.0, 13.0], 3);
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert_approx(out[2].unwrap(), 11.0);
        assert_approx(out[3].unwrap(), 12.0);
    }

    #[test]
    fn sma_all_none_when_too_short() {
        let out = sma(&[10.0, 11.0], 5);
        assert!(out.iter().all(|v| v.is_none()));
    }

    #[test]
    fn ema_seeds_with_sma() {
        let out = ema(&[10.0, 20.0, 30.0], 3);
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert_approx(out[2].unwrap(), 20.0);
    }

    #[test]
    fn ema_recursion_uses_two_over_w_plus_one() {
        // window 3 → k = 0.5; next value = 40*0.5 + 20*0.5 = 30
        let out = ema(&[10.0, 20.0, 30.0, 40.0], 3);
        assert_approx(out[3].unwrap(), 30.0);
    }

    #[test]
    fn median_odd_window() {
        let values: Vec<Option<f64>> = [3.0, 1.0, 2.0, 5.0].iter().map(|&v| Some(v)).collect();
        let out = rolling_median(&values, 3);
        assert!(out[1].is_none());
        assert_approx(out[2].unwrap(), 2.0);
        assert_approx(out[3].unwrap(), 2.0);
    }

    #[test]
    fn median_skips_windows_with_gaps() {
        let values = vec![Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)];
        let out = rolling_median(&values, 3);
        assert!(out[2].is_none()); // window covers the None at index 1
        assert!(out[3].is_none());
        assert_approx(out[4].unwrap(), 4.0);
    }
}
