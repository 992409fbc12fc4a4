use super::moving_average::ema;

/// MACD line, signal line and histogram, aligned to the input closes.
#[derive(Debug, Clone)]
pub struct Macd {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// MACD: fast EMA − slow EMA, defined from index `slow - 1`; signal =
/// EMA of the MACD line over `signal_window`, defined once `signal_window`
/// MACD values exist; histogram = macd − signal.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal_window: usize) -> Macd {
    assert!(fast < slow, "MACD fast window must be less than slow window");
    let n = values.len();
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);

    let mut macd_line = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (fast_ema[i], slow_ema[i]) {
            macd_line[i] = Some(f - s);
        }
    }

    // Signal line smooths only the defined portion of the MACD line.
    let defined: Vec<f64> = macd_line.iter().filter_map(|v| *v).collect();
    let signal_defined = ema(&defined, signal_window);
    let mut signal = vec![None; n];
    let offset = n - defined.len();
    for (j, value) in signal_defined.into_iter().enumerate() {
        signal[offset + j] = value;
    }

    let mut histogram = vec![None; n];
    for i in 0..n {
        if let (Some(m), Some(s)) = (macd_line[i], signal[i]) {
            histogram[i] = Some(m - s);
        }
    }

    Macd {
        macd: macd_line,
        signal,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::assert_approx;

    #[test]
    fn macd_undefined_before_slow_window() {
        let values: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = macd(&values, 12, 26, 9);
        assert!(out.macd[24].is_none());
        assert!(out.macd[25].is_some());
    }

    #[test]
    fn signal_needs_signal_window_of_macd_values() {
        let values: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = macd(&values, 12, 26, 9);
        // MACD defined from 25; signal from 25 + 9 - 1 = 33
        assert!(out.signal[32].is_none());
        assert!(out.signal[33].is_some());
        assert!(out.histogram[33].is_some());
    }

    #[test]
    fn histogram_is_macd_minus_signal() {
        let values: Vec<f64> = (0..50)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let out = macd(&values, 5, 10, 4);
        for i in 0..values.len() {
            if let (Some(m), Some(s), Some(h)) = (out.macd[i], out.signal[i], out.histogram[i]) {
                assert_approx(h, m - s);
            }
        }
    }

    #[test]
    fn constant_series_has_zero_macd() {
        let values = vec![100.0; 40];
        let out = macd(&values, 3, 6, 3);
        assert_approx(out.macd[39].unwrap(), 0.0);
        assert_approx(out.signal[39].unwrap(), 0.0);
    }
}
