use super::moving_average::sma;

/// The three Bollinger band series, aligned to the input closes.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bollinger Bands: middle = SMA(close, window), upper/lower = middle
/// ± multiplier * population stddev over the same window. Defined from
/// index `window - 1`.
pub fn bollinger(values: &[f64], window: usize, multiplier: f64) -> BollingerBands {
    assert!(window >= 1, "Bollinger window must be >= 1");
    let middle = sma(values, window);
    let mut upper = vec![None; values.len()];
    let mut lower = vec![None; values.len()];

    for i in 0..values.len() {
        let Some(mean) = middle[i] else { continue };
        let slice = &values[i + 1 - window..=i];
        let variance = slice
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / window as f64;
        let stddev = variance.sqrt();
        upper[i] = Some(mean + multiplier * stddev);
        lower[i] = Some(mean - multiplier * stddev);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::assert_approx;

    #[test]
    fn middle_band_is_sma() {
        let bands = bollinger(&[10.0, 11.0, 12.0, 13.0, 14.0], 3, 2.0);
        assert!(bands.middle[1].is_none());
        assert_approx(bands.middle[2].unwrap(), 11.0);
        assert_approx(bands.middle[3].unwrap(), 12.0);
    }

    #[test]
    fn bands_are_symmetric_around_middle() {
        let bands = bollinger(&[10.0, 11.0, 12.0, 13.0, 14.0], 3, 2.0);
        for i in 2..5 {
            let up = bands.upper[i].unwrap() - bands.middle[i].unwrap();
            let down = bands.middle[i].unwrap() - bands.lower[i].unwrap();
            assert_approx(up, down);
        }
    }

    #[test]
    fn constant_price_collapses_bands() {
        let bands = bollinger(&[100.0, 100.0, 100.0, 100.0], 3, 2.0);
        assert_approx(bands.upper[3].unwrap(), 100.0);
        assert_approx(bands.lower[3].unwrap(), 100.0);
    }

    #[test]
    fn known_population_stddev() {
        // window [10, 12, 14]: mean 12, population variance 8/3
        let bands = bollinger(&[10.0, 12.0, 14.0], 3, 1.0);
        let sd = (8.0f64 / 3.0).sqrt();
        assert_approx(bands.upper[2].unwrap(), 12.0 + sd);
        assert_approx(bands.lower[2].unwrap(), 12.0 - sd);
    }
}
