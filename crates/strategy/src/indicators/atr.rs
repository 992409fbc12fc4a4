use common::Bar;

/// Average True Range with Wilder smoothing.
///
/// True range needs the previous close, so the first TR exists at index 1;
/// the seed ATR is the mean of the first `window` true ranges and the
/// series is defined from index `window`.
pub fn atr(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    assert!(window >= 1, "ATR window must be >= 1");
    let mut out = vec![None; bars.len()];
    if bars.len() < window + 1 {
        return out;
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let mut current: f64 = true_ranges[..window].iter().sum::<f64>() / window as f64;
    out[window] = Some(current);
    for (i, &tr) in true_ranges.iter().enumerate().skip(window) {
        current = (current * (window - 1) as f64 + tr) / window as f64;
        out[i + 1] = Some(current);
    }
    out
}

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}
