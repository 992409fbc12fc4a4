use common::Bar;

/// Rolling volume-weighted average price of the typical price
/// (high + low + close) / 3 over `window` bars. Not session-anchored.
/// Defined from index `window - 1`; a window with zero total volume
/// yields `None`.
pub fn vwap(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    assert!(window >= 1, "VWAP window must be >= 1");
    let mut out = vec![None; bars.len()];
    if bars.len() < window {
        return out;
    }

    let mut pv_sum: f64 = bars[..window]
        .iter()
        .map(|b| b.typical_price() * b.volume)
        .sum();
    let mut vol_sum: f64 = bars[..window].iter().map(|b| b.volume).sum();
    out[window - 1] = weighted(pv_sum, vol_sum);

    for i in window..bars.len() {
        let incoming = &bars[i];
        let outgoing = &bars[i - window];
        pv_sum += incoming.typical_price() * incoming.volume
            - outgoing.typical_price() * outgoing.volume;
        vol_sum += incoming.volume - outgoing.volume;
        out[i] = weighted(pv_sum, vol_sum);
    }
    out
}

fn weighted(pv_sum: f64, vol_sum: f64) -> Option<f64> {
    if vol_sum > 0.0 {
        Some(pv_sum / vol_sum)
    } else {
        None
    }
}
