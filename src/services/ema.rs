//! Exponential moving average over a close series.
//!
//! Uses the recursive (non-adjusted) form seeded with the first close:
//! `ema[0] = close[0]`, `ema[i] = close[i] * a + ema[i - 1] * (1 - a)` with
//! `a = 2 / (period + 1)`.

/// Period used for every stored EMA.
pub const EMA_PERIOD: usize = 50;

/// Compute the EMA series for `closes`.
///
/// Returns `None` when there are fewer closes than `period` or the period is
/// zero. Output has the same length as the input.
pub fn compute_ema(closes: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(closes.len());
    let mut prev = closes[0];
    out.push(prev);

    for close in &closes[1..] {
        prev = close * alpha + prev * (1.0 - alpha);
        out.push(prev);
    }

    Some(out)
}

/// Last value of [`compute_ema`].
pub fn latest_ema(closes: &[f64], period: usize) -> Option<f64> {
    compute_ema(closes, period).and_then(|series| series.last().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data() {
        assert!(compute_ema(&[1.0; 49], 50).is_none());
        assert!(compute_ema(&[], 1).is_none());
        assert!(compute_ema(&[1.0, 2.0], 0).is_none());
        assert!(compute_ema(&[1.0; 50], 50).is_some());
    }

    #[test]
    fn test_constant_series_is_flat() {
        let series = compute_ema(&[100.0; 60], 50).unwrap();
        assert_eq!(series.len(), 60);
        assert!(series.iter().all(|v| (v - 100.0).abs() < 1e-12));
    }

    #[test]
    fn test_seeded_with_first_close() {
        let series = compute_ema(&[10.0, 20.0, 30.0], 3).unwrap();
        // alpha = 0.5
        assert_eq!(series, vec![10.0, 15.0, 22.5]);
    }

    #[test]
    fn test_deterministic() {
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        assert_eq!(compute_ema(&closes, 50), compute_ema(&closes, 50));
    }

    #[test]
    fn test_rising_ramp() {
        // closes 10, 11, ..., 60 (51 values)
        let closes: Vec<f64> = (10..=60).map(|v| v as f64).collect();
        let series = compute_ema(&closes, EMA_PERIOD).unwrap();
        let last = *series.last().unwrap();
        let prev = series[series.len() - 2];

        // closed form of the recursion for a unit-step ramp
        let r: f64 = 49.0 / 51.0;
        let expected = 60.0 - 24.5 * (1.0 - r.powi(50));
        assert!((last - expected).abs() < 1e-9);

        assert!(last > prev && last < 60.0);
        assert_eq!(latest_ema(&closes, EMA_PERIOD), Some(last));
    }

    #[test]
    fn test_each_value_lies_between_previous_ema_and_close() {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + (i as f64 * 0.9).sin() * 15.0 + (i % 7) as f64)
            .collect();
        let series = compute_ema(&closes, EMA_PERIOD).unwrap();

        assert_eq!(series.len(), closes.len());
        assert_eq!(series[0], closes[0]);
        for i in 1..closes.len() {
            let lo = series[i - 1].min(closes[i]);
            let hi = series[i - 1].max(closes[i]);
            assert!(
                series[i] >= lo - 1e-9 && series[i] <= hi + 1e-9,
                "ema[{}] = {} outside [{}, {}]",
                i,
                series[i],
                lo,
                hi
            );
        }
    }
}
