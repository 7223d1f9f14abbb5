//! Moving averages shared by the other indicators.

use super::Series;

/// Simple moving average over the trailing `period` values.
/// Defined from index `period - 1`.
pub fn sma(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    for i in period.saturating_sub(1)..values.len() {
        let window = &values[i + 1 - period..=i];
        out[i] = Some(window.iter().sum::<f64>() / period as f64);
    }
    out
}

/// SMA over a series with undefined entries. Defined only where the whole
/// window is defined.
pub fn sma_defined(values: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    for i in period.saturating_sub(1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(Option::is_some) {
            out[i] = Some(window.iter().flatten().sum::<f64>() / period as f64);
        }
    }
    out
}

/// Exponential moving average, `k = 2 / (period + 1)`, seeded with the SMA of
/// the first `period` values. Defined from index `period - 1`.
pub fn ema(values: &[f64], period: usize) -> Series {
    let lifted: Series = values.iter().copied().map(Some).collect();
    ema_defined(&lifted, period)
}

/// EMA over a series whose leading entries may be undefined. The seed is the
/// SMA of the first `period` consecutive defined values; a hole after the seed
/// leaves the rest undefined.
pub fn ema_defined(values: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };
    let seed_end = start + period;
    if seed_end > values.len() || values[start..seed_end].iter().any(Option::is_none) {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[start..seed_end].iter().flatten().sum::<f64>() / period as f64;
    out[seed_end - 1] = Some(prev);

    for i in seed_end..values.len() {
        let Some(v) = values[i] else {
            break;
        };
        prev = v * k + prev * (1.0 - k);
        out[i] = Some(prev);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_is_undefined_until_window_fills() {
        let s = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(s, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn sma_defined_skips_holes() {
        let s = sma_defined(&[None, Some(2.0), Some(4.0), Some(6.0)], 2);
        assert_eq!(s, vec![None, None, Some(3.0), Some(5.0)]);
    }

    #[test]
    fn ema_seeds_with_sma_then_smooths() {
        let s = ema(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(s[..2], [None, None]);
        assert_eq!(s[2], Some(4.0));
        // k = 0.5: 8 * 0.5 + 4 * 0.5
        assert_eq!(s[3], Some(6.0));
    }

    #[test]
    fn ema_never_fabricates_from_short_history() {
        assert!(ema(&[1.0, 2.0], 3).iter().all(Option::is_none));
        assert!(ema(&[], 3).is_empty());
    }

    #[test]
    fn ema_defined_starts_after_leading_holes() {
        let s = ema_defined(&[None, None, Some(3.0), Some(5.0), Some(7.0)], 2);
        assert_eq!(s[3], Some(4.0));
        assert!(s[..3].iter().all(Option::is_none));
    }
}
