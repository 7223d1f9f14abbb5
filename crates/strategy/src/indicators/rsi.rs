//! RSI (Relative Strength Index) series.
//!
//! Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
//! Undefined until `period` price changes exist (first defined at index `period`).

use super::Series;

pub fn rsi(closes: &[f64], period: usize) -> Series {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let initial = &changes[..period];

    // First average gain/loss over the initial `period` changes
    let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / period as f64;
    out[period] = Some(value(avg_gain, avg_loss));

    // Wilder smoothing over remaining changes
    for (offset, &change) in changes[period..].iter().enumerate() {
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { change.abs() } else { 0.0 };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        out[period + 1 + offset] = Some(value(avg_gain, avg_loss));
    }
    out
}

fn value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_undefined_when_insufficient_data() {
        // Need at least period+1 = 15 values
        assert!(rsi(&[100.0; 14], 14).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_defined_with_sufficient_data() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let r = rsi(&prices, 14);
        assert!(r[13].is_none());
        assert!(r[14].is_some());
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let r = rsi(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        assert!((r[4].unwrap() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let r = rsi(&[14.0, 13.0, 12.0, 11.0, 10.0], 3);
        assert!(r[4].unwrap().abs() < 1e-6);
    }

    #[test]
    fn rsi_stays_in_range() {
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09,
        ];
        for v in rsi(&prices, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
        }
    }
}
