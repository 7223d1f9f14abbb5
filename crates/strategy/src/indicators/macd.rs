//! MACD (Moving Average Convergence/Divergence) series.
//!
//! MACD line = EMA(fast) − EMA(slow), signal = EMA(macd_line, signal_period),
//! histogram = line − signal.

use super::average::{ema, ema_defined};
use super::Series;

pub struct MacdSeries {
    pub line: Series,
    pub signal: Series,
    pub histogram: Series,
}

/// Crossover state of the MACD line against its signal line on one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdCross {
    Bullish, // MACD crossed above signal line
    Bearish, // MACD crossed below signal line
    Neutral, // No crossover on this bar
}

impl MacdCross {
    /// Crossover at `index`, comparing with `index - 1`.
    /// Returns `None` if either bar is undefined.
    pub fn at(line: &[Option<f64>], signal: &[Option<f64>], index: usize) -> Option<Self> {
        if index == 0 {
            return None;
        }
        let prev_macd = (*line.get(index - 1)?)?;
        let curr_macd = (*line.get(index)?)?;
        let prev_sig = (*signal.get(index - 1)?)?;
        let curr_sig = (*signal.get(index)?)?;

        if prev_macd <= prev_sig && curr_macd > curr_sig {
            Some(MacdCross::Bullish)
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            Some(MacdCross::Bearish)
        } else {
            Some(MacdCross::Neutral)
        }
    }
}

/// Line is defined from `slow - 1`, signal and histogram from
/// `slow + signal - 2`.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema_defined(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    MacdSeries {
        line,
        signal: signal_line,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accelerating_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + 0.05 * (i * i) as f64).collect()
    }

    #[test]
    fn macd_undefined_with_insufficient_data() {
        let m = macd(&vec![100.0; 30], 12, 26, 9);
        assert!(m.line[24].is_none());
        assert!(m.line[25].is_some());
        // signal needs slow + signal - 1 = 34 bars
        assert!(m.signal.iter().all(Option::is_none));
    }

    #[test]
    fn macd_defined_with_sufficient_data() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let m = macd(&prices, 12, 26, 9);
        assert!(m.signal[32].is_none());
        assert!(m.signal[33].is_some());
        assert!(m.histogram[59].is_some());
    }

    #[test]
    fn macd_detects_bullish_crossover() {
        // Accelerating decline, then sharply up: the line must cross above its signal.
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 - 0.05 * (i * i) as f64).collect();
        prices.extend((1..=20).map(|i| 82.0 + i as f64 * 2.0));
        let m = macd(&prices, 3, 6, 3);
        let crosses: Vec<_> = (0..prices.len())
            .filter_map(|i| MacdCross::at(&m.line, &m.signal, i))
            .collect();
        assert!(crosses.contains(&MacdCross::Bullish));
    }

    #[test]
    fn macd_neutral_on_steady_trend() {
        // An accelerating up-trend keeps MACD above signal without crossing.
        let m = macd(&accelerating_up(40), 3, 6, 3);
        assert_eq!(MacdCross::at(&m.line, &m.signal, 39), Some(MacdCross::Neutral));
    }

    #[test]
    fn cross_is_none_before_signal_exists() {
        let m = macd(&accelerating_up(40), 3, 6, 3);
        assert_eq!(MacdCross::at(&m.line, &m.signal, 0), None);
        assert_eq!(MacdCross::at(&m.line, &m.signal, 7), None);
    }
}
