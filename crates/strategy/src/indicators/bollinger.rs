//! Bollinger Bands: SMA ± `std_dev` × sample standard deviation.

use super::average::sma;
use super::Series;

pub struct BollingerSeries {
    pub upper: Series,
    pub mid: Series,
    pub lower: Series,
    /// Band width as a percentage of the mid band. Low values mean a squeeze.
    pub width: Series,
}

pub fn bollinger(closes: &[f64], period: usize, std_dev: f64) -> BollingerSeries {
    let n = closes.len();
    let mid = sma(closes, period);
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];
    let mut width = vec![None; n];

    for i in 0..n {
        let Some(mean) = mid[i] else {
            continue;
        };
        let window = &closes[i + 1 - period..=i];
        let var = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
        let band = std_dev * var.sqrt();
        let (u, l) = (mean + band, mean - band);
        upper[i] = Some(u);
        lower[i] = Some(l);
        if mean != 0.0 {
            width[i] = Some((u - l) / mean * 100.0);
        }
    }

    BollingerSeries {
        upper,
        mid,
        lower,
        width,
    }
}
