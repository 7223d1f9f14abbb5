//! Average True Range.
//!
//! TR[t] = max(high − low, |high − close[t-1]|, |low − close[t-1]|). The first
//! bar has no previous close, so its TR is undefined and ATR (an SMA of TR) is
//! first defined at index `period`.

use common::Bar;

use super::average::sma_defined;
use super::Series;

pub fn true_range(bars: &[Bar]) -> Series {
    let mut tr = vec![None; bars.len()];
    for i in 1..bars.len() {
        let (h, l, pc) = (bars[i].high, bars[i].low, bars[i - 1].close);
        tr[i] = Some((h - l).max((h - pc).abs()).max((l - pc).abs()));
    }
    tr
}

pub fn atr(bars: &[Bar], period: usize) -> Series {
    sma_defined(&true_range(bars), period)
}
