//! Windowed local extrema.
//!
//! Bar `i` is a local max when its high is >= every high within `w` bars on
//! both sides. Among equal highs the earliest index wins, so the comparison is
//! strict on the left and non-strict on the right. Minima mirror this on lows.
//! An extremum needs `w` bars after it, so it is confirmed `w` bars late.

use common::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub kind: ExtremumKind,
    pub index: usize,
    pub price: f64,
}

impl Extremum {
    /// True when `self` is further out than `other` (higher max, lower min).
    fn beyond(&self, other: &Extremum) -> bool {
        match self.kind {
            ExtremumKind::Max => self.price > other.price,
            ExtremumKind::Min => self.price < other.price,
        }
    }
}

fn dominates(values: &[f64], i: usize, w: usize, better: impl Fn(f64, f64) -> bool) -> bool {
    if i < w || i + w >= values.len() {
        return false;
    }
    let pivot = values[i];
    let left = values[i - w..i].iter().all(|&v| better(pivot, v));
    let right = values[i + 1..=i + w]
        .iter()
        .all(|&v| better(pivot, v) || pivot == v);
    left && right
}

pub fn is_local_max(highs: &[f64], i: usize, w: usize) -> bool {
    dominates(highs, i, w, |p, v| p > v)
}

pub fn is_local_min(lows: &[f64], i: usize, w: usize) -> bool {
    dominates(lows, i, w, |p, v| p < v)
}

/// Confirmed extrema with index in `[from, upto - w]`, reading `bars[..=upto]` only.
pub fn local_extrema(bars: &[Bar], from: usize, upto: usize, w: usize) -> Vec<Extremum> {
    if bars.is_empty() || w == 0 {
        return Vec::new();
    }
    let visible = &bars[..=upto.min(bars.len() - 1)];
    // Only the window plus `w` bars of left context is ever compared.
    let offset = from.saturating_sub(w);
    let window = &visible[offset.min(visible.len())..];
    let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = window.iter().map(|b| b.low).collect();

    let mut out = Vec::new();
    let Some(last) = visible.len().checked_sub(w + 1) else {
        return out;
    };
    for i in from.max(w)..=last {
        let local = i - offset;
        if is_local_max(&highs, local, w) {
            out.push(Extremum {
                kind: ExtremumKind::Max,
                index: i,
                price: highs[local],
            });
        }
        if is_local_min(&lows, local, w) {
            out.push(Extremum {
                kind: ExtremumKind::Min,
                index: i,
                price: lows[local],
            });
        }
    }
    out
}

/// Collapse consecutive same-kind extrema into the more extreme one (earliest
/// on ties) so that maxima and minima alternate.
pub fn zigzag(extrema: &[Extremum]) -> Vec<Extremum> {
    let mut out: Vec<Extremum> = Vec::with_capacity(extrema.len());
    for e in extrema {
        match out.last_mut() {
            Some(last) if last.kind == e.kind => {
                if e.beyond(last) {
                    *last = *e;
                }
            }
            _ => out.push(*e),
        }
    }
    out
}
