//! Quasimodo (QML) reversal detection.
//!
//! Bearish: left shoulder high, a higher head (the liquidity sweep), then a
//! right shoulder below the head. Bullish mirrors this on lows. Candidates are
//! built from the last three same-kind points of the zig-zag inside the
//! trailing `lookback` window and only ever read `bars[..=index]`.

use common::{Bar, KeyPoint, PatternKind, PatternOccurrence};

use super::extrema::{local_extrema, zigzag, Extremum, ExtremumKind};
use super::{PatternConfig, PatternState};

/// Current bull and bear candidates at `index`, valid or not.
pub fn scan(bars: &[Bar], index: usize, config: &PatternConfig) -> PatternState {
    if index >= bars.len() {
        return PatternState::default();
    }
    let from = index.saturating_sub(config.lookback.saturating_sub(1));
    let zz = zigzag(&local_extrema(bars, from, index, config.order));

    PatternState {
        bull: candidate(&zz, PatternKind::QuasimodoBull, index, config),
        bear: candidate(&zz, PatternKind::QuasimodoBear, index, config),
    }
}

/// Most recent valid occurrence at `index`, if any.
pub fn detect(bars: &[Bar], index: usize, config: &PatternConfig) -> Option<PatternOccurrence> {
    scan(bars, index, config).latest_valid().cloned()
}

fn candidate(
    zz: &[Extremum],
    kind: PatternKind,
    index: usize,
    config: &PatternConfig,
) -> Option<PatternOccurrence> {
    let anchor_kind = match kind {
        PatternKind::QuasimodoBear => ExtremumKind::Max,
        PatternKind::QuasimodoBull => ExtremumKind::Min,
    };
    let anchors: Vec<usize> = zz
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == anchor_kind)
        .map(|(pos, _)| pos)
        .collect();
    let &[l, h, r] = anchors.get(anchors.len().checked_sub(3)?..)? else {
        return None;
    };
    let (left, head, right) = (zz[l], zz[h], zz[r]);

    let (sweep, lower_shoulder) = match kind {
        PatternKind::QuasimodoBear => (head.price > left.price, right.price < head.price),
        PatternKind::QuasimodoBull => (head.price < left.price, right.price > head.price),
    };
    let spaced = head.index - left.index >= config.min_separation
        && right.index - head.index >= config.min_separation;
    let recent = index - right.index < config.recency;

    Some(PatternOccurrence {
        kind,
        start_index: left.index,
        end_index: right.index,
        key_points: zz[l..=r]
            .iter()
            .map(|e| KeyPoint {
                index: e.index,
                price: e.price,
            })
            .collect(),
        valid: sweep && lower_shoulder && spaced && recent,
        confirmed_at: right.index + config.confirmation_delay(),
        head: KeyPoint {
            index: head.index,
            price: head.price,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Bars along a piecewise-linear path through `anchors`, half a unit of range.
    fn path_bars(anchors: &[(usize, f64)], len: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..len)
            .map(|i| {
                let seg = anchors
                    .windows(2)
                    .find(|w| i >= w[0].0 && i <= w[1].0)
                    .unwrap_or(&anchors[anchors.len() - 2..]);
                let (x0, y0) = seg[0];
                let (x1, y1) = seg[1];
                let p = y0 + (y1 - y0) * (i as f64 - x0 as f64) / (x1 - x0) as f64;
                Bar::new(start + Duration::hours(i as i64), p, p + 0.5, p - 0.5, p, 1_000.0)
            })
            .collect()
    }

    fn bear_path() -> Vec<Bar> {
        path_bars(
            &[
                (0, 100.0),
                (10, 110.0),
                (15, 104.0),
                (20, 116.0),
                (25, 103.0),
                (30, 108.0),
                (40, 95.0),
            ],
            41,
        )
    }

    #[test]
    fn confirmation_delay_is_the_extremum_window() {
        let cfg = PatternConfig {
            order: 4,
            ..PatternConfig::default()
        };
        assert_eq!(cfg.confirmation_delay(), 4);

        let bars = bear_path();
        let cfg = PatternConfig::default();
        assert!(scan(&bars, 32, &cfg).bear.map_or(true, |p| p.end_index != 30));
        let p = scan(&bars, 33, &cfg).bear.unwrap();
        assert_eq!(p.end_index, 30);
        assert_eq!(p.confirmed_at, 33);
    }

    #[test]
    fn detects_bear_qml() {
        let bars = bear_path();
        let p = detect(&bars, 35, &PatternConfig::default()).unwrap();
        assert_eq!(p.kind, PatternKind::QuasimodoBear);
        assert_eq!((p.start_index, p.end_index), (10, 30));
        assert_eq!(p.head.index, 20);
        assert_eq!(p.level(), 116.5);
        let idx: Vec<usize> = p.key_points.iter().map(|k| k.index).collect();
        assert_eq!(idx, vec![10, 15, 20, 25, 30]);
    }

    #[test]
    fn stale_pattern_is_invalid() {
        let bars = path_bars(
            &[
                (0, 100.0),
                (10, 110.0),
                (15, 104.0),
                (20, 116.0),
                (25, 103.0),
                (30, 108.0),
                (70, 60.0),
            ],
            71,
        );
        let cfg = PatternConfig::default();
        let p = scan(&bars, 50, &cfg).bear.unwrap();
        assert_eq!(p.end_index, 30);
        assert!(!p.valid);
        assert!(detect(&bars, 50, &cfg).is_none());
    }

    #[test]
    fn recency_within_confirmation_delay_is_rejected() {
        let cfg = PatternConfig {
            order: 3,
            recency: 3,
            ..PatternConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(common::Error::Config(_))));
        // Such a window never holds a valid occurrence on an otherwise clean path.
        let bars = bear_path();
        assert!((0..bars.len()).all(|i| detect(&bars, i, &cfg).is_none()));

        let cfg = PatternConfig {
            recency: 4,
            ..cfg
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(detect(&bars, 33, &cfg).unwrap().end_index, 30);
    }

    #[test]
    fn no_sweep_means_invalid() {
        // Head below the left shoulder.
        let bars = path_bars(
            &[
                (0, 100.0),
                (10, 118.0),
                (15, 104.0),
                (20, 114.0),
                (25, 103.0),
                (30, 108.0),
                (40, 95.0),
            ],
            41,
        );
        let p = scan(&bars, 35, &PatternConfig::default()).bear.unwrap();
        assert!(!p.valid);
    }

    #[test]
    fn detects_bull_qml() {
        let bars = path_bars(
            &[
                (0, 120.0),
                (10, 110.0),
                (15, 116.0),
                (20, 104.0),
                (25, 117.0),
                (30, 112.0),
                (40, 125.0),
            ],
            41,
        );
        let p = detect(&bars, 36, &PatternConfig::default()).unwrap();
        assert_eq!(p.kind, PatternKind::QuasimodoBull);
        assert_eq!(p.head.price, 103.5);
        assert_eq!(p.kind.side(), common::Side::Long);
    }

    #[test]
    fn index_past_the_end_yields_nothing() {
        let bars = bear_path();
        assert_eq!(scan(&bars, 100, &PatternConfig::default()), PatternState::default());
    }
}
