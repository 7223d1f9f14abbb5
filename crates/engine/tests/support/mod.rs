#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};

use common::Bar;
use strategy::{IndicatorConfig, PatternConfig, QmlReversalParams, QmlReversalStrategy, Strategy};

pub const SYMBOL: &str = "LTCUSDT";

/// Piecewise-linear close path with a half-point range around each close.
pub fn path_bars(anchors: &[(usize, f64)], len: usize) -> Vec<Bar> {
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

/// 200 hourly bars: a long climb with a shallow top around 80..100, then a
/// bearish quasimodo (left 150, head 158, right 165) and a selloff.
pub fn scenario_bars() -> Vec<Bar> {
    path_bars(
        &[
            (0, 100.0),
            (80, 140.0),
            (85, 134.0),
            (90, 138.0),
            (93, 136.0),
            (95, 139.0),
            (100, 137.0),
            (150, 160.0),
            (154, 156.0),
            (158, 163.0),
            (162, 154.0),
            (165, 159.0),
            (199, 108.0),
        ],
        200,
    )
}

pub fn qml_strategy() -> Box<dyn Strategy> {
    let indicators = IndicatorConfig {
        ema_period: 20,
        ..IndicatorConfig::default()
    };
    Box::new(
        QmlReversalStrategy::new(
            "qml test",
            indicators,
            PatternConfig::default(),
            QmlReversalParams::default(),
        )
        .unwrap(),
    )
}

// Entry, stop and target of the single short in the scenario.
pub const ENTRY_INDEX: usize = 168;
pub const EXIT_INDEX: usize = 173;
pub const ENTRY: f64 = 154.5;
pub const STOP: f64 = 157.982_142_857_142_86;
pub const TARGET: f64 = 147.535_714_285_714_28;
