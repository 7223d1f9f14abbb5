//! Indicator engine.
//!
//! Every series is aligned with the bar slice it was computed from and holds
//! `None` wherever the lookback window is too short. Each series is a causal
//! left-to-right scan and window sums are taken over the window itself, so
//! computing over `bars[..=i]` yields bit-identical values at `0..=i` to
//! computing over the full history.

pub mod atr;
pub mod average;
pub mod bollinger;
pub mod macd;
pub mod rsi;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use common::{Bar, Error, Result};

pub use macd::MacdCross;

/// Aligned indicator series; `None` = undefined.
pub type Series = Vec<Option<f64>>;

pub const EMA: &str = "ema";
pub const MACD: &str = "macd";
pub const MACD_SIGNAL: &str = "macd_signal";
pub const MACD_HIST: &str = "macd_hist";
pub const BB_UPPER: &str = "bb_upper";
pub const BB_MID: &str = "bb_mid";
pub const BB_LOWER: &str = "bb_lower";
pub const BB_WIDTH: &str = "bb_width";
pub const ATR: &str = "atr";
pub const VOL_AVG: &str = "vol_avg";
pub const RSI: &str = "rsi";

/// Indicator parameters. Defaults follow the MACD + EMA + BB strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub atr_period: usize,
    pub vol_period: usize,
    pub rsi_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_period: 100,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
            atr_period: 14,
            vol_period: 20,
            rsi_period: 14,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("ema_period", self.ema_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("atr_period", self.atr_period),
            ("vol_period", self.vol_period),
            ("rsi_period", self.rsi_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be > 0")));
            }
        }
        // Sample standard deviation needs two points.
        if self.bb_period < 2 {
            return Err(Error::Config("bb_period must be >= 2".into()));
        }
        if !self.bb_std.is_finite() || self.bb_std <= 0.0 {
            return Err(Error::Config(format!("bb_std must be > 0, got {}", self.bb_std)));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(Error::Config(
                "MACD fast period must be less than slow period".into(),
            ));
        }
        Ok(())
    }

    /// Number of bars required before every series is defined.
    pub fn warmup(&self) -> usize {
        [
            self.ema_period,
            self.macd_slow + self.macd_signal - 1,
            self.bb_period,
            self.atr_period + 1,
            self.vol_period,
            self.rsi_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Named indicator series computed from one bar slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    len: usize,
    series: BTreeMap<&'static str, Series>,
}

impl IndicatorSet {
    /// Number of bars the set was computed from.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn series(&self, name: &str) -> Option<&[Option<f64>]> {
        self.series.get(name).map(|s| s.as_slice())
    }

    /// Value of `name` at `index`; `None` if undefined, unknown, or out of range.
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.series.get(name)?.get(index).copied().flatten()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.series.keys().copied()
    }

    fn insert(&mut self, name: &'static str, series: Series) {
        debug_assert_eq!(series.len(), self.len, "series {name} misaligned");
        self.series.insert(name, series);
    }
}

/// Compute every configured indicator over `bars`.
pub fn compute(bars: &[Bar], config: &IndicatorConfig) -> Result<IndicatorSet> {
    config.validate()?;

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let mut set = IndicatorSet {
        len: bars.len(),
        series: BTreeMap::new(),
    };

    set.insert(EMA, average::ema(&closes, config.ema_period));

    let macd = macd::macd(&closes, config.macd_fast, config.macd_slow, config.macd_signal);
    set.insert(MACD, macd.line);
    set.insert(MACD_SIGNAL, macd.signal);
    set.insert(MACD_HIST, macd.histogram);

    let bands = bollinger::bollinger(&closes, config.bb_period, config.bb_std);
    set.insert(BB_UPPER, bands.upper);
    set.insert(BB_MID, bands.mid);
    set.insert(BB_LOWER, bands.lower);
    set.insert(BB_WIDTH, bands.width);

    set.insert(ATR, atr::atr(bars, config.atr_period));
    set.insert(VOL_AVG, average::sma(&volumes, config.vol_period));
    set.insert(RSI, rsi::rsi(&closes, config.rsi_period));

    Ok(set)
}

/// Synthetic bars from close prices for tests: open = previous close,
/// high/low one unit outside the body.
#[cfg(test)]
pub(crate) fn make_bars(closes: &[f64]) -> Vec<Bar> {
    use chrono::{Duration, TimeZone, Utc};
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar::new(
                start + Duration::hours(i as i64),
                open,
                open.max(close) + 1.0,
                open.min(close) - 1.0,
                close,
                1_000.0 + i as f64,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> IndicatorConfig {
        IndicatorConfig {
            ema_period: 5,
            macd_fast: 3,
            macd_slow: 6,
            macd_signal: 3,
            bb_period: 5,
            bb_std: 2.0,
            atr_period: 4,
            vol_period: 5,
            rsi_period: 4,
        }
    }

    #[test]
    fn rejects_invalid_periods() {
        let mut cfg = small_config();
        cfg.atr_period = 0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let mut cfg = small_config();
        cfg.bb_std = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let mut cfg = small_config();
        cfg.macd_fast = 6;
        assert!(matches!(compute(&[], &cfg), Err(Error::Config(_))));
    }

    #[test]
    fn warmup_is_first_index_where_everything_is_defined() {
        let cfg = small_config();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let set = compute(&make_bars(&closes), &cfg).unwrap();
        let ready = cfg.warmup() - 1;

        for name in set.names() {
            assert!(set.value(name, ready).is_some(), "{name} undefined at {ready}");
        }
        assert!(
            set.names().any(|name| set.value(name, ready - 1).is_none()),
            "warmup overstates the lookback"
        );
    }

    #[test]
    fn series_are_aligned_with_bars() {
        let closes: Vec<f64> = (0..25).map(|i| 50.0 + i as f64).collect();
        let set = compute(&make_bars(&closes), &small_config()).unwrap();
        assert_eq!(set.len(), 25);
        for name in set.names() {
            assert_eq!(set.series(name).unwrap().len(), 25);
        }
        assert!(set.value("unknown", 3).is_none());
        assert!(set.value(EMA, 99).is_none());
    }

    #[test]
    fn prefix_recompute_is_bit_identical() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.37).sin() * 7.0 + i as f64 * 0.1)
            .collect();
        let bars = make_bars(&closes);
        let cfg = small_config();
        let full = compute(&bars, &cfg).unwrap();

        for cut in [1, 7, 30, 79] {
            let partial = compute(&bars[..cut], &cfg).unwrap();
            for name in full.names() {
                let a = &full.series(name).unwrap()[..cut];
                let b = partial.series(name).unwrap();
                let same = a
                    .iter()
                    .zip(b)
                    .all(|(x, y)| x.map(f64::to_bits) == y.map(f64::to_bits));
                assert!(same, "{name} drifted at cut {cut}");
            }
        }
    }
}
