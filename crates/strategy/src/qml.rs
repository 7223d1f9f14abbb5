//! Trade the Quasimodo reversal on the bar it is confirmed.

use serde::{Deserialize, Serialize};

use common::{Error, PatternKind, PatternOccurrence, Result, Side};

use crate::indicators::{IndicatorConfig, EMA};
use crate::patterns::PatternConfig;
use crate::{risk_levels, BarContext, Strategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QmlReversalParams {
    pub atr_sl_mult: f64,
    pub rr_ratio: f64,
    /// Only short below the EMA and long above it.
    pub use_trend_filter: bool,
    /// Anchor the stop at the pattern head instead of the entry.
    pub use_head_stop: bool,
}

impl Default for QmlReversalParams {
    fn default() -> Self {
        Self {
            atr_sl_mult: 1.5,
            rr_ratio: 2.0,
            use_trend_filter: false,
            use_head_stop: false,
        }
    }
}

pub struct QmlReversalStrategy {
    name: String,
    indicators: IndicatorConfig,
    pattern: PatternConfig,
    params: QmlReversalParams,
}

impl QmlReversalStrategy {
    pub fn new(
        name: impl Into<String>,
        indicators: IndicatorConfig,
        pattern: PatternConfig,
        params: QmlReversalParams,
    ) -> Result<Self> {
        indicators.validate()?;
        pattern.validate()?;
        if !(params.rr_ratio > 0.0 && params.atr_sl_mult > 0.0) {
            return Err(Error::Config(format!(
                "rr_ratio and atr_sl_mult must be > 0, got {} and {}",
                params.rr_ratio, params.atr_sl_mult
            )));
        }
        Ok(Self {
            name: name.into(),
            indicators,
            pattern,
            params,
        })
    }

    fn entry(&self, ctx: &BarContext<'_>, kind: PatternKind) -> bool {
        let fresh = ctx
            .patterns()
            .fresh(ctx.index())
            .any(|p| p.kind == kind);
        if !fresh {
            return false;
        }
        if !self.params.use_trend_filter {
            return true;
        }
        let close = ctx.bar().close;
        ctx.value(EMA).is_some_and(|ema| match kind.side() {
            Side::Long => close > ema,
            Side::Short => close < ema,
        })
    }
}

impl Strategy for QmlReversalStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn indicator_config(&self) -> &IndicatorConfig {
        &self.indicators
    }

    fn pattern_config(&self) -> &PatternConfig {
        &self.pattern
    }

    fn check_long_signal(&self, ctx: &BarContext<'_>) -> bool {
        self.entry(ctx, PatternKind::QuasimodoBull)
    }

    fn check_short_signal(&self, ctx: &BarContext<'_>) -> bool {
        self.entry(ctx, PatternKind::QuasimodoBear)
    }

    fn calculate_sl_tp(
        &self,
        entry: f64,
        side: Side,
        atr: f64,
        pattern: Option<&PatternOccurrence>,
    ) -> Result<(f64, f64)> {
        let anchor = pattern
            .filter(|_| self.params.use_head_stop)
            .map(PatternOccurrence::level);
        risk_levels(
            entry,
            side,
            atr,
            self.params.atr_sl_mult,
            self.params.rr_ratio,
            anchor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute;
    use crate::patterns::scan;
    use chrono::{Duration, TimeZone, Utc};
    use common::Bar;

    fn bear_bars() -> Vec<Bar> {
        let anchors = [
            (0usize, 100.0),
            (10, 110.0),
            (15, 104.0),
            (20, 116.0),
            (25, 103.0),
            (30, 108.0),
            (40, 95.0),
        ];
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..=40usize)
            .map(|i| {
                let seg = anchors
                    .windows(2)
                    .find(|w| i >= w[0].0 && i <= w[1].0)
                    .unwrap();
                let (x0, y0) = seg[0];
                let (x1, y1) = seg[1];
                let p = y0 + (y1 - y0) * (i - x0) as f64 / (x1 - x0) as f64;
                Bar::new(start + Duration::hours(i as i64), p, p + 0.5, p - 0.5, p, 1_000.0)
            })
            .collect()
    }

    fn strategy(params: QmlReversalParams) -> QmlReversalStrategy {
        let indicators = IndicatorConfig {
            ema_period: 5,
            macd_fast: 3,
            macd_slow: 6,
            macd_signal: 3,
            bb_period: 5,
            bb_std: 2.0,
            atr_period: 4,
            vol_period: 5,
            rsi_period: 4,
        };
        QmlReversalStrategy::new("qml", indicators, PatternConfig::default(), params).unwrap()
    }

    #[test]
    fn shorts_only_on_the_confirmation_bar() {
        let bars = bear_bars();
        let s = strategy(QmlReversalParams::default());
        let set = compute(&bars, s.indicator_config()).unwrap();

        let fired: Vec<usize> = (0..bars.len())
            .filter(|&i| {
                let patterns = scan(&bars, i, s.pattern_config());
                let ctx = BarContext::new(&bars, &set, &patterns, i);
                assert!(!s.check_long_signal(&ctx));
                s.check_short_signal(&ctx)
            })
            .collect();
        assert_eq!(fired, vec![33]);
    }

    #[test]
    fn trend_filter_requires_close_below_ema_for_shorts() {
        let bars = bear_bars();
        let s = strategy(QmlReversalParams {
            use_trend_filter: true,
            ..QmlReversalParams::default()
        });
        let set = compute(&bars, s.indicator_config()).unwrap();
        let patterns = scan(&bars, 33, s.pattern_config());
        let ctx = BarContext::new(&bars, &set, &patterns, 33);
        assert!(bars[33].close < set.value(EMA, 33).unwrap());
        assert!(s.check_short_signal(&ctx));
        assert!(!s.check_long_signal(&ctx));
    }

    #[test]
    fn head_stop_sits_beyond_the_sweep() {
        let bars = bear_bars();
        let s = strategy(QmlReversalParams {
            use_head_stop: true,
            ..QmlReversalParams::default()
        });
        let patterns = scan(&bars, 33, s.pattern_config());
        let (sl, tp) = s
            .calculate_sl_tp(107.0, Side::Short, 1.0, patterns.for_side(Side::Short))
            .unwrap();
        assert_eq!(sl, 118.0);
        assert_eq!(tp, 85.0);
    }
}
