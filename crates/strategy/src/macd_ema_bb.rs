//! MACD crossover in the direction of the EMA trend, filtered by Bollinger
//! width and volume, with optional Quasimodo confirmation.

use serde::{Deserialize, Serialize};

use common::{Error, PatternOccurrence, Position, Result, Side};

use crate::indicators::{
    MacdCross, IndicatorConfig, BB_LOWER, BB_MID, BB_UPPER, BB_WIDTH, EMA, MACD, MACD_SIGNAL,
    VOL_AVG,
};
use crate::patterns::PatternConfig;
use crate::{risk_levels, BarContext, ExitSignal, Strategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdEmaBbParams {
    pub atr_sl_mult: f64,
    pub rr_ratio: f64,
    /// Require a valid Quasimodo in the entry direction.
    pub use_qml: bool,
    /// Anchor the stop at the Quasimodo head instead of the entry.
    pub use_qml_extreme_sl: bool,
    pub use_vol_filter: bool,
    pub vol_filter_mult: f64,
    /// Minimum Bollinger width (percent of mid) to trade at all.
    pub squeeze_threshold: f64,
    /// Exit on an opposite MACD cross or an opposite band touch.
    pub use_exit_rules: bool,
    /// Trail the stop on the Bollinger mid once price has run 1R.
    pub use_trailing: bool,
}

impl Default for MacdEmaBbParams {
    fn default() -> Self {
        Self {
            atr_sl_mult: 1.5,
            rr_ratio: 2.0,
            use_qml: false,
            use_qml_extreme_sl: false,
            use_vol_filter: false,
            vol_filter_mult: 0.8,
            squeeze_threshold: 1.0,
            use_exit_rules: true,
            use_trailing: true,
        }
    }
}

pub struct MacdEmaBbStrategy {
    name: String,
    indicators: IndicatorConfig,
    pattern: PatternConfig,
    params: MacdEmaBbParams,
}

impl MacdEmaBbStrategy {
    pub fn new(
        name: impl Into<String>,
        indicators: IndicatorConfig,
        pattern: PatternConfig,
        params: MacdEmaBbParams,
    ) -> Result<Self> {
        indicators.validate()?;
        pattern.validate()?;
        if !(params.rr_ratio > 0.0 && params.atr_sl_mult > 0.0) {
            return Err(Error::Config(format!(
                "rr_ratio and atr_sl_mult must be > 0, got {} and {}",
                params.rr_ratio, params.atr_sl_mult
            )));
        }
        if params.use_vol_filter && params.vol_filter_mult < 0.0 {
            return Err(Error::Config("vol_filter_mult must be >= 0".into()));
        }
        Ok(Self {
            name: name.into(),
            indicators,
            pattern,
            params,
        })
    }

    pub fn params(&self) -> &MacdEmaBbParams {
        &self.params
    }

    fn cross(ctx: &BarContext<'_>) -> Option<MacdCross> {
        MacdCross::at(ctx.series(MACD)?, ctx.series(MACD_SIGNAL)?, ctx.index())
    }

    fn passes_filters(&self, ctx: &BarContext<'_>) -> bool {
        if self.params.use_vol_filter {
            let Some(avg) = ctx.value(VOL_AVG) else {
                return false;
            };
            if ctx.bar().volume <= avg * self.params.vol_filter_mult {
                return false;
            }
        }
        ctx.value(BB_WIDTH)
            .is_some_and(|w| w >= self.params.squeeze_threshold)
    }

    fn entry(&self, ctx: &BarContext<'_>, side: Side) -> bool {
        let want = match side {
            Side::Long => MacdCross::Bullish,
            Side::Short => MacdCross::Bearish,
        };
        if Self::cross(ctx) != Some(want) {
            return false;
        }
        let Some(ema) = ctx.value(EMA) else {
            return false;
        };
        let close = ctx.bar().close;
        let trend = match side {
            Side::Long => close > ema,
            Side::Short => close < ema,
        };
        if !trend || !self.passes_filters(ctx) {
            return false;
        }
        !self.params.use_qml || ctx.patterns().for_side(side).is_some()
    }
}

impl Strategy for MacdEmaBbStrategy {
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
        self.entry(ctx, Side::Long)
    }

    fn check_short_signal(&self, ctx: &BarContext<'_>) -> bool {
        self.entry(ctx, Side::Short)
    }

    fn calculate_sl_tp(
        &self,
        entry: f64,
        side: Side,
        atr: f64,
        pattern: Option<&PatternOccurrence>,
    ) -> Result<(f64, f64)> {
        let anchor = pattern
            .filter(|_| self.params.use_qml_extreme_sl)
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

    fn check_exit(&self, ctx: &BarContext<'_>, position: &Position) -> Option<ExitSignal> {
        if !self.params.use_exit_rules {
            return None;
        }
        let bar = ctx.bar();
        let (reverse, band, touched) = match position.side {
            Side::Long => {
                let band = ctx.value(BB_UPPER);
                (MacdCross::Bearish, band, band.is_some_and(|b| bar.high >= b))
            }
            Side::Short => {
                let band = ctx.value(BB_LOWER);
                (MacdCross::Bullish, band, band.is_some_and(|b| bar.low <= b))
            }
        };

        if Self::cross(ctx) == Some(reverse) {
            return Some(ExitSignal {
                price: bar.close,
                reason: "macd_reverse".into(),
            });
        }
        match band {
            Some(price) if touched => Some(ExitSignal {
                price,
                reason: "bb_touch".into(),
            }),
            _ => None,
        }
    }

    fn trail_stop(&self, ctx: &BarContext<'_>, position: &Position) -> Option<f64> {
        if !self.params.use_trailing {
            return None;
        }
        let mid = ctx.value(BB_MID)?;
        let sign = position.side.sign();
        let one_r = position.entry_price
            + (position.entry_price - position.initial_stop_loss) * sign;

        let since_entry = ctx.bars().get(position.opened_at_index + 1..)?;
        let reached = since_entry.iter().any(|b| match position.side {
            Side::Long => b.high >= one_r,
            Side::Short => b.low <= one_r,
        });
        if !reached {
            return None;
        }

        // Only tighten, and never past the current close.
        let tighter = (mid - position.stop_loss) * sign > 0.0;
        let below_price = (ctx.bar().close - mid) * sign > 0.0;
        (tighter && below_price).then_some(mid)
    }
}
