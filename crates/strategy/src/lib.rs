pub mod config;
pub mod indicators;
pub mod macd_ema_bb;
pub mod patterns;
pub mod qml;
pub mod registry;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use indicators::{IndicatorConfig, IndicatorSet};
pub use macd_ema_bb::{MacdEmaBbParams, MacdEmaBbStrategy};
pub use patterns::{PatternConfig, PatternState};
pub use qml::{QmlReversalParams, QmlReversalStrategy};
pub use registry::build_strategy;

use common::{Bar, Error, PatternOccurrence, Position, RejectionReason, Result, Side, Signal};

/// Everything a strategy may look at for one bar index.
///
/// Indicator and bar accessors are cut at `index`, so a strategy holding a
/// context can never observe a later bar even when the underlying slices are
/// longer.
#[derive(Debug, Clone, Copy)]
pub struct BarContext<'a> {
    bars: &'a [Bar],
    indicators: &'a IndicatorSet,
    patterns: &'a PatternState,
    index: usize,
}

impl<'a> BarContext<'a> {
    /// `index` must be a valid position in `bars`.
    pub fn new(
        bars: &'a [Bar],
        indicators: &'a IndicatorSet,
        patterns: &'a PatternState,
        index: usize,
    ) -> Self {
        debug_assert!(index < bars.len(), "context index {index} out of range");
        Self {
            bars,
            indicators,
            patterns,
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bar(&self) -> &'a Bar {
        &self.bars[self.index]
    }

    /// Bars up to and including the current one.
    pub fn bars(&self) -> &'a [Bar] {
        &self.bars[..=self.index]
    }

    pub fn patterns(&self) -> &'a PatternState {
        self.patterns
    }

    /// Indicator value at the current bar.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.indicators.value(name, self.index)
    }

    /// Indicator series truncated at the current bar.
    pub fn series(&self, name: &str) -> Option<&'a [Option<f64>]> {
        let series = self.indicators.series(name)?;
        series.get(..=self.index)
    }
}

/// Strategy-requested exit at a given price.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub price: f64,
    pub reason: String,
}

/// All strategy implementations must satisfy this trait.
///
/// Every method is a pure function of the context it receives; the driver
/// owns all state between bars.
pub trait Strategy: Send + Sync {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    fn indicator_config(&self) -> &IndicatorConfig;

    fn pattern_config(&self) -> &PatternConfig;

    /// Bars required before the strategy may emit a signal.
    fn warmup(&self) -> usize {
        self.indicator_config().warmup()
    }

    fn check_long_signal(&self, ctx: &BarContext<'_>) -> bool;

    fn check_short_signal(&self, ctx: &BarContext<'_>) -> bool;

    /// Stop and target for an entry at `entry`. `pattern` is the valid
    /// occurrence pointing in `side`'s direction, if any.
    fn calculate_sl_tp(
        &self,
        entry: f64,
        side: Side,
        atr: f64,
        pattern: Option<&PatternOccurrence>,
    ) -> Result<(f64, f64)>;

    /// Indicator-driven exit for an open position. Stop and target are
    /// resolved by the position manager before this is consulted.
    fn check_exit(&self, _ctx: &BarContext<'_>, _position: &Position) -> Option<ExitSignal> {
        None
    }

    /// New, tighter stop for an open position.
    fn trail_stop(&self, _ctx: &BarContext<'_>, _position: &Position) -> Option<f64> {
        None
    }
}

/// Stop `atr × atr_mult` beyond `anchor` (the entry unless a pattern level is
/// given) on the losing side, target `risk × rr_ratio` on the winning side.
pub fn risk_levels(
    entry: f64,
    side: Side,
    atr: f64,
    atr_mult: f64,
    rr_ratio: f64,
    anchor: Option<f64>,
) -> Result<(f64, f64)> {
    if !rr_ratio.is_finite() || rr_ratio <= 0.0 {
        return Err(Error::Config(format!("rr_ratio must be > 0, got {rr_ratio}")));
    }
    if !atr_mult.is_finite() || atr_mult <= 0.0 {
        return Err(Error::Config(format!("atr_sl_mult must be > 0, got {atr_mult}")));
    }
    if !atr.is_finite() || atr <= 0.0 {
        return Err(Error::Rejected(RejectionReason::InvalidStops));
    }

    let sign = side.sign();
    let stop = anchor.unwrap_or(entry) - sign * atr * atr_mult;
    let risk = (entry - stop) * sign;
    if !risk.is_finite() || risk <= 0.0 {
        return Err(Error::Rejected(RejectionReason::InvalidStops));
    }
    Ok((stop, entry + sign * risk * rr_ratio))
}

/// Ask `strategy` for an entry at the context's bar.
///
/// Entry is the bar close. Returns `Ok(None)` when nothing fires or ATR is
/// still undefined, `Rejected(AmbiguousSignal)` when both sides fire.
pub fn generate_signal(strategy: &dyn Strategy, ctx: &BarContext<'_>) -> Result<Option<Signal>> {
    let side = match (strategy.check_long_signal(ctx), strategy.check_short_signal(ctx)) {
        (true, true) => return Err(Error::Rejected(RejectionReason::AmbiguousSignal)),
        (true, false) => Side::Long,
        (false, true) => Side::Short,
        (false, false) => return Ok(None),
    };
    let Some(atr) = ctx.value(indicators::ATR) else {
        return Ok(None);
    };

    let entry = ctx.bar().close;
    let pattern = ctx.patterns().for_side(side);
    let (stop_loss, take_profit) = strategy.calculate_sl_tp(entry, side, atr, pattern)?;

    let reason = match pattern {
        Some(p) => format!("{} {side} ({} head {:.4})", strategy.name(), p.kind, p.level()),
        None => format!("{} {side}", strategy.name()),
    };
    Ok(Some(Signal {
        side,
        index: ctx.index(),
        entry_price: entry,
        stop_loss,
        take_profit,
        reason,
    }))
}
