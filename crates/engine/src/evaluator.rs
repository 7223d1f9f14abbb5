//! The per-bar step shared by the backtest and live drivers.

use tracing::{debug, warn};

use common::{Bar, Error, Position, Result, Signal, Transition};
use risk::{PositionManager, RiskConfig};
use strategy::patterns::scan;
use strategy::{generate_signal, BarContext, IndicatorSet, PatternState, Strategy};

/// What one call to [`Evaluator::step`] saw and did.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub patterns: PatternState,
    pub signal: Option<Signal>,
    pub transition: Option<Transition>,
}

/// Strategy plus position manager. Each driver owns exactly one and feeds it
/// every bar once, in order.
pub struct Evaluator {
    strategy: Box<dyn Strategy>,
    positions: PositionManager,
    entries_enabled: bool,
}

impl Evaluator {
    pub fn new(strategy: Box<dyn Strategy>, risk: RiskConfig) -> Result<Self> {
        Ok(Self {
            strategy,
            positions: PositionManager::new(risk)?,
            entries_enabled: true,
        })
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PositionManager {
        &mut self.positions
    }

    pub fn position(&self) -> Option<&Position> {
        self.positions.position()
    }

    /// First index at which every indicator is defined.
    pub fn first_index(&self) -> usize {
        self.strategy.warmup().saturating_sub(1)
    }

    /// While disabled, open positions are still managed but no new entries
    /// are taken.
    pub fn set_entries_enabled(&mut self, enabled: bool) {
        self.entries_enabled = enabled;
    }

    pub fn entries_enabled(&self) -> bool {
        self.entries_enabled
    }

    /// Evaluate bar `index`. `indicators` must have been computed over a
    /// slice that contains `bars[..=index]`; nothing past `index` is read.
    ///
    /// Open: stop/target first, then strategy exits, then trailing. A bar
    /// that closes a position never opens a new one.
    /// Flat: ask the strategy for a signal and hand it to the position manager.
    pub fn step(
        &mut self,
        bars: &[Bar],
        indicators: &IndicatorSet,
        index: usize,
    ) -> Result<StepOutcome> {
        let bar = bars.get(index).ok_or(Error::InsufficientHistory {
            required: index + 1,
            available: bars.len(),
        })?;
        let patterns = scan(bars, index, self.strategy.pattern_config());
        let ctx = BarContext::new(bars, indicators, &patterns, index);

        let mut outcome = StepOutcome::default();

        if let Some(position) = self.positions.position().cloned() {
            outcome.transition = self.manage(&ctx, bar, &position);
        } else if self.entries_enabled && index >= self.first_index() {
            match generate_signal(self.strategy.as_ref(), &ctx) {
                Ok(Some(signal)) => {
                    debug!(index, side = %signal.side, reason = %signal.reason, "Signal");
                    outcome.transition = Some(self.positions.on_signal(&signal, bar.timestamp));
                    outcome.signal = Some(signal);
                }
                Ok(None) => {}
                Err(Error::Rejected(reason)) => {
                    warn!(index, reason = %reason, "Signal rejected");
                    outcome.transition = Some(Transition::Rejected {
                        index,
                        signal: None,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        outcome.patterns = patterns;
        Ok(outcome)
    }

    fn manage(
        &mut self,
        ctx: &BarContext<'_>,
        bar: &Bar,
        position: &Position,
    ) -> Option<Transition> {
        let index = ctx.index();
        if index <= position.opened_at_index {
            return None;
        }
        if let Some(closed) = self.positions.check_exit(bar, index) {
            return Some(closed);
        }
        if let Some(exit) = self.strategy.check_exit(ctx, position) {
            return self
                .positions
                .close_by_strategy(index, exit.price, bar.timestamp, &exit.reason);
        }
        let stop = self.strategy.trail_stop(ctx, position)?;
        self.positions.update_stop(index, stop)
    }
}
