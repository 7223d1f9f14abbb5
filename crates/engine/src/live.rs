//! Incremental evaluation of closed bars from an exchange feed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use common::{
    Bar, Config, EngineCommand, EngineState, Error, ExchangeClient, GapPolicy, Interval,
    MarketEvent, OrderIntent, Position, Result, Trade, Transition,
};
use risk::RiskConfig;
use strategy::indicators::compute;
use strategy::Strategy;

use crate::backtest::validate_bars;
use crate::evaluator::{Evaluator, StepOutcome};
use crate::executor::OrderExecutor;
use crate::lifecycle::EngineControl;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default bar retention as a multiple of warm-up plus pattern lookback.
/// Recursive indicators (EMA, MACD, Wilder RSI) seeded this far back have
/// converged to the values a full-history computation gives.
pub const RETENTION_FACTOR: usize = 4;

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub symbol: String,
    pub interval: Interval,
    /// Closed bars loaded by `bootstrap`.
    pub history_bars: usize,
    pub gap_policy: GapPolicy,
    /// Bars kept in memory; `None` uses `RETENTION_FACTOR × (warmup + lookback)`.
    /// Older bars are dropped only while flat, so bar indices in live
    /// transitions are positions within the retained window.
    pub max_bars: Option<usize>,
}

impl From<&Config> for LiveSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            interval: cfg.interval,
            history_bars: cfg.history_bars,
            gap_policy: cfg.gap_policy,
            max_bars: None,
        }
    }
}

/// Runs the same per-bar step as the backtest on bars as they close, and
/// turns position transitions into exchange orders.
///
/// Each step, including any order it triggers, finishes before the next bar
/// is accepted.
pub struct LiveDriver {
    client: Arc<dyn ExchangeClient>,
    executor: OrderExecutor,
    settings: LiveSettings,
    evaluator: Evaluator,
    bars: Vec<Bar>,
}

impl LiveDriver {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        strategy: Box<dyn Strategy>,
        risk: RiskConfig,
        settings: LiveSettings,
    ) -> Result<Self> {
        Ok(Self {
            executor: OrderExecutor::new(client.clone()),
            client,
            settings,
            evaluator: Evaluator::new(strategy, risk)?,
            bars: Vec::new(),
        })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn position(&self) -> Option<&Position> {
        self.evaluator.position()
    }

    pub fn trades(&self) -> &[Trade] {
        self.evaluator.positions().trades()
    }

    pub fn equity(&self) -> f64 {
        self.evaluator.positions().equity()
    }

    /// Upper bound on retained bars, never below warm-up plus lookback.
    pub fn retention(&self) -> usize {
        let strategy = self.evaluator.strategy();
        let floor = strategy.warmup() + strategy.pattern_config().lookback;
        self.settings
            .max_bars
            .unwrap_or(RETENTION_FACTOR * floor)
            .max(floor)
    }

    /// Load the most recent closed bars as warm-up history. History is not
    /// traded; evaluation starts with the next closed bar.
    pub async fn bootstrap(&mut self) -> Result<usize> {
        let history = self
            .client
            .fetch_history(
                &self.settings.symbol,
                self.settings.interval,
                self.settings.history_bars,
            )
            .await?;
        validate_bars(&history)?;

        let required = self.evaluator.strategy().warmup();
        if history.len() < required {
            warn!(
                required,
                available = history.len(),
                "History shorter than warm-up; signals are withheld until it fills"
            );
        }
        self.bars = history;
        self.trim_history();
        self.refresh_equity().await;
        info!(
            symbol = %self.settings.symbol,
            interval = %self.settings.interval,
            bars = self.bars.len(),
            equity = self.equity(),
            "Live driver bootstrapped"
        );
        Ok(self.bars.len())
    }

    /// Feed a raw market event. Candles that are still forming are ignored.
    pub async fn on_market_event(&mut self, event: &MarketEvent) -> Result<Option<Transition>> {
        if !event.is_closed {
            debug!(ts = %event.bar.timestamp, "Ignoring unclosed bar");
            return Ok(None);
        }
        if event.symbol != self.settings.symbol {
            debug!(symbol = %event.symbol, "Ignoring event for another symbol");
            return Ok(None);
        }
        self.run_live_step(event.bar).await
    }

    /// Evaluate one newly closed bar.
    ///
    /// A repeated timestamp is ignored, an earlier one is `OutOfOrder`, and a
    /// timestamp past the next expected slot is a `DataGap`. When the step
    /// itself fails the bar is discarded again, so no error leaves the bar
    /// history or the position changed.
    pub async fn run_live_step(&mut self, bar: Bar) -> Result<Option<Transition>> {
        if let Some(last) = self.bars.last() {
            let step = self.settings.interval.duration();
            let expected = last.timestamp + step;
            if bar.timestamp == last.timestamp {
                debug!(ts = %bar.timestamp, "Duplicate bar ignored");
                return Ok(None);
            }
            if bar.timestamp < last.timestamp {
                return Err(Error::OutOfOrder {
                    last: last.timestamp,
                    actual: bar.timestamp,
                });
            }
            if bar.timestamp != expected {
                let elapsed = (bar.timestamp - last.timestamp).num_milliseconds();
                let missing = (elapsed / step.num_milliseconds()).saturating_sub(1);
                return Err(Error::DataGap {
                    expected,
                    actual: bar.timestamp,
                    missing: missing.max(0) as usize,
                });
            }
        }
        if !bar.is_well_formed() {
            return Err(Error::Other(format!("malformed bar at {}", bar.timestamp)));
        }

        if self.evaluator.positions().is_flat() {
            self.refresh_equity().await;
        }

        self.bars.push(bar);
        let outcome = match self.evaluate_last() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.bars.pop();
                return Err(e);
            }
        };

        let transition = match outcome.transition {
            Some(t) => Some(self.settle(t).await),
            None => None,
        };
        self.trim_history();
        Ok(transition)
    }

    fn evaluate_last(&mut self) -> Result<StepOutcome> {
        let index = self.bars.len() - 1;
        let indicators = compute(&self.bars, self.evaluator.strategy().indicator_config())?;
        self.evaluator.step(&self.bars, &indicators, index)
    }

    // An open position refers to its entry bar by index, so the window only
    // slides while flat.
    fn trim_history(&mut self) {
        let cap = self.retention();
        if self.bars.len() > cap && self.evaluator.positions().is_flat() {
            let excess = self.bars.len() - cap;
            self.bars.drain(..excess);
            debug!(dropped = excess, retained = cap, "Trimmed bar history");
        }
    }

    /// Fetch the bars missing before `bar` and evaluate them, then `bar`, in order.
    pub async fn backfill(&mut self, bar: Bar) -> Result<Vec<Transition>> {
        let Some(last) = self.bars.last().map(|b| b.timestamp) else {
            return Ok(self.run_live_step(bar).await?.into_iter().collect());
        };
        let step_ms = self.settings.interval.duration().num_milliseconds();
        let span = ((bar.timestamp - last).num_milliseconds() / step_ms).max(1) as usize;

        let fetched = self
            .client
            .fetch_history(&self.settings.symbol, self.settings.interval, span + 1)
            .await?;
        let mut pending: Vec<Bar> = fetched
            .into_iter()
            .filter(|b| b.timestamp > last && b.timestamp < bar.timestamp)
            .collect();
        pending.push(bar);
        info!(bars = pending.len(), from = %last, "Backfilling missing bars");

        let mut transitions = Vec::new();
        for b in pending {
            transitions.extend(self.run_live_step(b).await?);
        }
        Ok(transitions)
    }

    /// Flatten the open position at `price` (the last close when `None`).
    pub async fn close_position(&mut self, price: Option<f64>) -> Result<Option<Transition>> {
        let Some(last) = self.bars.last() else {
            return Ok(None);
        };
        let price = price.unwrap_or(last.close);
        let index = self.bars.len() - 1;
        match self
            .evaluator
            .positions_mut()
            .close_manual(index, price, Utc::now())
        {
            Some(t) => Ok(Some(self.settle(t).await)),
            None => Ok(None),
        }
    }

    /// Bootstrap, then evaluate closed bars until `Stop` or a fatal error.
    /// Commands are only handled between steps. A command never cancels the
    /// pending bar request; it is re-armed only once it has completed.
    pub async fn run(mut self, mut control: EngineControl) -> Result<()> {
        self.bootstrap().await?;
        control.set_state(EngineState::Running).await;

        let client = self.client.clone();
        let symbol = self.settings.symbol.clone();
        let interval = self.settings.interval;
        let mut backoff = Duration::from_secs(1);
        let mut commands_open = true;
        let mut feed = client.next_closed_bar(&symbol, interval);

        let result = loop {
            tokio::select! {
                cmd = control.command_rx.recv(), if commands_open => match cmd {
                    Some(EngineCommand::Stop) => {
                        info!("Stop command received");
                        break Ok(());
                    }
                    Some(cmd) => self.handle_command(cmd, &control).await,
                    None => commands_open = false,
                },
                next = &mut feed => {
                    match next {
                        Ok(bar) => {
                            backoff = Duration::from_secs(1);
                            if let Err(e) = self.process(bar).await {
                                error!(error = %e, "Live evaluation stopped");
                                break Err(e);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, backoff = ?backoff, "Bar feed error, retrying");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                    feed = client.next_closed_bar(&symbol, interval);
                }
            }
        };

        control.set_state(EngineState::Stopped).await;
        info!(
            trades = self.trades().len(),
            equity = self.equity(),
            open = self.position().is_some(),
            "Live driver stopped"
        );
        result
    }

    async fn process(&mut self, bar: Bar) -> Result<()> {
        let transitions = match self.run_live_step(bar).await {
            Ok(t) => t.into_iter().collect(),
            Err(Error::DataGap {
                expected, missing, ..
            }) if self.settings.gap_policy == GapPolicy::Backfill => {
                warn!(%expected, missing, "Data gap detected, backfilling");
                self.backfill(bar).await?
            }
            Err(e) => return Err(e),
        };
        for t in &transitions {
            log_transition(t);
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: EngineCommand, control: &EngineControl) {
        match cmd {
            EngineCommand::Pause => {
                info!("Engine paused: exits managed, entries suppressed");
                self.evaluator.set_entries_enabled(false);
                control.set_state(EngineState::Paused).await;
            }
            EngineCommand::Resume => {
                info!("Engine resumed");
                self.evaluator.set_entries_enabled(true);
                control.set_state(EngineState::Running).await;
            }
            EngineCommand::ClosePosition { price } => match self.close_position(Some(price)).await {
                Ok(Some(t)) => log_transition(&t),
                Ok(None) => info!("Close requested but no position is open"),
                Err(e) => error!(error = %e, "Manual close failed"),
            },
            EngineCommand::Stop => {}
        }
    }

    /// Place the order a transition implies. On failure the position manager
    /// is reconciled and `OrderFailed` replaces the transition.
    async fn settle(&mut self, transition: Transition) -> Transition {
        let symbol = self.settings.symbol.clone();
        match &transition {
            Transition::Opened { position } => {
                let intent = OrderIntent::open(symbol, position);
                if let Err(e) = self.executor.execute(&intent).await {
                    self.evaluator.positions_mut().revert_open();
                    return Transition::OrderFailed {
                        intent,
                        error: e.to_string(),
                    };
                }
            }
            Transition::Closed { trade } => {
                let intent = OrderIntent::close(symbol, trade);
                if let Err(e) = self.executor.execute(&intent).await {
                    self.evaluator.positions_mut().restore(trade);
                    return Transition::OrderFailed {
                        intent,
                        error: e.to_string(),
                    };
                }
            }
            _ => {}
        }
        transition
    }

    async fn refresh_equity(&mut self) {
        match self.client.account_equity().await {
            Ok(equity) => self.evaluator.positions_mut().set_equity(equity),
            Err(e) => warn!(error = %e, "Equity refresh failed; keeping local value"),
        }
    }
}

fn log_transition(t: &Transition) {
    match t {
        Transition::Opened { position } => info!(
            side = %position.side,
            entry = position.entry_price,
            size = position.size,
            "Opened"
        ),
        Transition::Closed { trade } => info!(
            reason = %trade.reason,
            exit = trade.exit_price,
            pnl = trade.pnl,
            "Closed"
        ),
        Transition::StopAdjusted { from, to, .. } => info!(from, to, "Stop adjusted"),
        Transition::Rejected { reason, .. } => info!(reason = %reason, "Rejected"),
        Transition::OrderFailed { intent, error } => {
            error!(order_id = %intent.id, error = %error, "Order failed")
        }
    }
}
