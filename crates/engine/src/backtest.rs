//! Deterministic replay of a finite bar history.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{Bar, Error, PatternOccurrence, Position, Result, Signal, Trade, Transition};
use risk::RiskConfig;
use strategy::indicators::compute;
use strategy::Strategy;

use crate::evaluator::Evaluator;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestOptions {
    /// Force-close a position still open after the last bar at its close.
    pub close_at_end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades with positive P&L.
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    /// Largest peak-to-trough fall of the closed-trade equity curve, in percent.
    pub max_drawdown_pct: f64,
}

impl BacktestSummary {
    pub fn from_trades(trades: &[Trade], initial_equity: f64) -> Self {
        let total_trades = trades.len();
        let wins = trades.iter().filter(|t| t.is_win()).count();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();

        let mut equity = initial_equity;
        let mut peak = initial_equity;
        let mut max_drawdown_pct: f64 = 0.0;
        for trade in trades {
            equity += trade.pnl;
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown_pct = max_drawdown_pct.max((peak - equity) / peak * 100.0);
            }
        }

        let ratio = |num: f64, den: f64| if den == 0.0 { 0.0 } else { num / den };
        Self {
            total_trades,
            wins,
            losses: total_trades - wins,
            win_rate: ratio(wins as f64, total_trades as f64) * 100.0,
            total_pnl,
            avg_pnl: ratio(total_pnl, total_trades as f64),
            initial_equity,
            final_equity: equity,
            total_return_pct: ratio(total_pnl, initial_equity) * 100.0,
            max_drawdown_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub strategy: String,
    pub bars: usize,
    /// First evaluated index (warm-up).
    pub first_index: usize,
    pub signals: Vec<Signal>,
    pub transitions: Vec<Transition>,
    pub trades: Vec<Trade>,
    /// Each valid pattern occurrence, recorded on the bar it was first seen.
    pub patterns: Vec<PatternOccurrence>,
    pub open_position: Option<Position>,
    pub summary: BacktestSummary,
}

/// Timestamps must be strictly increasing and every bar well formed.
pub fn validate_bars(bars: &[Bar]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        if !bar.is_well_formed() {
            return Err(Error::Other(format!("malformed bar at index {i}: {bar:?}")));
        }
        if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
            return Err(Error::OutOfOrder {
                last: bars[i - 1].timestamp,
                actual: bar.timestamp,
            });
        }
    }
    Ok(())
}

/// Replay `bars` through `strategy` from the warm-up index to the end.
///
/// Two runs over the same bars and configuration produce identical reports.
pub fn run_backtest(
    bars: &[Bar],
    strategy: Box<dyn Strategy>,
    risk: RiskConfig,
    options: &BacktestOptions,
) -> Result<BacktestReport> {
    validate_bars(bars)?;
    let indicators = compute(bars, strategy.indicator_config())?;
    let mut evaluator = Evaluator::new(strategy, risk)?;
    let first_index = evaluator.first_index();
    let name = evaluator.strategy().name().to_string();

    if bars.len() <= first_index {
        warn!(
            required = first_index + 1,
            available = bars.len(),
            "Not enough bars to evaluate; no signals will be produced"
        );
    }

    let mut signals = Vec::new();
    let mut transitions = Vec::new();
    let mut patterns: Vec<PatternOccurrence> = Vec::new();

    for index in first_index..bars.len() {
        let outcome = evaluator.step(bars, &indicators, index)?;

        for p in [outcome.patterns.bull, outcome.patterns.bear]
            .into_iter()
            .flatten()
            .filter(|p| p.valid)
        {
            if !patterns.iter().any(|seen| seen.same_structure(&p)) {
                patterns.push(p);
            }
        }
        signals.extend(outcome.signal);
        transitions.extend(outcome.transition);
    }

    if options.close_at_end {
        if let Some(last) = bars.last() {
            let closed = evaluator
                .positions_mut()
                .close_manual(bars.len() - 1, last.close, last.timestamp);
            transitions.extend(closed);
        }
    }

    let positions = evaluator.positions();
    let trades = positions.trades().to_vec();
    let summary = BacktestSummary::from_trades(&trades, positions.config().account_equity);
    info!(
        strategy = %name,
        bars = bars.len(),
        trades = summary.total_trades,
        win_rate = summary.win_rate,
        total_pnl = summary.total_pnl,
        max_drawdown_pct = summary.max_drawdown_pct,
        "Backtest finished"
    );

    Ok(BacktestReport {
        strategy: name,
        bars: bars.len(),
        first_index,
        signals,
        transitions,
        trades,
        patterns,
        open_position: positions.position().cloned(),
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{PositionStatus, Side};

    fn trade(pnl: f64) -> Trade {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            position: Position {
                id: "t".into(),
                side: Side::Long,
                entry_price: 100.0,
                size: 1.0,
                stop_loss: 90.0,
                initial_stop_loss: 90.0,
                take_profit: 120.0,
                opened_at_index: 0,
                opened_at: ts,
                status: PositionStatus::ClosedByTarget,
            },
            exit_index: 1,
            exit_price: 100.0 + pnl,
            closed_at: ts,
            reason: "test".into(),
            pnl,
        }
    }

    #[test]
    fn summary_tracks_drawdown_of_the_equity_curve() {
        let trades = [trade(100.0), trade(-200.0), trade(50.0), trade(-110.0)];
        let s = BacktestSummary::from_trades(&trades, 1_000.0);
        assert_eq!(s.total_trades, 4);
        assert_eq!(s.wins, 2);
        assert_eq!(s.win_rate, 50.0);
        assert_eq!(s.total_pnl, -160.0);
        assert_eq!(s.avg_pnl, -40.0);
        assert_eq!(s.final_equity, 840.0);
        assert!((s.total_return_pct + 16.0).abs() < 1e-9);
        // Peak 1100, trough 840.
        assert!((s.max_drawdown_pct - 260.0 / 1_100.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_has_no_nans() {
        let s = BacktestSummary::from_trades(&[], 1_000.0);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.avg_pnl, 0.0);
        assert_eq!(s.max_drawdown_pct, 0.0);
    }

    #[test]
    fn unordered_bars_are_refused() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = [
            Bar::new(t0, 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new(t0 + Duration::hours(1), 1.0, 1.0, 1.0, 1.0, 1.0),
            Bar::new(t0 + Duration::hours(1), 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        assert!(matches!(validate_bars(&bars), Err(Error::OutOfOrder { .. })));
        assert!(validate_bars(&bars[..2]).is_ok());
    }
}
