use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{
    Bar, Config, Error, Position, PositionStatus, RejectionReason, Result, Side, Signal, Trade,
    Transition,
};

/// User-configurable risk parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Starting equity in quote currency.
    pub account_equity: f64,
    /// Fraction of equity lost if a stop is hit exactly (e.g. 0.01 = 1%).
    pub risk_per_trade: f64,
    pub leverage: f64,
    /// Margin (`size × entry / leverage`) may not exceed this fraction of equity.
    pub max_position_fraction: f64,
    /// Sizes are floored to a multiple of this exchange lot step.
    pub quantity_step: Option<f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_equity: 10_000.0,
            risk_per_trade: 0.01,
            leverage: 20.0,
            max_position_fraction: 1.0,
            quantity_step: None,
        }
    }
}

impl From<&Config> for RiskConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            account_equity: cfg.account_equity,
            risk_per_trade: cfg.risk_per_trade,
            leverage: cfg.leverage,
            max_position_fraction: cfg.max_position_fraction,
            quantity_step: cfg.quantity_step,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0) {
            return Err(Error::Config(format!(
                "risk_per_trade must be in (0, 1], got {}",
                self.risk_per_trade
            )));
        }
        let positive = [
            ("account_equity", self.account_equity),
            ("leverage", self.leverage),
            ("max_position_fraction", self.max_position_fraction),
            ("quantity_step", self.quantity_step.unwrap_or(1.0)),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config(format!("{name} must be > 0, got {value}")));
            }
        }
        Ok(())
    }
}

/// Owns the single position and converts signals into sized positions.
///
/// Two states: flat (`position == None`) and open. Every mutation returns the
/// `Transition` it caused so drivers can log it and act on it.
#[derive(Debug, Clone)]
pub struct PositionManager {
    config: RiskConfig,
    equity: f64,
    position: Option<Position>,
    history: Vec<Trade>,
}

impl PositionManager {
    pub fn new(config: RiskConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            equity: config.account_equity,
            config,
            position: None,
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Starting equity plus realized P&L, or the last exchange-reported value.
    pub fn equity(&self) -> f64 {
        self.equity
    }

    /// Replace equity with an externally reported value. Ignored while a
    /// position is open so sizing never mixes realized and unrealized P&L.
    pub fn set_equity(&mut self, equity: f64) {
        if self.position.is_some() {
            debug!(equity, "Ignoring equity refresh while a position is open");
            return;
        }
        if equity.is_finite() && equity > 0.0 {
            self.equity = equity;
        } else {
            warn!(equity, "Ignoring non-positive equity report");
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Closed trades, oldest first.
    pub fn trades(&self) -> &[Trade] {
        &self.history
    }

    /// Risk-budgeted size for an entry at `entry` with stop at `stop_loss`,
    /// capped by margin and floored to the lot step. May be zero or negative.
    pub fn position_size(&self, entry: f64, stop_loss: f64) -> f64 {
        let distance = (entry - stop_loss).abs();
        let mut size = self.config.risk_per_trade * self.equity / distance;

        let cap = self.config.max_position_fraction * self.equity * self.config.leverage / entry;
        if size > cap {
            debug!(size, cap, "Position size capped by max_position_fraction");
            size = cap;
        }
        if let Some(step) = self.config.quantity_step {
            size = ((size / step) + 1e-9).floor() * step;
        }
        size
    }

    /// Flat → Open on an acceptable signal. Anything else yields `Rejected`.
    pub fn on_signal(&mut self, signal: &Signal, timestamp: DateTime<Utc>) -> Transition {
        if self.position.is_some() {
            return self.reject(signal, RejectionReason::PositionOpen);
        }
        if !(signal.risk() > 0.0 && signal.reward() > 0.0) {
            return self.reject(signal, RejectionReason::InvalidStops);
        }
        let size = self.position_size(signal.entry_price, signal.stop_loss);
        if !size.is_finite() || size <= 0.0 {
            return self.reject(signal, RejectionReason::NonPositiveSize);
        }

        // Derived from the entry bar so replays produce identical ids.
        let position = Position {
            id: format!("{}-{}-{}", signal.side, signal.index, timestamp.timestamp()),
            side: signal.side,
            entry_price: signal.entry_price,
            size,
            stop_loss: signal.stop_loss,
            initial_stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            opened_at_index: signal.index,
            opened_at: timestamp,
            status: PositionStatus::Open,
        };
        info!(
            side = %position.side,
            entry = position.entry_price,
            size = position.size,
            stop_loss = position.stop_loss,
            take_profit = position.take_profit,
            index = position.opened_at_index,
            "Position opened"
        );
        self.position = Some(position.clone());
        Transition::Opened { position }
    }

    /// Close the open position if `bar` reaches its stop or target. Bars at or
    /// before the entry bar are never checked. When one bar spans both
    /// levels the stop wins.
    pub fn check_exit(&mut self, bar: &Bar, index: usize) -> Option<Transition> {
        let pos = self.position.as_ref()?;
        if index <= pos.opened_at_index {
            return None;
        }
        let (stop_hit, target_hit) = match pos.side {
            Side::Long => (bar.low <= pos.stop_loss, bar.high >= pos.take_profit),
            Side::Short => (bar.high >= pos.stop_loss, bar.low <= pos.take_profit),
        };
        if stop_hit {
            if target_hit {
                debug!(index, "Bar spans stop and target; resolving at the stop");
            }
            let price = pos.stop_loss;
            self.close(index, price, bar.timestamp, PositionStatus::ClosedByStop, "stop_loss")
        } else if target_hit {
            let price = pos.take_profit;
            self.close(index, price, bar.timestamp, PositionStatus::ClosedByTarget, "take_profit")
        } else {
            None
        }
    }

    /// Close on a strategy exit rule.
    pub fn close_by_strategy(
        &mut self,
        index: usize,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Option<Transition> {
        self.close(index, price, timestamp, PositionStatus::ClosedByStrategy, reason)
    }

    /// Forced close (operator command, end of backtest).
    pub fn close_manual(
        &mut self,
        index: usize,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<Transition> {
        self.close(index, price, timestamp, PositionStatus::ClosedManual, "manual")
    }

    /// Move the stop to `new_stop` if that tightens it.
    pub fn update_stop(&mut self, index: usize, new_stop: f64) -> Option<Transition> {
        let pos = self.position.as_mut()?;
        let tighter = (new_stop - pos.stop_loss) * pos.side.sign() > 0.0;
        if !new_stop.is_finite() || !tighter {
            return None;
        }
        let from = pos.stop_loss;
        pos.stop_loss = new_stop;
        debug!(index, from, to = new_stop, "Stop tightened");
        Some(Transition::StopAdjusted {
            index,
            from,
            to: new_stop,
        })
    }

    /// Undo an open whose entry order failed. Equity is untouched.
    pub fn revert_open(&mut self) -> Option<Position> {
        let position = self.position.take()?;
        warn!(id = %position.id, "Reverting open position after order failure");
        Some(position)
    }

    /// Undo a close whose exit order failed: the position is open again and
    /// its realized P&L is backed out.
    pub fn restore(&mut self, trade: &Trade) {
        if self.position.is_some() {
            warn!(id = %trade.position.id, "Cannot restore over an open position");
            return;
        }
        if let Some(pos) = self.history.iter().rposition(|t| t.position.id == trade.position.id) {
            self.history.remove(pos);
        }
        self.equity -= trade.pnl;
        let mut position = trade.position.clone();
        position.status = PositionStatus::Open;
        warn!(id = %position.id, "Restored position after failed close");
        self.position = Some(position);
    }

    fn close(
        &mut self,
        index: usize,
        price: f64,
        timestamp: DateTime<Utc>,
        status: PositionStatus,
        reason: &str,
    ) -> Option<Transition> {
        let mut position = self.position.take()?;
        let pnl = position.pnl_at(price);
        position.status = status;
        self.equity += pnl;

        let trade = Trade {
            position,
            exit_index: index,
            exit_price: price,
            closed_at: timestamp,
            reason: reason.to_string(),
            pnl,
        };
        info!(
            side = %trade.position.side,
            exit = price,
            pnl,
            status = %status,
            equity = self.equity,
            "Position closed"
        );
        self.history.push(trade.clone());
        Some(Transition::Closed { trade })
    }

    fn reject(&self, signal: &Signal, reason: RejectionReason) -> Transition {
        warn!(
            side = %signal.side,
            index = signal.index,
            reason = %reason,
            "Signal rejected"
        );
        Transition::Rejected {
            index: signal.index,
            signal: Some(signal.clone()),
            reason,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(i: usize) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64)
    }

    fn bar(i: usize, high: f64, low: f64) -> Bar {
        Bar::new(ts(i), (high + low) / 2.0, high, low, (high + low) / 2.0, 10.0)
    }

    fn signal(side: Side, index: usize, entry: f64, stop: f64, target: f64) -> Signal {
        Signal {
            side,
            index,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            reason: "test".into(),
        }
    }

    fn manager() -> PositionManager {
        PositionManager::new(RiskConfig::default()).unwrap()
    }

    #[test]
    fn config_validation() {
        let bad = RiskConfig {
            risk_per_trade: 0.0,
            ..RiskConfig::default()
        };
        assert!(matches!(PositionManager::new(bad), Err(Error::Config(_))));
        let bad = RiskConfig {
            risk_per_trade: 1.5,
            ..RiskConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = RiskConfig {
            quantity_step: Some(0.0),
            ..RiskConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn size_follows_the_risk_budget() {
        let mut pm = manager();
        // 1% of 10_000 over a 2.0 stop distance.
        let t = pm.on_signal(&signal(Side::Long, 5, 100.0, 98.0, 104.0), ts(5));
        let Transition::Opened { position } = t else {
            panic!("expected open, got {t:?}");
        };
        assert_eq!(position.size, 50.0);
        assert!((position.risk_amount() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn margin_cap_reduces_size_silently() {
        let mut pm = PositionManager::new(RiskConfig {
            leverage: 1.0,
            max_position_fraction: 0.1,
            ..RiskConfig::default()
        })
        .unwrap();
        let t = pm.on_signal(&signal(Side::Long, 1, 100.0, 99.9, 101.0), ts(1));
        let Transition::Opened { position } = t else {
            panic!("expected open");
        };
        // 0.1 × 10_000 × 1 / 100
        assert!((position.size - 10.0).abs() < 1e-9);
    }

    #[test]
    fn lot_step_rounding_to_zero_rejects() {
        let mut pm = PositionManager::new(RiskConfig {
            quantity_step: Some(1.0),
            ..RiskConfig::default()
        })
        .unwrap();
        let t = pm.on_signal(&signal(Side::Short, 3, 50_000.0, 51_000.0, 48_000.0), ts(3));
        assert!(matches!(
            t,
            Transition::Rejected {
                reason: RejectionReason::NonPositiveSize,
                ..
            }
        ));
        assert!(pm.is_flat());
    }

    #[test]
    fn stops_on_the_wrong_side_are_rejected() {
        let mut pm = manager();
        let t = pm.on_signal(&signal(Side::Long, 3, 100.0, 101.0, 110.0), ts(3));
        assert!(matches!(
            t,
            Transition::Rejected {
                reason: RejectionReason::InvalidStops,
                ..
            }
        ));
    }

    #[test]
    fn single_position_invariant() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Long, 1, 100.0, 98.0, 104.0), ts(1));
        let t = pm.on_signal(&signal(Side::Short, 2, 100.0, 102.0, 96.0), ts(2));
        assert!(matches!(
            t,
            Transition::Rejected {
                reason: RejectionReason::PositionOpen,
                ..
            }
        ));
        assert_eq!(pm.position().unwrap().side, Side::Long);
    }

    #[test]
    fn entry_bar_is_never_checked_for_exit() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Long, 7, 100.0, 98.0, 104.0), ts(7));
        assert!(pm.check_exit(&bar(7, 120.0, 80.0), 7).is_none());
        assert!(!pm.is_flat());
    }

    #[test]
    fn gap_bar_resolves_at_the_stop() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Short, 1, 100.0, 102.0, 96.0), ts(1));
        let t = pm.check_exit(&bar(2, 103.0, 95.0), 2).unwrap();
        let Transition::Closed { trade } = t else {
            panic!("expected close");
        };
        assert_eq!(trade.position.status, PositionStatus::ClosedByStop);
        assert_eq!(trade.exit_price, 102.0);
        assert_eq!(trade.pnl, -100.0);
        assert_eq!(pm.equity(), 9_900.0);
    }

    #[test]
    fn target_exit_realizes_profit() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Long, 1, 100.0, 98.0, 104.0), ts(1));
        assert!(pm.check_exit(&bar(2, 103.0, 99.0), 2).is_none());
        let Some(Transition::Closed { trade }) = pm.check_exit(&bar(3, 105.0, 101.0), 3) else {
            panic!("expected close");
        };
        assert_eq!(trade.position.status, PositionStatus::ClosedByTarget);
        assert_eq!(trade.pnl, 200.0);
        assert_eq!(pm.equity(), 10_200.0);
        assert_eq!(pm.trades().len(), 1);
    }

    #[test]
    fn stop_only_tightens() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Long, 1, 100.0, 98.0, 104.0), ts(1));
        assert!(pm.update_stop(2, 97.0).is_none());
        assert!(matches!(
            pm.update_stop(2, 99.0),
            Some(Transition::StopAdjusted { from, to, .. }) if from == 98.0 && to == 99.0
        ));
        assert_eq!(pm.position().unwrap().initial_stop_loss, 98.0);
    }

    #[test]
    fn revert_and_restore_reconcile_state() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Long, 1, 100.0, 98.0, 104.0), ts(1));
        assert!(pm.revert_open().is_some());
        assert!(pm.is_flat());
        assert_eq!(pm.equity(), 10_000.0);

        pm.on_signal(&signal(Side::Long, 2, 100.0, 98.0, 104.0), ts(2));
        let Some(Transition::Closed { trade }) = pm.close_manual(3, 101.0, ts(3)) else {
            panic!("expected close");
        };
        assert_eq!(trade.position.status, PositionStatus::ClosedManual);
        assert_eq!(pm.equity(), 10_050.0);

        pm.restore(&trade);
        assert_eq!(pm.equity(), 10_000.0);
        assert_eq!(pm.position().unwrap().status, PositionStatus::Open);
        assert!(pm.trades().is_empty());
    }

    #[test]
    fn equity_refresh_waits_until_flat() {
        let mut pm = manager();
        pm.on_signal(&signal(Side::Long, 1, 100.0, 98.0, 104.0), ts(1));
        pm.set_equity(5_000.0);
        assert_eq!(pm.equity(), 10_000.0);
        pm.close_manual(2, 100.0, ts(2));
        pm.set_equity(5_000.0);
        assert_eq!(pm.equity(), 5_000.0);
    }
}
