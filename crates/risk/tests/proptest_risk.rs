use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{Bar, PositionStatus, RejectionReason, Side, Signal, Transition};
use risk::{PositionManager, RiskConfig};

fn signal(side: Side, entry: f64, stop_distance: f64, rr: f64) -> Signal {
    let sign = side.sign();
    Signal {
        side,
        index: 10,
        entry_price: entry,
        stop_loss: entry - sign * stop_distance,
        take_profit: entry + sign * stop_distance * rr,
        reason: "prop".into(),
    }
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

proptest! {
    /// A stop hit exactly never loses more than the risk budget, and margin
    /// never exceeds the configured fraction of equity.
    #[test]
    fn sizing_respects_risk_and_margin(
        equity in 100.0f64..1_000_000.0,
        risk in 0.001f64..0.2,
        leverage in 1.0f64..125.0,
        max_fraction in 0.05f64..1.0,
        entry in 0.01f64..100_000.0,
        distance_frac in 0.0005f64..0.5,
        step in prop::option::of(prop_oneof![Just(0.001f64), Just(0.01), Just(1.0)]),
        side in side_strategy(),
    ) {
        let config = RiskConfig {
            account_equity: equity,
            risk_per_trade: risk,
            leverage,
            max_position_fraction: max_fraction,
            quantity_step: step,
        };
        let mut pm = PositionManager::new(config).unwrap();
        let sig = signal(side, entry, entry * distance_frac, 2.0);
        match pm.on_signal(&sig, Utc::now()) {
            Transition::Opened { position } => {
                let tol = 1e-6 * equity;
                prop_assert!(position.size > 0.0);
                prop_assert!(position.risk_amount() <= risk * equity + tol);
                prop_assert!(position.size * entry / leverage <= max_fraction * equity + tol);
            }
            Transition::Rejected { reason, .. } => {
                prop_assert_eq!(reason, RejectionReason::NonPositiveSize);
                prop_assert!(step.is_some());
            }
            other => prop_assert!(false, "unexpected transition {:?}", other),
        }
    }

    /// A bar spanning both levels always closes at the stop with a loss.
    #[test]
    fn gap_bar_always_resolves_at_stop(
        entry in 1.0f64..10_000.0,
        distance_frac in 0.001f64..0.2,
        rr in 0.5f64..5.0,
        extra in 0.0f64..0.5,
        side in side_strategy(),
    ) {
        let mut pm = PositionManager::new(RiskConfig::default()).unwrap();
        let sig = signal(side, entry, entry * distance_frac, rr);
        let opened = pm.on_signal(&sig, Utc::now());
        prop_assert!(matches!(opened, Transition::Opened { .. }), "expected Transition::Opened");

        let high = sig.stop_loss.max(sig.take_profit) * (1.0 + extra);
        let low = sig.stop_loss.min(sig.take_profit) * (1.0 - extra);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let bar = Bar::new(ts, entry, high, low, entry, 1.0);

        match pm.check_exit(&bar, 11) {
            Some(Transition::Closed { trade }) => {
                prop_assert_eq!(trade.position.status, PositionStatus::ClosedByStop);
                prop_assert_eq!(trade.exit_price, sig.stop_loss);
                prop_assert!(trade.pnl < 0.0);
                prop_assert!(pm.is_flat());
            }
            other => prop_assert!(false, "expected a stop close, got {:?}", other),
        }
    }

    /// While a position is open every further signal is rejected.
    #[test]
    fn open_position_blocks_all_signals(
        entries in prop::collection::vec((1.0f64..1_000.0, side_strategy()), 1..20),
    ) {
        let mut pm = PositionManager::new(RiskConfig::default()).unwrap();
        let first = signal(Side::Long, 100.0, 2.0, 2.0);
        prop_assert!(matches!(pm.on_signal(&first, Utc::now()), Transition::Opened { .. }), "expected Transition::Opened");
        for (entry, side) in entries {
            let t = pm.on_signal(&signal(side, entry, entry * 0.01, 2.0), Utc::now());
            let rejected_for_open = matches!(
                t,
                Transition::Rejected { reason: RejectionReason::PositionOpen, .. }
            );
            prop_assert!(rejected_for_open);
        }
        prop_assert_eq!(pm.position().map(|p| p.entry_price), Some(100.0));
    }
}
