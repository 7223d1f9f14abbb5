use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One closed OHLCV candle. `timestamp` is the candle open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// True when every price is finite and `low <= open, close <= high`.
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite())
            && self.volume.is_finite()
            && self.low <= self.high
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
    }
}

/// Live market data event. Only events where `is_closed == true` may reach
/// the evaluator; an open candle still repaints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: String,
    pub bar: Bar,
    pub is_closed: bool,
}

/// Candle interval understood by the exchange layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::M1 => Duration::minutes(1),
            Interval::M5 => Duration::minutes(5),
            Interval::M15 => Duration::minutes(15),
            Interval::M30 => Duration::minutes(30),
            Interval::H1 => Duration::hours(1),
            Interval::H4 => Duration::hours(4),
            Interval::D1 => Duration::days(1),
        }
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            other => Err(Error::Config(format!("unsupported interval '{other}'"))),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Exchange order side that opens a position in this direction.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Side of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Proposed entry produced by a strategy for one bar index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: Side,
    pub index: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reason: String,
}

impl Signal {
    /// Distance from entry to stop, positive when the stop is on the losing side.
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss) * self.side.sign()
    }

    /// Distance from entry to target, positive when the target is on the winning side.
    pub fn reward(&self) -> f64 {
        (self.take_profit - self.entry_price) * self.side.sign()
    }

    pub fn rr_ratio(&self) -> f64 {
        let risk = self.risk();
        if risk == 0.0 {
            return 0.0;
        }
        self.reward() / risk
    }
}

/// Named structural pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Lower low sweep followed by a higher low.
    QuasimodoBull,
    /// Higher high sweep followed by a lower high.
    QuasimodoBear,
}

impl PatternKind {
    /// Trade direction the pattern points to.
    pub fn side(&self) -> Side {
        match self {
            PatternKind::QuasimodoBull => Side::Long,
            PatternKind::QuasimodoBear => Side::Short,
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::QuasimodoBull => write!(f, "qml_bull"),
            PatternKind::QuasimodoBear => write!(f, "qml_bear"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub index: usize,
    pub price: f64,
}

/// A detected pattern candidate.
///
/// `key_points` are in index order, alternating between extrema. The first,
/// middle and last shoulder/head points are the extrema of the pattern's own
/// kind; any opposite extrema between them are included as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternOccurrence {
    pub kind: PatternKind,
    pub start_index: usize,
    pub end_index: usize,
    pub key_points: Vec<KeyPoint>,
    pub valid: bool,
    /// First evaluation index at which `end_index` is a confirmed extremum.
    pub confirmed_at: usize,
    /// Price of the head (the liquidity sweep extreme).
    pub head: KeyPoint,
}

impl PatternOccurrence {
    /// Sweep level used for pattern-anchored stops.
    pub fn level(&self) -> f64 {
        self.head.price
    }

    /// Same structural points regardless of the evaluation index.
    pub fn same_structure(&self, other: &PatternOccurrence) -> bool {
        self.kind == other.kind
            && self.start_index == other.start_index
            && self.end_index == other.end_index
    }
}

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    ClosedByStop,
    ClosedByTarget,
    /// Closed by a strategy exit rule (indicator reversal, band touch).
    ClosedByStrategy,
    ClosedManual,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::ClosedByStop => write!(f, "stop_loss"),
            PositionStatus::ClosedByTarget => write!(f, "take_profit"),
            PositionStatus::ClosedByStrategy => write!(f, "strategy_exit"),
            PositionStatus::ClosedManual => write!(f, "manual"),
        }
    }
}

/// The engine's single open trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: f64,
    /// Stop at entry time; the 1R distance for trailing is measured from it.
    pub initial_stop_loss: f64,
    pub take_profit: f64,
    pub opened_at_index: usize,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Unrealized P&L at `price`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size * self.side.sign()
    }

    /// Loss if the current stop is hit exactly.
    pub fn risk_amount(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs() * self.size
    }
}

/// A closed position moved to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position: Position,
    pub exit_index: usize,
    pub exit_price: f64,
    pub closed_at: DateTime<Utc>,
    pub reason: String,
    pub pnl: f64,
}

impl Trade {
    /// Return on the entry notional, in percent.
    pub fn pnl_pct(&self) -> f64 {
        let p = &self.position;
        (self.exit_price - p.entry_price) / p.entry_price * p.side.sign() * 100.0
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Reason a signal was discarded by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// A position is already open (single-position invariant).
    PositionOpen,
    /// Sized quantity rounded to zero or below.
    NonPositiveSize,
    /// The strategy signalled long and short on the same bar.
    AmbiguousSignal,
    /// Stop or target not on the required side of entry.
    InvalidStops,
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::PositionOpen => write!(f, "position already open"),
            RejectionReason::NonPositiveSize => write!(f, "position size is not positive"),
            RejectionReason::AmbiguousSignal => write!(f, "long and short on the same bar"),
            RejectionReason::InvalidStops => write!(f, "stop/target on the wrong side of entry"),
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// An order the engine wants the exchange to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Close-only order; never increases exposure.
    pub reduce_only: bool,
    /// Price the engine evaluated the decision at.
    pub reference_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl OrderIntent {
    /// Market order opening `position`, with its protective levels attached.
    pub fn open(symbol: impl Into<String>, position: &Position) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side: position.side.entry_order_side(),
            quantity: position.size,
            reduce_only: false,
            reference_price: position.entry_price,
            stop_loss: Some(position.stop_loss),
            take_profit: Some(position.take_profit),
        }
    }

    /// Reduce-only market order flattening the position of `trade`.
    pub fn close(symbol: impl Into<String>, trade: &Trade) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side: trade.position.side.opposite().entry_order_side(),
            quantity: trade.position.size,
            reduce_only: true,
            reference_price: trade.exit_price,
            stop_loss: None,
            take_profit: None,
        }
    }
}

/// Confirmation of a filled order returned by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub fill_price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// State change emitted by one evaluation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transition {
    Opened {
        position: Position,
    },
    Closed {
        trade: Trade,
    },
    StopAdjusted {
        index: usize,
        from: f64,
        to: f64,
    },
    /// `signal` is absent when no single signal could be formed (ambiguous
    /// sides, unusable stops).
    Rejected {
        index: usize,
        signal: Option<Signal>,
        reason: RejectionReason,
    },
    /// The exchange refused the order; local state has been reconciled.
    OrderFailed {
        intent: OrderIntent,
        error: String,
    },
}

impl Transition {
    /// True for transitions that open or close a position.
    pub fn is_position_change(&self) -> bool {
        matches!(self, Transition::Opened { .. } | Transition::Closed { .. })
    }
}

/// Whether the bot replays history, simulates fills, or trades for real.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Backtest,
    Paper,
    Live,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Backtest => write!(f, "backtest"),
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// What the live driver does when bar timestamps are not contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Stop and surface the gap to the caller.
    #[default]
    Fail,
    /// Fetch the missing bars and evaluate them in order.
    Backfill,
}

impl FromStr for GapPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(GapPolicy::Fail),
            "backfill" => Ok(GapPolicy::Backfill),
            other => Err(Error::Config(format!(
                "GAP_POLICY must be 'fail' or 'backfill', got '{other}'"
            ))),
        }
    }
}

/// Current state of the live engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    /// Bars are still consumed and exits managed, but no new entries.
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to the live engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Pause,
    Resume,
    /// Flatten any open position at the given price, then keep running.
    ClosePosition { price: f64 },
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position(side: Side) -> Position {
        Position {
            id: "p".into(),
            side,
            entry_price: 100.0,
            size: 2.0,
            stop_loss: if side == Side::Long { 95.0 } else { 105.0 },
            initial_stop_loss: if side == Side::Long { 95.0 } else { 105.0 },
            take_profit: if side == Side::Long { 110.0 } else { 90.0 },
            opened_at_index: 0,
            opened_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn signal_risk_reward_are_side_aware() {
        let s = Signal {
            side: Side::Short,
            index: 10,
            entry_price: 100.0,
            stop_loss: 104.0,
            take_profit: 92.0,
            reason: "test".into(),
        };
        assert_eq!(s.risk(), 4.0);
        assert_eq!(s.reward(), 8.0);
        assert_eq!(s.rr_ratio(), 2.0);
    }

    #[test]
    fn position_pnl_sign_follows_side() {
        assert_eq!(position(Side::Long).pnl_at(105.0), 10.0);
        assert_eq!(position(Side::Short).pnl_at(105.0), -10.0);
        assert_eq!(position(Side::Short).risk_amount(), 10.0);
    }

    #[test]
    fn close_intent_is_reduce_only_on_the_opposite_side() {
        let trade = Trade {
            position: position(Side::Long),
            exit_index: 5,
            exit_price: 110.0,
            closed_at: Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
            reason: "take_profit".into(),
            pnl: 20.0,
        };
        let intent = OrderIntent::close("LTCUSDT", &trade);
        assert_eq!(intent.side, OrderSide::Sell);
        assert!(intent.reduce_only);
        assert_eq!(intent.quantity, 2.0);
        assert!((trade.pnl_pct() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn interval_parses_and_rejects_unknown() {
        assert_eq!("4h".parse::<Interval>().unwrap(), Interval::H4);
        assert_eq!(Interval::H1.duration(), Duration::hours(1));
        assert!(matches!("2w".parse::<Interval>(), Err(Error::Config(_))));
    }

    #[test]
    fn bar_well_formedness() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(Bar::new(ts, 10.0, 11.0, 9.0, 10.5, 1.0).is_well_formed());
        assert!(!Bar::new(ts, 10.0, 9.5, 9.0, 10.5, 1.0).is_well_formed());
        assert!(!Bar::new(ts, f64::NAN, 11.0, 9.0, 10.5, 1.0).is_well_formed());
    }
}
