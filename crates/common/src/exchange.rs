use async_trait::async_trait;

use crate::{Bar, Fill, Interval, OrderIntent, Result};

/// Abstraction over the exchange connection.
///
/// `BingxClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// Only the live driver's `OrderExecutor` submits orders. All order flow is
/// produced by the position manager's transitions.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Most recent `count` closed bars, oldest first.
    async fn fetch_history(&self, symbol: &str, interval: Interval, count: usize)
        -> Result<Vec<Bar>>;

    /// Suspend until the next bar for `interval` has closed and return it.
    async fn next_closed_bar(&self, symbol: &str, interval: Interval) -> Result<Bar>;

    /// Submit an order and return the fill confirmation.
    async fn place_order(&self, intent: &OrderIntent) -> Result<Fill>;

    /// Account equity in quote currency.
    async fn account_equity(&self) -> Result<f64>;
}
