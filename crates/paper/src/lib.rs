use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use common::{Bar, Error, ExchangeClient, Fill, Interval, OrderIntent, OrderSide, Result};

/// Where closed bars come from.
enum MarketData {
    /// Bars pushed through the sender returned by `PaperClient::new`.
    Feed {
        rx: Mutex<mpsc::Receiver<Bar>>,
        /// Every bar the simulated venue has published, oldest first.
        history: RwLock<Vec<Bar>>,
    },
    /// Real market data from another client; only orders are simulated.
    Upstream(Arc<dyn ExchangeClient>),
}

#[derive(Debug, Clone, Copy)]
struct PaperPosition {
    side: OrderSide,
    entry_price: f64,
    quantity: f64,
}

#[derive(Debug)]
struct Ledger {
    equity: f64,
    position: Option<PaperPosition>,
}

/// Simulated exchange client for paper trading.
///
/// Orders fill at the intent's reference price with configurable slippage and
/// settle against an in-memory equity ledger. No real orders are ever sent.
pub struct PaperClient {
    market: MarketData,
    ledger: RwLock<Ledger>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    fail_next: AtomicBool,
}

impl PaperClient {
    /// Client replaying its own bar feed. `history` is what `fetch_history`
    /// serves before any bar has been fed.
    pub fn new(equity: f64, slippage_bps: f64, history: Vec<Bar>) -> (Self, mpsc::Sender<Bar>) {
        let (tx, rx) = mpsc::channel(256);
        info!(
            equity,
            slippage_bps,
            history = history.len(),
            "PaperClient initialized with replay feed"
        );
        let client = Self {
            market: MarketData::Feed {
                rx: Mutex::new(rx),
                history: RwLock::new(history),
            },
            ledger: RwLock::new(Ledger {
                equity,
                position: None,
            }),
            slippage_bps,
            fail_next: AtomicBool::new(false),
        };
        (client, tx)
    }

    /// Client reading market data from `upstream` and simulating orders locally.
    pub fn with_market_data(upstream: Arc<dyn ExchangeClient>, equity: f64, slippage_bps: f64) -> Self {
        info!(equity, slippage_bps, "PaperClient initialized over live market data");
        Self {
            market: MarketData::Upstream(upstream),
            ledger: RwLock::new(Ledger {
                equity,
                position: None,
            }),
            slippage_bps,
            fail_next: AtomicBool::new(false),
        }
    }

    /// Publish bars on the simulated venue without delivering them through
    /// the feed, as if the feed had dropped them. No effect in upstream mode.
    pub async fn insert_history(&self, bars: &[Bar]) {
        if let MarketData::Feed { history, .. } = &self.market {
            let mut history = history.write().await;
            history.extend_from_slice(bars);
            history.sort_by_key(|b| b.timestamp);
            history.dedup_by_key(|b| b.timestamp);
        }
    }

    /// Make the next `place_order` call fail.
    pub fn fail_next_order(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Whether the simulated account holds a position.
    pub async fn has_position(&self) -> bool {
        self.ledger.read().await.position.is_some()
    }

    fn slipped(&self, side: OrderSide, price: f64) -> f64 {
        // Buys pay more, sells receive less.
        match side {
            OrderSide::Buy => price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        interval: Interval,
        count: usize,
    ) -> Result<Vec<Bar>> {
        match &self.market {
            MarketData::Feed { history, .. } => {
                let history = history.read().await;
                let start = history.len().saturating_sub(count);
                Ok(history[start..].to_vec())
            }
            MarketData::Upstream(client) => client.fetch_history(symbol, interval, count).await,
        }
    }

    async fn next_closed_bar(&self, symbol: &str, interval: Interval) -> Result<Bar> {
        match &self.market {
            MarketData::Feed { rx, history } => {
                let bar = rx
                    .lock()
                    .await
                    .recv()
                    .await
                    .ok_or_else(|| Error::Exchange("paper feed closed".into()))?;
                let mut history = history.write().await;
                if history.last().map_or(true, |last| last.timestamp < bar.timestamp) {
                    history.push(bar);
                }
                Ok(bar)
            }
            MarketData::Upstream(client) => client.next_closed_bar(symbol, interval).await,
        }
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<Fill> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Exchange(format!(
                "simulated rejection of order {}",
                intent.id
            )));
        }

        let fill_price = self.slipped(intent.side, intent.reference_price);
        let mut ledger = self.ledger.write().await;

        if intent.reduce_only {
            let open = ledger.position.take().ok_or_else(|| {
                Error::Exchange(format!("no open position to reduce for {}", intent.symbol))
            })?;
            let sign = match open.side {
                OrderSide::Buy => 1.0,
                OrderSide::Sell => -1.0,
            };
            let pnl = (fill_price - open.entry_price) * open.quantity * sign;
            ledger.equity += pnl;
            debug!(pnl, equity = ledger.equity, "Paper position closed");
        } else {
            if ledger.position.is_some() {
                return Err(Error::Exchange(format!(
                    "paper account already holds a position in {}",
                    intent.symbol
                )));
            }
            ledger.position = Some(PaperPosition {
                side: intent.side,
                entry_price: fill_price,
                quantity: intent.quantity,
            });
        }

        debug!(
            symbol = %intent.symbol,
            side = %intent.side,
            reference = intent.reference_price,
            fill = fill_price,
            qty = intent.quantity,
            "Paper fill simulated"
        );

        Ok(Fill {
            order_id: intent.id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            fill_price,
            quantity: intent.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn account_equity(&self) -> Result<f64> {
        Ok(self.ledger.read().await.equity)
    }
}
