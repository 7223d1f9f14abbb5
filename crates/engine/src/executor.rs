use std::sync::Arc;

use tracing::{error, info};

use common::{ExchangeClient, Fill, OrderIntent, Result};

/// Submits order intents produced by position transitions.
///
/// This is the ONLY component that calls `ExchangeClient::place_order`.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }

    /// Place `intent` and wait for the fill. Failures are returned to the
    /// caller, which owns reconciliation.
    pub async fn execute(&self, intent: &OrderIntent) -> Result<Fill> {
        info!(
            symbol = %intent.symbol,
            side = %intent.side,
            qty = intent.quantity,
            reduce_only = intent.reduce_only,
            "Executing order"
        );

        match self.client.place_order(intent).await {
            Ok(fill) => {
                let slippage = fill.fill_price - intent.reference_price;
                info!(
                    symbol = %fill.symbol,
                    order_id = %fill.order_id,
                    price = fill.fill_price,
                    qty = fill.quantity,
                    slippage,
                    "Order filled"
                );
                Ok(fill)
            }
            Err(e) => {
                error!(symbol = %intent.symbol, error = %e, "Order submission failed");
                Err(e)
            }
        }
    }
}
