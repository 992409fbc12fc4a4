use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Error, ExecutionGateway, Fill, OpenPosition, Order, OrderSide, Result};

/// Simulated execution gateway.
///
/// Fills are simulated at the latest known price with configurable
/// slippage, stamped with the order's own submission time so that a
/// backtest replayed on the same bars produces an identical ledger.
/// No real orders are ever sent anywhere.
pub struct PaperGateway {
    /// Open simulated lots.
    positions: Arc<RwLock<Vec<OpenPosition>>>,
    /// Latest known price per symbol, pushed by the runner each cycle.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperGateway {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps = slippage_bps, "PaperGateway initialized");
        Self {
            positions: Arc::new(RwLock::new(Vec::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Update the latest price for a symbol (called once per cycle by the
    /// runner, before any submission for that cycle).
    pub async fn update_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let prices = self.prices.read().await;
        let mid_price = prices.get(&order.symbol).copied().ok_or_else(|| {
            Error::Gateway(format!(
                "PaperGateway has no price for '{}'. Ensure the runner pushes prices.",
                order.symbol
            ))
        })?;
        drop(prices);

        // Buys pay more, sells receive less
        let fill_price = match order.side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        };

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid = mid_price,
            fill = fill_price,
            qty = order.quantity,
            "paper fill simulated"
        );

        // A matching opposite-side lot is closed; otherwise a new lot
        // opens (a sell with nothing to close opens a short).
        let mut positions = self.positions.write().await;
        if let Some(idx) = positions
            .iter()
            .position(|p| p.symbol == order.symbol && p.side != order.side)
        {
            positions.remove(idx);
        } else {
            positions.push(OpenPosition {
                symbol: order.symbol.clone(),
                side: order.side,
                entry_price: fill_price,
                quantity: order.quantity,
            });
        }

        Ok(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: order.submitted_at,
        })
    }

    async fn open_positions(&self) -> Result<Vec<OpenPosition>> {
        Ok(self.positions.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::TimeInForce;

    fn order(side: OrderSide) -> Order {
        Order::market(
            "QQQ",
            side,
            10.0,
            TimeInForce::Day,
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn buy_fill_applies_positive_slippage() {
        let gateway = PaperGateway::new(10.0); // 10 bps
        gateway.update_price("QQQ", 1000.0).await;

        let fill = gateway.submit_order(&order(OrderSide::Buy)).await.unwrap();
        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        assert!(
            (fill.fill_price - expected).abs() < 1e-9,
            "buy fill {}, expected {}",
            fill.fill_price,
            expected
        );
    }

    #[tokio::test]
    async fn sell_fill_applies_negative_slippage() {
        let gateway = PaperGateway::new(10.0);
        gateway.update_price("QQQ", 1000.0).await;

        gateway.submit_order(&order(OrderSide::Buy)).await.unwrap();
        let fill = gateway.submit_order(&order(OrderSide::Sell)).await.unwrap();

        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((fill.fill_price - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fill_timestamp_is_submission_time() {
        let gateway = PaperGateway::new(0.0);
        gateway.update_price("QQQ", 500.0).await;
        let o = order(OrderSide::Buy);
        let fill = gateway.submit_order(&o).await.unwrap();
        assert_eq!(fill.timestamp, o.submitted_at);
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_gateway_error() {
        let gateway = PaperGateway::new(0.0);
        let err = gateway.submit_order(&order(OrderSide::Buy)).await;
        assert!(matches!(err, Err(Error::Gateway(_))));
    }

    #[tokio::test]
    async fn opposite_order_closes_the_lot() {
        let gateway = PaperGateway::new(0.0);
        gateway.update_price("QQQ", 500.0).await;

        gateway.submit_order(&order(OrderSide::Buy)).await.unwrap();
        assert_eq!(gateway.open_positions().await.unwrap().len(), 1);

        gateway.submit_order(&order(OrderSide::Sell)).await.unwrap();
        assert!(gateway.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sell_with_nothing_to_close_opens_a_short() {
        let gateway = PaperGateway::new(0.0);
        gateway.update_price("QQQ", 500.0).await;

        gateway.submit_order(&order(OrderSide::Sell)).await.unwrap();
        let positions = gateway.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, OrderSide::Sell);
    }
}
