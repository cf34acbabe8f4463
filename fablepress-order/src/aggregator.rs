use std::sync::Arc;

use uuid::Uuid;

use fablepress_core::models::{FulfilmentStatus, OrderStatus};
use fablepress_core::repository::OrderRepository;
use fablepress_core::{FulfilmentError, FulfilmentResult};

/// Derive the order-level status from its items' fulfilment statuses.
///
/// Returns `None` when the current status should be retained: a mixed set of
/// items, or a status owned by flows outside this engine (cancellation,
/// refund, delivery confirmation).
pub fn derive_order_status(
    current: OrderStatus,
    item_statuses: &[FulfilmentStatus],
) -> Option<OrderStatus> {
    if current.is_externally_owned() || item_statuses.is_empty() {
        return None;
    }

    if item_statuses
        .iter()
        .all(|s| *s == FulfilmentStatus::Fulfilled)
    {
        return Some(OrderStatus::Shipped);
    }

    if item_statuses.iter().all(|s| *s == FulfilmentStatus::Sent) {
        return Some(OrderStatus::Processing);
    }

    None
}

/// Recomputes the cached order status after an item status change. The order
/// status is a projection of item statuses, never set independently here.
pub struct StatusAggregator {
    orders: Arc<dyn OrderRepository>,
}

impl StatusAggregator {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Apply the derivation rule and persist only when the status changes.
    /// Returns the effective order status.
    pub async fn recompute(&self, order_id: Uuid) -> FulfilmentResult<OrderStatus> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| FulfilmentError::NotFound(format!("order {order_id}")))?;

        let item_statuses: Vec<_> = order.items.iter().map(|i| i.fulfilment_status).collect();
        match derive_order_status(order.status, &item_statuses) {
            Some(next) if next != order.status => {
                self.orders.update_order_status(order_id, next).await?;
                tracing::info!(%order_id, status = next.as_str(), "order status recomputed");
                Ok(next)
            }
            Some(unchanged) => Ok(unchanged),
            None => Ok(order.status),
        }
    }
}
