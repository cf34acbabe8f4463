use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use fablepress_core::models::{FulfilmentEvent, FulfilmentProvider, FulfilmentStatus, Order, OrderItem};
use fablepress_core::notify::ShippingNotifier;
use fablepress_core::provider::{ProviderAdapter, ProviderEvent, ProviderEventKind};
use fablepress_core::repository::{EventRepository, ItemUpdate, OrderRepository};
use fablepress_core::{FulfilmentResult, OrderStatus};

use crate::aggregator::StatusAggregator;
use crate::providers::ProviderRegistry;

/// Applies a verified provider webhook to the owning order item and
/// recomputes the order status. Authentication happens at the transport
/// layer before this is invoked.
///
/// Nothing on this path raises for conditions the provider cannot fix: a
/// malformed or unmatched delivery is logged and dropped, because an error
/// response would make the provider retry it forever.
pub struct WebhookReconciler {
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventRepository>,
    notifier: Arc<dyn ShippingNotifier>,
    registry: ProviderRegistry,
    aggregator: StatusAggregator,
}

impl WebhookReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        events: Arc<dyn EventRepository>,
        notifier: Arc<dyn ShippingNotifier>,
        registry: ProviderRegistry,
    ) -> Self {
        let aggregator = StatusAggregator::new(orders.clone());
        Self {
            orders,
            events,
            notifier,
            registry,
            aggregator,
        }
    }

    pub async fn handle_webhook(
        &self,
        provider: FulfilmentProvider,
        raw_payload: &[u8],
    ) -> FulfilmentResult<()> {
        let Some(adapter) = self.registry.get(provider) else {
            tracing::warn!(%provider, "webhook for provider without a registered adapter");
            return Ok(());
        };

        let event = match adapter.parse_webhook(raw_payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%provider, error = %e, "dropping malformed webhook");
                return Ok(());
            }
        };

        let Some(order) = self.locate_order(&event).await? else {
            // An unmatched webhook for an order we have no record of is not
            // a system failure. No event row, nothing raised.
            tracing::debug!(
                %provider,
                event_type = %event.event_type,
                "webhook matched no order; dropped"
            );
            return Ok(());
        };

        let Some(item) = owning_item(&order, &event) else {
            tracing::warn!(
                %provider,
                order_id = %order.id,
                "webhook matched an order but none of its items"
            );
            return Ok(());
        };

        let dedupe_key = dedupe_key(&event, item.id);
        let log_entry = FulfilmentEvent::new(
            item.id,
            provider,
            event.event_type.clone(),
            event.payload.clone(),
            dedupe_key,
        );
        if !self.events.append(&log_entry).await? {
            // At-least-once delivery: same physical webhook again. The first
            // delivery owns all side effects.
            tracing::info!(
                %provider,
                order_id = %order.id,
                event_type = %event.event_type,
                "duplicate webhook delivery ignored"
            );
            return Ok(());
        }

        self.apply_event(&order, &item, adapter.as_ref(), &event)
            .await?;

        self.aggregator.recompute(order.id).await?;
        if event.kind == ProviderEventKind::Delivered {
            self.confirm_delivery(order.id).await?;
        }

        self.events.mark_processed(log_entry.id).await?;
        Ok(())
    }

    async fn apply_event(
        &self,
        order: &Order,
        item: &OrderItem,
        adapter: &dyn ProviderAdapter,
        event: &ProviderEvent,
    ) -> FulfilmentResult<()> {
        match event.kind {
            ProviderEventKind::Shipped | ProviderEventKind::Delivered => {
                let applied = self
                    .orders
                    .transition_item(
                        item.id,
                        FulfilmentStatus::Fulfilled,
                        ItemUpdate {
                            tracking_number: event.tracking_number.clone(),
                            tracking_url: event.tracking_url.clone(),
                            ..Default::default()
                        },
                    )
                    .await?;
                if applied && event.kind == ProviderEventKind::Shipped {
                    self.dispatch_shipping_notification(order.id, event);
                }
            }
            ProviderEventKind::Failed => {
                self.orders
                    .transition_item(item.id, FulfilmentStatus::Failed, ItemUpdate::default())
                    .await?;
                // No compensating action; an operator picks this up.
                tracing::warn!(
                    order_id = %order.id,
                    item_id = %item.id,
                    provider = %event.provider,
                    event_type = %event.event_type,
                    "provider reported fulfilment failure"
                );
            }
            ProviderEventKind::StatusChanged => {
                let mapped = adapter.map_status(event.provider_status.as_deref().unwrap_or(""));
                let applied = self
                    .orders
                    .transition_item(item.id, mapped, ItemUpdate::default())
                    .await?;
                if !applied {
                    tracing::debug!(
                        item_id = %item.id,
                        status = mapped.as_str(),
                        "stale status update rejected by transition guard"
                    );
                }
            }
        }
        Ok(())
    }

    /// Best effort and detachable: the webhook acknowledgement never waits
    /// on the notification transport.
    fn dispatch_shipping_notification(&self, order_id: Uuid, event: &ProviderEvent) {
        let Some(tracking_number) = event.tracking_number.clone() else {
            tracing::warn!(%order_id, "shipment event without tracking number; no notification");
            return;
        };
        let notifier = self.notifier.clone();
        let tracking_url = event.tracking_url.clone();
        let carrier = event.carrier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier
                .notify_shipped(
                    order_id,
                    &tracking_number,
                    tracking_url.as_deref(),
                    carrier.as_deref(),
                )
                .await
            {
                tracing::warn!(%order_id, error = %e, "shipping notification failed");
            }
        });
    }

    /// Delivery confirmation rides the same mechanism as shipment: once the
    /// projection says all items are fulfilled, a delivered-type event moves
    /// the order to its final state.
    async fn confirm_delivery(&self, order_id: Uuid) -> FulfilmentResult<()> {
        if let Some(order) = self.orders.get_order(order_id).await? {
            if order.status == OrderStatus::Shipped {
                self.orders
                    .update_order_status(order_id, OrderStatus::Delivered)
                    .await?;
            }
        }
        Ok(())
    }

    async fn locate_order(&self, event: &ProviderEvent) -> FulfilmentResult<Option<Order>> {
        // First the explicit external reference the provider echoes back.
        if let Some(external) = &event.external_order_id {
            if let Ok(order_id) = Uuid::parse_str(external) {
                if let Some(order) = self.orders.get_order(order_id).await? {
                    return Ok(Some(order));
                }
            }
        }
        // Then a reverse lookup by the provider's own order id.
        if let Some(provider_order_id) = &event.provider_order_id {
            return self
                .orders
                .find_order_by_fulfilment_order_id(event.provider, provider_order_id)
                .await;
        }
        Ok(None)
    }
}

/// The order's first item carrying the event's provider order id, else its
/// first item for that provider.
fn owning_item(order: &Order, event: &ProviderEvent) -> Option<OrderItem> {
    if let Some(provider_order_id) = &event.provider_order_id {
        if let Some(item) = order.item_by_fulfilment_order_id(provider_order_id) {
            return Some(item.clone());
        }
    }
    order
        .items
        .iter()
        .find(|i| i.provider == event.provider)
        .cloned()
}

/// Stable key for at-most-once processing. Providers that send an event id
/// use it directly; otherwise the key is a digest of the raw payload, so a
/// byte-identical redelivery collides and a genuinely new event does not.
fn dedupe_key(event: &ProviderEvent, item_id: Uuid) -> String {
    match &event.event_id {
        Some(event_id) => format!("{}:{}:{}", event.provider, event.event_type, event_id),
        None => {
            let mut hasher = Sha256::new();
            hasher.update(item_id.as_bytes());
            hasher.update(event.payload.to_string().as_bytes());
            format!("{}:{}", event.provider, hex::encode(hasher.finalize()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider_event(event_id: Option<&str>, payload: serde_json::Value) -> ProviderEvent {
        ProviderEvent {
            provider: FulfilmentProvider::Blurb,
            kind: ProviderEventKind::Shipped,
            event_type: "order_shipped".to_string(),
            event_id: event_id.map(String::from),
            external_order_id: None,
            provider_order_id: None,
            provider_status: None,
            tracking_number: None,
            tracking_url: None,
            carrier: None,
            payload,
        }
    }

    #[test]
    fn dedupe_key_is_stable_across_redelivery() {
        let item_id = Uuid::new_v4();
        let payload = json!({ "event": "order_shipped", "order_id": "bl_1" });
        let a = dedupe_key(&provider_event(None, payload.clone()), item_id);
        let b = dedupe_key(&provider_event(None, payload), item_id);
        assert_eq!(a, b);
    }

    #[test]
    fn dedupe_key_distinguishes_events() {
        let item_id = Uuid::new_v4();
        let a = dedupe_key(
            &provider_event(None, json!({ "event": "order_shipped", "seq": 1 })),
            item_id,
        );
        let b = dedupe_key(
            &provider_event(None, json!({ "event": "order_shipped", "seq": 2 })),
            item_id,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn provider_event_id_takes_precedence() {
        let item_id = Uuid::new_v4();
        let key = dedupe_key(&provider_event(Some("evt_9"), json!({})), item_id);
        assert_eq!(key, "BLURB:order_shipped:evt_9");
    }
}
