use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status in the lifecycle.
///
/// Once an order has items, `Processing`/`Shipped`/`Delivered` are a cached
/// projection of the items' fulfilment statuses. `Cancelled` and `Refunded`
/// are set by payment/refund flows outside this engine and are never
/// overwritten by the aggregator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PAID" => Some(OrderStatus::Paid),
            "PROCESSING" => Some(OrderStatus::Processing),
            "SHIPPED" => Some(OrderStatus::Shipped),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// Statuses owned by flows outside this engine. The aggregator must not
    /// move an order out of these.
    pub fn is_externally_owned(&self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Delivered
        )
    }
}

/// Per-line-item lifecycle state as tracked by this system, distinct from any
/// provider's own status vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfilmentStatus {
    Pending,
    Sent,
    Fulfilled,
    Failed,
}

impl FulfilmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfilmentStatus::Pending => "PENDING",
            FulfilmentStatus::Sent => "SENT",
            FulfilmentStatus::Fulfilled => "FULFILLED",
            FulfilmentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(FulfilmentStatus::Pending),
            "SENT" => Some(FulfilmentStatus::Sent),
            "FULFILLED" => Some(FulfilmentStatus::Fulfilled),
            "FAILED" => Some(FulfilmentStatus::Failed),
            _ => None,
        }
    }

    /// Whether the router should pick this item up. SENT and FULFILLED items
    /// are already with a provider; resubmitting them would create duplicate
    /// provider orders. FAILED items are retried through resubmission.
    pub fn is_routable(&self) -> bool {
        matches!(self, FulfilmentStatus::Pending | FulfilmentStatus::Failed)
    }

    /// State machine guard for event-driven transitions: PENDING → SENT →
    /// FULFILLED, FAILED reachable from PENDING or SENT. FULFILLED and FAILED
    /// are terminal here, so a stale event arriving after a newer one cannot
    /// roll an item backwards. Taking an item out of FAILED is the operator's
    /// resubmission path, which does not go through this guard.
    pub fn can_transition_to(&self, next: FulfilmentStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (FulfilmentStatus::Pending, FulfilmentStatus::Sent) => true,
            (FulfilmentStatus::Pending, FulfilmentStatus::Failed) => true,
            (FulfilmentStatus::Sent, FulfilmentStatus::Fulfilled) => true,
            (FulfilmentStatus::Sent, FulfilmentStatus::Failed) => true,
            // A shipment webhook can overtake the router's SENT write.
            (FulfilmentStatus::Pending, FulfilmentStatus::Fulfilled) => true,
            _ => false,
        }
    }
}

/// External print-on-demand fulfilment provider. Each variant has exactly one
/// adapter; an item is pinned to its provider at creation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfilmentProvider {
    Printful,
    Blurb,
}

impl FulfilmentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfilmentProvider::Printful => "PRINTFUL",
            FulfilmentProvider::Blurb => "BLURB",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRINTFUL" => Some(FulfilmentProvider::Printful),
            "BLURB" => Some(FulfilmentProvider::Blurb),
            _ => None,
        }
    }
}

impl std::fmt::Display for FulfilmentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured shipping/billing address, free-form fields.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Address {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub zip: String,
    pub country_code: String,
}

/// One customer purchase. Never deleted (legal retention).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub customer_name: String,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub shipping_address: Address,
    pub tracking_token: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(order_number: String, customer_email: String, customer_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_number,
            customer_email,
            customer_name,
            subtotal_cents: 0,
            shipping_cents: 0,
            total_cents: 0,
            currency: "USD".to_string(),
            shipping_address: Address::default(),
            tracking_token: Uuid::new_v4().simple().to_string(),
            status: OrderStatus::Paid,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_item(&mut self, item: OrderItem) {
        self.subtotal_cents += item.total_price_cents;
        self.total_cents = self.subtotal_cents + self.shipping_cents;
        self.items.push(item);
        self.updated_at = Utc::now();
    }

    pub fn update_status(&mut self, new_status: OrderStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }

    /// Item lookup by the provider's own order identifier.
    pub fn item_by_fulfilment_order_id(&self, provider_order_id: &str) -> Option<&OrderItem> {
        self.items
            .iter()
            .find(|i| i.fulfilment_order_id.as_deref() == Some(provider_order_id))
    }
}

/// One line item, pinned to exactly one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_name: String,
    pub variant_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
    pub provider: FulfilmentProvider,
    /// The provider's own order identifier, set once submission succeeds.
    pub fulfilment_order_id: Option<String>,
    pub fulfilment_status: FulfilmentStatus,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    /// Book products reference the storybook composition they print.
    pub storybook_id: Option<Uuid>,
    /// Provider catalog identifiers (variant id, SKU, print file URLs).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn new(
        order_id: Uuid,
        product_name: String,
        variant_name: String,
        quantity: i32,
        unit_price_cents: i64,
        provider: FulfilmentProvider,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_name,
            variant_name,
            quantity,
            unit_price_cents,
            total_price_cents: unit_price_cents * quantity as i64,
            provider,
            fulfilment_order_id: None,
            fulfilment_status: FulfilmentStatus::Pending,
            tracking_number: None,
            tracking_url: None,
            storybook_id: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable audit record of one provider interaction for one order item.
/// Never mutated except to flip `processed`; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfilmentEvent {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub provider: FulfilmentProvider,
    pub event_type: String,
    /// Raw provider payload, stored verbatim for replay/debugging.
    pub payload: serde_json::Value,
    /// Stable key derived from the delivery; the unique index on this column
    /// is what makes duplicate deliveries at-most-once.
    pub dedupe_key: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl FulfilmentEvent {
    pub fn new(
        order_item_id: Uuid,
        provider: FulfilmentProvider,
        event_type: String,
        payload: serde_json::Value,
        dedupe_key: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_item_id,
            provider,
            event_type,
            payload,
            dedupe_key,
            processed: false,
            created_at: Utc::now(),
        }
    }
}

/// Storybook composition surface as seen by this engine. The composition
/// itself (pages, images) is owned by the generation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storybook {
    pub id: Uuid,
    pub title: String,
    pub is_finished: bool,
    pub pdf_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_guard_allows_forward_progress() {
        assert!(FulfilmentStatus::Pending.can_transition_to(FulfilmentStatus::Sent));
        assert!(FulfilmentStatus::Sent.can_transition_to(FulfilmentStatus::Fulfilled));
        assert!(FulfilmentStatus::Sent.can_transition_to(FulfilmentStatus::Failed));
        assert!(FulfilmentStatus::Pending.can_transition_to(FulfilmentStatus::Failed));
    }

    #[test]
    fn transition_guard_rejects_rollback() {
        assert!(!FulfilmentStatus::Fulfilled.can_transition_to(FulfilmentStatus::Sent));
        assert!(!FulfilmentStatus::Failed.can_transition_to(FulfilmentStatus::Sent));
        assert!(!FulfilmentStatus::Fulfilled.can_transition_to(FulfilmentStatus::Failed));
        assert!(!FulfilmentStatus::Failed.can_transition_to(FulfilmentStatus::Fulfilled));
    }

    #[test]
    fn only_pending_and_failed_items_are_routable() {
        assert!(FulfilmentStatus::Pending.is_routable());
        assert!(FulfilmentStatus::Failed.is_routable());
        assert!(!FulfilmentStatus::Sent.is_routable());
        assert!(!FulfilmentStatus::Fulfilled.is_routable());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn order_totals_follow_items() {
        let mut order = Order::new(
            "FP-1001".to_string(),
            "reader@example.com".to_string(),
            "Avery Reader".to_string(),
        );
        order.add_item(OrderItem::new(
            order.id,
            "Space Mug".to_string(),
            "11oz".to_string(),
            2,
            1500,
            FulfilmentProvider::Printful,
            serde_json::json!({}),
        ));
        assert_eq!(order.subtotal_cents, 3000);
        assert_eq!(order.total_cents, 3000);
    }
}
