use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    FulfilmentEvent, FulfilmentProvider, FulfilmentStatus, Order, OrderItem, OrderStatus, Storybook,
};
use crate::FulfilmentResult;

/// Fields a single item transition may touch, applied atomically with the
/// status write.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub fulfilment_order_id: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
}

/// Repository trait for order and order-item access.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, id: Uuid) -> FulfilmentResult<Option<Order>>;

    /// Reverse lookup: which order owns the item carrying this provider
    /// order id.
    async fn find_order_by_fulfilment_order_id(
        &self,
        provider: FulfilmentProvider,
        provider_order_id: &str,
    ) -> FulfilmentResult<Option<Order>>;

    /// Serialised read-modify-write of one item row. The implementation must
    /// lock the row (or equivalent), re-check the state machine guard against
    /// the current value, and apply `update` together with the status in one
    /// transaction. Returns false, writing nothing, when the guard rejects a
    /// stale transition or the item already holds `new_status`.
    async fn transition_item(
        &self,
        item_id: Uuid,
        new_status: FulfilmentStatus,
        update: ItemUpdate,
    ) -> FulfilmentResult<bool>;

    /// Submission write for the router: records the provider's order id and
    /// marks the item SENT. Unlike `transition_item` this may take an item
    /// out of FAILED — resubmission is the operator's retry path, the one
    /// transition the event guard does not cover. The provider order id is
    /// recorded even when the status write is skipped (a webhook that
    /// overtook the submission already fulfilled the item). Returns whether
    /// the status changed.
    async fn mark_item_submitted(
        &self,
        item_id: Uuid,
        provider_order_id: &str,
    ) -> FulfilmentResult<bool>;

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> FulfilmentResult<()>;

    async fn list_items(&self, order_id: Uuid) -> FulfilmentResult<Vec<OrderItem>>;
}

/// Append-only fulfilment event log.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert-if-absent keyed on the event's dedupe key. Returns false when
    /// a row with the same key already exists, which is how a retried
    /// delivery is detected.
    async fn append(&self, event: &FulfilmentEvent) -> FulfilmentResult<bool>;

    async fn mark_processed(&self, event_id: Uuid) -> FulfilmentResult<()>;

    async fn list_for_item(&self, order_item_id: Uuid) -> FulfilmentResult<Vec<FulfilmentEvent>>;
}

/// Read/write surface over storybook compositions owned by the generation
/// pipeline. This engine only checks readiness and caches the rendered
/// document URL.
#[async_trait]
pub trait StorybookRepository: Send + Sync {
    async fn get_storybook(&self, id: Uuid) -> FulfilmentResult<Option<Storybook>>;

    /// Persist the rendered document URL so it is never regenerated.
    async fn set_pdf_url(&self, id: Uuid, url: &str) -> FulfilmentResult<()>;
}
