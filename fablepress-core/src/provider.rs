use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{FulfilmentProvider, FulfilmentStatus, Order, OrderItem};
use crate::FulfilmentResult;

/// What kind of lifecycle notification a webhook carries, after the adapter
/// has translated the provider's own event naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    /// Package left the provider; tracking fields are expected.
    Shipped,
    /// Provider reports delivery to the customer.
    Delivered,
    /// Provider gave up on the order.
    Failed,
    /// Generic progress update carrying a provider status string.
    StatusChanged,
}

/// A provider webhook, normalised into fields the reconciler understands.
/// Everything provider-specific stays inside the adapter's `parse_webhook`.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub provider: FulfilmentProvider,
    pub kind: ProviderEventKind,
    /// The provider's own name for the event, kept for the audit log.
    pub event_type: String,
    /// The provider's event/delivery identifier, when one is present.
    pub event_id: Option<String>,
    /// Our order id as echoed back by the provider (`external_id`).
    pub external_order_id: Option<String>,
    /// The provider's own order identifier.
    pub provider_order_id: Option<String>,
    /// Provider status vocabulary, for `StatusChanged` events.
    pub provider_status: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    /// Raw payload, stored verbatim on the fulfilment event row.
    pub payload: serde_json::Value,
}

/// Per-partition context the router resolves before submission. Today this
/// carries the rendered document for printed-book orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionContext {
    pub document_urls: std::collections::HashMap<uuid::Uuid, String>,
}

impl SubmissionContext {
    pub fn document_url_for(&self, item_id: uuid::Uuid) -> Option<&str> {
        self.document_urls.get(&item_id).map(String::as_str)
    }
}

/// Capability set implemented once per external provider: submit an order,
/// authenticate inbound webhooks, and translate the provider's status
/// vocabulary. Selected by `FulfilmentProvider` through the registry, never
/// by a conditional chain.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> FulfilmentProvider;

    /// Build the provider payload and call its order-creation endpoint.
    /// Returns the provider's own order identifier. A provider-reported
    /// rejection surfaces as `FulfilmentError::Provider` carrying the
    /// provider's message verbatim.
    async fn submit_order(
        &self,
        order: &Order,
        items: &[OrderItem],
        ctx: &SubmissionContext,
    ) -> FulfilmentResult<String>;

    /// Provider-specific authenticity check on a raw webhook body.
    /// `credential` is whatever the transport presented alongside the body
    /// (the bearer token for header-authenticated providers; unused for
    /// body-signature providers). Must not trust payload-declared fields and
    /// must compare in constant time.
    fn verify_webhook(&self, raw_payload: &[u8], credential: Option<&str>)
        -> FulfilmentResult<bool>;

    /// Extract the normalised event from a raw webhook body.
    fn parse_webhook(&self, raw_payload: &[u8]) -> FulfilmentResult<ProviderEvent>;

    /// Fixed lookup table from the provider's status vocabulary to ours.
    /// Unrecognised statuses map to `Sent` ("still in progress") so a benign
    /// new provider status can never corrupt state.
    fn map_status(&self, provider_status: &str) -> FulfilmentStatus;
}
