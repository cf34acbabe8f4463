use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use fablepress_core::models::{
    FulfilmentEvent, FulfilmentProvider, FulfilmentStatus, Order, OrderItem,
};
use fablepress_core::notify::DocumentRenderer;
use fablepress_core::provider::SubmissionContext;
use fablepress_core::repository::{EventRepository, ItemUpdate, OrderRepository, StorybookRepository};
use fablepress_core::{FulfilmentError, FulfilmentResult, OrderStatus};

use crate::providers::ProviderRegistry;

/// One successfully submitted provider order.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOrderRef {
    pub provider: FulfilmentProvider,
    pub provider_order_id: String,
    pub item_ids: Vec<Uuid>,
}

/// One item that could not be routed, with the triggering error's message.
/// Validation failures and provider rejections share this shape: from the
/// operator's view the only thing that matters is "this item could not be
/// fulfilled and here is why".
#[derive(Debug, Clone, Serialize)]
pub struct RoutingFailure {
    pub item_id: Uuid,
    pub provider: FulfilmentProvider,
    pub error: String,
}

/// Outcome of one routing call. Partial success is an expected outcome, not
/// an exceptional one; `success` is true only with zero errors.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingReport {
    pub success: bool,
    pub provider_orders: Vec<ProviderOrderRef>,
    pub errors: Vec<RoutingFailure>,
}

/// Partitions an order's items by provider and submits each partition to its
/// adapter, tolerating per-partition failure. Retries are an operator
/// concern; this never retries on its own.
pub struct OrderRouter {
    orders: Arc<dyn OrderRepository>,
    events: Arc<dyn EventRepository>,
    storybooks: Arc<dyn StorybookRepository>,
    renderer: Arc<dyn DocumentRenderer>,
    registry: ProviderRegistry,
}

impl OrderRouter {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        events: Arc<dyn EventRepository>,
        storybooks: Arc<dyn StorybookRepository>,
        renderer: Arc<dyn DocumentRenderer>,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            orders,
            events,
            storybooks,
            renderer,
            registry,
        }
    }

    pub async fn route_order(&self, order_id: Uuid) -> FulfilmentResult<RoutingReport> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| FulfilmentError::NotFound(format!("order {order_id}")))?;
        if order.items.is_empty() {
            return Err(FulfilmentError::NotFound(format!(
                "order {order_id} has no line items to route"
            )));
        }

        // SENT and FULFILLED items are already with their provider; routing
        // them again would place duplicate provider orders. Only PENDING
        // items and FAILED leftovers from an earlier attempt go out.
        let routable: Vec<OrderItem> = order
            .items
            .iter()
            .filter(|i| i.fulfilment_status.is_routable())
            .cloned()
            .collect();
        if routable.is_empty() {
            return Err(FulfilmentError::Validation(format!(
                "order {order_id} has no items awaiting fulfilment"
            )));
        }

        let partitions = partition_by_provider(&routable);
        let mut provider_orders = Vec::new();
        let mut errors = Vec::new();

        for (provider, items) in partitions {
            match self.submit_partition(&order, provider, &items).await {
                Ok(provider_order_id) => {
                    for item in &items {
                        let advanced = self
                            .orders
                            .mark_item_submitted(item.id, &provider_order_id)
                            .await?;
                        if !advanced {
                            // A webhook overtook the submission; the item is
                            // already past SENT.
                            tracing::debug!(
                                item_id = %item.id,
                                provider = %provider,
                                "item status already ahead of submission"
                            );
                        }
                    }
                    self.log_submission(&order, provider, &items, &provider_order_id)
                        .await?;
                    tracing::info!(
                        order_id = %order.id,
                        provider = %provider,
                        provider_order_id = %provider_order_id,
                        items = items.len(),
                        "provider order submitted"
                    );
                    provider_orders.push(ProviderOrderRef {
                        provider,
                        provider_order_id,
                        item_ids: items.iter().map(|i| i.id).collect(),
                    });
                }
                Err(e) => {
                    // A partition's failure is isolated; siblings still ship.
                    let message = e.to_string();
                    tracing::warn!(
                        order_id = %order.id,
                        provider = %provider,
                        error = %message,
                        "provider submission failed"
                    );
                    for item in &items {
                        self.orders
                            .transition_item(
                                item.id,
                                FulfilmentStatus::Failed,
                                ItemUpdate::default(),
                            )
                            .await?;
                        errors.push(RoutingFailure {
                            item_id: item.id,
                            provider,
                            error: message.clone(),
                        });
                    }
                }
            }
        }

        if !provider_orders.is_empty() {
            self.orders
                .update_order_status(order.id, OrderStatus::Processing)
                .await?;
        }

        Ok(RoutingReport {
            success: errors.is_empty(),
            provider_orders,
            errors,
        })
    }

    async fn submit_partition(
        &self,
        order: &Order,
        provider: FulfilmentProvider,
        items: &[OrderItem],
    ) -> FulfilmentResult<String> {
        let adapter =
            self.registry
                .get(provider)
                .ok_or_else(|| FulfilmentError::NotConfigured {
                    provider: provider.to_string(),
                    missing: "adapter".to_string(),
                })?;
        let ctx = self.build_submission_context(items).await?;
        adapter.submit_order(order, items, &ctx).await
    }

    /// Resolve product-specific preconditions before any billable provider
    /// call. Book items must reference a finished storybook; its document is
    /// rendered lazily and the URL cached on the composition.
    async fn build_submission_context(
        &self,
        items: &[OrderItem],
    ) -> FulfilmentResult<SubmissionContext> {
        let mut ctx = SubmissionContext::default();
        for item in items {
            let Some(storybook_id) = item.storybook_id else {
                continue;
            };
            let storybook = self
                .storybooks
                .get_storybook(storybook_id)
                .await?
                .ok_or_else(|| {
                    FulfilmentError::Validation(format!(
                        "storybook {storybook_id} referenced by item {} does not exist",
                        item.id
                    ))
                })?;
            if !storybook.is_finished {
                return Err(FulfilmentError::Validation(format!(
                    "storybook {storybook_id} is not finished; cannot print item {}",
                    item.id
                )));
            }
            let url = match &storybook.pdf_url {
                Some(url) => url.clone(),
                None => {
                    let url = self.renderer.render_pdf(&storybook).await?;
                    self.storybooks.set_pdf_url(storybook.id, &url).await?;
                    url
                }
            };
            ctx.document_urls.insert(item.id, url);
        }
        Ok(ctx)
    }

    async fn log_submission(
        &self,
        order: &Order,
        provider: FulfilmentProvider,
        items: &[OrderItem],
        provider_order_id: &str,
    ) -> FulfilmentResult<()> {
        // One audit row per partition, keyed to the partition's first item.
        let event = FulfilmentEvent::new(
            items[0].id,
            provider,
            "order_created".to_string(),
            serde_json::json!({
                "order_id": order.id,
                "provider_order_id": provider_order_id,
                "item_ids": items.iter().map(|i| i.id).collect::<Vec<_>>(),
            }),
            format!("order_created:{provider}:{provider_order_id}"),
        );
        let event_id = event.id;
        if self.events.append(&event).await? {
            self.events.mark_processed(event_id).await?;
        }
        Ok(())
    }
}

/// Group items by provider, preserving first-seen provider order so reports
/// are deterministic.
fn partition_by_provider(items: &[OrderItem]) -> Vec<(FulfilmentProvider, Vec<OrderItem>)> {
    let mut partitions: Vec<(FulfilmentProvider, Vec<OrderItem>)> = Vec::new();
    for item in items {
        match partitions.iter_mut().find(|(p, _)| *p == item.provider) {
            Some((_, bucket)) => bucket.push(item.clone()),
            None => partitions.push((item.provider, vec![item.clone()])),
        }
    }
    partitions
}
