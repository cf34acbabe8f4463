//! End-to-end routing and reconciliation against in-memory stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use fablepress_core::models::{
    Address, FulfilmentEvent, FulfilmentProvider, FulfilmentStatus, Order, OrderItem, OrderStatus,
    Storybook,
};
use fablepress_core::notify::{DocumentRenderer, ShippingNotifier};
use fablepress_core::provider::{ProviderAdapter, ProviderEvent, SubmissionContext};
use fablepress_core::repository::{
    EventRepository, ItemUpdate, OrderRepository, StorybookRepository,
};
use fablepress_core::{FulfilmentError, FulfilmentResult};
use fablepress_order::providers::{BlurbAdapter, PrintfulAdapter, ProviderRegistry};
use fablepress_order::{OrderRouter, WebhookReconciler};

// ---------------------------------------------------------------------------
// In-memory infrastructure
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    events: Mutex<Vec<FulfilmentEvent>>,
    storybooks: Mutex<HashMap<Uuid, Storybook>>,
}

impl MemoryStore {
    fn insert_order(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    fn insert_storybook(&self, storybook: Storybook) {
        self.storybooks
            .lock()
            .unwrap()
            .insert(storybook.id, storybook);
    }

    fn order(&self, id: Uuid) -> Order {
        self.orders.lock().unwrap().get(&id).cloned().unwrap()
    }

    fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn get_order(&self, id: Uuid) -> FulfilmentResult<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_order_by_fulfilment_order_id(
        &self,
        provider: FulfilmentProvider,
        provider_order_id: &str,
    ) -> FulfilmentResult<Option<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| {
                o.items.iter().any(|i| {
                    i.provider == provider
                        && i.fulfilment_order_id.as_deref() == Some(provider_order_id)
                })
            })
            .cloned())
    }

    async fn transition_item(
        &self,
        item_id: Uuid,
        new_status: FulfilmentStatus,
        update: ItemUpdate,
    ) -> FulfilmentResult<bool> {
        let mut orders = self.orders.lock().unwrap();
        for order in orders.values_mut() {
            if let Some(item) = order.items.iter_mut().find(|i| i.id == item_id) {
                if item.fulfilment_status == new_status
                    || !item.fulfilment_status.can_transition_to(new_status)
                {
                    return Ok(false);
                }
                item.fulfilment_status = new_status;
                if let Some(id) = update.fulfilment_order_id {
                    item.fulfilment_order_id = Some(id);
                }
                if let Some(n) = update.tracking_number {
                    item.tracking_number = Some(n);
                }
                if let Some(u) = update.tracking_url {
                    item.tracking_url = Some(u);
                }
                return Ok(true);
            }
        }
        Err(FulfilmentError::NotFound(format!("item {item_id}")))
    }

    async fn mark_item_submitted(
        &self,
        item_id: Uuid,
        provider_order_id: &str,
    ) -> FulfilmentResult<bool> {
        let mut orders = self.orders.lock().unwrap();
        for order in orders.values_mut() {
            if let Some(item) = order.items.iter_mut().find(|i| i.id == item_id) {
                item.fulfilment_order_id = Some(provider_order_id.to_string());
                if item.fulfilment_status.is_routable() {
                    item.fulfilment_status = FulfilmentStatus::Sent;
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        Err(FulfilmentError::NotFound(format!("item {item_id}")))
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> FulfilmentResult<()> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| FulfilmentError::NotFound(format!("order {id}")))?;
        order.update_status(status);
        Ok(())
    }

    async fn list_items(&self, order_id: Uuid) -> FulfilmentResult<Vec<OrderItem>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .get(&order_id)
            .map(|o| o.items.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn append(&self, event: &FulfilmentEvent) -> FulfilmentResult<bool> {
        let mut events = self.events.lock().unwrap();
        if events.iter().any(|e| e.dedupe_key == event.dedupe_key) {
            return Ok(false);
        }
        events.push(event.clone());
        Ok(true)
    }

    async fn mark_processed(&self, event_id: Uuid) -> FulfilmentResult<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.processed = true;
        }
        Ok(())
    }

    async fn list_for_item(&self, order_item_id: Uuid) -> FulfilmentResult<Vec<FulfilmentEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.order_item_id == order_item_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StorybookRepository for MemoryStore {
    async fn get_storybook(&self, id: Uuid) -> FulfilmentResult<Option<Storybook>> {
        Ok(self.storybooks.lock().unwrap().get(&id).cloned())
    }

    async fn set_pdf_url(&self, id: Uuid, url: &str) -> FulfilmentResult<()> {
        if let Some(book) = self.storybooks.lock().unwrap().get_mut(&id) {
            book.pdf_url = Some(url.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    shipped: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl ShippingNotifier for RecordingNotifier {
    async fn notify_shipped(
        &self,
        order_id: Uuid,
        tracking_number: &str,
        _tracking_url: Option<&str>,
        _carrier: Option<&str>,
    ) -> FulfilmentResult<()> {
        self.shipped
            .lock()
            .unwrap()
            .push((order_id, tracking_number.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct CountingRenderer {
    renders: Mutex<u32>,
}

#[async_trait]
impl DocumentRenderer for CountingRenderer {
    async fn render_pdf(&self, storybook: &Storybook) -> FulfilmentResult<String> {
        *self.renders.lock().unwrap() += 1;
        Ok(format!("https://cdn.test/render/{}.pdf", storybook.id))
    }
}

/// Adapter with a scripted submission outcome; webhook methods delegate to
/// the real adapter so parsing stays faithful. Submission calls are counted
/// because every one of them would be billable against a real provider.
struct ScriptedAdapter {
    inner: Arc<dyn ProviderAdapter>,
    submit: Result<String, String>,
    submissions: Mutex<u32>,
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> FulfilmentProvider {
        self.inner.provider()
    }

    async fn submit_order(
        &self,
        _order: &Order,
        _items: &[OrderItem],
        ctx: &SubmissionContext,
    ) -> FulfilmentResult<String> {
        // Book submissions still insist on a rendered document, like the
        // real adapter does.
        *self.submissions.lock().unwrap() += 1;
        if self.provider() == FulfilmentProvider::Blurb && ctx.document_urls.is_empty() {
            return Err(FulfilmentError::Validation(
                "no rendered document for book printing".to_string(),
            ));
        }
        self.submit
            .clone()
            .map_err(FulfilmentError::Provider)
    }

    fn verify_webhook(&self, raw: &[u8], credential: Option<&str>) -> FulfilmentResult<bool> {
        self.inner.verify_webhook(raw, credential)
    }

    fn parse_webhook(&self, raw: &[u8]) -> FulfilmentResult<ProviderEvent> {
        self.inner.parse_webhook(raw)
    }

    fn map_status(&self, provider_status: &str) -> FulfilmentStatus {
        self.inner.map_status(provider_status)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn real_printful() -> Arc<dyn ProviderAdapter> {
    Arc::new(PrintfulAdapter::new(
        "https://api.printful.test".to_string(),
        Some("key".to_string()),
        Some("whsec_test".to_string()),
    ))
}

fn real_blurb() -> Arc<dyn ProviderAdapter> {
    Arc::new(BlurbAdapter::new(
        "https://api.blurb.test".to_string(),
        Some("key".to_string()),
        Some("tok_test".to_string()),
    ))
}

fn scripted_adapter(inner: Arc<dyn ProviderAdapter>, submit: Result<&str, &str>) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter {
        inner,
        submit: submit.map(String::from).map_err(String::from),
        submissions: Mutex::new(0),
    })
}

fn scripted(inner: Arc<dyn ProviderAdapter>, submit: Result<&str, &str>) -> Arc<dyn ProviderAdapter> {
    scripted_adapter(inner, submit)
}

/// Order with one merch item and one book item, plus its finished storybook.
fn seed_two_provider_order(store: &MemoryStore, book_ready: bool) -> (Order, Uuid, Uuid, Uuid) {
    let mut order = Order::new(
        "FP-1001".to_string(),
        "reader@example.com".to_string(),
        "Avery Reader".to_string(),
    );
    order.shipping_address = Address {
        name: "Avery Reader".to_string(),
        line1: "12 Fable Way".to_string(),
        line2: None,
        city: "Portland".to_string(),
        state: Some("OR".to_string()),
        zip: "97201".to_string(),
        country_code: "US".to_string(),
    };

    let merch = OrderItem::new(
        order.id,
        "Space Mug".to_string(),
        "11oz".to_string(),
        1,
        1500,
        FulfilmentProvider::Printful,
        json!({ "printful_variant_id": 4012 }),
    );
    let storybook_id = Uuid::new_v4();
    let mut book = OrderItem::new(
        order.id,
        "The Moon Garden".to_string(),
        "Hardcover 8x8".to_string(),
        1,
        3499,
        FulfilmentProvider::Blurb,
        json!({ "blurb_sku": "hardcover_8x8" }),
    );
    book.storybook_id = Some(storybook_id);

    let merch_id = merch.id;
    let book_id = book.id;
    order.add_item(merch);
    order.add_item(book);

    if book_ready {
        store.insert_storybook(Storybook {
            id: storybook_id,
            title: "The Moon Garden".to_string(),
            is_finished: true,
            pdf_url: None,
        });
    }
    store.insert_order(order.clone());
    (order, merch_id, book_id, storybook_id)
}

fn router_with(
    store: &Arc<MemoryStore>,
    renderer: &Arc<CountingRenderer>,
    registry: ProviderRegistry,
) -> OrderRouter {
    OrderRouter::new(
        store.clone(),
        store.clone(),
        store.clone(),
        renderer.clone(),
        registry,
    )
}

fn reconciler_with(
    store: &Arc<MemoryStore>,
    notifier: &Arc<RecordingNotifier>,
    registry: ProviderRegistry,
) -> WebhookReconciler {
    WebhookReconciler::new(store.clone(), store.clone(), notifier.clone(), registry)
}

/// Let detached notification tasks run to completion.
async fn drain_tasks() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn routing_both_providers_succeeds() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    let (order, merch_id, book_id, _) = seed_two_provider_order(&store, true);

    let registry = ProviderRegistry::new()
        .register(scripted(real_printful(), Ok("5501")))
        .register(scripted(real_blurb(), Ok("bl_4410")));
    let router = router_with(&store, &renderer, registry);

    let report = router.route_order(order.id).await.unwrap();
    assert!(report.success);
    assert_eq!(report.provider_orders.len(), 2);
    assert!(report.errors.is_empty());

    let order = store.order(order.id);
    assert_eq!(order.status, OrderStatus::Processing);
    let merch = order.items.iter().find(|i| i.id == merch_id).unwrap();
    let book = order.items.iter().find(|i| i.id == book_id).unwrap();
    assert_eq!(merch.fulfilment_status, FulfilmentStatus::Sent);
    assert_eq!(merch.fulfilment_order_id.as_deref(), Some("5501"));
    assert_eq!(book.fulfilment_status, FulfilmentStatus::Sent);
    assert_eq!(book.fulfilment_order_id.as_deref(), Some("bl_4410"));

    // One order_created audit row per partition.
    assert_eq!(store.event_count(), 2);
    // Document rendered once and cached back on the storybook.
    assert_eq!(*renderer.renders.lock().unwrap(), 1);
    let book_row = store
        .storybooks
        .lock()
        .unwrap()
        .values()
        .next()
        .cloned()
        .unwrap();
    assert!(book_row.pdf_url.is_some());
}

#[tokio::test]
async fn partition_failure_is_isolated() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    let (order, merch_id, book_id, _) = seed_two_provider_order(&store, true);

    let registry = ProviderRegistry::new()
        .register(scripted(real_printful(), Ok("5501")))
        .register(scripted(real_blurb(), Err("press is on fire")));
    let router = router_with(&store, &renderer, registry);

    let report = router.route_order(order.id).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.provider_orders.len(), 1);
    assert_eq!(report.provider_orders[0].provider, FulfilmentProvider::Printful);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].item_id, book_id);
    assert!(report.errors[0].error.contains("press is on fire"));

    let order = store.order(order.id);
    // Any successful partition still moves the order forward.
    assert_eq!(order.status, OrderStatus::Processing);
    let merch = order.items.iter().find(|i| i.id == merch_id).unwrap();
    let book = order.items.iter().find(|i| i.id == book_id).unwrap();
    assert_eq!(merch.fulfilment_status, FulfilmentStatus::Sent);
    assert_eq!(book.fulfilment_status, FulfilmentStatus::Failed);
    assert!(book.fulfilment_order_id.is_none());
}

#[tokio::test]
async fn missing_storybook_fails_only_the_book_partition() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    // Storybook row never created.
    let (order, merch_id, book_id, storybook_id) = seed_two_provider_order(&store, false);

    let registry = ProviderRegistry::new()
        .register(scripted(real_printful(), Ok("5501")))
        .register(scripted(real_blurb(), Ok("bl_4410")));
    let router = router_with(&store, &renderer, registry);

    let report = router.route_order(order.id).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.provider_orders.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].item_id, book_id);
    assert!(report.errors[0].error.contains(&storybook_id.to_string()));

    let order = store.order(order.id);
    assert_eq!(
        order
            .items
            .iter()
            .find(|i| i.id == merch_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Sent
    );
    assert_eq!(
        order
            .items
            .iter()
            .find(|i| i.id == book_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Failed
    );
    assert_eq!(*renderer.renders.lock().unwrap(), 0);
}

#[tokio::test]
async fn unfinished_storybook_fails_only_the_book_partition() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    let (order, merch_id, book_id, storybook_id) = seed_two_provider_order(&store, false);
    // The composition exists but is still being edited.
    store.insert_storybook(Storybook {
        id: storybook_id,
        title: "The Moon Garden".to_string(),
        is_finished: false,
        pdf_url: None,
    });

    let registry = ProviderRegistry::new()
        .register(scripted(real_printful(), Ok("5501")))
        .register(scripted(real_blurb(), Ok("bl_4410")));
    let router = router_with(&store, &renderer, registry);

    let report = router.route_order(order.id).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].item_id, book_id);
    assert!(report.errors[0].error.contains("not finished"));

    let order = store.order(order.id);
    assert_eq!(
        order
            .items
            .iter()
            .find(|i| i.id == merch_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Sent
    );
    assert_eq!(
        order
            .items
            .iter()
            .find(|i| i.id == book_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Failed
    );
    // No render attempted for an unfinished composition.
    assert_eq!(*renderer.renders.lock().unwrap(), 0);
}

#[tokio::test]
async fn rerouting_after_failure_resubmits_only_the_failed_partition() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    let (order, merch_id, book_id, _) = seed_two_provider_order(&store, true);

    // First attempt: the book press rejects its partition.
    let registry = ProviderRegistry::new()
        .register(scripted(real_printful(), Ok("5501")))
        .register(scripted(real_blurb(), Err("press is on fire")));
    let report = router_with(&store, &renderer, registry)
        .route_order(order.id)
        .await
        .unwrap();
    assert!(!report.success);

    // Second attempt: both providers are healthy. Only the FAILED book item
    // goes out; the merch item is already with its provider.
    let printful = scripted_adapter(real_printful(), Ok("5502"));
    let blurb = scripted_adapter(real_blurb(), Ok("bl_4411"));
    let registry = ProviderRegistry::new()
        .register(printful.clone())
        .register(blurb.clone());
    let report = router_with(&store, &renderer, registry)
        .route_order(order.id)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.provider_orders.len(), 1);
    assert_eq!(report.provider_orders[0].provider, FulfilmentProvider::Blurb);
    assert_eq!(report.provider_orders[0].item_ids, vec![book_id]);
    assert_eq!(*printful.submissions.lock().unwrap(), 0);
    assert_eq!(*blurb.submissions.lock().unwrap(), 1);

    let order = store.order(order.id);
    let merch = order.items.iter().find(|i| i.id == merch_id).unwrap();
    let book = order.items.iter().find(|i| i.id == book_id).unwrap();
    // Merch keeps its original provider order; the book now carries the
    // retry's.
    assert_eq!(merch.fulfilment_status, FulfilmentStatus::Sent);
    assert_eq!(merch.fulfilment_order_id.as_deref(), Some("5501"));
    assert_eq!(book.fulfilment_status, FulfilmentStatus::Sent);
    assert_eq!(book.fulfilment_order_id.as_deref(), Some("bl_4411"));
}

#[tokio::test]
async fn rerouting_a_fully_submitted_order_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    let (order, _, _, _) = seed_two_provider_order(&store, true);

    let printful = scripted_adapter(real_printful(), Ok("5501"));
    let blurb = scripted_adapter(real_blurb(), Ok("bl_4410"));
    let registry = ProviderRegistry::new()
        .register(printful.clone())
        .register(blurb.clone());
    let router = router_with(&store, &renderer, registry);

    router.route_order(order.id).await.unwrap();
    let second = router.route_order(order.id).await;

    assert!(matches!(second, Err(FulfilmentError::Validation(_))));
    // No second round of billable provider calls.
    assert_eq!(*printful.submissions.lock().unwrap(), 1);
    assert_eq!(*blurb.submissions.lock().unwrap(), 1);
}

#[tokio::test]
async fn unknown_order_fails_the_whole_call() {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(CountingRenderer::default());
    let router = router_with(&store, &renderer, ProviderRegistry::new());

    let result = router.route_order(Uuid::new_v4()).await;
    assert!(matches!(result, Err(FulfilmentError::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

fn blurb_shipped_body(provider_order_id: &str, event_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "order_shipped",
        "event_id": event_id,
        "order_id": provider_order_id,
        "tracking": { "number": "RR1234", "url": "https://track.test/RR1234", "carrier": "USPS" }
    }))
    .unwrap()
}

async fn route_fixture(
    store: &Arc<MemoryStore>,
) -> (Order, Uuid, Uuid) {
    let renderer = Arc::new(CountingRenderer::default());
    let (order, merch_id, book_id, _) = seed_two_provider_order(store, true);
    let registry = ProviderRegistry::new()
        .register(scripted(real_printful(), Ok("5501")))
        .register(scripted(real_blurb(), Ok("bl_4410")));
    router_with(store, &renderer, registry)
        .route_order(order.id)
        .await
        .unwrap();
    (order, merch_id, book_id)
}

#[tokio::test]
async fn shipment_webhook_fulfils_item_and_notifies_once() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, merch_id, book_id) = route_fixture(&store).await;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    // Printful confirms shipment of the merch item's provider order.
    let data = json!({
        "order": { "id": 5501, "external_id": order.id.to_string(), "status": "fulfilled" },
        "shipment": {
            "id": 9001,
            "tracking_number": "1Z999",
            "tracking_url": "https://track.test/1Z999",
            "carrier": "UPS"
        }
    });
    let body = serde_json::to_vec(&json!({ "type": "package_shipped", "data": data })).unwrap();

    reconciler
        .handle_webhook(FulfilmentProvider::Printful, &body)
        .await
        .unwrap();
    drain_tasks().await;

    let current = store.order(order.id);
    let merch = current.items.iter().find(|i| i.id == merch_id).unwrap();
    assert_eq!(merch.fulfilment_status, FulfilmentStatus::Fulfilled);
    assert_eq!(merch.tracking_number.as_deref(), Some("1Z999"));
    // Book item untouched, so the order stays in PROCESSING.
    assert_eq!(
        current
            .items
            .iter()
            .find(|i| i.id == book_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Sent
    );
    assert_eq!(current.status, OrderStatus::Processing);
    assert_eq!(notifier.shipped.lock().unwrap().len(), 1);

    // Book provider ships too: order becomes SHIPPED.
    reconciler
        .handle_webhook(
            FulfilmentProvider::Blurb,
            &blurb_shipped_body("bl_4410", "evt_81"),
        )
        .await
        .unwrap();
    drain_tasks().await;

    let current = store.order(order.id);
    assert_eq!(current.status, OrderStatus::Shipped);
    assert_eq!(notifier.shipped.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_delivery_is_a_no_op_beyond_logging() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, _merch_id, _book_id) = route_fixture(&store).await;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    let body = blurb_shipped_body("bl_4410", "evt_81");
    let events_before = store.event_count();

    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, &body)
        .await
        .unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, &body)
        .await
        .unwrap();
    drain_tasks().await;

    // Exactly one notification and one logged event for two deliveries.
    assert_eq!(notifier.shipped.lock().unwrap().len(), 1);
    assert_eq!(store.event_count(), events_before + 1);

    let current = store.order(order.id);
    let book = current
        .items
        .iter()
        .find(|i| i.provider == FulfilmentProvider::Blurb)
        .unwrap();
    assert_eq!(book.fulfilment_status, FulfilmentStatus::Fulfilled);
}

#[tokio::test]
async fn unmatched_webhook_is_dropped_silently() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, _, _) = route_fixture(&store).await;
    let events_before = store.event_count();
    let status_before = store.order(order.id).status;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    // Provider order id we have never seen.
    reconciler
        .handle_webhook(
            FulfilmentProvider::Blurb,
            &blurb_shipped_body("bl_9999", "evt_404"),
        )
        .await
        .unwrap();
    drain_tasks().await;

    assert_eq!(store.event_count(), events_before);
    assert_eq!(store.order(order.id).status, status_before);
    assert!(notifier.shipped.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_webhook_is_swallowed() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = ProviderRegistry::new().register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, b"not json at all")
        .await
        .unwrap();
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn failure_webhook_marks_item_failed_without_compensation() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, merch_id, _) = route_fixture(&store).await;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    let data = json!({ "order": { "id": 5501, "external_id": order.id.to_string(), "status": "failed" } });
    let body = serde_json::to_vec(&json!({ "type": "order_failed", "data": data })).unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Printful, &body)
        .await
        .unwrap();
    drain_tasks().await;

    let current = store.order(order.id);
    assert_eq!(
        current
            .items
            .iter()
            .find(|i| i.id == merch_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Failed
    );
    assert!(notifier.shipped.lock().unwrap().is_empty());
    // Failure of one item does not change the order's cached status.
    assert_eq!(current.status, OrderStatus::Processing);
}

#[tokio::test]
async fn status_change_webhook_applies_mapping_table() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, _, book_id) = route_fixture(&store).await;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    // "printing" maps to SENT, which the item already is: no-op.
    let body = serde_json::to_vec(&json!({
        "event": "order_status_changed",
        "event_id": "evt_10",
        "order_id": "bl_4410",
        "status": "printing"
    }))
    .unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, &body)
        .await
        .unwrap();

    let current = store.order(order.id);
    assert_eq!(
        current
            .items
            .iter()
            .find(|i| i.id == book_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Sent
    );

    // "shipped" maps to FULFILLED through the same table.
    let body = serde_json::to_vec(&json!({
        "event": "order_status_changed",
        "event_id": "evt_11",
        "order_id": "bl_4410",
        "status": "shipped"
    }))
    .unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, &body)
        .await
        .unwrap();

    let current = store.order(order.id);
    assert_eq!(
        current
            .items
            .iter()
            .find(|i| i.id == book_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Fulfilled
    );
}

#[tokio::test]
async fn stale_event_cannot_roll_back_a_fulfilled_item() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, _, book_id) = route_fixture(&store).await;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    reconciler
        .handle_webhook(
            FulfilmentProvider::Blurb,
            &blurb_shipped_body("bl_4410", "evt_81"),
        )
        .await
        .unwrap();
    drain_tasks().await;

    // An older progress update arrives after the shipment confirmation.
    let stale = serde_json::to_vec(&json!({
        "event": "order_status_changed",
        "event_id": "evt_80",
        "order_id": "bl_4410",
        "status": "printing"
    }))
    .unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, &stale)
        .await
        .unwrap();

    let current = store.order(order.id);
    assert_eq!(
        current
            .items
            .iter()
            .find(|i| i.id == book_id)
            .unwrap()
            .fulfilment_status,
        FulfilmentStatus::Fulfilled
    );
}

#[tokio::test]
async fn delivered_event_finalises_a_shipped_order() {
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (order, _, _) = route_fixture(&store).await;

    let registry = ProviderRegistry::new().register(real_printful()).register(real_blurb());
    let reconciler = reconciler_with(&store, &notifier, registry);

    // Both items ship.
    let data = json!({
        "order": { "id": 5501, "external_id": order.id.to_string(), "status": "fulfilled" },
        "shipment": { "id": 9001, "tracking_number": "1Z999", "carrier": "UPS" }
    });
    let body = serde_json::to_vec(&json!({ "type": "package_shipped", "data": data })).unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Printful, &body)
        .await
        .unwrap();
    reconciler
        .handle_webhook(
            FulfilmentProvider::Blurb,
            &blurb_shipped_body("bl_4410", "evt_81"),
        )
        .await
        .unwrap();
    drain_tasks().await;
    assert_eq!(store.order(order.id).status, OrderStatus::Shipped);

    let delivered = serde_json::to_vec(&json!({
        "event": "order_delivered",
        "event_id": "evt_90",
        "order_id": "bl_4410"
    }))
    .unwrap();
    reconciler
        .handle_webhook(FulfilmentProvider::Blurb, &delivered)
        .await
        .unwrap();
    drain_tasks().await;

    assert_eq!(store.order(order.id).status, OrderStatus::Delivered);
}
