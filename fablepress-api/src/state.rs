use std::sync::Arc;

use fablepress_core::repository::OrderRepository;
use fablepress_order::providers::ProviderRegistry;
use fablepress_order::{OrderRouter, WebhookReconciler};
use fablepress_store::RedisClient;

#[derive(Clone)]
pub struct AppState {
    pub redis: Arc<RedisClient>,
    pub orders: Arc<dyn OrderRepository>,
    pub registry: ProviderRegistry,
    pub router: Arc<OrderRouter>,
    pub reconciler: Arc<WebhookReconciler>,
}
