use std::net::SocketAddr;
use std::sync::Arc;

use fablepress_api::{app, state::AppState};
use fablepress_order::providers::{BlurbAdapter, PrintfulAdapter, ProviderRegistry};
use fablepress_order::render::HttpDocumentRenderer;
use fablepress_order::{OrderRouter, WebhookReconciler};
use fablepress_store::{
    DbClient, EventProducer, PgEventRepository, PgOrderRepository, PgStorybookRepository,
    RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fablepress_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fablepress_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Fablepress API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let redis = RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");

    let notifier = EventProducer::new(&config.kafka.brokers, config.kafka.shipping_topic.clone())
        .expect("Failed to create Kafka producer");

    let registry = ProviderRegistry::new()
        .register(Arc::new(PrintfulAdapter::new(
            config.providers.printful.api_base.clone(),
            config.providers.printful.api_key.clone(),
            config.providers.printful.webhook_secret.clone(),
        )))
        .register(Arc::new(BlurbAdapter::new(
            config.providers.blurb.api_base.clone(),
            config.providers.blurb.api_key.clone(),
            config.providers.blurb.webhook_secret.clone(),
        )));

    let orders = Arc::new(PgOrderRepository::new(db.pool.clone()));
    let events = Arc::new(PgEventRepository::new(db.pool.clone()));
    let storybooks = Arc::new(PgStorybookRepository::new(db.pool.clone()));
    let renderer = Arc::new(HttpDocumentRenderer::new(config.renderer.base_url.clone()));

    let router = Arc::new(OrderRouter::new(
        orders.clone(),
        events.clone(),
        storybooks,
        renderer,
        registry.clone(),
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        orders.clone(),
        events,
        Arc::new(notifier),
        registry.clone(),
    ));

    let app_state = AppState {
        redis: Arc::new(redis),
        orders,
        registry,
        router,
        reconciler,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
