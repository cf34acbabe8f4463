use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use fablepress_core::models::{FulfilmentEvent, FulfilmentProvider};
use fablepress_core::repository::EventRepository;
use fablepress_core::{FulfilmentError, FulfilmentResult};

pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    order_item_id: Uuid,
    provider: String,
    event_type: String,
    payload: serde_json::Value,
    dedupe_key: String,
    processed: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn storage(e: impl std::fmt::Display) -> FulfilmentError {
    FulfilmentError::Storage(e.to_string())
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn append(&self, event: &FulfilmentEvent) -> FulfilmentResult<bool> {
        // The unique index on dedupe_key makes concurrent duplicate
        // deliveries race safely: exactly one insert wins.
        let result = sqlx::query(
            "INSERT INTO fulfilment_events \
             (id, order_item_id, provider, event_type, payload, dedupe_key, processed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (dedupe_key) DO NOTHING",
        )
        .bind(event.id)
        .bind(event.order_item_id)
        .bind(event.provider.as_str())
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.dedupe_key)
        .bind(event.processed)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_processed(&self, event_id: Uuid) -> FulfilmentResult<()> {
        sqlx::query("UPDATE fulfilment_events SET processed = TRUE WHERE id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list_for_item(&self, order_item_id: Uuid) -> FulfilmentResult<Vec<FulfilmentEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, order_item_id, provider, event_type, payload, dedupe_key, processed, \
             created_at FROM fulfilment_events WHERE order_item_id = $1 ORDER BY created_at",
        )
        .bind(order_item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter()
            .map(|row| {
                let provider = FulfilmentProvider::parse(&row.provider).ok_or_else(|| {
                    FulfilmentError::Storage(format!("unknown provider tag: {}", row.provider))
                })?;
                Ok(FulfilmentEvent {
                    id: row.id,
                    order_item_id: row.order_item_id,
                    provider,
                    event_type: row.event_type,
                    payload: row.payload,
                    dedupe_key: row.dedupe_key,
                    processed: row.processed,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}
