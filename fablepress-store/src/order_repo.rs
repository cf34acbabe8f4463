use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use fablepress_core::models::{
    Address, FulfilmentProvider, FulfilmentStatus, Order, OrderItem, OrderStatus,
};
use fablepress_core::repository::{ItemUpdate, OrderRepository};
use fablepress_core::{FulfilmentError, FulfilmentResult};

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_email: String,
    customer_name: String,
    subtotal_cents: i64,
    shipping_cents: i64,
    total_cents: i64,
    currency: String,
    shipping_address: serde_json::Value,
    tracking_token: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_name: String,
    variant_name: String,
    quantity: i32,
    unit_price_cents: i64,
    total_price_cents: i64,
    provider: String,
    fulfilment_order_id: Option<String>,
    fulfilment_status: String,
    tracking_number: Option<String>,
    tracking_url: Option<String>,
    storybook_id: Option<Uuid>,
    metadata: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn storage(e: impl std::fmt::Display) -> FulfilmentError {
    FulfilmentError::Storage(e.to_string())
}

fn parse_provider(s: &str) -> FulfilmentResult<FulfilmentProvider> {
    FulfilmentProvider::parse(s)
        .ok_or_else(|| FulfilmentError::Storage(format!("unknown provider tag: {s}")))
}

fn parse_item_status(s: &str) -> FulfilmentResult<FulfilmentStatus> {
    FulfilmentStatus::parse(s)
        .ok_or_else(|| FulfilmentError::Storage(format!("unknown fulfilment status: {s}")))
}

impl OrderItemRow {
    fn into_item(self) -> FulfilmentResult<OrderItem> {
        Ok(OrderItem {
            id: self.id,
            order_id: self.order_id,
            product_name: self.product_name,
            variant_name: self.variant_name,
            quantity: self.quantity,
            unit_price_cents: self.unit_price_cents,
            total_price_cents: self.total_price_cents,
            provider: parse_provider(&self.provider)?,
            fulfilment_order_id: self.fulfilment_order_id,
            fulfilment_status: parse_item_status(&self.fulfilment_status)?,
            tracking_number: self.tracking_number,
            tracking_url: self.tracking_url,
            storybook_id: self.storybook_id,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> FulfilmentResult<Order> {
        let address: Address =
            serde_json::from_value(self.shipping_address).map_err(storage)?;
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| FulfilmentError::Storage(format!("unknown order status: {}", self.status)))?;
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            subtotal_cents: self.subtotal_cents,
            shipping_cents: self.shipping_cents,
            total_cents: self.total_cents,
            currency: self.currency,
            shipping_address: address,
            tracking_token: self.tracking_token,
            status,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_ORDER: &str = "SELECT id, order_number, customer_email, customer_name, \
    subtotal_cents, shipping_cents, total_cents, currency, shipping_address, tracking_token, \
    status, created_at, updated_at FROM orders WHERE id = $1";

const SELECT_ITEMS: &str = "SELECT id, order_id, product_name, variant_name, quantity, \
    unit_price_cents, total_price_cents, provider, fulfilment_order_id, fulfilment_status, \
    tracking_number, tracking_url, storybook_id, metadata, created_at, updated_at \
    FROM order_items WHERE order_id = $1 ORDER BY created_at";

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn get_order(&self, id: Uuid) -> FulfilmentResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(SELECT_ORDER)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        let Some(row) = row else { return Ok(None) };

        let item_rows = sqlx::query_as::<_, OrderItemRow>(SELECT_ITEMS)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        let items = item_rows
            .into_iter()
            .map(OrderItemRow::into_item)
            .collect::<FulfilmentResult<Vec<_>>>()?;

        Ok(Some(row.into_order(items)?))
    }

    async fn find_order_by_fulfilment_order_id(
        &self,
        provider: FulfilmentProvider,
        provider_order_id: &str,
    ) -> FulfilmentResult<Option<Order>> {
        let order_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT order_id FROM order_items WHERE provider = $1 AND fulfilment_order_id = $2 LIMIT 1",
        )
        .bind(provider.as_str())
        .bind(provider_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match order_id {
            Some(id) => self.get_order(id).await,
            None => Ok(None),
        }
    }

    async fn transition_item(
        &self,
        item_id: Uuid,
        new_status: FulfilmentStatus,
        update: ItemUpdate,
    ) -> FulfilmentResult<bool> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Row lock serialises concurrent webhook/router writes to this item;
        // the guard is re-checked against the locked value so a stale event
        // cannot interleave into a disallowed transition.
        let current: Option<String> =
            sqlx::query_scalar("SELECT fulfilment_status FROM order_items WHERE id = $1 FOR UPDATE")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
        let current = current
            .ok_or_else(|| FulfilmentError::NotFound(format!("order item {item_id}")))?;
        let current = parse_item_status(&current)?;

        if current == new_status || !current.can_transition_to(new_status) {
            tx.rollback().await.map_err(storage)?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE order_items SET fulfilment_status = $1, \
             fulfilment_order_id = COALESCE($2, fulfilment_order_id), \
             tracking_number = COALESCE($3, tracking_number), \
             tracking_url = COALESCE($4, tracking_url), \
             updated_at = NOW() WHERE id = $5",
        )
        .bind(new_status.as_str())
        .bind(update.fulfilment_order_id)
        .bind(update.tracking_number)
        .bind(update.tracking_url)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(true)
    }

    async fn mark_item_submitted(
        &self,
        item_id: Uuid,
        provider_order_id: &str,
    ) -> FulfilmentResult<bool> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT fulfilment_status FROM order_items WHERE id = $1 FOR UPDATE")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
        let current = current
            .ok_or_else(|| FulfilmentError::NotFound(format!("order item {item_id}")))?;
        let current = parse_item_status(&current)?;

        // A webhook that overtook the submission may already have fulfilled
        // the item; the provider order id is still recorded.
        let next = if current.is_routable() {
            FulfilmentStatus::Sent
        } else {
            current
        };
        sqlx::query(
            "UPDATE order_items SET fulfilment_status = $1, fulfilment_order_id = $2, \
             updated_at = NOW() WHERE id = $3",
        )
        .bind(next.as_str())
        .bind(provider_order_id)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(next != current)
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> FulfilmentResult<()> {
        sqlx::query("UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list_items(&self, order_id: Uuid) -> FulfilmentResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(SELECT_ITEMS)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.into_iter().map(OrderItemRow::into_item).collect()
    }
}
