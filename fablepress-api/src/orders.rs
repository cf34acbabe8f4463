use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use fablepress_core::models::Order;
use fablepress_order::RoutingReport;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub currency: String,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub tracking_token: String,
    pub items: Vec<OrderItemResponse>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_name: String,
    pub variant_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
    pub provider: String,
    pub fulfilment_order_id: Option<String>,
    pub fulfilment_status: String,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            status: order.status.as_str().to_string(),
            currency: order.currency,
            subtotal_cents: order.subtotal_cents,
            shipping_cents: order.shipping_cents,
            total_cents: order.total_cents,
            tracking_token: order.tracking_token,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_name: item.product_name,
                    variant_name: item.variant_name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    total_price_cents: item.total_price_cents,
                    provider: item.provider.as_str().to_string(),
                    fulfilment_order_id: item.fulfilment_order_id,
                    fulfilment_status: item.fulfilment_status.as_str().to_string(),
                    tracking_number: item.tracking_number,
                    tracking_url: item.tracking_url,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// POST /v1/orders/{id}/route
///
/// Fans the order out to its providers. Partial success comes back in the
/// report body, not as an error status; only a missing order is a 404.
pub async fn route_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<RoutingReport>, AppError> {
    let report = state.router.route_order(order_id).await?;
    Ok(Json(report))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("order {order_id} not found")))?;
    Ok(Json(order.into()))
}
