use async_trait::async_trait;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use fablepress_core::models::{FulfilmentProvider, FulfilmentStatus, Order, OrderItem};
use fablepress_core::provider::{
    ProviderAdapter, ProviderEvent, ProviderEventKind, SubmissionContext,
};
use fablepress_core::{FulfilmentError, FulfilmentResult};

/// Adapter for the printed-book provider. Every line item prints a rendered
/// storybook document, so submission requires a document URL per item in the
/// submission context. Webhooks authenticate with a shared bearer token.
pub struct BlurbAdapter {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    webhook_secret: Option<String>,
}

impl BlurbAdapter {
    pub fn new(api_base: String, api_key: Option<String>, webhook_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            api_key,
            webhook_secret,
        }
    }

    pub fn build_order_payload(
        order: &Order,
        items: &[OrderItem],
        ctx: &SubmissionContext,
    ) -> FulfilmentResult<Value> {
        let addr = &order.shipping_address;
        let mut line_items = Vec::with_capacity(items.len());
        for item in items {
            let document_url = ctx.document_url_for(item.id).ok_or_else(|| {
                FulfilmentError::Validation(format!(
                    "item {} has no rendered document for book printing",
                    item.id
                ))
            })?;
            line_items.push(json!({
                "external_ref": item.id.to_string(),
                "product_sku": item.metadata.get("blurb_sku").cloned().unwrap_or(Value::Null),
                "quantity": item.quantity,
                "title": item.product_name,
                "document_url": document_url,
            }));
        }

        Ok(json!({
            "external_ref": order.id.to_string(),
            "currency": order.currency,
            "ship_to": {
                "name": addr.name,
                "street1": addr.line1,
                "street2": addr.line2,
                "city": addr.city,
                "region": addr.state,
                "postal_code": addr.zip,
                "country": addr.country_code,
            },
            "line_items": line_items,
        }))
    }
}

#[async_trait]
impl ProviderAdapter for BlurbAdapter {
    fn provider(&self) -> FulfilmentProvider {
        FulfilmentProvider::Blurb
    }

    async fn submit_order(
        &self,
        order: &Order,
        items: &[OrderItem],
        ctx: &SubmissionContext,
    ) -> FulfilmentResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FulfilmentError::NotConfigured {
                provider: FulfilmentProvider::Blurb.to_string(),
                missing: "api_key".to_string(),
            })?;
        let payload = Self::build_order_payload(order, items, ctx)?;

        let response = self
            .http
            .post(format!("{}/print_jobs", self.api_base))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FulfilmentError::Provider(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| FulfilmentError::Provider(e.to_string()))?;

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("print job rejected")
                .to_string();
            return Err(FulfilmentError::Provider(message));
        }

        body.get("order_id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                FulfilmentError::Provider("response did not include an order id".to_string())
            })
    }

    fn verify_webhook(
        &self,
        _raw_payload: &[u8],
        credential: Option<&str>,
    ) -> FulfilmentResult<bool> {
        let secret =
            self.webhook_secret
                .as_deref()
                .ok_or_else(|| FulfilmentError::NotConfigured {
                    provider: FulfilmentProvider::Blurb.to_string(),
                    missing: "webhook_secret".to_string(),
                })?;

        let presented = match credential {
            Some(token) => token,
            None => return Ok(false),
        };
        // Length mismatch short-circuits inside ct_eq; the length of the
        // configured secret is not sensitive.
        Ok(presented.as_bytes().ct_eq(secret.as_bytes()).into())
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> FulfilmentResult<ProviderEvent> {
        let envelope: Value = serde_json::from_slice(raw_payload)
            .map_err(|e| FulfilmentError::Validation(format!("malformed webhook body: {e}")))?;

        let event_type = envelope
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| FulfilmentError::Validation("webhook missing event".to_string()))?
            .to_string();

        let kind = match event_type.as_str() {
            "order_shipped" => ProviderEventKind::Shipped,
            "order_delivered" => ProviderEventKind::Delivered,
            "order_rejected" | "order_cancelled" => ProviderEventKind::Failed,
            _ => ProviderEventKind::StatusChanged,
        };

        Ok(ProviderEvent {
            provider: FulfilmentProvider::Blurb,
            kind,
            event_type,
            event_id: envelope
                .get("event_id")
                .and_then(Value::as_str)
                .map(String::from),
            external_order_id: envelope
                .get("external_ref")
                .and_then(Value::as_str)
                .map(String::from),
            provider_order_id: envelope
                .get("order_id")
                .and_then(Value::as_str)
                .map(String::from),
            provider_status: envelope
                .get("status")
                .and_then(Value::as_str)
                .map(String::from),
            tracking_number: envelope
                .pointer("/tracking/number")
                .and_then(Value::as_str)
                .map(String::from),
            tracking_url: envelope
                .pointer("/tracking/url")
                .and_then(Value::as_str)
                .map(String::from),
            carrier: envelope
                .pointer("/tracking/carrier")
                .and_then(Value::as_str)
                .map(String::from),
            payload: envelope,
        })
    }

    fn map_status(&self, provider_status: &str) -> FulfilmentStatus {
        match provider_status {
            "shipped" => FulfilmentStatus::Fulfilled,
            "rejected" | "cancelled" => FulfilmentStatus::Failed,
            // created/accepted/printing/binding and future statuses.
            _ => FulfilmentStatus::Sent,
        }
    }
}
