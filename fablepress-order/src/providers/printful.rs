use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use fablepress_core::models::{FulfilmentProvider, FulfilmentStatus, Order, OrderItem};
use fablepress_core::provider::{
    ProviderAdapter, ProviderEvent, ProviderEventKind, SubmissionContext,
};
use fablepress_core::{FulfilmentError, FulfilmentResult};

type HmacSha256 = Hmac<Sha256>;

/// Adapter for the general merchandise printer. Orders are created via REST
/// with a bearer API key; webhooks are authenticated by an HMAC-SHA256 hex
/// digest of the event's `data` object, carried in the payload's `signature`
/// field.
pub struct PrintfulAdapter {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    webhook_secret: Option<String>,
}

impl PrintfulAdapter {
    pub fn new(api_base: String, api_key: Option<String>, webhook_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            api_key,
            webhook_secret,
        }
    }

    /// Recipient and line items in the provider's order schema. Catalog
    /// identifiers and print files come from item metadata set at checkout.
    pub fn build_order_payload(order: &Order, items: &[OrderItem]) -> Value {
        let addr = &order.shipping_address;
        json!({
            "external_id": order.id.to_string(),
            "recipient": {
                "name": addr.name,
                "address1": addr.line1,
                "address2": addr.line2,
                "city": addr.city,
                "state_code": addr.state,
                "zip": addr.zip,
                "country_code": addr.country_code,
                "email": order.customer_email,
            },
            "items": items.iter().map(|item| json!({
                "external_id": item.id.to_string(),
                "variant_id": item.metadata.get("printful_variant_id").cloned().unwrap_or(Value::Null),
                "quantity": item.quantity,
                "name": format!("{} ({})", item.product_name, item.variant_name),
                "retail_price": format!("{:.2}", item.unit_price_cents as f64 / 100.0),
                "files": item.metadata.get("print_files").cloned().unwrap_or_else(|| json!([])),
            })).collect::<Vec<_>>(),
        })
    }

    fn api_key(&self) -> FulfilmentResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| FulfilmentError::NotConfigured {
                provider: FulfilmentProvider::Printful.to_string(),
                missing: "api_key".to_string(),
            })
    }
}

#[async_trait]
impl ProviderAdapter for PrintfulAdapter {
    fn provider(&self) -> FulfilmentProvider {
        FulfilmentProvider::Printful
    }

    async fn submit_order(
        &self,
        order: &Order,
        items: &[OrderItem],
        _ctx: &SubmissionContext,
    ) -> FulfilmentResult<String> {
        let api_key = self.api_key()?;
        let payload = Self::build_order_payload(order, items);

        let response = self
            .http
            .post(format!("{}/orders", self.api_base))
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
            // Error bodies carry the message either under error.message or
            // as a bare result string.
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .or_else(|| body.get("result").and_then(Value::as_str))
                .unwrap_or("order submission rejected")
                .to_string();
            return Err(FulfilmentError::Provider(message));
        }

        body.pointer("/result/id")
            .and_then(|id| {
                id.as_i64()
                    .map(|n| n.to_string())
                    .or_else(|| id.as_str().map(String::from))
            })
            .ok_or_else(|| {
                FulfilmentError::Provider("response did not include an order id".to_string())
            })
    }

    fn verify_webhook(
        &self,
        raw_payload: &[u8],
        _credential: Option<&str>,
    ) -> FulfilmentResult<bool> {
        let secret =
            self.webhook_secret
                .as_deref()
                .ok_or_else(|| FulfilmentError::NotConfigured {
                    provider: FulfilmentProvider::Printful.to_string(),
                    missing: "webhook_secret".to_string(),
                })?;

        let envelope: Value = match serde_json::from_slice(raw_payload) {
            Ok(v) => v,
            Err(_) => return Ok(false),
        };
        let signature = match envelope.get("signature").and_then(Value::as_str) {
            Some(s) => s,
            None => return Ok(false),
        };
        let data = match envelope.get("data") {
            Some(d) => d,
            None => return Ok(false),
        };

        // The digest covers the canonical serialization of `data` (sorted
        // keys), not the envelope, so the signature field cannot sign itself.
        let canonical = serde_json::to_vec(data)
            .map_err(|e| FulfilmentError::Validation(e.to_string()))?;
        let expected = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| FulfilmentError::Validation(e.to_string()))?;
        mac.update(&canonical);
        // verify_slice is a constant-time comparison.
        Ok(mac.verify_slice(&expected).is_ok())
    }

    fn parse_webhook(&self, raw_payload: &[u8]) -> FulfilmentResult<ProviderEvent> {
        let envelope: Value = serde_json::from_slice(raw_payload)
            .map_err(|e| FulfilmentError::Validation(format!("malformed webhook body: {e}")))?;

        let event_type = envelope
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FulfilmentError::Validation("webhook missing type".to_string()))?
            .to_string();

        let data = envelope.get("data").cloned().unwrap_or(Value::Null);
        let kind = match event_type.as_str() {
            "package_shipped" => ProviderEventKind::Shipped,
            "package_delivered" => ProviderEventKind::Delivered,
            "order_failed" | "order_canceled" => ProviderEventKind::Failed,
            _ => ProviderEventKind::StatusChanged,
        };

        Ok(ProviderEvent {
            provider: FulfilmentProvider::Printful,
            kind,
            event_type,
            event_id: data
                .pointer("/shipment/id")
                .and_then(Value::as_i64)
                .map(|n| n.to_string()),
            external_order_id: data
                .pointer("/order/external_id")
                .and_then(Value::as_str)
                .map(String::from),
            provider_order_id: data.pointer("/order/id").and_then(|id| {
                id.as_i64()
                    .map(|n| n.to_string())
                    .or_else(|| id.as_str().map(String::from))
            }),
            provider_status: data
                .pointer("/order/status")
                .and_then(Value::as_str)
                .map(String::from),
            tracking_number: data
                .pointer("/shipment/tracking_number")
                .and_then(Value::as_str)
                .map(String::from),
            tracking_url: data
                .pointer("/shipment/tracking_url")
                .and_then(Value::as_str)
                .map(String::from),
            carrier: data
                .pointer("/shipment/carrier")
                .and_then(Value::as_str)
                .map(String::from),
            payload: envelope,
        })
    }

    fn map_status(&self, provider_status: &str) -> FulfilmentStatus {
        match provider_status {
            "fulfilled" => FulfilmentStatus::Fulfilled,
            "canceled" | "failed" => FulfilmentStatus::Failed,
            // draft/pending/onhold/inprocess/partial and anything the
            // provider adds later: still in progress.
            _ => FulfilmentStatus::Sent,
        }
    }
}

/// Sign a `data` object the way the provider does. Used by tests and local
/// tooling to produce valid webhook envelopes.
pub fn sign_payload(secret: &str, data: &Value) -> String {
    let canonical = serde_json::to_vec(data).expect("serializable data");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(&canonical);
    hex::encode(mac.finalize().into_bytes())
}
