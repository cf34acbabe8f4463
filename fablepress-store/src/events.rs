use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use fablepress_core::notify::ShippingNotifier;
use fablepress_core::{FulfilmentError, FulfilmentResult};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    shipping_topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, shipping_topic: String) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            shipping_topic,
        })
    }

    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
        {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Shipping notifications ride the event bus; the email sender consumes them
/// downstream. Best effort by contract, so a broker hiccup is the caller's
/// log line, not its problem.
#[async_trait]
impl ShippingNotifier for EventProducer {
    async fn notify_shipped(
        &self,
        order_id: Uuid,
        tracking_number: &str,
        tracking_url: Option<&str>,
        carrier: Option<&str>,
    ) -> FulfilmentResult<()> {
        let payload = serde_json::json!({
            "order_id": order_id,
            "tracking_number": tracking_number,
            "tracking_url": tracking_url,
            "carrier": carrier,
        })
        .to_string();

        self.publish(&self.shipping_topic, &order_id.to_string(), &payload)
            .await
            .map_err(|e| FulfilmentError::Storage(e.to_string()))
    }
}
