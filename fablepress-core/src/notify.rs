use async_trait::async_trait;
use uuid::Uuid;

use crate::models::Storybook;
use crate::FulfilmentResult;

/// Outbound shipping notification, best effort. The reconciler logs a
/// failure and moves on; it never holds the webhook acknowledgement path
/// open on this call.
#[async_trait]
pub trait ShippingNotifier: Send + Sync {
    async fn notify_shipped(
        &self,
        order_id: Uuid,
        tracking_number: &str,
        tracking_url: Option<&str>,
        carrier: Option<&str>,
    ) -> FulfilmentResult<()>;
}

/// PDF-generation collaborator for printed-book orders. Called lazily, only
/// when the storybook has no cached document URL.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_pdf(&self, storybook: &Storybook) -> FulfilmentResult<String>;
}
