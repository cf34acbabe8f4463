pub mod models;
pub mod provider;
pub mod repository;
pub mod notify;

pub use models::{
    Address, FulfilmentEvent, FulfilmentProvider, FulfilmentStatus, Order, OrderItem, OrderStatus,
    Storybook,
};
pub use provider::{ProviderAdapter, ProviderEvent, ProviderEventKind, SubmissionContext};

/// Error taxonomy for the fulfilment core.
///
/// `Provider` carries the provider's own error message verbatim so an
/// operator can diagnose a rejected submission without digging through
/// provider dashboards.
#[derive(Debug, thiserror::Error)]
pub enum FulfilmentError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider {provider} is not configured: missing {missing}")]
    NotConfigured { provider: String, missing: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type FulfilmentResult<T> = Result<T, FulfilmentError>;
