pub mod aggregator;
pub mod providers;
pub mod reconciler;
pub mod render;
pub mod router;

pub use aggregator::StatusAggregator;
pub use providers::{BlurbAdapter, PrintfulAdapter, ProviderRegistry};
pub use reconciler::WebhookReconciler;
pub use router::{OrderRouter, ProviderOrderRef, RoutingFailure, RoutingReport};
