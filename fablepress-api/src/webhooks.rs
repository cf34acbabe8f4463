use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::error::AppError;
use crate::state::AppState;
use fablepress_core::models::FulfilmentProvider;

/// POST /v1/webhooks/fulfilment/printful
///
/// Authentication failure is rejected before any processing; once the
/// signature checks out the response is 200 regardless of whether a matching
/// order was found, so the provider never retries unfixable deliveries.
pub async fn handle_printful_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    handle_provider_webhook(state, FulfilmentProvider::Printful, headers, body).await
}

/// POST /v1/webhooks/fulfilment/blurb
pub async fn handle_blurb_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    handle_provider_webhook(state, FulfilmentProvider::Blurb, headers, body).await
}

async fn handle_provider_webhook(
    state: AppState,
    provider: FulfilmentProvider,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let adapter = state.registry.get(provider).ok_or_else(|| {
        AppError::InternalServerError(format!("no adapter registered for {provider}"))
    })?;

    let credential = bearer_token(&headers);
    let verified = adapter.verify_webhook(&body, credential.as_deref())?;
    if !verified {
        tracing::warn!(%provider, "webhook failed authentication");
        return Err(AppError::AuthenticationError(
            "webhook authentication failed".to_string(),
        ));
    }

    state.reconciler.handle_webhook(provider, &body).await?;
    Ok(StatusCode::OK)
}

/// The token from an `Authorization: Bearer ...` header, if present.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}
