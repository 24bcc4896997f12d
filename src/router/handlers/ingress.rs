use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, instrument};

use crate::error::{AppError, RelayError};
use crate::monitor::WebhookEvent;
use crate::state::AppState;
use crate::webhooks::notifier::verify_hmac_signature;
use crate::webhooks::SIGNATURE_HEADER;

/// Accept one event from the webhook indexer.
///
/// Answers an empty `200 OK` whether or not the event passed the address
/// filter, so the indexer never retries a delivery that was understood.
#[instrument(skip_all, fields(body_len = body.len()))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let ingress = state
        .ingress
        .as_ref()
        .ok_or_else(|| AppError::not_found("webhook ingress is disabled"))?;

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::authentication_error("missing webhook signature"))?;

        if !verify_hmac_signature(&body, signature, secret) {
            return Err(AppError::authentication_error("invalid webhook signature"));
        }
    }

    let event = WebhookEvent::from_slice(&body).map_err(RelayError::from)?;
    let outcome = ingress.ingest(event).await;
    debug!(outcome = ?outcome, "Webhook event handled");

    Ok(StatusCode::OK)
}
