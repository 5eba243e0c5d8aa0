//! Stripe webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{verify_signature, WebhookEvent};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
}

/// Handle Stripe webhooks.
///
/// Subscription events re-sync the affected customer. Sync failures are
/// logged and still acknowledged; the next session refresh reconciles.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        tracing::warn!("Stripe webhook received but no webhook secret is configured");
        ApiError::BadRequest("Webhooks not configured".into())
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    verify_signature(secret, &body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        ApiError::BadRequest("Invalid webhook signature".into())
    })?;

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    if !event.is_subscription_event() {
        tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
        return Ok(Json(WebhookResponse { received: true }));
    }

    let Some(customer_id) = event.customer_id() else {
        tracing::warn!(event_id = %event.id, "Subscription event without customer");
        return Ok(Json(WebhookResponse { received: true }));
    };

    match state.sync.sync_by_customer(customer_id).await {
        Ok(Some(synced)) => {
            tracing::info!(
                customer_id = %customer_id,
                subscribed = synced.subscribed,
                plan = synced.plan_id.as_str(),
                "Subscription synced from webhook"
            );
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(
                customer_id = %customer_id,
                event_id = %event.id,
                error = %e,
                "Failed to sync subscription from webhook"
            );
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}
