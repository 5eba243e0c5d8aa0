//! Subscription check and session handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::entitlement::Entitlement;
use crate::error::ApiError;
use crate::state::AppState;
use crate::sync::SubscriptionState;

/// Sync the caller's subscription with the payment provider now.
pub async fn check_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionState>, ApiError> {
    let subscription = state
        .sync
        .check_and_sync(&auth.user_id, auth.email.as_deref())
        .await?;

    Ok(Json(subscription))
}

/// Subscription snapshot response.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Latest state published by the caller's session.
    pub subscription: SubscriptionState,
    /// What the caller may do right now.
    pub entitlement: Entitlement,
}

/// Latest subscription state, starting a session if none is running.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = match state.sessions.snapshot(&auth.user_id).await {
        Some(snapshot) => snapshot,
        None => state.sessions.start(auth.user_id, auth.email).await,
    };
    let entitlement = state.entitlements.resolve(&auth.user_id).await;

    Ok(Json(SubscriptionResponse {
        subscription,
        entitlement,
    }))
}

/// Start (or restart) the caller's refresh session.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SubscriptionState>, ApiError> {
    Ok(Json(state.sessions.start(auth.user_id, auth.email).await))
}

/// Stop session response.
#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    /// Whether a session was running.
    pub stopped: bool,
}

/// Stop the caller's refresh session.
pub async fn stop_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<StopSessionResponse>, ApiError> {
    let stopped = state.sessions.stop(&auth.user_id).await;
    Ok(Json(StopSessionResponse { stopped }))
}
