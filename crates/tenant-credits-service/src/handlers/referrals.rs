//! Referral handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use tenant_credits_core::{ReferralCode, ReferralProfile};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::referral::{ReferralOutcome, ReferralSummary};
use crate::state::AppState;

/// Referral profile request.
#[derive(Debug, Deserialize)]
pub struct SetReferrerRequest {
    /// Code the caller signed up with.
    pub referred_by: String,
}

/// Record the referral code the caller signed up with.
pub async fn set_referred_by(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<SetReferrerRequest>,
) -> Result<Json<ReferralProfile>, ApiError> {
    let profile = state
        .referrals
        .set_referred_by(&auth.user_id, &body.referred_by)
        .await?;

    Ok(Json(profile))
}

/// Get or create the caller's own referral code.
pub async fn get_or_create_code(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ReferralCode>, ApiError> {
    Ok(Json(state.referrals.get_or_create_code(&auth.user_id).await?))
}

/// Referral processing response.
#[derive(Debug, Serialize)]
pub struct ProcessReferralResponse {
    /// Whether a reward was paid by this call.
    pub rewarded: bool,
    /// Machine-readable reason.
    pub reason: &'static str,
    /// Full outcome.
    pub outcome: ReferralOutcome,
}

/// Pay the caller's referral reward, if one is due.
pub async fn process_referral(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ProcessReferralResponse>, ApiError> {
    let outcome = state.referrals.process(&auth.user_id).await?;

    Ok(Json(ProcessReferralResponse {
        rewarded: matches!(outcome, ReferralOutcome::Rewarded { .. }),
        reason: outcome.reason(),
        outcome,
    }))
}

/// Rewards earned by the caller.
pub async fn list_rewards(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ReferralSummary>, ApiError> {
    Ok(Json(state.referrals.list_rewards(&auth.user_id).await?))
}
