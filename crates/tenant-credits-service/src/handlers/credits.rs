//! Credit balance, tool launch and transaction handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use tenant_credits_core::{
    AccessMethod, CreditAccount, CreditTransaction, ToolUsageRecord, TransactionType, UserId,
};

use crate::auth::{AdminAuth, AuthUser};
use crate::credits::{SpendOutcome, TransactionPage};
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Spendable credits.
    pub balance: i64,
    /// Lifetime credits received.
    pub total_earned: i64,
    /// Lifetime credits spent.
    pub total_spent: i64,
    /// Whether tool launches are currently free.
    pub unlimited: bool,
}

impl BalanceResponse {
    fn new(account: &CreditAccount, unlimited: bool) -> Self {
        Self {
            balance: account.balance,
            total_earned: account.total_earned,
            total_spent: account.total_spent,
            unlimited,
        }
    }
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.credits.get_balance(&auth.user_id).await?;
    let unlimited = state.entitlements.is_unlimited(&auth.user_id).await;

    Ok(Json(BalanceResponse::new(&account, unlimited)))
}

/// Can-afford query parameters.
#[derive(Debug, Deserialize)]
pub struct CanAffordQuery {
    /// Tool cost in credits (default: 1).
    #[serde(default = "default_cost")]
    pub cost: i64,
}

fn default_cost() -> i64 {
    1
}

/// Can-afford response.
#[derive(Debug, Serialize)]
pub struct CanAffordResponse {
    /// Whether the launch would succeed.
    pub allowed: bool,
    /// Cost that was checked.
    pub cost: i64,
}

/// Check whether the user can launch a tool.
pub async fn can_afford(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<CanAffordQuery>,
) -> Result<Json<CanAffordResponse>, ApiError> {
    let allowed = state.credits.can_afford(&auth.user_id, query.cost).await?;

    Ok(Json(CanAffordResponse {
        allowed,
        cost: query.cost,
    }))
}

/// Tool launch request.
#[derive(Debug, Deserialize)]
pub struct SpendRequest {
    /// Tool category, e.g. `checker`.
    pub tool_type: String,
    /// Tool identifier.
    pub tool_id: String,
    /// Cost in credits (default: 1).
    #[serde(default = "default_cost")]
    pub cost: i64,
}

/// Tool launch response.
#[derive(Debug, Serialize)]
pub struct SpendResponse {
    /// Balance after the launch.
    pub balance: i64,
    /// How the launch was paid for.
    pub access_method: AccessMethod,
    /// Ledger entry, absent when a subscription covered the launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl From<SpendOutcome> for SpendResponse {
    fn from(outcome: SpendOutcome) -> Self {
        Self {
            balance: outcome.balance,
            access_method: outcome.access_method,
            transaction_id: outcome.transaction_id.map(|id| id.to_string()),
        }
    }
}

/// Pay for a tool launch.
pub async fn spend(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<SpendRequest>,
) -> Result<Json<SpendResponse>, ApiError> {
    if body.tool_type.trim().is_empty() || body.tool_id.trim().is_empty() {
        return Err(ApiError::BadRequest("tool_type and tool_id are required".into()));
    }

    let outcome = state
        .credits
        .spend(&auth.user_id, &body.tool_type, &body.tool_id, body.cost)
        .await?;

    Ok(Json(outcome.into()))
}

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum number of entries to return (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<TransactionPage>, ApiError> {
    let page = state
        .credits
        .transaction_page(&auth.user_id, query.limit, query.offset)
        .await?;

    Ok(Json(page))
}

/// Tool usage response.
#[derive(Debug, Serialize)]
pub struct ListUsageResponse {
    /// Tool launches (newest first).
    pub usage: Vec<ToolUsageRecord>,
}

/// List tool launches.
pub async fn list_usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListUsageResponse>, ApiError> {
    let usage = state
        .credits
        .list_tool_usage(&auth.user_id, query.limit)
        .await?;

    Ok(Json(ListUsageResponse { usage }))
}

/// Admin grant request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// User to credit.
    pub user_id: UserId,
    /// Credits to add.
    pub amount: i64,
    /// `purchase` or `adjustment` (default: adjustment).
    #[serde(default = "default_grant_type")]
    pub transaction_type: TransactionType,
    /// Ledger description.
    pub description: String,
}

fn default_grant_type() -> TransactionType {
    TransactionType::Adjustment
}

/// Admin grant response.
#[derive(Debug, Serialize)]
pub struct GrantCreditsResponse {
    /// The ledger entry written.
    pub transaction: CreditTransaction,
}

/// Grant credits to a user (admin only).
pub async fn admin_grant_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<GrantCreditsResponse>, ApiError> {
    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %body.user_id,
        amount = body.amount,
        "Admin granting credits"
    );

    let transaction = state
        .credits
        .grant(
            &body.user_id,
            body.amount,
            body.transaction_type,
            &body.description,
        )
        .await?;

    Ok(Json(GrantCreditsResponse { transaction }))
}
