//! Entitlement resolution.
//!
//! A user is unlimited when their mirrored subscription is on an unlimited
//! plan and is currently confirmed (`active` or `trial`, period not over).
//! Lookup failures degrade to the free tier, never to unlimited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tenant_credits_core::{PlanId, SubscriptionMirror, SubscriptionStatus, UserId};
use tenant_credits_store::Store;

/// What a user is entitled to right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    /// Effective plan.
    pub plan: PlanId,
    /// Mirrored subscription status.
    pub status: SubscriptionStatus,
    /// Whether tool launches bypass credit deduction.
    pub unlimited: bool,
    /// End of the current period, if any.
    pub period_end: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// The free tier.
    #[must_use]
    pub fn free() -> Self {
        Self {
            plan: PlanId::Free,
            status: SubscriptionStatus::Inactive,
            unlimited: false,
            period_end: None,
        }
    }

    /// Derive the entitlement carried by a mirror row at `now`.
    #[must_use]
    pub fn from_mirror(mirror: &SubscriptionMirror, now: DateTime<Utc>) -> Self {
        if !mirror.is_current(now) {
            return Self::free();
        }

        Self {
            plan: mirror.plan_id,
            status: mirror.status,
            unlimited: mirror.grants_unlimited(now),
            period_end: mirror.current_period_end,
        }
    }
}

/// Decides whether a user is unlimited.
#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn Store>,
    app_id: String,
}

impl EntitlementResolver {
    /// Create a resolver reading mirror rows for `app_id`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, app_id: impl Into<String>) -> Self {
        Self {
            store,
            app_id: app_id.into(),
        }
    }

    /// Resolve the user's current entitlement.
    pub async fn resolve(&self, user_id: &UserId) -> Entitlement {
        let now = Utc::now();
        match self.store.get_subscription(user_id, &self.app_id).await {
            Ok(Some(mirror)) => Entitlement::from_mirror(&mirror, now),
            Ok(None) => Entitlement::free(),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Subscription lookup failed, treating user as free tier"
                );
                Entitlement::free()
            }
        }
    }

    /// Whether the user's tool launches bypass credit deduction.
    pub async fn is_unlimited(&self, user_id: &UserId) -> bool {
        self.resolve(user_id).await.unlimited
    }
}
