//! Subscription mirror types.
//!
//! The payment provider owns subscription truth. [`SubscriptionMirror`] is the
//! locally persisted copy, one row per `(user_id, app_id)`, that entitlement
//! checks read from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Application identifier of the tenant portal in the shared subscription table.
pub const DEFAULT_APP_ID: &str = "mieter";

/// Plans that bypass per-use credit deduction.
pub const UNLIMITED_PLANS: [PlanId; 2] = [PlanId::Pro, PlanId::Business];

/// Available plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    /// No subscription.
    Free,

    /// Basic plan. Tools still cost credits.
    Basic,

    /// Pro plan. Unlimited tool access.
    Pro,

    /// Business plan. Unlimited tool access.
    Business,
}

impl PlanId {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Business => "business",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            "business" => Some(Self::Business),
            _ => None,
        }
    }

    /// Whether this plan grants unlimited tool access.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        UNLIMITED_PLANS.contains(self)
    }
}

/// Mirrored subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Confirmed active at the payment provider.
    Active,

    /// Time-boxed trial granted locally (referral reward).
    Trial,

    /// No active subscription.
    Inactive,
}

impl SubscriptionStatus {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trial => "trial",
            Self::Inactive => "inactive",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "trial" => Some(Self::Trial),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// Local copy of a user's subscription for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMirror {
    /// Subscriber.
    pub user_id: UserId,

    /// App the subscription belongs to.
    pub app_id: String,

    /// Mirrored plan.
    pub plan_id: PlanId,

    /// Mirrored status.
    pub status: SubscriptionStatus,

    /// Start of the current period.
    pub current_period_start: Option<DateTime<Utc>>,

    /// End of the current period (trial end for trials).
    pub current_period_end: Option<DateTime<Utc>>,

    /// Whether the subscription lapses at period end.
    pub cancel_at_period_end: bool,

    /// Payment provider customer.
    pub stripe_customer_id: Option<String>,

    /// Payment provider subscription.
    pub stripe_subscription_id: Option<String>,

    /// Last time the row was written.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionMirror {
    /// A mirror recording "no subscription".
    #[must_use]
    pub fn free(user_id: UserId, app_id: &str, stripe_customer_id: Option<String>) -> Self {
        Self {
            user_id,
            app_id: app_id.to_string(),
            plan_id: PlanId::Free,
            status: SubscriptionStatus::Inactive,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            stripe_customer_id,
            stripe_subscription_id: None,
            updated_at: Utc::now(),
        }
    }

    /// A pro trial of `days` starting at `now`.
    #[must_use]
    pub fn trial(user_id: UserId, app_id: &str, days: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            app_id: app_id.to_string(),
            plan_id: PlanId::Pro,
            status: SubscriptionStatus::Trial,
            current_period_start: Some(now),
            current_period_end: Some(now + Duration::days(days)),
            cancel_at_period_end: true,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            updated_at: now,
        }
    }

    /// Whether the mirror reflects a confirmed, current subscription or trial.
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        let live = matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trial
        );
        live && self.current_period_end.map_or(true, |end| end > now)
    }

    /// Whether the mirror grants unlimited tool access at `now`.
    #[must_use]
    pub fn grants_unlimited(&self, now: DateTime<Utc>) -> bool {
        self.plan_id.is_unlimited() && self.is_current(now)
    }

    /// Whether this is a referral trial that has not yet run out.
    #[must_use]
    pub fn is_running_trial(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Trial && self.is_current(now)
    }

    /// Compare everything except `updated_at`.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.app_id == other.app_id
            && self.plan_id == other.plan_id
            && self.status == other.status
            && self.current_period_start == other.current_period_start
            && self.current_period_end == other.current_period_end
            && self.cancel_at_period_end == other.cancel_at_period_end
            && self.stripe_customer_id == other.stripe_customer_id
            && self.stripe_subscription_id == other.stripe_subscription_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pro_and_business_are_unlimited() {
        assert!(!PlanId::Free.is_unlimited());
        assert!(!PlanId::Basic.is_unlimited());
        assert!(PlanId::Pro.is_unlimited());
        assert!(PlanId::Business.is_unlimited());
    }

    #[test]
    fn trial_is_unlimited_until_it_ends() {
        let now = Utc::now();
        let mirror = SubscriptionMirror::trial(UserId::generate(), DEFAULT_APP_ID, 7, now);
        assert!(mirror.grants_unlimited(now));
        assert!(mirror.grants_unlimited(now + Duration::days(6)));
        assert!(!mirror.grants_unlimited(now + Duration::days(8)));
        assert!(mirror.cancel_at_period_end);
    }

    #[test]
    fn inactive_pro_is_not_unlimited() {
        let now = Utc::now();
        let mut mirror = SubscriptionMirror::free(UserId::generate(), DEFAULT_APP_ID, None);
        mirror.plan_id = PlanId::Pro;
        assert!(!mirror.grants_unlimited(now));
    }

    #[test]
    fn same_state_ignores_updated_at() {
        let user = UserId::generate();
        let a = SubscriptionMirror::free(user, DEFAULT_APP_ID, Some("cus_1".into()));
        let mut b = a.clone();
        b.updated_at = a.updated_at + Duration::seconds(60);
        assert!(a.same_state(&b));
        b.plan_id = PlanId::Basic;
        assert!(!a.same_state(&b));
    }
}
