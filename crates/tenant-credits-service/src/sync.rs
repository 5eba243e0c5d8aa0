//! Subscription sync.
//!
//! Mirrors the payment provider's view of a user's subscription into the
//! store, then gives the referral engine a chance to pay out. The mirror row
//! is keyed by `(user_id, app_id)` and only rewritten when its state changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;

use tenant_credits_core::{
    CreditError, PlanId, PriceTable, Result, SubscriptionMirror, SubscriptionStatus, UserId,
};
use tenant_credits_store::Store;

use crate::provider::{ProviderSubscription, SubscriptionProvider};
use crate::referral::ReferralEngine;

/// Subscription state reported to the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    /// Whether the user holds a current paid plan or trial.
    pub subscribed: bool,
    /// Effective plan.
    pub plan_id: PlanId,
    /// End of the current period or trial.
    pub subscription_end: Option<DateTime<Utc>>,
    /// Payment provider customer, once known.
    pub stripe_customer_id: Option<String>,
}

impl SubscriptionState {
    /// The free tier, used whenever the provider cannot be consulted.
    #[must_use]
    pub fn free() -> Self {
        Self {
            subscribed: false,
            plan_id: PlanId::Free,
            subscription_end: None,
            stripe_customer_id: None,
        }
    }

    /// State carried by a mirror row at `now`.
    #[must_use]
    pub fn from_mirror(mirror: &SubscriptionMirror, now: DateTime<Utc>) -> Self {
        if mirror.plan_id == PlanId::Free || !mirror.is_current(now) {
            return Self {
                stripe_customer_id: mirror.stripe_customer_id.clone(),
                ..Self::free()
            };
        }

        Self {
            subscribed: true,
            plan_id: mirror.plan_id,
            subscription_end: mirror.current_period_end,
            stripe_customer_id: mirror.stripe_customer_id.clone(),
        }
    }
}

/// Reconciles mirror rows with the payment provider.
pub struct SubscriptionSync {
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn SubscriptionProvider>>,
    prices: PriceTable,
    app_id: String,
    referrals: ReferralEngine,
}

impl SubscriptionSync {
    /// Create a sync job. Without a provider every sync fails with
    /// `ProviderUnavailable`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn SubscriptionProvider>>,
        prices: PriceTable,
        app_id: impl Into<String>,
        referrals: ReferralEngine,
    ) -> Self {
        Self {
            store,
            provider,
            prices,
            app_id: app_id.into(),
            referrals,
        }
    }

    /// Whether a payment provider is configured.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Look up the user's subscription at the provider and mirror it.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` without a verified email.
    /// - `ProviderUnavailable` if the provider is missing or unreachable.
    /// - `UnknownPrice` if the active subscription uses an unmapped price;
    ///   the mirror is left untouched.
    pub async fn check_and_sync(
        &self,
        user_id: &UserId,
        email: Option<&str>,
    ) -> Result<SubscriptionState> {
        let email = email.ok_or(CreditError::NotAuthenticated)?;
        let provider = self.provider()?;
        let now = Utc::now();

        let existing = self.store.get_subscription(user_id, &self.app_id).await?;

        let Some(customer) = provider.find_customer_by_email(email).await? else {
            tracing::debug!(user_id = %user_id, "No provider customer for user");
            return self.mirror_free(user_id, existing, None, now).await;
        };

        self.sync_customer(user_id, &customer.id, existing, now)
            .await
    }

    /// Re-sync the user linked to a provider customer, as after a webhook.
    ///
    /// Returns `None` when no mirror row references the customer yet.
    ///
    /// # Errors
    ///
    /// Same as [`check_and_sync`](Self::check_and_sync), minus the email check.
    pub async fn sync_by_customer(&self, customer_id: &str) -> Result<Option<SubscriptionState>> {
        self.provider()?;

        let Some(existing) = self
            .store
            .find_subscription_by_customer(customer_id, &self.app_id)
            .await?
        else {
            tracing::info!(
                customer_id = %customer_id,
                "Provider customer not linked to any user yet"
            );
            return Ok(None);
        };

        let user_id = existing.user_id;
        let state = self
            .sync_customer(&user_id, customer_id, Some(existing), Utc::now())
            .await?;
        Ok(Some(state))
    }

    /// Check that every configured price exists at the provider.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the unknown prices, or
    /// `ProviderUnavailable` if the provider cannot be reached.
    pub async fn validate_prices(&self) -> Result<()> {
        let Some(provider) = &self.provider else {
            return Ok(());
        };

        let checks = self.prices.price_ids().map(|price_id| async move {
            provider
                .price_exists(price_id)
                .await
                .map(|exists| (price_id, exists))
        });

        let missing: Vec<&str> = try_join_all(checks)
            .await?
            .into_iter()
            .filter(|(_, exists)| !exists)
            .map(|(price_id, _)| price_id)
            .collect();

        if !missing.is_empty() {
            return Err(CreditError::Configuration(format!(
                "unknown price ids: {}",
                missing.join(", ")
            )));
        }

        tracing::info!(prices = self.prices.len(), "Price table validated");
        Ok(())
    }

    fn provider(&self) -> Result<&Arc<dyn SubscriptionProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| CreditError::ProviderUnavailable {
                service: "stripe".into(),
                message: "payment provider not configured".into(),
            })
    }

    async fn sync_customer(
        &self,
        user_id: &UserId,
        customer_id: &str,
        existing: Option<SubscriptionMirror>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionState> {
        let provider = self.provider()?;

        let Some(subscription) = provider.active_subscription(customer_id).await? else {
            return self
                .mirror_free(user_id, existing, Some(customer_id.to_string()), now)
                .await;
        };

        let plan_id = self.plan_for(user_id, &subscription)?;

        // A running referral trial outranks a paid plan that is not unlimited
        if !plan_id.is_unlimited() {
            if let Some(trial) = existing.as_ref().filter(|m| m.is_running_trial(now)) {
                return Ok(SubscriptionState::from_mirror(trial, now));
            }
        }

        let mirror = SubscriptionMirror {
            user_id: *user_id,
            app_id: self.app_id.clone(),
            plan_id,
            status: SubscriptionStatus::Active,
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            stripe_customer_id: Some(customer_id.to_string()),
            stripe_subscription_id: Some(subscription.id.clone()),
            updated_at: now,
        };

        if self.store.upsert_subscription(&mirror).await? {
            tracing::info!(
                user_id = %user_id,
                plan = plan_id.as_str(),
                subscription_id = %subscription.id,
                "Subscription mirrored"
            );
        }

        match self.referrals.process(user_id).await {
            Ok(outcome) => {
                tracing::debug!(user_id = %user_id, outcome = outcome.reason(), "Referral checked");
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Referral processing failed");
            }
        }

        // The referral engine may have written a trial over the paid plan
        let current = self
            .store
            .get_subscription(user_id, &self.app_id)
            .await?
            .unwrap_or(mirror);
        Ok(SubscriptionState::from_mirror(&current, now))
    }

    async fn mirror_free(
        &self,
        user_id: &UserId,
        existing: Option<SubscriptionMirror>,
        customer_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionState> {
        if let Some(trial) = existing.as_ref().filter(|m| m.is_running_trial(now)) {
            return Ok(SubscriptionState::from_mirror(trial, now));
        }

        let customer_id =
            customer_id.or_else(|| existing.and_then(|m| m.stripe_customer_id));
        let mirror = SubscriptionMirror::free(*user_id, &self.app_id, customer_id);

        if self.store.upsert_subscription(&mirror).await? {
            tracing::info!(user_id = %user_id, "Subscription mirrored as free");
        }

        Ok(SubscriptionState::from_mirror(&mirror, now))
    }

    fn plan_for(&self, user_id: &UserId, subscription: &ProviderSubscription) -> Result<PlanId> {
        let result = match subscription.price_id.as_deref() {
            Some(price_id) => self.prices.plan_for(price_id),
            None => Err(CreditError::UnknownPrice(format!(
                "subscription {} has no price",
                subscription.id
            ))),
        };

        result.map_err(|e| {
            tracing::error!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                error = %e,
                "Active subscription uses an unmapped price, mirror left unchanged"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn free_mirror_reports_unsubscribed_with_customer() {
        let mirror = SubscriptionMirror::free(UserId::generate(), "mieter", Some("cus_1".into()));
        let state = SubscriptionState::from_mirror(&mirror, Utc::now());
        assert!(!state.subscribed);
        assert_eq!(state.plan_id, PlanId::Free);
        assert_eq!(state.stripe_customer_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn running_trial_reports_subscribed() {
        let now = Utc::now();
        let mirror = SubscriptionMirror::trial(UserId::generate(), "mieter", 7, now);
        let state = SubscriptionState::from_mirror(&mirror, now);
        assert!(state.subscribed);
        assert_eq!(state.plan_id, PlanId::Pro);
        assert_eq!(state.subscription_end, Some(now + Duration::days(7)));
    }

    #[test]
    fn expired_period_reports_free() {
        let now = Utc::now();
        let mirror = SubscriptionMirror::trial(UserId::generate(), "mieter", 7, now);
        let state = SubscriptionState::from_mirror(&mirror, now + Duration::days(8));
        assert!(!state.subscribed);
        assert_eq!(state.plan_id, PlanId::Free);
    }
}
