//! Referral rewards.
//!
//! When a referred user's subscription becomes active, the owner of the code
//! they signed up with earns [`CREDITS_PER_REFERRAL`] credits and the
//! referred user gets a [`REFERRED_USER_TRIAL_DAYS`]-day pro trial (skipped
//! when their paid plan is already unlimited). The payout happens at most
//! once per referred user.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use tenant_credits_core::{
    normalize_code, CreditError, ReferralCode, ReferralProfile, ReferralReward, Result,
    RewardStatus, SubscriptionMirror, SubscriptionStatus, UserId, CREDITS_PER_REFERRAL, REFERRAL_CODE_LEN,
    REFERRED_USER_TRIAL_DAYS,
};
use tenant_credits_store::{ReferralGrant, Store, StoreError};

/// Characters referral codes are drawn from.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts at generating an unused code before giving up.
const CODE_ATTEMPTS: usize = 8;

/// Result of processing a referral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReferralOutcome {
    /// The referrer was credited.
    Rewarded {
        /// Who earned the credits.
        referrer_user_id: UserId,
        /// Credits paid.
        credits_awarded: i64,
        /// Whether the referred user received the trial.
        trial_granted: bool,
    },
    /// The user signed up without a referral code.
    NotReferred,
    /// A reward was already paid for this user.
    AlreadyProcessed,
    /// The referred user has no active paid subscription yet.
    NotSubscribed,
    /// The referral code does not belong to another user.
    CodeNotFound,
}

impl ReferralOutcome {
    /// Short machine-readable reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Rewarded { .. } => "rewarded",
            Self::NotReferred => "not_referred",
            Self::AlreadyProcessed => "already_processed",
            Self::NotSubscribed => "not_subscribed",
            Self::CodeNotFound => "code_not_found",
        }
    }
}

/// A referrer's earnings.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralSummary {
    /// Rewards, newest first.
    pub rewards: Vec<ReferralReward>,
    /// Number of granted rewards.
    pub total_successful: usize,
    /// Credits earned from granted rewards.
    pub total_credits_earned: i64,
}

/// Referral code management and payouts.
#[derive(Clone)]
pub struct ReferralEngine {
    store: Arc<dyn Store>,
    app_id: String,
}

impl ReferralEngine {
    /// Create a referral engine granting trials for `app_id`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, app_id: impl Into<String>) -> Self {
        Self {
            store,
            app_id: app_id.into(),
        }
    }

    /// Pay the reward for `referred_user_id`, if one is due.
    ///
    /// A reward is due once the referred user's mirrored subscription is
    /// `active`.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the store fails. Duplicate payouts and
    /// unknown codes are reported as outcomes, not errors.
    pub async fn process(&self, referred_user_id: &UserId) -> Result<ReferralOutcome> {
        let Some(code) = self
            .store
            .get_profile(referred_user_id)
            .await?
            .and_then(|p| p.referred_by)
        else {
            return Ok(ReferralOutcome::NotReferred);
        };

        if self
            .store
            .get_reward_for_referred(referred_user_id)
            .await?
            .is_some()
        {
            return Ok(ReferralOutcome::AlreadyProcessed);
        }

        let now = Utc::now();
        let subscribed = self
            .store
            .get_subscription(referred_user_id, &self.app_id)
            .await?
            .is_some_and(|m| m.status == SubscriptionStatus::Active && m.is_current(now));
        if !subscribed {
            return Ok(ReferralOutcome::NotSubscribed);
        }

        let referrer = match self.store.resolve_referral_code(&code).await? {
            Some(owner) if owner != *referred_user_id => owner,
            _ => {
                tracing::warn!(
                    referred_user_id = %referred_user_id,
                    code = %code,
                    "Referral code does not resolve to another user"
                );
                return Ok(ReferralOutcome::CodeNotFound);
            }
        };

        let grant = ReferralGrant {
            reward: ReferralReward::granted(referrer, *referred_user_id, &code, now),
            trial: Some(SubscriptionMirror::trial(
                *referred_user_id,
                &self.app_id,
                REFERRED_USER_TRIAL_DAYS,
                now,
            )),
        };

        match self.store.grant_referral_reward(&grant).await {
            Ok(receipt) => {
                tracing::info!(
                    referrer_user_id = %referrer,
                    referred_user_id = %referred_user_id,
                    credits = CREDITS_PER_REFERRAL,
                    referrer_balance = receipt.transaction.balance_after,
                    trial_granted = receipt.trial_granted,
                    "Referral reward granted"
                );
                Ok(ReferralOutcome::Rewarded {
                    referrer_user_id: referrer,
                    credits_awarded: CREDITS_PER_REFERRAL,
                    trial_granted: receipt.trial_granted,
                })
            }
            Err(StoreError::DuplicateReward { .. }) => Ok(ReferralOutcome::AlreadyProcessed),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the referral code a user signed up with.
    ///
    /// The first recorded code wins; later calls return the stored profile.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReferralCode` for a malformed code.
    pub async fn set_referred_by(
        &self,
        user_id: &UserId,
        code: &str,
    ) -> Result<ReferralProfile> {
        let code = normalize_code(code)
            .ok_or_else(|| CreditError::InvalidReferralCode(code.to_string()))?;

        if let Some(existing) = self.store.get_profile(user_id).await? {
            if existing.referred_by.is_some() {
                return Ok(existing);
            }
        }

        let profile = ReferralProfile {
            user_id: *user_id,
            referred_by: Some(code),
        };
        self.store.put_profile(&profile).await?;

        tracing::info!(user_id = %user_id, code = ?profile.referred_by, "Referral recorded");
        Ok(profile)
    }

    /// The user's own referral code, created on first request.
    ///
    /// # Errors
    ///
    /// Returns a storage error if no unused code could be generated.
    pub async fn get_or_create_code(&self, user_id: &UserId) -> Result<ReferralCode> {
        if let Some(existing) = self.store.get_code_for_user(user_id).await? {
            return Ok(existing);
        }

        for _ in 0..CODE_ATTEMPTS {
            let code = ReferralCode {
                code: generate_code(),
                user_id: *user_id,
                created_at: Utc::now(),
            };

            match self.store.insert_referral_code(&code).await {
                Ok(()) => {
                    tracing::info!(user_id = %user_id, code = %code.code, "Referral code created");
                    return Ok(code);
                }
                Err(StoreError::Conflict(_)) => {
                    // Either the code is taken or a concurrent request created ours
                    if let Some(existing) = self.store.get_code_for_user(user_id).await? {
                        return Ok(existing);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CreditError::Storage(
            "could not allocate an unused referral code".into(),
        ))
    }

    /// Rewards earned by a referrer.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the store fails.
    pub async fn list_rewards(&self, referrer_user_id: &UserId) -> Result<ReferralSummary> {
        let rewards = self.store.list_rewards_for_referrer(referrer_user_id).await?;

        let granted = rewards
            .iter()
            .filter(|r| r.status == RewardStatus::Granted);
        let total_successful = granted.clone().count();
        let total_credits_earned = granted.map(|r| r.reward_amount).sum();

        Ok(ReferralSummary {
            rewards,
            total_successful,
            total_credits_earned,
        })
    }
}

/// Draw a fresh code from [`CODE_ALPHABET`].
fn generate_code() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(REFERRAL_CODE_LEN)
        .map(|b| char::from(CODE_ALPHABET[usize::from(*b) % CODE_ALPHABET.len()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_normalized() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), REFERRAL_CODE_LEN);
            assert_eq!(normalize_code(&code).as_deref(), Some(code.as_str()));
        }
    }

    #[test]
    fn outcome_reasons() {
        assert_eq!(ReferralOutcome::NotReferred.reason(), "not_referred");
        assert_eq!(ReferralOutcome::AlreadyProcessed.reason(), "already_processed");
        assert_eq!(ReferralOutcome::CodeNotFound.reason(), "code_not_found");
        assert_eq!(ReferralOutcome::NotSubscribed.reason(), "not_subscribed");
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(ReferralOutcome::CodeNotFound).unwrap();
        assert_eq!(json["outcome"], "code_not_found");
    }
}
