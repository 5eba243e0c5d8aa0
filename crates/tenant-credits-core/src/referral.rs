//! Referral types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Credits paid to a referrer when a referred user first subscribes.
pub const CREDITS_PER_REFERRAL: i64 = 2;

/// Length of the pro trial granted to the referred user.
pub const REFERRED_USER_TRIAL_DAYS: i64 = 7;

/// Length of generated referral codes.
pub const REFERRAL_CODE_LEN: usize = 6;

/// Referral data attached to a user at signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralProfile {
    /// The user.
    pub user_id: UserId,

    /// Referral code entered at signup, if any.
    pub referred_by: Option<String>,
}

/// An owned referral code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCode {
    /// Opaque code shared by the owner.
    pub code: String,

    /// Owner of the code (the referrer).
    pub user_id: UserId,

    /// When the code was created.
    pub created_at: DateTime<Utc>,
}

/// A referral payout. At most one exists per referred user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralReward {
    /// Row identifier.
    pub id: uuid::Uuid,

    /// Who was paid.
    pub referrer_user_id: UserId,

    /// Whose subscription triggered the payout.
    pub referred_user_id: UserId,

    /// Code that linked the two.
    pub referral_code: String,

    /// Kind of reward.
    pub reward_type: RewardType,

    /// Credits paid.
    pub reward_amount: i64,

    /// Payout state.
    pub status: RewardStatus,

    /// When the payout was made.
    pub granted_at: Option<DateTime<Utc>>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl ReferralReward {
    /// A granted credit reward.
    #[must_use]
    pub fn granted(
        referrer_user_id: UserId,
        referred_user_id: UserId,
        referral_code: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            referrer_user_id,
            referred_user_id,
            referral_code: referral_code.to_string(),
            reward_type: RewardType::Credits,
            reward_amount: CREDITS_PER_REFERRAL,
            status: RewardStatus::Granted,
            granted_at: Some(now),
            created_at: now,
        }
    }
}

/// Kind of referral reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// Credits added to the referrer's balance.
    Credits,
}

impl RewardType {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credits => "credits",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        (s == "credits").then_some(Self::Credits)
    }
}

/// Payout state of a referral reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    /// Recorded but not yet paid.
    Pending,

    /// Paid.
    Granted,
}

impl RewardStatus {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Granted => "granted",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "granted" => Some(Self::Granted),
            _ => None,
        }
    }
}

/// Normalize a user-entered referral code.
///
/// Codes are case-insensitive and stored upper-case.
#[must_use]
pub fn normalize_code(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_reward_pays_two_credits() {
        let reward = ReferralReward::granted(
            UserId::generate(),
            UserId::generate(),
            "ABC123",
            Utc::now(),
        );
        assert_eq!(reward.reward_amount, 2);
        assert_eq!(reward.status, RewardStatus::Granted);
        assert!(reward.granted_at.is_some());
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(normalize_code(" abc123 ").as_deref(), Some("ABC123"));
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code("ab-12"), None);
    }
}
