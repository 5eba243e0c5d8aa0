//! Core types for the tenant portal credits service.
//!
//! - **Identifiers**: `UserId`, `TransactionId`, `UsageId`
//! - **Accounts**: `CreditAccount` with the starter grant
//! - **Ledger**: `CreditTransaction`, `TransactionType`
//! - **Usage**: `ToolUsageRecord`, `AccessMethod`
//! - **Subscriptions**: `SubscriptionMirror`, `PlanId`, `SubscriptionStatus`
//! - **Referrals**: `ReferralReward`, `ReferralCode`, `ReferralProfile`
//! - **Pricing**: `PriceTable`
//!
//! # Credits
//!
//! A credit is one tool launch. Amounts are plain `i64` counts; a new user
//! starts with [`STARTER_CREDITS`], a referrer earns [`CREDITS_PER_REFERRAL`]
//! per referred subscriber.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod credits;
pub mod error;
pub mod ids;
pub mod pricing;
pub mod referral;
pub mod subscription;
pub mod usage;

pub use account::{CreditAccount, STARTER_CREDITS};
pub use credits::{CreditTransaction, TransactionType};
pub use error::{CreditError, Result};
pub use ids::{IdError, TransactionId, UsageId, UserId};
pub use pricing::{PriceTable, DEFAULT_PRICE_PLAN_MAP};
pub use referral::{
    normalize_code, ReferralCode, ReferralProfile, ReferralReward, RewardStatus, RewardType,
    CREDITS_PER_REFERRAL, REFERRAL_CODE_LEN, REFERRED_USER_TRIAL_DAYS,
};
pub use subscription::{
    PlanId, SubscriptionMirror, SubscriptionStatus, DEFAULT_APP_ID, UNLIMITED_PLANS,
};
pub use usage::{AccessMethod, ToolUsageRecord};
