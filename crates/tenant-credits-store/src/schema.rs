//! Database schema names.
//!
//! `cf` lists the `RocksDB` column families, `tables` the PostgreSQL tables
//! created by `migrations/`.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Credit accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "credit_accounts";

    /// Ledger entries, keyed by `user_id || transaction_id`.
    pub const TRANSACTIONS: &str = "credit_transactions";

    /// Tool usage log, keyed by `user_id || usage_id`.
    pub const TOOL_USAGE: &str = "tool_usage_log";

    /// Subscription mirror, keyed by `user_id || app_id`.
    pub const SUBSCRIPTIONS: &str = "user_subscriptions";

    /// Index: mirror rows by payment provider customer, keyed by
    /// `customer_id 0x00 app_id`, value `user_id`.
    pub const SUBSCRIPTIONS_BY_CUSTOMER: &str = "user_subscriptions_by_customer";

    /// Referral profiles, keyed by `user_id`.
    pub const PROFILES: &str = "profiles";

    /// Referral codes, keyed by code.
    pub const REFERRAL_CODES: &str = "referral_codes";

    /// Index: referral code by owner, keyed by `user_id`, value code.
    pub const REFERRAL_CODES_BY_USER: &str = "referral_codes_by_user";

    /// Referral rewards, keyed by `referred_user_id`.
    pub const REFERRAL_REWARDS: &str = "referral_rewards";

    /// Index: rewards by referrer, keyed by `referrer_user_id || referred_user_id`.
    /// Value is empty (index only).
    pub const REFERRAL_REWARDS_BY_REFERRER: &str = "referral_rewards_by_referrer";
}

/// PostgreSQL table names.
pub mod tables {
    /// Credit accounts.
    pub const ACCOUNTS: &str = "user_credits";
    /// Ledger entries.
    pub const TRANSACTIONS: &str = "credit_transactions";
    /// Tool usage log.
    pub const TOOL_USAGE: &str = "tool_usage_log";
    /// Subscription mirror.
    pub const SUBSCRIPTIONS: &str = "user_subscriptions";
    /// Referral profiles.
    pub const PROFILES: &str = "referral_profiles";
    /// Referral codes.
    pub const REFERRAL_CODES: &str = "referral_codes";
    /// Referral rewards.
    pub const REFERRAL_REWARDS: &str = "referral_rewards";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TOOL_USAGE,
        cf::SUBSCRIPTIONS,
        cf::SUBSCRIPTIONS_BY_CUSTOMER,
        cf::PROFILES,
        cf::REFERRAL_CODES,
        cf::REFERRAL_CODES_BY_USER,
        cf::REFERRAL_REWARDS,
        cf::REFERRAL_REWARDS_BY_REFERRER,
    ]
}
