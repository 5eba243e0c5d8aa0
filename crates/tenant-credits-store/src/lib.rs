//! Storage layer for the tenant credits service.
//!
//! Two backends implement [`Store`]:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, the production backend. Debits are a
//!   single conditional `UPDATE … WHERE balance >= cost` inside a transaction
//!   that also writes the ledger and usage rows.
//! - `RocksStore` (feature `rocksdb-backend`): embedded `RocksDB`, used for
//!   single-node deployments and tests. Compound operations are serialized by
//!   a store-wide lock and committed with one `WriteBatch`.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "rocksdb-backend")]
//! # async fn example() -> tenant_credits_store::Result<()> {
//! use tenant_credits_store::{RocksStore, Store};
//! use tenant_credits_core::UserId;
//!
//! let store = RocksStore::open("/tmp/tenant-credits-db")?;
//! let account = store.get_or_create_account(&UserId::generate()).await?;
//! assert_eq!(account.balance, 3);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

use async_trait::async_trait;

pub use error::{Result, StoreError};
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use tenant_credits_core::{
    CreditAccount, CreditTransaction, ReferralCode, ReferralProfile, ReferralReward,
    SubscriptionMirror, ToolUsageRecord, TransactionType, UserId,
};

/// A tool launch to be paid with credits.
#[derive(Debug, Clone)]
pub struct ToolDebit {
    /// Who pays.
    pub user_id: UserId,
    /// Tool category.
    pub tool_type: String,
    /// Tool identifier.
    pub tool_id: String,
    /// Credits to debit. Must be non-negative.
    pub cost: i64,
}

/// What a successful debit wrote.
#[derive(Debug, Clone)]
pub struct DebitReceipt {
    /// Account after the debit.
    pub account: CreditAccount,
    /// The ledger entry.
    pub transaction: CreditTransaction,
    /// The usage record.
    pub usage: ToolUsageRecord,
}

/// A positive credit grant.
#[derive(Debug, Clone)]
pub struct CreditGrant {
    /// Who receives the credits.
    pub user_id: UserId,
    /// Credits to add. Must be positive.
    pub amount: i64,
    /// Ledger entry type.
    pub transaction_type: TransactionType,
    /// Ledger description.
    pub description: String,
}

/// Everything a referral payout writes.
#[derive(Debug, Clone)]
pub struct ReferralGrant {
    /// The reward row to insert.
    pub reward: ReferralReward,
    /// Trial to upsert for the referred user, unless their active plan is
    /// already unlimited.
    pub trial: Option<SubscriptionMirror>,
}

/// What a referral payout wrote.
#[derive(Debug, Clone)]
pub struct ReferralReceipt {
    /// The referrer's ledger entry.
    pub transaction: CreditTransaction,
    /// Whether the trial was written.
    pub trial_granted: bool,
}

/// The storage trait defining all database operations.
///
/// Every method that changes a balance is a single atomic unit: either all of
/// its rows are written or none are.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Credit Accounts
    // =========================================================================

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>>;

    /// Get an account, creating it with the starter grant if missing.
    ///
    /// Concurrent first reads create exactly one account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_or_create_account(&self, user_id: &UserId) -> Result<CreditAccount>;

    /// Debit credits for a tool launch and write the ledger and usage rows.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientCredits` if the balance is too low; nothing
    ///   is written in that case.
    async fn debit_for_tool(&self, debit: &ToolDebit) -> Result<DebitReceipt>;

    /// Add credits to an account and record the ledger entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    async fn add_credits(&self, grant: &CreditGrant) -> Result<CreditTransaction>;

    /// List ledger entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Tool Usage
    // =========================================================================

    /// Record a tool launch that did not touch the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_tool_usage(&self, record: &ToolUsageRecord) -> Result<()>;

    /// List tool launches for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_tool_usage(&self, user_id: &UserId, limit: usize)
        -> Result<Vec<ToolUsageRecord>>;

    // =========================================================================
    // Subscription Mirror
    // =========================================================================

    /// Get the mirror row for `(user_id, app_id)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(
        &self,
        user_id: &UserId,
        app_id: &str,
    ) -> Result<Option<SubscriptionMirror>>;

    /// Insert or update the mirror row keyed by `(user_id, app_id)`.
    ///
    /// Returns `false` without writing when the stored row already has the
    /// same state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_subscription(&self, mirror: &SubscriptionMirror) -> Result<bool>;

    /// Find the mirror row linked to a payment provider customer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription_by_customer(
        &self,
        stripe_customer_id: &str,
        app_id: &str,
    ) -> Result<Option<SubscriptionMirror>>;

    // =========================================================================
    // Referrals
    // =========================================================================

    /// Get a user's referral profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<ReferralProfile>>;

    /// Insert or replace a user's referral profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_profile(&self, profile: &ReferralProfile) -> Result<()>;

    /// Get the referral code owned by a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_code_for_user(&self, user_id: &UserId) -> Result<Option<ReferralCode>>;

    /// Insert a referral code.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the code or the owner already has one.
    async fn insert_referral_code(&self, code: &ReferralCode) -> Result<()>;

    /// Resolve a referral code to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn resolve_referral_code(&self, code: &str) -> Result<Option<UserId>>;

    /// Get the reward paid for a referred user, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_reward_for_referred(
        &self,
        referred_user_id: &UserId,
    ) -> Result<Option<ReferralReward>>;

    /// List rewards paid to a referrer, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_rewards_for_referrer(
        &self,
        referrer_user_id: &UserId,
    ) -> Result<Vec<ReferralReward>>;

    /// Pay a referral reward as one unit.
    ///
    /// Re-checks for an existing reward, credits the referrer (creating an
    /// empty account if needed), appends the ledger entry, inserts the reward
    /// row and writes the referred user's trial.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateReward` if a reward already exists; nothing is
    ///   written in that case.
    async fn grant_referral_reward(&self, grant: &ReferralGrant) -> Result<ReferralReceipt>;
}
