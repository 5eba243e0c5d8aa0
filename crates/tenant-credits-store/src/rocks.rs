//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Reads go straight to the database. Every read-check-write sequence runs
//! under `write_lock` and commits through a single `WriteBatch`, so two
//! concurrent debits for the same user cannot both see the old balance.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tokio::sync::Mutex;

use tenant_credits_core::{
    CreditAccount, CreditTransaction, ReferralCode, ReferralProfile, ReferralReward,
    SubscriptionMirror, SubscriptionStatus, ToolUsageRecord, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{
    CreditGrant, DebitReceipt, ReferralGrant, ReferralReceipt, Store, ToolDebit,
};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!("RocksDB store opened");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Values under `prefix`, newest key first.
    ///
    /// Seeks to the end of the prefix range and walks backwards, so only
    /// `offset + limit` entries are read.
    fn scan_prefix_newest_first<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let upper = keys::prefix_successor(prefix);
        let mode = match &upper {
            Some(upper) => IteratorMode::From(upper.as_slice(), Direction::Reverse),
            None => IteratorMode::End,
        };

        let mut values = Vec::new();
        let mut skipped = 0;
        for item in self.db.iterator_cf(&cf, mode) {
            if values.len() >= limit {
                break;
            }
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                // Seeking lands on the successor key itself when it exists
                if &*key < prefix {
                    break;
                }
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            values.push(Self::deserialize(&value)?);
        }

        Ok(values)
    }

    /// Keys under `prefix`, in key order.
    fn scan_keys(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut found = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key.to_vec());
        }
        Ok(found)
    }

    /// Stage a mirror row and keep the customer index in step.
    fn stage_subscription(
        &self,
        batch: &mut WriteBatch,
        previous: Option<&SubscriptionMirror>,
        mirror: &SubscriptionMirror,
    ) -> Result<()> {
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_by_customer = self.cf(cf::SUBSCRIPTIONS_BY_CUSTOMER)?;

        if let Some(old_customer) = previous.and_then(|p| p.stripe_customer_id.as_deref()) {
            if mirror.stripe_customer_id.as_deref() != Some(old_customer) {
                batch.delete_cf(&cf_by_customer, keys::customer_key(old_customer, &mirror.app_id));
            }
        }
        if let Some(customer) = mirror.stripe_customer_id.as_deref() {
            batch.put_cf(
                &cf_by_customer,
                keys::customer_key(customer, &mirror.app_id),
                mirror.user_id.as_bytes(),
            );
        }

        batch.put_cf(
            &cf_subs,
            keys::subscription_key(&mirror.user_id, &mirror.app_id),
            Self::serialize(mirror)?,
        );
        Ok(())
    }

    fn load_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        self.get_value(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    fn load_subscription(&self, user_id: &UserId, app_id: &str) -> Result<Option<SubscriptionMirror>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::subscription_key(user_id, app_id))
    }

    fn load_reward(&self, referred_user_id: &UserId) -> Result<Option<ReferralReward>> {
        self.get_value(cf::REFERRAL_REWARDS, &keys::account_key(referred_user_id))
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Credit Accounts
    // =========================================================================

    async fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        self.load_account(user_id)
    }

    async fn get_or_create_account(&self, user_id: &UserId) -> Result<CreditAccount> {
        if let Some(account) = self.load_account(user_id)? {
            return Ok(account);
        }

        let _guard = self.write_lock.lock().await;

        // Another request may have created it while we waited
        if let Some(account) = self.load_account(user_id)? {
            return Ok(account);
        }

        let account = CreditAccount::with_starter_grant(*user_id);
        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(user_id), Self::serialize(&account)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::info!(user_id = %user_id, balance = account.balance, "Credit account created");
        Ok(account)
    }

    async fn debit_for_tool(&self, debit: &ToolDebit) -> Result<DebitReceipt> {
        let _guard = self.write_lock.lock().await;

        let mut account = self
            .load_account(&debit.user_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "credit account",
                id: debit.user_id.to_string(),
            })?;

        if !account.can_cover(debit.cost) {
            return Err(StoreError::InsufficientCredits {
                balance: account.balance,
                required: debit.cost,
            });
        }

        account.apply_debit(debit.cost);

        let transaction = CreditTransaction::tool_usage(
            debit.user_id,
            &debit.tool_type,
            &debit.tool_id,
            debit.cost,
            account.balance,
        );
        let usage = ToolUsageRecord::paid_with_credits(
            debit.user_id,
            &debit.tool_type,
            &debit.tool_id,
            debit.cost,
        );

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_usage = self.cf(cf::TOOL_USAGE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, keys::account_key(&debit.user_id), Self::serialize(&account)?);
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&debit.user_id, &transaction.id),
            Self::serialize(&transaction)?,
        );
        batch.put_cf(
            &cf_usage,
            keys::usage_key(&debit.user_id, &usage.id),
            Self::serialize(&usage)?,
        );
        self.write(batch)?;

        Ok(DebitReceipt {
            account,
            transaction,
            usage,
        })
    }

    async fn add_credits(&self, grant: &CreditGrant) -> Result<CreditTransaction> {
        let _guard = self.write_lock.lock().await;

        let mut account = self
            .load_account(&grant.user_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "credit account",
                id: grant.user_id.to_string(),
            })?;

        account.apply_credit(grant.amount)?;

        let transaction = CreditTransaction::grant(
            grant.user_id,
            grant.amount,
            account.balance,
            grant.transaction_type,
            grant.description.clone(),
        );

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, keys::account_key(&grant.user_id), Self::serialize(&account)?);
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&grant.user_id, &transaction.id),
            Self::serialize(&transaction)?,
        );
        self.write(batch)?;

        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        self.scan_prefix_newest_first(cf::TRANSACTIONS, &keys::user_prefix(user_id), limit, offset)
    }

    // =========================================================================
    // Tool Usage
    // =========================================================================

    async fn record_tool_usage(&self, record: &ToolUsageRecord) -> Result<()> {
        let cf = self.cf(cf::TOOL_USAGE)?;
        self.db
            .put_cf(
                &cf,
                keys::usage_key(&record.user_id, &record.id),
                Self::serialize(record)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn list_tool_usage(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ToolUsageRecord>> {
        self.scan_prefix_newest_first(cf::TOOL_USAGE, &keys::user_prefix(user_id), limit, 0)
    }

    // =========================================================================
    // Subscription Mirror
    // =========================================================================

    async fn get_subscription(
        &self,
        user_id: &UserId,
        app_id: &str,
    ) -> Result<Option<SubscriptionMirror>> {
        self.load_subscription(user_id, app_id)
    }

    async fn upsert_subscription(&self, mirror: &SubscriptionMirror) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let previous = self.load_subscription(&mirror.user_id, &mirror.app_id)?;
        if previous.as_ref().is_some_and(|p| p.same_state(mirror)) {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        self.stage_subscription(&mut batch, previous.as_ref(), mirror)?;
        self.write(batch)?;
        Ok(true)
    }

    async fn find_subscription_by_customer(
        &self,
        stripe_customer_id: &str,
        app_id: &str,
    ) -> Result<Option<SubscriptionMirror>> {
        let Some(user_bytes) =
            self.get_raw(cf::SUBSCRIPTIONS_BY_CUSTOMER, &keys::customer_key(stripe_customer_id, app_id))?
        else {
            return Ok(None);
        };

        let user_id = keys::user_id_from_bytes(&user_bytes)
            .ok_or_else(|| StoreError::Serialization("corrupt customer index entry".into()))?;
        self.load_subscription(&user_id, app_id)
    }

    // =========================================================================
    // Referrals
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<ReferralProfile>> {
        self.get_value(cf::PROFILES, &keys::account_key(user_id))
    }

    async fn put_profile(&self, profile: &ReferralProfile) -> Result<()> {
        let cf = self.cf(cf::PROFILES)?;
        self.db
            .put_cf(&cf, keys::account_key(&profile.user_id), Self::serialize(profile)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn get_code_for_user(&self, user_id: &UserId) -> Result<Option<ReferralCode>> {
        let Some(code) = self.get_raw(cf::REFERRAL_CODES_BY_USER, &keys::account_key(user_id))? else {
            return Ok(None);
        };
        self.get_value(cf::REFERRAL_CODES, &code)
    }

    async fn insert_referral_code(&self, code: &ReferralCode) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.get_raw(cf::REFERRAL_CODES, &keys::code_key(&code.code))?.is_some() {
            return Err(StoreError::Conflict(format!("referral code taken: {}", code.code)));
        }
        if self
            .get_raw(cf::REFERRAL_CODES_BY_USER, &keys::account_key(&code.user_id))?
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "user already has a referral code: {}",
                code.user_id
            )));
        }

        let cf_codes = self.cf(cf::REFERRAL_CODES)?;
        let cf_by_user = self.cf(cf::REFERRAL_CODES_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_codes, keys::code_key(&code.code), Self::serialize(code)?);
        batch.put_cf(&cf_by_user, keys::account_key(&code.user_id), keys::code_key(&code.code));
        self.write(batch)
    }

    async fn resolve_referral_code(&self, code: &str) -> Result<Option<UserId>> {
        let found: Option<ReferralCode> = self.get_value(cf::REFERRAL_CODES, &keys::code_key(code))?;
        Ok(found.map(|c| c.user_id))
    }

    async fn get_reward_for_referred(
        &self,
        referred_user_id: &UserId,
    ) -> Result<Option<ReferralReward>> {
        self.load_reward(referred_user_id)
    }

    async fn list_rewards_for_referrer(
        &self,
        referrer_user_id: &UserId,
    ) -> Result<Vec<ReferralReward>> {
        let index_keys = self.scan_keys(
            cf::REFERRAL_REWARDS_BY_REFERRER,
            &keys::user_prefix(referrer_user_id),
        )?;

        let mut rewards = Vec::with_capacity(index_keys.len());
        for key in index_keys {
            let referred = keys::referred_from_referrer_key(&key)
                .ok_or_else(|| StoreError::Serialization("corrupt reward index entry".into()))?;
            if let Some(reward) = self.load_reward(&referred)? {
                rewards.push(reward);
            }
        }

        rewards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rewards)
    }

    async fn grant_referral_reward(&self, grant: &ReferralGrant) -> Result<ReferralReceipt> {
        let _guard = self.write_lock.lock().await;

        let reward = &grant.reward;
        if self.load_reward(&reward.referred_user_id)?.is_some() {
            return Err(StoreError::DuplicateReward {
                referred_user_id: reward.referred_user_id.to_string(),
            });
        }

        let mut account = self
            .load_account(&reward.referrer_user_id)?
            .unwrap_or_else(|| CreditAccount::empty(reward.referrer_user_id));
        account.apply_credit(reward.reward_amount)?;

        let transaction = CreditTransaction::referral_reward(
            reward.referrer_user_id,
            reward.reward_amount,
            account.balance,
        );

        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_rewards = self.cf(cf::REFERRAL_REWARDS)?;
        let cf_by_referrer = self.cf(cf::REFERRAL_REWARDS_BY_REFERRER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&reward.referrer_user_id),
            Self::serialize(&account)?,
        );
        batch.put_cf(
            &cf_tx,
            keys::transaction_key(&reward.referrer_user_id, &transaction.id),
            Self::serialize(&transaction)?,
        );
        batch.put_cf(
            &cf_rewards,
            keys::account_key(&reward.referred_user_id),
            Self::serialize(reward)?,
        );
        batch.put_cf(
            &cf_by_referrer,
            keys::referrer_reward_key(&reward.referrer_user_id, &reward.referred_user_id),
            b"",
        );

        let mut trial_granted = false;
        if let Some(trial) = &grant.trial {
            let previous = self.load_subscription(&trial.user_id, &trial.app_id)?;
            let already_unlimited = previous.as_ref().is_some_and(|p| {
                p.status == SubscriptionStatus::Active && p.plan_id.is_unlimited()
            });

            if !already_unlimited {
                let mut trial = trial.clone();
                if trial.stripe_customer_id.is_none() {
                    trial.stripe_customer_id =
                        previous.as_ref().and_then(|p| p.stripe_customer_id.clone());
                }
                self.stage_subscription(&mut batch, previous.as_ref(), &trial)?;
                trial_granted = true;
            }
        }

        self.write(batch)?;

        Ok(ReferralReceipt {
            transaction,
            trial_granted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use tenant_credits_core::{PlanId, TransactionType, DEFAULT_APP_ID};

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn debit(user_id: UserId, cost: i64) -> ToolDebit {
        ToolDebit {
            user_id,
            tool_type: "checker".into(),
            tool_id: "mietpreisbremse".into(),
            cost,
        }
    }

    #[tokio::test]
    async fn first_read_creates_starter_account_once() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        let first = store.get_or_create_account(&user_id).await.unwrap();
        let second = store.get_or_create_account(&user_id).await.unwrap();

        assert_eq!(first.balance, 3);
        assert_eq!(first.total_earned, 3);
        assert_eq!(first.total_spent, 0);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn debit_writes_account_ledger_and_usage() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.get_or_create_account(&user_id).await.unwrap();

        let receipt = store.debit_for_tool(&debit(user_id, 2)).await.unwrap();
        assert_eq!(receipt.account.balance, 1);
        assert_eq!(receipt.transaction.amount, -2);
        assert_eq!(receipt.transaction.balance_after, 1);

        let account = store.get_account(&user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 1);
        assert_eq!(account.total_spent, 2);
        assert!(account.is_consistent());

        let ledger = store.list_transactions(&user_id, 10, 0).await.unwrap();
        assert_eq!(ledger.len(), 1);
        let usage = store.list_tool_usage(&user_id, 10).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].credits_cost, 2);
    }

    #[tokio::test]
    async fn insufficient_debit_writes_nothing() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.get_or_create_account(&user_id).await.unwrap();

        let result = store.debit_for_tool(&debit(user_id, 4)).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits {
                balance: 3,
                required: 4
            })
        ));

        let account = store.get_account(&user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 3);
        assert!(store.list_transactions(&user_id, 10, 0).await.unwrap().is_empty());
        assert!(store.list_tool_usage(&user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn debit_without_account_is_not_found() {
        let (store, _dir) = create_test_store();
        let result = store.debit_for_tool(&debit(UserId::generate(), 1)).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn transactions_list_newest_first_with_offset() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.get_or_create_account(&user_id).await.unwrap();

        for description in ["first", "second"] {
            store
                .add_credits(&CreditGrant {
                    user_id,
                    amount: 1,
                    transaction_type: TransactionType::Adjustment,
                    description: description.into(),
                })
                .await
                .unwrap();
        }

        let all = store.list_transactions(&user_id, 10, 0).await.unwrap();
        assert_eq!(all[0].description.as_deref(), Some("second"));
        assert_eq!(all[1].description.as_deref(), Some("first"));
        assert_eq!(all[0].balance_after, 5);

        let page = store.list_transactions(&user_id, 1, 1).await.unwrap();
        assert_eq!(page[0].description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn newest_ledger_entry_matches_balance_after_back_to_back_spends() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.get_or_create_account(&user_id).await.unwrap();
        store
            .add_credits(&CreditGrant {
                user_id,
                amount: 50,
                transaction_type: TransactionType::Purchase,
                description: "top-up".into(),
            })
            .await
            .unwrap();

        for _ in 0..40 {
            store.debit_for_tool(&debit(user_id, 1)).await.unwrap();
            let balance = store.get_account(&user_id).await.unwrap().unwrap().balance;
            let newest = store.list_transactions(&user_id, 1, 0).await.unwrap();
            assert_eq!(newest[0].balance_after, balance);
        }

        let ledger = store.list_transactions(&user_id, 100, 0).await.unwrap();
        assert_eq!(ledger.len(), 41);
        for pair in ledger.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_after - 1);
        }
    }

    #[tokio::test]
    async fn newest_first_scan_stays_inside_the_user_prefix() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::from_uuid(uuid::Uuid::from_bytes([7; 16]));
        let mut next_bytes = [7; 16];
        next_bytes[15] = 8;
        let neighbour = UserId::from_uuid(uuid::Uuid::from_bytes(next_bytes));
        let mut prev_bytes = [7; 16];
        prev_bytes[15] = 6;
        let before = UserId::from_uuid(uuid::Uuid::from_bytes(prev_bytes));

        for user in [before, user_id, neighbour] {
            store.get_or_create_account(&user).await.unwrap();
            store.debit_for_tool(&debit(user, 1)).await.unwrap();
        }
        store.debit_for_tool(&debit(user_id, 1)).await.unwrap();

        let ledger = store.list_transactions(&user_id, 10, 0).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|t| t.user_id == user_id));
        assert_eq!(ledger[0].balance_after, 1);

        let usage = store.list_tool_usage(&neighbour, 10).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert!(store.list_transactions(&user_id, 10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflowing_grant_writes_nothing() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        store.get_or_create_account(&user_id).await.unwrap();

        let result = store
            .add_credits(&CreditGrant {
                user_id,
                amount: i64::MAX,
                transaction_type: TransactionType::Adjustment,
                description: "too much".into(),
            })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidAmount(_))));

        let account = store.get_account(&user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 3);
        assert!(account.is_consistent());
        assert!(store.list_transactions(&user_id, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_subscription_skips_identical_state() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let mirror = SubscriptionMirror::free(user_id, DEFAULT_APP_ID, Some("cus_1".into()));

        assert!(store.upsert_subscription(&mirror).await.unwrap());
        let mut again = mirror.clone();
        again.updated_at = Utc::now();
        assert!(!store.upsert_subscription(&again).await.unwrap());

        let stored = store.get_subscription(&user_id, DEFAULT_APP_ID).await.unwrap().unwrap();
        assert_eq!(stored, mirror);

        let by_customer = store
            .find_subscription_by_customer("cus_1", DEFAULT_APP_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_customer.user_id, user_id);
    }

    #[tokio::test]
    async fn referral_codes_are_unique() {
        let (store, _dir) = create_test_store();
        let owner = UserId::generate();
        let code = ReferralCode {
            code: "ABC123".into(),
            user_id: owner,
            created_at: Utc::now(),
        };
        store.insert_referral_code(&code).await.unwrap();

        let clash = ReferralCode {
            user_id: UserId::generate(),
            ..code.clone()
        };
        assert!(matches!(
            store.insert_referral_code(&clash).await,
            Err(StoreError::Conflict(_))
        ));

        assert_eq!(store.resolve_referral_code("ABC123").await.unwrap(), Some(owner));
        assert_eq!(store.get_code_for_user(&owner).await.unwrap(), Some(code));
    }

    #[tokio::test]
    async fn referral_grant_is_exactly_once() {
        let (store, _dir) = create_test_store();
        let referrer = UserId::generate();
        let referred = UserId::generate();
        let now = Utc::now();

        let grant = ReferralGrant {
            reward: ReferralReward::granted(referrer, referred, "ABC123", now),
            trial: Some(SubscriptionMirror::trial(referred, DEFAULT_APP_ID, 7, now)),
        };

        let receipt = store.grant_referral_reward(&grant).await.unwrap();
        assert!(receipt.trial_granted);
        assert_eq!(receipt.transaction.balance_after, 2);

        let again = store.grant_referral_reward(&grant).await;
        assert!(matches!(again, Err(StoreError::DuplicateReward { .. })));

        let account = store.get_account(&referrer).await.unwrap().unwrap();
        assert_eq!(account.balance, 2);
        assert_eq!(account.total_earned, 2);

        let rewards = store.list_rewards_for_referrer(&referrer).await.unwrap();
        assert_eq!(rewards.len(), 1);

        let trial = store.get_subscription(&referred, DEFAULT_APP_ID).await.unwrap().unwrap();
        assert_eq!(trial.plan_id, PlanId::Pro);
        assert_eq!(trial.status, SubscriptionStatus::Trial);
    }

    #[tokio::test]
    async fn referral_trial_does_not_replace_unlimited_subscription() {
        let (store, _dir) = create_test_store();
        let referrer = UserId::generate();
        let referred = UserId::generate();
        let now = Utc::now();

        let mut active = SubscriptionMirror::free(referred, DEFAULT_APP_ID, Some("cus_9".into()));
        active.plan_id = PlanId::Pro;
        active.status = SubscriptionStatus::Active;
        store.upsert_subscription(&active).await.unwrap();

        let receipt = store
            .grant_referral_reward(&ReferralGrant {
                reward: ReferralReward::granted(referrer, referred, "ABC123", now),
                trial: Some(SubscriptionMirror::trial(referred, DEFAULT_APP_ID, 7, now)),
            })
            .await
            .unwrap();

        assert!(!receipt.trial_granted);
        let stored = store.get_subscription(&referred, DEFAULT_APP_ID).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn referral_trial_upgrades_basic_subscription() {
        let (store, _dir) = create_test_store();
        let referred = UserId::generate();
        let now = Utc::now();

        let mut basic = SubscriptionMirror::free(referred, DEFAULT_APP_ID, Some("cus_4".into()));
        basic.plan_id = PlanId::Basic;
        basic.status = SubscriptionStatus::Active;
        store.upsert_subscription(&basic).await.unwrap();

        let receipt = store
            .grant_referral_reward(&ReferralGrant {
                reward: ReferralReward::granted(UserId::generate(), referred, "ABC123", now),
                trial: Some(SubscriptionMirror::trial(referred, DEFAULT_APP_ID, 7, now)),
            })
            .await
            .unwrap();

        assert!(receipt.trial_granted);
        let stored = store.get_subscription(&referred, DEFAULT_APP_ID).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Trial);
        assert_eq!(stored.plan_id, PlanId::Pro);
        assert_eq!(stored.stripe_customer_id.as_deref(), Some("cus_4"));
    }
}
