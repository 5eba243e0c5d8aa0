//! PostgreSQL storage implementation.
//!
//! Balance changes rely on row-level atomicity: the debit is a conditional
//! `UPDATE … WHERE balance >= $cost`, so concurrent launches can never
//! overspend, and every compound write runs in one transaction.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

use tenant_credits_core::{
    AccessMethod, CreditAccount, CreditTransaction, PlanId, ReferralCode, ReferralProfile,
    ReferralReward, RewardStatus, RewardType, SubscriptionMirror, SubscriptionStatus,
    ToolUsageRecord, TransactionId, TransactionType, UsageId, UserId, STARTER_CREDITS,
};

use crate::error::{Result, StoreError};
use crate::{CreditGrant, DebitReceipt, ReferralGrant, ReferralReceipt, Store, ToolDebit};

const ACCOUNT_COLUMNS: &str = "user_id, balance, total_earned, total_spent, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, balance_after, transaction_type, \
     tool_type, tool_id, description, created_at";

const USAGE_COLUMNS: &str =
    "id, user_id, tool_type, tool_id, credits_cost, access_method, created_at";

const SUBSCRIPTION_COLUMNS: &str = "user_id, app_id, plan_id, status, current_period_start, \
     current_period_end, cancel_at_period_end, stripe_customer_id, stripe_subscription_id, \
     updated_at";

const REWARD_COLUMNS: &str = "id, referrer_user_id, referred_user_id, referral_code, \
     reward_type, reward_amount, status, granted_at, created_at";

/// Insert a mirror row, or update it only if some state column differs.
const UPSERT_SUBSCRIPTION: &str = r"
INSERT INTO user_subscriptions (
    user_id, app_id, plan_id, status, current_period_start, current_period_end,
    cancel_at_period_end, stripe_customer_id, stripe_subscription_id, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
ON CONFLICT (user_id, app_id) DO UPDATE SET
    plan_id = EXCLUDED.plan_id,
    status = EXCLUDED.status,
    current_period_start = EXCLUDED.current_period_start,
    current_period_end = EXCLUDED.current_period_end,
    cancel_at_period_end = EXCLUDED.cancel_at_period_end,
    stripe_customer_id = EXCLUDED.stripe_customer_id,
    stripe_subscription_id = EXCLUDED.stripe_subscription_id,
    updated_at = EXCLUDED.updated_at
WHERE (
    user_subscriptions.plan_id,
    user_subscriptions.status,
    user_subscriptions.current_period_start,
    user_subscriptions.current_period_end,
    user_subscriptions.cancel_at_period_end,
    user_subscriptions.stripe_customer_id,
    user_subscriptions.stripe_subscription_id
) IS DISTINCT FROM (
    EXCLUDED.plan_id,
    EXCLUDED.status,
    EXCLUDED.current_period_start,
    EXCLUDED.current_period_end,
    EXCLUDED.cancel_at_period_end,
    EXCLUDED.stripe_customer_id,
    EXCLUDED.stripe_subscription_id
)";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        tracing::debug!(max_connections, "PostgreSQL pool connected");
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    async fn write_subscription<'e, E: PgExecutor<'e>>(
        executor: E,
        mirror: &SubscriptionMirror,
    ) -> Result<bool> {
        let result = sqlx::query(UPSERT_SUBSCRIPTION)
            .bind(mirror.user_id.as_uuid())
            .bind(&mirror.app_id)
            .bind(mirror.plan_id.as_str())
            .bind(mirror.status.as_str())
            .bind(mirror.current_period_start)
            .bind(mirror.current_period_end)
            .bind(mirror.cancel_at_period_end)
            .bind(&mirror.stripe_customer_id)
            .bind(&mirror.stripe_subscription_id)
            .bind(mirror.updated_at)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_transaction<'e, E: PgExecutor<'e>>(
        executor: E,
        transaction: &CreditTransaction,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO credit_transactions ({TRANSACTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(transaction.id.to_string())
        .bind(transaction.user_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.balance_after)
        .bind(transaction.transaction_type.as_str())
        .bind(&transaction.tool_type)
        .bind(&transaction.tool_id)
        .bind(&transaction.description)
        .bind(transaction.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn insert_usage<'e, E: PgExecutor<'e>>(
        executor: E,
        record: &ToolUsageRecord,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO tool_usage_log ({USAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(record.id.to_string())
        .bind(record.user_id.as_uuid())
        .bind(&record.tool_type)
        .bind(&record.tool_id)
        .bind(record.credits_cost)
        .bind(record.access_method.as_str())
        .bind(record.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn corrupt(column: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("unexpected {column}: {value}"))
}

fn user_id_column(row: &PgRow, column: &str) -> Result<UserId> {
    Ok(UserId::from_uuid(row.try_get::<Uuid, _>(column)?))
}

fn account_from_row(row: &PgRow) -> Result<CreditAccount> {
    Ok(CreditAccount {
        user_id: user_id_column(row, "user_id")?,
        balance: row.try_get("balance")?,
        total_earned: row.try_get("total_earned")?,
        total_spent: row.try_get("total_spent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("transaction_type")?;
    Ok(CreditTransaction {
        id: TransactionId::from_str(&id).map_err(|_| corrupt("transaction id", &id))?,
        user_id: user_id_column(row, "user_id")?,
        amount: row.try_get("amount")?,
        balance_after: row.try_get("balance_after")?,
        transaction_type: TransactionType::parse(&kind)
            .ok_or_else(|| corrupt("transaction_type", &kind))?,
        tool_type: row.try_get("tool_type")?,
        tool_id: row.try_get("tool_id")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<ToolUsageRecord> {
    let id: String = row.try_get("id")?;
    let method: String = row.try_get("access_method")?;
    Ok(ToolUsageRecord {
        id: UsageId::from_str(&id).map_err(|_| corrupt("usage id", &id))?,
        user_id: user_id_column(row, "user_id")?,
        tool_type: row.try_get("tool_type")?,
        tool_id: row.try_get("tool_id")?,
        credits_cost: row.try_get("credits_cost")?,
        access_method: AccessMethod::parse(&method)
            .ok_or_else(|| corrupt("access_method", &method))?,
        created_at: row.try_get("created_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<SubscriptionMirror> {
    let plan: String = row.try_get("plan_id")?;
    let status: String = row.try_get("status")?;
    Ok(SubscriptionMirror {
        user_id: user_id_column(row, "user_id")?,
        app_id: row.try_get("app_id")?,
        plan_id: PlanId::parse(&plan).ok_or_else(|| corrupt("plan_id", &plan))?,
        status: SubscriptionStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
        stripe_subscription_id: row.try_get("stripe_subscription_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn reward_from_row(row: &PgRow) -> Result<ReferralReward> {
    let kind: String = row.try_get("reward_type")?;
    let status: String = row.try_get("status")?;
    Ok(ReferralReward {
        id: row.try_get("id")?,
        referrer_user_id: user_id_column(row, "referrer_user_id")?,
        referred_user_id: user_id_column(row, "referred_user_id")?,
        referral_code: row.try_get("referral_code")?,
        reward_type: RewardType::parse(&kind).ok_or_else(|| corrupt("reward_type", &kind))?,
        reward_amount: row.try_get("reward_amount")?,
        status: RewardStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        granted_at: row.try_get::<Option<DateTime<Utc>>, _>("granted_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `bigint out of range`: a credit would overflow the balance.
fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("22003"))
}

fn credit_error(err: sqlx::Error, amount: i64) -> StoreError {
    if is_out_of_range(&err) {
        StoreError::InvalidAmount(format!("crediting {amount} would overflow the balance"))
    } else {
        err.into()
    }
}

fn page(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Credit Accounts
    // =========================================================================

    async fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM user_credits WHERE user_id = $1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(account_from_row)
        .transpose()
    }

    async fn get_or_create_account(&self, user_id: &UserId) -> Result<CreditAccount> {
        let inserted = sqlx::query(
            "INSERT INTO user_credits (user_id, balance, total_earned, total_spent) \
             VALUES ($1, $2, $2, 0) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id.as_uuid())
        .bind(STARTER_CREDITS)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            tracing::info!(user_id = %user_id, balance = STARTER_CREDITS, "Credit account created");
        }

        self.get_account(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "credit account",
                id: user_id.to_string(),
            })
    }

    async fn debit_for_tool(&self, debit: &ToolDebit) -> Result<DebitReceipt> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            "UPDATE user_credits \
             SET balance = balance - $2, total_spent = total_spent + $2, updated_at = now() \
             WHERE user_id = $1 AND balance >= $2 \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(debit.user_id.as_uuid())
        .bind(debit.cost)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            tx.rollback().await?;
            return match self.get_account(&debit.user_id).await? {
                Some(account) => Err(StoreError::InsufficientCredits {
                    balance: account.balance,
                    required: debit.cost,
                }),
                None => Err(StoreError::NotFound {
                    entity: "credit account",
                    id: debit.user_id.to_string(),
                }),
            };
        };
        let account = account_from_row(&row)?;

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

        Self::insert_transaction(&mut *tx, &transaction).await?;
        Self::insert_usage(&mut *tx, &usage).await?;
        tx.commit().await?;

        Ok(DebitReceipt {
            account,
            transaction,
            usage,
        })
    }

    async fn add_credits(&self, grant: &CreditGrant) -> Result<CreditTransaction> {
        let mut tx = self.pool.begin().await?;

        let balance: i64 = sqlx::query(
            "UPDATE user_credits \
             SET balance = balance + $2, total_earned = total_earned + $2, updated_at = now() \
             WHERE user_id = $1 RETURNING balance",
        )
        .bind(grant.user_id.as_uuid())
        .bind(grant.amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| credit_error(e, grant.amount))?
        .ok_or_else(|| StoreError::NotFound {
            entity: "credit account",
            id: grant.user_id.to_string(),
        })?
        .try_get("balance")?;

        let transaction = CreditTransaction::grant(
            grant.user_id,
            grant.amount,
            balance,
            grant.transaction_type,
            grant.description.clone(),
        );
        Self::insert_transaction(&mut *tx, &transaction).await?;
        tx.commit().await?;

        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE user_id = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_uuid())
        .bind(page(limit))
        .bind(page(offset))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transaction_from_row)
        .collect()
    }

    // =========================================================================
    // Tool Usage
    // =========================================================================

    async fn record_tool_usage(&self, record: &ToolUsageRecord) -> Result<()> {
        Self::insert_usage(&self.pool, record).await
    }

    async fn list_tool_usage(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ToolUsageRecord>> {
        sqlx::query(&format!(
            "SELECT {USAGE_COLUMNS} FROM tool_usage_log WHERE user_id = $1 \
             ORDER BY seq DESC LIMIT $2"
        ))
        .bind(user_id.as_uuid())
        .bind(page(limit))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(usage_from_row)
        .collect()
    }

    // =========================================================================
    // Subscription Mirror
    // =========================================================================

    async fn get_subscription(
        &self,
        user_id: &UserId,
        app_id: &str,
    ) -> Result<Option<SubscriptionMirror>> {
        sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions \
             WHERE user_id = $1 AND app_id = $2"
        ))
        .bind(user_id.as_uuid())
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(subscription_from_row)
        .transpose()
    }

    async fn upsert_subscription(&self, mirror: &SubscriptionMirror) -> Result<bool> {
        Self::write_subscription(&self.pool, mirror).await
    }

    async fn find_subscription_by_customer(
        &self,
        stripe_customer_id: &str,
        app_id: &str,
    ) -> Result<Option<SubscriptionMirror>> {
        sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions \
             WHERE stripe_customer_id = $1 AND app_id = $2 \
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(stripe_customer_id)
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(subscription_from_row)
        .transpose()
    }

    // =========================================================================
    // Referrals
    // =========================================================================

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<ReferralProfile>> {
        let row = sqlx::query("SELECT user_id, referred_by FROM referral_profiles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(ReferralProfile {
                user_id: user_id_column(&row, "user_id")?,
                referred_by: row.try_get("referred_by")?,
            })
        })
        .transpose()
    }

    async fn put_profile(&self, profile: &ReferralProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO referral_profiles (user_id, referred_by) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET referred_by = EXCLUDED.referred_by",
        )
        .bind(profile.user_id.as_uuid())
        .bind(&profile.referred_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_code_for_user(&self, user_id: &UserId) -> Result<Option<ReferralCode>> {
        let row = sqlx::query("SELECT code, user_id, created_at FROM referral_codes WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(ReferralCode {
                code: row.try_get("code")?,
                user_id: user_id_column(&row, "user_id")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn insert_referral_code(&self, code: &ReferralCode) -> Result<()> {
        sqlx::query("INSERT INTO referral_codes (code, user_id, created_at) VALUES ($1, $2, $3)")
            .bind(&code.code)
            .bind(code.user_id.as_uuid())
            .bind(code.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("referral code taken: {}", code.code))
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn resolve_referral_code(&self, code: &str) -> Result<Option<UserId>> {
        let row = sqlx::query("SELECT user_id FROM referral_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| user_id_column(&row, "user_id")).transpose()
    }

    async fn get_reward_for_referred(
        &self,
        referred_user_id: &UserId,
    ) -> Result<Option<ReferralReward>> {
        sqlx::query(&format!(
            "SELECT {REWARD_COLUMNS} FROM referral_rewards WHERE referred_user_id = $1"
        ))
        .bind(referred_user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(reward_from_row)
        .transpose()
    }

    async fn list_rewards_for_referrer(
        &self,
        referrer_user_id: &UserId,
    ) -> Result<Vec<ReferralReward>> {
        sqlx::query(&format!(
            "SELECT {REWARD_COLUMNS} FROM referral_rewards WHERE referrer_user_id = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(referrer_user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(reward_from_row)
        .collect()
    }

    async fn grant_referral_reward(&self, grant: &ReferralGrant) -> Result<ReferralReceipt> {
        let reward = &grant.reward;
        let mut tx = self.pool.begin().await?;

        // The unique index on referred_user_id makes the second payout a no-op
        let inserted = sqlx::query(&format!(
            "INSERT INTO referral_rewards ({REWARD_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (referred_user_id) DO NOTHING"
        ))
        .bind(reward.id)
        .bind(reward.referrer_user_id.as_uuid())
        .bind(reward.referred_user_id.as_uuid())
        .bind(&reward.referral_code)
        .bind(reward.reward_type.as_str())
        .bind(reward.reward_amount)
        .bind(reward.status.as_str())
        .bind(reward.granted_at)
        .bind(reward.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Err(StoreError::DuplicateReward {
                referred_user_id: reward.referred_user_id.to_string(),
            });
        }

        let balance: i64 = sqlx::query(
            "INSERT INTO user_credits (user_id, balance, total_earned, total_spent) \
             VALUES ($1, $2, $2, 0) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 balance = user_credits.balance + EXCLUDED.balance, \
                 total_earned = user_credits.total_earned + EXCLUDED.total_earned, \
                 updated_at = now() \
             RETURNING balance",
        )
        .bind(reward.referrer_user_id.as_uuid())
        .bind(reward.reward_amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| credit_error(e, reward.reward_amount))?
        .try_get("balance")?;

        let transaction = CreditTransaction::referral_reward(
            reward.referrer_user_id,
            reward.reward_amount,
            balance,
        );
        Self::insert_transaction(&mut *tx, &transaction).await?;

        let mut trial_granted = false;
        if let Some(trial) = &grant.trial {
            let existing = sqlx::query(
                "SELECT plan_id, status, stripe_customer_id FROM user_subscriptions \
                 WHERE user_id = $1 AND app_id = $2 FOR UPDATE",
            )
            .bind(trial.user_id.as_uuid())
            .bind(&trial.app_id)
            .fetch_optional(&mut *tx)
            .await?;

            let (already_unlimited, customer) = match &existing {
                Some(row) => {
                    let active = row.try_get::<String, _>("status")?
                        == SubscriptionStatus::Active.as_str();
                    let unlimited = PlanId::parse(&row.try_get::<String, _>("plan_id")?)
                        .is_some_and(|plan| plan.is_unlimited());
                    (
                        active && unlimited,
                        row.try_get::<Option<String>, _>("stripe_customer_id")?,
                    )
                }
                None => (false, None),
            };

            if !already_unlimited {
                let mut trial = trial.clone();
                if trial.stripe_customer_id.is_none() {
                    trial.stripe_customer_id = customer;
                }
                Self::write_subscription(&mut *tx, &trial).await?;
                trial_granted = true;
            }
        }

        tx.commit().await?;

        Ok(ReferralReceipt {
            transaction,
            trial_granted,
        })
    }
}
