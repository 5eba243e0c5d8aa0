//! Credit accounting.
//!
//! Every balance change goes through one atomic store operation, so a spend
//! either debits exactly `cost` and writes its ledger and usage rows, or
//! leaves the account untouched.

use std::sync::Arc;

use serde::Serialize;

use tenant_credits_core::{
    AccessMethod, CreditAccount, CreditError, CreditTransaction, Result, ToolUsageRecord,
    TransactionId, TransactionType, UserId,
};
use tenant_credits_store::{CreditGrant, Store, ToolDebit};

use crate::entitlement::EntitlementResolver;

/// Largest page of ledger or usage entries returned at once.
pub const MAX_PAGE_SIZE: usize = 100;

/// Largest number of credits a single manual grant may add.
pub const MAX_GRANT_AMOUNT: i64 = 1_000_000;

/// One page of the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    /// Entries, newest first.
    pub transactions: Vec<CreditTransaction>,
    /// Whether older entries follow this page.
    pub has_more: bool,
}

/// Result of a tool launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendOutcome {
    /// Balance after the launch.
    pub balance: i64,
    /// How the launch was paid for.
    pub access_method: AccessMethod,
    /// Ledger entry, absent when a subscription covered the launch.
    pub transaction_id: Option<TransactionId>,
}

/// Balance reads, spends, grants and history.
#[derive(Clone)]
pub struct CreditService {
    store: Arc<dyn Store>,
    entitlements: EntitlementResolver,
}

impl CreditService {
    /// Create a credit service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, entitlements: EntitlementResolver) -> Self {
        Self {
            store,
            entitlements,
        }
    }

    /// Current account, created with the starter grant on first read.
    ///
    /// # Errors
    ///
    /// Returns a transient error if the store fails.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<CreditAccount> {
        Ok(self.store.get_or_create_account(user_id).await?)
    }

    /// Whether the user can launch a tool costing `cost`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for a negative cost, or a transient error if the
    /// store fails.
    pub async fn can_afford(&self, user_id: &UserId, cost: i64) -> Result<bool> {
        check_cost(cost)?;
        if self.entitlements.is_unlimited(user_id).await {
            return Ok(true);
        }
        Ok(self.get_balance(user_id).await?.can_cover(cost))
    }

    /// Pay for a tool launch.
    ///
    /// Unlimited users are logged with `access_method = subscription` at no
    /// cost. Everyone else is debited atomically.
    ///
    /// # Errors
    ///
    /// - `InsufficientCredits` if the balance is below `cost`; nothing is written.
    /// - `InvalidAmount` for a negative cost.
    pub async fn spend(
        &self,
        user_id: &UserId,
        tool_type: &str,
        tool_id: &str,
        cost: i64,
    ) -> Result<SpendOutcome> {
        check_cost(cost)?;

        if self.entitlements.is_unlimited(user_id).await {
            let record = ToolUsageRecord::covered_by_subscription(*user_id, tool_type, tool_id);
            self.store.record_tool_usage(&record).await?;
            let account = self.get_balance(user_id).await?;

            tracing::info!(
                user_id = %user_id,
                tool_type = %tool_type,
                tool_id = %tool_id,
                "Tool launch covered by subscription"
            );

            return Ok(SpendOutcome {
                balance: account.balance,
                access_method: AccessMethod::Subscription,
                transaction_id: None,
            });
        }

        // Make sure the starter account exists before the conditional debit
        self.get_balance(user_id).await?;

        let receipt = self
            .store
            .debit_for_tool(&ToolDebit {
                user_id: *user_id,
                tool_type: tool_type.to_string(),
                tool_id: tool_id.to_string(),
                cost,
            })
            .await
            .map_err(|e| {
                let err = CreditError::from(e);
                if let CreditError::InsufficientCredits { balance, required } = &err {
                    tracing::info!(
                        user_id = %user_id,
                        balance,
                        required,
                        "Tool launch refused: insufficient credits"
                    );
                }
                err
            })?;

        tracing::info!(
            user_id = %user_id,
            tool_type = %tool_type,
            tool_id = %tool_id,
            cost,
            balance = receipt.account.balance,
            transaction_id = %receipt.transaction.id,
            "Credits spent"
        );

        Ok(SpendOutcome {
            balance: receipt.account.balance,
            access_method: AccessMethod::Credit,
            transaction_id: Some(receipt.transaction.id),
        })
    }

    /// Grant credits manually (purchase or adjustment).
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if `amount` is not in `1..=MAX_GRANT_AMOUNT`,
    /// the type is not a manual grant type, or the balance would overflow.
    pub async fn grant(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
    ) -> Result<CreditTransaction> {
        if !(1..=MAX_GRANT_AMOUNT).contains(&amount) {
            return Err(CreditError::InvalidAmount(format!(
                "grant amount must be between 1 and {MAX_GRANT_AMOUNT}, got {amount}"
            )));
        }
        if !matches!(
            transaction_type,
            TransactionType::Purchase | TransactionType::Adjustment
        ) {
            return Err(CreditError::InvalidAmount(format!(
                "cannot grant credits as {}",
                transaction_type.as_str()
            )));
        }

        self.get_balance(user_id).await?;

        let transaction = self
            .store
            .add_credits(&CreditGrant {
                user_id: *user_id,
                amount,
                transaction_type,
                description: description.to_string(),
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            amount,
            transaction_type = transaction_type.as_str(),
            balance = transaction.balance_after,
            "Credits granted"
        );

        Ok(transaction)
    }

    /// Ledger entries, newest first. `limit` is capped at [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns a transient error if the store fails.
    pub async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        Ok(self
            .store
            .list_transactions(user_id, limit.min(MAX_PAGE_SIZE), offset)
            .await?)
    }

    /// A page of ledger entries, newest first, with a flag for older entries.
    /// `limit` is capped at [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns a transient error if the store fails.
    pub async fn transaction_page(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<TransactionPage> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let mut transactions = self
            .store
            .list_transactions(user_id, limit + 1, offset)
            .await?;

        let has_more = transactions.len() > limit;
        transactions.truncate(limit);

        Ok(TransactionPage {
            transactions,
            has_more,
        })
    }

    /// Tool launches, newest first. `limit` is capped at [`MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns a transient error if the store fails.
    pub async fn list_tool_usage(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ToolUsageRecord>> {
        Ok(self
            .store
            .list_tool_usage(user_id, limit.min(MAX_PAGE_SIZE))
            .await?)
    }
}

fn check_cost(cost: i64) -> Result<()> {
    if cost < 0 {
        return Err(CreditError::InvalidAmount(format!(
            "cost must not be negative, got {cost}"
        )));
    }
    Ok(())
}
