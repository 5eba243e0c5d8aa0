//! Credit account types.
//!
//! A [`CreditAccount`] is the per-user balance record. It is created lazily on
//! the first balance read and only ever mutated through the store's atomic
//! compound operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CreditError, Result, UserId};

/// Credits granted to a brand-new account on its first balance read.
pub const STARTER_CREDITS: i64 = 3;

/// Per-user credit balance and lifetime totals.
///
/// Invariant: `total_earned - total_spent == balance` and `balance >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    /// Owner of the account.
    pub user_id: UserId,

    /// Spendable credits.
    pub balance: i64,

    /// Lifetime credits received (starter grant, referrals, purchases).
    pub total_earned: i64,

    /// Lifetime credits spent on tools.
    pub total_spent: i64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// A new account carrying the starter grant.
    #[must_use]
    pub fn with_starter_grant(user_id: UserId) -> Self {
        Self::with_balance(user_id, STARTER_CREDITS)
    }

    /// A new account with nothing on it.
    ///
    /// Used when a referral reward is the first thing to touch a user.
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self::with_balance(user_id, 0)
    }

    fn with_balance(user_id: UserId, balance: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance,
            total_earned: balance,
            total_spent: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether a debit of `cost` would keep the balance non-negative.
    #[must_use]
    pub fn can_cover(&self, cost: i64) -> bool {
        self.balance >= cost
    }

    /// Check the ledger identity `earned - spent == balance`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.balance >= 0 && self.total_earned - self.total_spent == self.balance
    }

    /// Apply a debit in memory. Callers must have checked [`Self::can_cover`].
    pub fn apply_debit(&mut self, cost: i64) {
        self.balance -= cost;
        self.total_spent += cost;
        self.updated_at = Utc::now();
    }

    /// Apply a credit in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if the balance or lifetime total would
    /// overflow; the account is left unchanged.
    pub fn apply_credit(&mut self, amount: i64) -> Result<()> {
        let (Some(balance), Some(total_earned)) = (
            self.balance.checked_add(amount),
            self.total_earned.checked_add(amount),
        ) else {
            return Err(CreditError::InvalidAmount(format!(
                "crediting {amount} would overflow balance {}",
                self.balance
            )));
        };

        self.balance = balance;
        self.total_earned = total_earned;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_account_has_three_credits() {
        let account = CreditAccount::with_starter_grant(UserId::generate());
        assert_eq!(account.balance, 3);
        assert_eq!(account.total_earned, 3);
        assert_eq!(account.total_spent, 0);
        assert!(account.is_consistent());
    }

    #[test]
    fn can_cover_is_inclusive() {
        let account = CreditAccount::with_starter_grant(UserId::generate());
        assert!(account.can_cover(3));
        assert!(!account.can_cover(4));
        assert!(account.can_cover(0));
    }

    #[test]
    fn debit_and_credit_keep_identity() {
        let mut account = CreditAccount::empty(UserId::generate());
        account.apply_credit(2).unwrap();
        account.apply_debit(1);
        assert_eq!(account.balance, 1);
        assert_eq!(account.total_earned, 2);
        assert_eq!(account.total_spent, 1);
        assert!(account.is_consistent());
    }

    #[test]
    fn overflowing_credit_is_rejected_and_leaves_account_untouched() {
        let mut account = CreditAccount::with_starter_grant(UserId::generate());
        let before = account.clone();

        let err = account.apply_credit(i64::MAX).unwrap_err();
        assert!(matches!(err, CreditError::InvalidAmount(_)));
        assert_eq!(account, before);
        assert!(account.is_consistent());
    }
}
