//! Ledger entries.
//!
//! Every mutation of a [`crate::CreditAccount`] appends exactly one
//! [`CreditTransaction`]. Entries are immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TransactionId, UserId};

/// A single balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Time-ordered identifier.
    pub id: TransactionId,

    /// Account owner.
    pub user_id: UserId,

    /// Signed amount. Negative = spend, positive = grant.
    pub amount: i64,

    /// Account balance right after this entry was applied.
    pub balance_after: i64,

    /// Kind of change.
    pub transaction_type: TransactionType,

    /// Tool category, for tool usage.
    pub tool_type: Option<String>,

    /// Tool identifier, for tool usage.
    pub tool_id: Option<String>,

    /// Human-readable description.
    pub description: Option<String>,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// A debit for launching a tool.
    #[must_use]
    pub fn tool_usage(
        user_id: UserId,
        tool_type: &str,
        tool_id: &str,
        cost: i64,
        balance_after: i64,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount: -cost.abs(),
            balance_after,
            transaction_type: TransactionType::ToolUsage,
            tool_type: Some(tool_type.to_string()),
            tool_id: Some(tool_id.to_string()),
            description: Some(format!("{tool_type}: {tool_id}")),
            created_at: Utc::now(),
        }
    }

    /// A credit paid to a referrer.
    #[must_use]
    pub fn referral_reward(user_id: UserId, amount: i64, balance_after: i64) -> Self {
        Self::grant(
            user_id,
            amount,
            balance_after,
            TransactionType::ReferralReward,
            "Referral bonus: referred user started a subscription".to_string(),
        )
    }

    /// A positive grant of the given type.
    #[must_use]
    pub fn grant(
        user_id: UserId,
        amount: i64,
        balance_after: i64,
        transaction_type: TransactionType,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount,
            balance_after,
            transaction_type,
            tool_type: None,
            tool_id: None,
            description: Some(description),
            created_at: Utc::now(),
        }
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits spent launching a tool.
    ToolUsage,

    /// Credits paid to a referrer.
    ReferralReward,

    /// Credits bought.
    Purchase,

    /// Manual correction by an operator.
    Adjustment,
}

impl TransactionType {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ToolUsage => "tool_usage",
            Self::ReferralReward => "referral_reward",
            Self::Purchase => "purchase",
            Self::Adjustment => "adjustment",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_usage" => Some(Self::ToolUsage),
            "referral_reward" => Some(Self::ReferralReward),
            "purchase" => Some(Self::Purchase),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }

    /// Whether entries of this type add credits.
    #[must_use]
    pub const fn is_grant(&self) -> bool {
        !matches!(self, Self::ToolUsage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_usage_is_negative_and_described() {
        let tx = CreditTransaction::tool_usage(UserId::generate(), "checker", "mietpreis", 1, 2);
        assert_eq!(tx.amount, -1);
        assert_eq!(tx.balance_after, 2);
        assert_eq!(tx.transaction_type, TransactionType::ToolUsage);
        assert_eq!(tx.description.as_deref(), Some("checker: mietpreis"));
    }

    #[test]
    fn referral_reward_is_positive() {
        let tx = CreditTransaction::referral_reward(UserId::generate(), 2, 2);
        assert_eq!(tx.amount, 2);
        assert!(tx.transaction_type.is_grant());
        assert!(tx.tool_id.is_none());
    }

    #[test]
    fn transaction_type_names_parse_back() {
        for ty in [
            TransactionType::ToolUsage,
            TransactionType::ReferralReward,
            TransactionType::Purchase,
            TransactionType::Adjustment,
        ] {
            assert_eq!(TransactionType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(TransactionType::parse("bonus"), None);
    }
}
