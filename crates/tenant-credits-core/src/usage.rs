//! Tool usage audit records.
//!
//! One [`ToolUsageRecord`] is written per tool launch, whether credits or a
//! subscription paid for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{UsageId, UserId};

/// Audit record of one tool launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsageRecord {
    /// Time-ordered identifier.
    pub id: UsageId,

    /// Who launched the tool.
    pub user_id: UserId,

    /// Tool category (checker, calculator, form).
    pub tool_type: String,

    /// Tool identifier within its category.
    pub tool_id: String,

    /// Credits charged. Zero when a subscription paid.
    pub credits_cost: i64,

    /// What paid for the launch.
    pub access_method: AccessMethod,

    /// When the tool was launched.
    pub created_at: DateTime<Utc>,
}

impl ToolUsageRecord {
    /// A launch paid with credits.
    #[must_use]
    pub fn paid_with_credits(user_id: UserId, tool_type: &str, tool_id: &str, cost: i64) -> Self {
        Self::new(user_id, tool_type, tool_id, cost, AccessMethod::Credit)
    }

    /// A launch covered by an unlimited subscription.
    #[must_use]
    pub fn covered_by_subscription(user_id: UserId, tool_type: &str, tool_id: &str) -> Self {
        Self::new(user_id, tool_type, tool_id, 0, AccessMethod::Subscription)
    }

    fn new(
        user_id: UserId,
        tool_type: &str,
        tool_id: &str,
        credits_cost: i64,
        access_method: AccessMethod,
    ) -> Self {
        Self {
            id: UsageId::generate(),
            user_id,
            tool_type: tool_type.to_string(),
            tool_id: tool_id.to_string(),
            credits_cost,
            access_method,
            created_at: Utc::now(),
        }
    }
}

/// What paid for a tool launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    /// Credits were debited.
    Credit,

    /// An unlimited subscription covered it.
    Subscription,
}

impl AccessMethod {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Subscription => "subscription",
        }
    }

    /// Parse the storage name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(Self::Credit),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_launch_costs_nothing() {
        let record = ToolUsageRecord::covered_by_subscription(UserId::generate(), "checker", "kaution");
        assert_eq!(record.credits_cost, 0);
        assert_eq!(record.access_method, AccessMethod::Subscription);
    }

    #[test]
    fn access_method_serializes_snake_case() {
        let json = serde_json::to_string(&AccessMethod::Subscription).unwrap();
        assert_eq!(json, "\"subscription\"");
    }
}
