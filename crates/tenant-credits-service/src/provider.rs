//! Payment provider seam.
//!
//! The subscription sync only needs three lookups from the payment provider.
//! [`StripeClient`](crate::stripe::StripeClient) implements them against the
//! Stripe REST API; tests substitute an in-memory provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tenant_credits_core::Result;

/// A customer record at the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCustomer {
    /// Provider customer ID.
    pub id: String,
    /// Email on file, if any.
    pub email: Option<String>,
}

/// An active subscription at the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    /// Provider subscription ID.
    pub id: String,
    /// Price of the first subscription item.
    pub price_id: Option<String>,
    /// Start of the current billing period.
    pub current_period_start: Option<DateTime<Utc>>,
    /// End of the current billing period.
    pub current_period_end: Option<DateTime<Utc>>,
    /// Whether the subscription ends at the end of the period.
    pub cancel_at_period_end: bool,
}

/// Read-only view of the payment provider.
///
/// Every method maps transport and API failures to
/// `CreditError::ProviderUnavailable`.
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// First customer registered with `email`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if the provider cannot be reached.
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<ProviderCustomer>>;

    /// First active subscription of a customer.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if the provider cannot be reached.
    async fn active_subscription(&self, customer_id: &str) -> Result<Option<ProviderSubscription>>;

    /// Whether a price ID exists at the provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` if the provider cannot be reached.
    async fn price_exists(&self, price_id: &str) -> Result<bool>;
}
