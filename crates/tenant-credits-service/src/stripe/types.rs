//! Stripe API types.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::provider::{ProviderCustomer, ProviderSubscription};

/// Stripe customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Stripe customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
}

impl From<Customer> for ProviderCustomer {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            email: customer.email,
        }
    }
}

/// Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Status (active, trialing, past_due, canceled, ...).
    #[serde(default)]
    pub status: String,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Period start (Unix). Newer API versions only carry it per item.
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Period end (Unix). Newer API versions only carry it per item.
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Whether the subscription ends at the end of the period.
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Subscription items.
    pub items: StripeList<SubscriptionItem>,
}

/// One item of a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    /// Item ID.
    pub id: String,
    /// The price subscribed to.
    pub price: Price,
    /// Period start (Unix).
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Period end (Unix).
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Stripe price object.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    /// Price ID.
    pub id: String,
    /// Whether the price can be used for new purchases.
    #[serde(default)]
    pub active: bool,
    /// Lookup key, if set.
    #[serde(default)]
    pub lookup_key: Option<String>,
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

impl From<Subscription> for ProviderSubscription {
    fn from(sub: Subscription) -> Self {
        let item = sub.items.data.first();
        Self {
            id: sub.id,
            price_id: item.map(|i| i.price.id.clone()),
            current_period_start: timestamp(
                sub.current_period_start
                    .or_else(|| item.and_then(|i| i.current_period_start)),
            ),
            current_period_end: timestamp(
                sub.current_period_end
                    .or_else(|| item.and_then(|i| i.current_period_end)),
            ),
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "customer.subscription.updated").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Whether this event changes a customer's subscription.
    #[must_use]
    pub fn is_subscription_event(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "customer.subscription.created"
                | "customer.subscription.updated"
                | "customer.subscription.deleted"
                | "customer.subscription.paused"
                | "customer.subscription.resumed"
        )
    }

    /// Customer ID referenced by the event object.
    #[must_use]
    pub fn customer_id(&self) -> Option<&str> {
        self.data.object.get("customer").and_then(|v| v.as_str())
    }
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscription_periods_fall_back_to_item() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "sub_1",
            "status": "active",
            "customer": "cus_1",
            "cancel_at_period_end": false,
            "items": {
                "data": [{
                    "id": "si_1",
                    "price": {"id": "price_pro", "active": true},
                    "current_period_start": 1_700_000_000,
                    "current_period_end": 1_702_592_000
                }],
                "has_more": false
            }
        }))
        .unwrap();

        let provider: ProviderSubscription = sub.into();
        assert_eq!(provider.price_id.as_deref(), Some("price_pro"));
        assert_eq!(
            provider.current_period_end.map(|d| d.timestamp()),
            Some(1_702_592_000)
        );
    }

    #[test]
    fn webhook_event_exposes_customer() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "customer.subscription.deleted",
            "created": 1_700_000_000,
            "data": {"object": {"id": "sub_1", "customer": "cus_42"}}
        }))
        .unwrap();

        assert!(event.is_subscription_event());
        assert_eq!(event.customer_id(), Some("cus_42"));
    }
}
