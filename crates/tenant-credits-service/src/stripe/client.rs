//! Stripe API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use tenant_credits_core::CreditError;

use super::types::{Customer, Price, StripeErrorResponse, StripeList, Subscription};
use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::provider::{ProviderCustomer, ProviderSubscription, SubscriptionProvider};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,
}

impl From<StripeError> for CreditError {
    fn from(err: StripeError) -> Self {
        Self::ProviderUnavailable {
            service: "stripe".into(),
            message: err.to_string(),
        }
    }
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Stripe API base URL.
    pub const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, StripeError> {
        Self::with_base_url(api_key, Self::BASE_URL)
    }

    /// Create a client talking to a different API root (a mock server in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// List customers registered with an email, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn list_customers_by_email(
        &self,
        email: &str,
        limit: u32,
    ) -> Result<StripeList<Customer>, StripeError> {
        let response = self
            .client
            .get(format!("{}/customers", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[("email", email), ("limit", &limit.min(100).to_string())])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List a customer's subscriptions with the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn list_subscriptions(
        &self,
        customer_id: &str,
        status: &str,
        limit: u32,
    ) -> Result<StripeList<Subscription>, StripeError> {
        let response = self
            .client
            .get(format!("{}/subscriptions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .query(&[
                ("customer", customer_id),
                ("status", status),
                ("limit", &limit.min(100).to_string()),
            ])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a price by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn get_price(&self, price_id: &str) -> Result<Option<Price>, StripeError> {
        let response = self
            .client
            .get(format!("{}/prices/{}", self.base_url, price_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

/// Oldest (or furthest in the future) webhook timestamp accepted, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify a `Stripe-Signature` header against the raw payload.
///
/// The header has the form `t=timestamp,v1=signature[,v1=...]`; any `v1`
/// entry matching `HMAC-SHA256(secret, "{t}.{payload}")` is accepted, as
/// long as `t` is within [`SIGNATURE_TOLERANCE_SECS`] of now.
///
/// # Errors
///
/// Returns `StripeError::InvalidSignature` if the header is malformed, the
/// timestamp is out of tolerance, or no signature matches.
pub fn verify_signature(secret: &str, payload: &str, signature: &str) -> Result<(), StripeError> {
    verify_signature_at(secret, payload, signature, Utc::now())
}

/// [`verify_signature`] against an explicit clock.
///
/// # Errors
///
/// See [`verify_signature`].
pub fn verify_signature_at(
    secret: &str,
    payload: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<(), StripeError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = Some(ts),
            (Some("v1"), Some(sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(StripeError::InvalidSignature);
    }

    let signed_at: i64 = timestamp.parse().map_err(|_| StripeError::InvalidSignature)?;
    if now.timestamp().saturating_sub(signed_at).saturating_abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(StripeError::InvalidSignature);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .ok_or(StripeError::InvalidSignature)?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(StripeError::InvalidSignature)
    }
}

#[async_trait]
impl SubscriptionProvider for StripeClient {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> tenant_credits_core::Result<Option<ProviderCustomer>> {
        let customers = self.list_customers_by_email(email, 1).await?;
        Ok(customers.data.into_iter().next().map(Into::into))
    }

    async fn active_subscription(
        &self,
        customer_id: &str,
    ) -> tenant_credits_core::Result<Option<ProviderSubscription>> {
        let subscriptions = self.list_subscriptions(customer_id, "active", 1).await?;
        Ok(subscriptions.data.into_iter().next().map(Into::into))
    }

    async fn price_exists(&self, price_id: &str) -> tenant_credits_core::Result<bool> {
        Ok(self.get_price(price_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SIGNED_AT: i64 = 1_700_000_000;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(SIGNED_AT + offset_secs, 0).unwrap()
    }

    #[test]
    fn accepts_any_matching_v1_signature() {
        let payload = r#"{"id":"evt_1"}"#;
        let good = hmac_sha256_hex("whsec_test", &format!("{SIGNED_AT}.{payload}")).unwrap();
        let header = format!("t={SIGNED_AT},v1=deadbeef,v1={good}");

        assert!(verify_signature_at("whsec_test", payload, &header, at(10)).is_ok());
    }

    #[test]
    fn rejects_wrong_secret_and_malformed_headers() {
        let payload = "{}";
        let sig = hmac_sha256_hex("other", &format!("{SIGNED_AT}.{payload}")).unwrap();

        assert!(matches!(
            verify_signature_at("whsec_test", payload, &format!("t={SIGNED_AT},v1={sig}"), at(0)),
            Err(StripeError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature_at("whsec_test", payload, "v1=abc", at(0)),
            Err(StripeError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature_at("whsec_test", payload, &format!("t={SIGNED_AT}"), at(0)),
            Err(StripeError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature_at("whsec_test", payload, "t=soon,v1=abc", at(0)),
            Err(StripeError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_replayed_and_future_signatures() {
        let payload = r#"{"id":"evt_old"}"#;
        let good = hmac_sha256_hex("whsec_test", &format!("{SIGNED_AT}.{payload}")).unwrap();
        let header = format!("t={SIGNED_AT},v1={good}");

        assert!(verify_signature_at("whsec_test", payload, &header, at(300)).is_ok());
        assert!(matches!(
            verify_signature_at("whsec_test", payload, &header, at(301)),
            Err(StripeError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature_at("whsec_test", payload, &header, at(-301)),
            Err(StripeError::InvalidSignature)
        ));
    }
}
