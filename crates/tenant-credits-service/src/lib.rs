//! Tenant credits HTTP API service.
//!
//! This crate provides the HTTP API for the tenant portal's credits and
//! entitlement subsystem:
//!
//! - Credit balances, tool launches and the transaction ledger
//! - Entitlement resolution (unlimited plans bypass credits)
//! - Subscription sync against Stripe, with per-user refresh sessions
//! - Referral codes and exactly-once referral rewards
//! - Stripe webhooks
//!
//! # Authentication
//!
//! User routes take an identity provider JWT as a bearer token. The admin
//! grant route takes the `X-Admin-Key` header instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for axum

pub mod auth;
pub mod config;
pub mod credits;
pub mod crypto;
pub mod entitlement;
pub mod error;
pub mod handlers;
pub mod provider;
pub mod referral;
pub mod routes;
pub mod session;
pub mod state;
pub mod stripe;
pub mod sync;

pub use auth::{Identity, IdentityVerifier, JwksVerifier};
pub use config::ServiceConfig;
pub use credits::{CreditService, SpendOutcome, TransactionPage};
pub use entitlement::{Entitlement, EntitlementResolver};
pub use error::ApiError;
pub use provider::{ProviderCustomer, ProviderSubscription, SubscriptionProvider};
pub use referral::{ReferralEngine, ReferralOutcome, ReferralSummary};
pub use routes::create_router;
pub use session::{SessionRegistry, SubscriptionSession};
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
pub use sync::{SubscriptionState, SubscriptionSync};
