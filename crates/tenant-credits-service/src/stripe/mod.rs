//! Stripe integration for subscription lookups.
//!
//! Stripe handles:
//! - Customer lookup by email
//! - Active subscription and price lookup
//! - Webhook signature verification for subscription events

pub mod client;
pub mod types;

pub use client::{
    verify_signature, verify_signature_at, StripeClient, StripeError, SIGNATURE_TOLERANCE_SECS,
};
pub use types::*;
