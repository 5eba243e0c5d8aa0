//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, health, referrals, subscription, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/can-afford` - Whether a tool launch would succeed
/// - `POST /v1/credits/spend` - Pay for a tool launch
/// - `GET /v1/credits/transactions` - Ledger history
/// - `GET /v1/credits/usage` - Tool launch history
/// - `POST /v1/credits/grant` - Grant credits (admin key)
///
/// ## Subscription (JWT auth)
/// - `POST /v1/subscription/check` - Sync with the payment provider now
/// - `GET /v1/subscription` - Session snapshot and entitlement
/// - `POST /v1/session/start`, `POST /v1/session/stop` - Refresh loop lifecycle
///
/// ## Referrals (JWT auth)
/// - `PUT /v1/referrals/profile` - Record the code the caller signed up with
/// - `POST /v1/referrals/code` - Get or create the caller's code
/// - `POST /v1/referrals/process` - Pay the caller's referral reward
/// - `GET /v1/referrals/rewards` - Rewards earned by the caller
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe subscription events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/can-afford", get(credits::can_afford))
        .route("/credits/spend", post(credits::spend))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/usage", get(credits::list_usage))
        .route("/credits/grant", post(credits::admin_grant_credits))
        // Subscription
        .route("/subscription", get(subscription::get_subscription))
        .route("/subscription/check", post(subscription::check_subscription))
        .route("/session/start", post(subscription::start_session))
        .route("/session/stop", post(subscription::stop_session))
        // Referrals
        .route("/referrals/profile", put(referrals::set_referred_by))
        .route("/referrals/code", post(referrals::get_or_create_code))
        .route("/referrals/process", post(referrals::process_referral))
        .route("/referrals/rewards", get(referrals::list_rewards))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by external services)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
