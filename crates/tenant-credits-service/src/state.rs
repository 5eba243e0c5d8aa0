//! Application state.

use std::sync::Arc;

use tenant_credits_core::{CreditError, Result};
use tenant_credits_store::Store;

use crate::auth::{IdentityVerifier, JwksVerifier};
use crate::config::ServiceConfig;
use crate::credits::CreditService;
use crate::entitlement::EntitlementResolver;
use crate::provider::SubscriptionProvider;
use crate::referral::ReferralEngine;
use crate::session::SessionRegistry;
use crate::stripe::StripeClient;
use crate::sync::SubscriptionSync;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Bearer token verification.
    pub identity: Arc<dyn IdentityVerifier>,

    /// Balances, spends and grants.
    pub credits: CreditService,

    /// Unlimited-plan checks.
    pub entitlements: EntitlementResolver,

    /// Subscription mirroring.
    pub sync: Arc<SubscriptionSync>,

    /// Referral codes and payouts.
    pub referrals: ReferralEngine,

    /// Per-user refresh loops.
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Create the production state: JWKS identity and, when configured, Stripe.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the price table is malformed or an HTTP
    /// client cannot be built.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self> {
        let identity = JwksVerifier::new(&config.auth_base_url, &config.auth_audience)
            .map_err(|e| CreditError::Configuration(format!("identity client: {e}")))?;

        let provider: Option<Arc<dyn SubscriptionProvider>> = match &config.stripe_api_key {
            Some(key) => {
                let client = StripeClient::new(key)
                    .map_err(|e| CreditError::Configuration(format!("stripe client: {e}")))?;
                tracing::info!("Stripe integration enabled");
                Some(Arc::new(client))
            }
            None => {
                tracing::warn!("Stripe not configured - subscriptions resolve to the free tier");
                None
            }
        };

        Self::with_components(store, config, Arc::new(identity), provider)
    }

    /// Assemble the state from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the price table is malformed.
    pub fn with_components(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        identity: Arc<dyn IdentityVerifier>,
        provider: Option<Arc<dyn SubscriptionProvider>>,
    ) -> Result<Self> {
        let prices = config.price_table()?;

        let entitlements = EntitlementResolver::new(store.clone(), config.app_id.clone());
        let credits = CreditService::new(store.clone(), entitlements.clone());
        let referrals = ReferralEngine::new(store.clone(), config.app_id.clone());
        let sync = Arc::new(SubscriptionSync::new(
            store.clone(),
            provider,
            prices,
            config.app_id.clone(),
            referrals.clone(),
        ));
        let sessions = SessionRegistry::new(
            sync.clone(),
            config.refresh_interval(),
            config.session_idle_timeout(),
        );

        Ok(Self {
            store,
            config,
            identity,
            credits,
            entitlements,
            sync,
            referrals,
            sessions,
        })
    }

    /// Check if a payment provider is configured.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.sync.has_provider()
    }
}
