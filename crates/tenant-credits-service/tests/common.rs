//! Common test utilities for tenant credits integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use tenant_credits_core::{CreditError, UserId};
use tenant_credits_service::{
    create_router, ApiError, AppState, Identity, IdentityVerifier, ProviderCustomer,
    ProviderSubscription, ServiceConfig, SubscriptionProvider,
};
use tenant_credits_store::{RocksStore, Store};

/// Price id mapped to `basic` by the default price table.
pub const BASIC_PRICE: &str = "price_1SsEqV52lqSgjCzeKuUQGBOE";

/// Price id mapped to `pro` by the default price table.
pub const PRO_PRICE: &str = "price_1SsEr552lqSgjCzeBvWBTzKS";

/// Admin key accepted by the test server.
pub const ADMIN_KEY: &str = "test-admin-key";

/// Webhook signing secret of the test server.
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Accepts `test-token:<uuid>` or `test-token:<uuid>:<email>`.
pub struct FakeIdentity;

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let rest = token
            .strip_prefix("test-token:")
            .ok_or(ApiError::Unauthorized)?;
        let mut parts = rest.splitn(2, ':');
        let user_id: UserId = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(ApiError::Unauthorized)?;

        Ok(Identity {
            user_id,
            email: parts.next().map(String::from),
        })
    }
}

#[derive(Default)]
struct ProviderState {
    customers: HashMap<String, String>,
    subscriptions: HashMap<String, ProviderSubscription>,
    prices: HashSet<String>,
}

/// In-memory payment provider.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<ProviderState>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProvider {
    /// A provider that knows both default prices.
    pub fn new() -> Self {
        let provider = Self::default();
        {
            let mut state = provider.state.lock().unwrap();
            state.prices.insert(BASIC_PRICE.into());
            state.prices.insert(PRO_PRICE.into());
        }
        provider
    }

    /// Register a customer.
    pub fn add_customer(&self, email: &str, customer_id: &str) {
        self.state
            .lock()
            .unwrap()
            .customers
            .insert(email.into(), customer_id.into());
    }

    /// Give a customer an active subscription on `price_id`.
    pub fn subscribe(&self, customer_id: &str, price_id: &str) {
        let now = Utc::now();
        let subscription = ProviderSubscription {
            id: format!("sub_{customer_id}"),
            price_id: Some(price_id.into()),
            current_period_start: Some(now - Duration::days(1)),
            current_period_end: Some(now + Duration::days(29)),
            cancel_at_period_end: false,
        };
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(customer_id.into(), subscription);
    }

    /// Cancel a customer's subscription.
    pub fn cancel(&self, customer_id: &str) {
        self.state.lock().unwrap().subscriptions.remove(customer_id);
    }

    /// Make every call fail like an outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> tenant_credits_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CreditError::ProviderUnavailable {
                service: "stripe".into(),
                message: "simulated outage".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionProvider for FakeProvider {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> tenant_credits_core::Result<Option<ProviderCustomer>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .customers
            .get(email)
            .map(|id| ProviderCustomer {
                id: id.clone(),
                email: Some(email.into()),
            }))
    }

    async fn active_subscription(
        &self,
        customer_id: &str,
    ) -> tenant_credits_core::Result<Option<ProviderSubscription>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .get(customer_id)
            .cloned())
    }

    async fn price_exists(&self, price_id: &str) -> tenant_credits_core::Result<bool> {
        self.check()?;
        Ok(self.state.lock().unwrap().prices.contains(price_id))
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<dyn Store>,
    /// The payment provider behind the server.
    pub provider: Arc<FakeProvider>,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store: Arc<dyn Store> =
            Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));
        let provider = Arc::new(FakeProvider::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            admin_api_key: Some(ADMIN_KEY.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };

        let state = AppState::with_components(
            store.clone(),
            config,
            Arc::new(FakeIdentity),
            Some(provider.clone() as Arc<dyn SubscriptionProvider>),
        )
        .expect("Failed to build state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            provider,
            _temp_dir: temp_dir,
            test_user_id: UserId::generate(),
        }
    }

    /// Authorization header for the test user.
    pub fn user_auth(&self) -> (HeaderName, HeaderValue) {
        auth_for(&self.test_user_id, None)
    }

    /// Authorization header for the test user carrying a verified email.
    pub fn user_auth_with_email(&self, email: &str) -> (HeaderName, HeaderValue) {
        auth_for(&self.test_user_id, Some(email))
    }

    /// Admin key header.
    pub fn admin_auth() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-admin-key"),
            HeaderValue::from_static(ADMIN_KEY),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Authorization header for an arbitrary user.
pub fn auth_for(user_id: &UserId, email: Option<&str>) -> (HeaderName, HeaderValue) {
    let token = match email {
        Some(email) => format!("Bearer test-token:{user_id}:{email}"),
        None => format!("Bearer test-token:{user_id}"),
    };
    (
        AUTHORIZATION,
        HeaderValue::from_str(&token).expect("valid header value"),
    )
}
