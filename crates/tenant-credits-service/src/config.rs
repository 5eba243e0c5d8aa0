//! Service configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use tenant_credits_core::{PriceTable, Result, DEFAULT_APP_ID, DEFAULT_PRICE_PLAN_MAP};

/// Default interval between background subscription refreshes.
pub const DEFAULT_REFRESH_SECONDS: u64 = 60;

/// Default time a session keeps refreshing without being read.
pub const DEFAULT_SESSION_IDLE_SECONDS: u64 = 900;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. When unset the embedded store is used.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size (default: 10).
    pub database_max_connections: u32,

    /// Path to the embedded `RocksDB` data directory (default: "/data/tenant-credits").
    pub data_dir: String,

    /// Identity provider base URL; JWKS is served under `/.well-known/jwks.json`.
    pub auth_base_url: String,

    /// Expected JWT audience (default: "tenant-portal").
    pub auth_audience: String,

    /// Admin API key for manual credit grants.
    pub admin_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Application the subscription mirror is kept for (default: "mieter").
    pub app_id: String,

    /// Price-to-plan mapping, `price_id=plan` pairs separated by commas.
    pub price_plan_map: String,

    /// Seconds between background subscription refreshes (default: 60).
    pub subscription_refresh_seconds: u64,

    /// Seconds without a read after which a session stops (default: 900).
    pub session_idle_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        // Try to load Stripe secrets from file first, then fall back to env vars
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: env_or("LISTEN_ADDR", defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            data_dir: env_or("DATA_DIR", defaults.data_dir),
            auth_base_url: env_or("AUTH_BASE_URL", defaults.auth_base_url),
            auth_audience: env_or("AUTH_AUDIENCE", defaults.auth_audience),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok().filter(|s| !s.is_empty()),
            stripe_api_key,
            stripe_webhook_secret,
            app_id: env_or("APP_ID", defaults.app_id),
            price_plan_map: env_or("PRICE_PLAN_MAP", defaults.price_plan_map),
            subscription_refresh_seconds: env_parse(
                "SUBSCRIPTION_REFRESH_SECONDS",
                defaults.subscription_refresh_seconds,
            ),
            session_idle_seconds: env_parse("SESSION_IDLE_SECONDS", defaults.session_idle_seconds),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }

    /// Parse the configured price table.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::Configuration` if the mapping is malformed.
    pub fn price_table(&self) -> Result<PriceTable> {
        PriceTable::parse(&self.price_plan_map)
    }

    /// Interval between background subscription refreshes, at least one second.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.subscription_refresh_seconds.max(1))
    }

    /// Idle time after which a session stops, never shorter than one refresh.
    #[must_use]
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_seconds).max(self.refresh_interval())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "tenant-credits/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok().filter(|s| !s.is_empty()),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> std::io::Result<T> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            data_dir: "/data/tenant-credits".into(),
            auth_base_url: "https://auth.tenant-portal.local".into(),
            auth_audience: "tenant-portal".into(),
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            app_id: DEFAULT_APP_ID.into(),
            price_plan_map: DEFAULT_PRICE_PLAN_MAP.into(),
            subscription_refresh_seconds: DEFAULT_REFRESH_SECONDS,
            session_idle_seconds: DEFAULT_SESSION_IDLE_SECONDS,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
