//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `PAYMENT_GATEWAY_URL` - Payment gateway API base URL
//! - `PAYMENT_APP_ID` - Merchant app id at the gateway
//! - `PAYMENT_APP_SECRET` - Merchant app secret (high entropy)
//!
//! ## Optional
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`; without either the in-memory backends are used)
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_TRANSIT_PRICE` - Flat shipping fee (default: 10)
//! - `STOREFRONT_STOCK_STRATEGY` - `pessimistic` or `optimistic` (default: pessimistic)
//! - `STOREFRONT_OPTIMISTIC_ATTEMPTS` - Retry budget per SKU (default: 3)
//! - `PAYMENT_RETURN_URL` - Where the gateway sends the buyer after paying
//! - `PAYMENT_NOTIFY_URL` - Gateway server-to-server notification URL
//! - `PAYMENT_REQUEST_TIMEOUT_SECS` - Per-request gateway timeout (default: 10)
//! - `PAYMENT_POLL_INITIAL_MS` - First backoff delay (default: 5000)
//! - `PAYMENT_POLL_MAX_MS` - Backoff cap (default: 60000)
//! - `PAYMENT_POLL_DEADLINE_SECS` - Time budget for one payment check (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use daily_fresh_core::Price;

use crate::services::checkout::{
    DEFAULT_OPTIMISTIC_ATTEMPTS, DEFAULT_TRANSIT_PRICE, StockStrategy,
};
use crate::services::payment::PollPolicy;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Checkout engine settings
    pub checkout: CheckoutConfig,
    /// Payment gateway settings
    pub payment: PaymentConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Checkout engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Flat shipping fee added to every order
    pub transit_price: Price,
    /// Stock reservation strategy
    pub stock_strategy: StockStrategy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            transit_price: Price::from_units(DEFAULT_TRANSIT_PRICE),
            stock_strategy: StockStrategy::Pessimistic,
        }
    }
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    /// Gateway API base URL
    pub gateway_url: Url,
    /// Merchant app id
    pub app_id: String,
    /// Merchant app secret
    pub app_secret: SecretString,
    /// Buyer redirect after payment
    pub return_url: Option<Url>,
    /// Server-to-server notification URL
    pub notify_url: Option<Url>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Polling backoff and deadline
    pub poll: PollPolicy,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("gateway_url", &self.gateway_url.as_str())
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("return_url", &self.return_url.as_ref().map(Url::as_str))
            .field("notify_url", &self.notify_url.as_ref().map(Url::as_str))
            .field("request_timeout", &self.request_timeout)
            .field("poll", &self.poll)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL");
        let host: IpAddr = parse_env_or_default("STOREFRONT_HOST", "127.0.0.1")?;
        let port: u16 = parse_env_or_default("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;

        let checkout = CheckoutConfig::from_env()?;
        let payment = PaymentConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            checkout,
            payment,
            sentry_dsn,
            sentry_environment,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let transit: Decimal =
            parse_env_or_default("STOREFRONT_TRANSIT_PRICE", &DEFAULT_TRANSIT_PRICE.to_string())?;
        let transit_price = Price::new(transit).ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "STOREFRONT_TRANSIT_PRICE".to_string(),
                "must not be negative".to_string(),
            )
        })?;

        let strategy: StockStrategy =
            parse_env_or_default("STOREFRONT_STOCK_STRATEGY", "pessimistic")?;
        let stock_strategy = match strategy {
            StockStrategy::Pessimistic => StockStrategy::Pessimistic,
            StockStrategy::Optimistic { .. } => StockStrategy::Optimistic {
                max_attempts: parse_env_or_default(
                    "STOREFRONT_OPTIMISTIC_ATTEMPTS",
                    &DEFAULT_OPTIMISTIC_ATTEMPTS.to_string(),
                )?,
            },
        };

        Ok(Self {
            transit_price,
            stock_strategy,
        })
    }
}

impl PaymentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = PollPolicy::default();
        let initial_ms: u64 = parse_env_or_default(
            "PAYMENT_POLL_INITIAL_MS",
            &defaults.initial.as_millis().to_string(),
        )?;
        let max_ms: u64 =
            parse_env_or_default("PAYMENT_POLL_MAX_MS", &defaults.max.as_millis().to_string())?;
        let deadline_secs: u64 = parse_env_or_default(
            "PAYMENT_POLL_DEADLINE_SECS",
            &defaults.deadline.as_secs().to_string(),
        )?;
        let timeout_secs: u64 = parse_env_or_default("PAYMENT_REQUEST_TIMEOUT_SECS", "10")?;

        Ok(Self {
            gateway_url: get_required_url("PAYMENT_GATEWAY_URL")?,
            app_id: get_required_env("PAYMENT_APP_ID")?,
            app_secret: get_validated_secret("PAYMENT_APP_SECRET")?,
            return_url: get_optional_url("PAYMENT_RETURN_URL")?,
            notify_url: get_optional_url("PAYMENT_NOTIFY_URL")?,
            request_timeout: Duration::from_secs(timeout_secs),
            poll: poll_policy(initial_ms, max_ms, deadline_secs)?,
        })
    }
}

/// Build the reconciliation backoff. The initial delay and the deadline must be non-zero.
fn poll_policy(
    initial_ms: u64,
    max_ms: u64,
    deadline_secs: u64,
) -> Result<PollPolicy, ConfigError> {
    if initial_ms == 0 {
        return Err(ConfigError::InvalidEnvVar(
            "PAYMENT_POLL_INITIAL_MS".to_string(),
            "must be greater than 0".to_string(),
        ));
    }
    if deadline_secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            "PAYMENT_POLL_DEADLINE_SECS".to_string(),
            "must be greater than 0".to_string(),
        ));
    }
    Ok(PollPolicy {
        initial: Duration::from_millis(initial_ms),
        max: Duration::from_millis(max_ms.max(initial_ms)),
        deadline: Duration::from_secs(deadline_secs),
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    std::env::var(primary_key)
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .map(SecretString::from)
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Get a required environment variable as an absolute URL.
fn get_required_url(key: &str) -> Result<Url, ConfigError> {
    parse_url(key, &get_required_env(key)?)
}

/// Get an optional environment variable as an absolute URL.
fn get_optional_url(key: &str) -> Result<Option<Url>, ConfigError> {
    get_optional_env(key)
        .map(|value| parse_url(key, &value))
        .transpose()
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    // Relative joins replace the last path segment unless the path ends in '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
