//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SARTORIA_BACKEND_URL` - Base URL of the order/catalog backend
//! - `SARTORIA_API_TOKEN` - API token for backend calls
//!
//! ## Optional
//! - `SARTORIA_TAX_RATE` - Tax rate on the subtotal (default: 0.05)
//! - `SARTORIA_FLAT_SHIPPING` - Flat shipping fallback (default: 10.00)
//! - `SARTORIA_FREE_SHIPPING_THRESHOLD` - Free-shipping subtotal (default: 100.00)
//! - `SARTORIA_NETWORK_TIMEOUT_SECS` - Per-request timeout (default: 12)
//! - `SARTORIA_PUSH_RETRY_LIMIT` - Max attempts for cart pushes (default: 4)

use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use sartoria_core::Money;

use crate::pricing::PricingParams;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
///
/// Implements `Debug` manually to redact the API token.
#[derive(Clone)]
pub struct CartConfig {
    /// Base URL of the order/catalog backend.
    pub backend_url: Url,
    /// API token sent with every backend call.
    pub api_token: SecretString,
    /// Tax rate applied to the subtotal.
    pub tax_rate: Decimal,
    /// Flat shipping rate used when no quote is available.
    pub flat_shipping: Money,
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Money,
    /// Timeout for each network call.
    pub network_timeout: Duration,
    /// Maximum attempts when pushing the cart to the backend.
    pub push_retry_limit: u32,
    /// How long validated promo terms may be served from cache.
    pub promo_cache_ttl: Duration,
}

impl std::fmt::Debug for CartConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartConfig")
            .field("backend_url", &self.backend_url.as_str())
            .field("api_token", &"[REDACTED]")
            .field("tax_rate", &self.tax_rate)
            .field("flat_shipping", &self.flat_shipping)
            .field("free_shipping_threshold", &self.free_shipping_threshold)
            .field("network_timeout", &self.network_timeout)
            .field("push_retry_limit", &self.push_retry_limit)
            .field("promo_cache_ttl", &self.promo_cache_ttl)
            .finish()
    }
}

impl Default for CartConfig {
    /// Local-development defaults: backend on localhost, 5% tax, $10 flat
    /// shipping, free shipping at $100.
    fn default() -> Self {
        Self {
            #[allow(clippy::unwrap_used)] // statically valid URL
            backend_url: Url::parse("http://localhost:4000").unwrap(),
            api_token: SecretString::from(String::new()),
            tax_rate: Decimal::new(5, 2),
            flat_shipping: Money::from_minor_units(1000),
            free_shipping_threshold: Money::from_minor_units(10_000),
            network_timeout: Duration::from_secs(12),
            push_retry_limit: 4,
            promo_cache_ttl: Duration::from_secs(120),
        }
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend_url = get_required_env("SARTORIA_BACKEND_URL")?
            .parse::<Url>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("SARTORIA_BACKEND_URL".to_owned(), e.to_string())
            })?;
        let api_token = SecretString::from(get_required_env("SARTORIA_API_TOKEN")?);

        let defaults = Self::default();
        let tax_rate = get_parsed_or("SARTORIA_TAX_RATE", defaults.tax_rate)?;
        let flat_shipping =
            Money::new(get_parsed_or("SARTORIA_FLAT_SHIPPING", defaults.flat_shipping.amount())?);
        let free_shipping_threshold = Money::new(get_parsed_or(
            "SARTORIA_FREE_SHIPPING_THRESHOLD",
            defaults.free_shipping_threshold.amount(),
        )?);
        let network_timeout =
            Duration::from_secs(get_parsed_or("SARTORIA_NETWORK_TIMEOUT_SECS", 12_u64)?);
        let push_retry_limit = get_parsed_or("SARTORIA_PUSH_RETRY_LIMIT", 4_u32)?;

        Ok(Self {
            backend_url,
            api_token,
            tax_rate,
            flat_shipping,
            free_shipping_threshold,
            network_timeout,
            push_retry_limit,
            promo_cache_ttl: defaults.promo_cache_ttl,
        })
    }

    /// Pricing context derived from this configuration.
    #[must_use]
    pub const fn pricing_params(&self) -> PricingParams {
        PricingParams {
            tax_rate: self.tax_rate,
            flat_shipping: self.flat_shipping,
            free_shipping_threshold: self.free_shipping_threshold,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_owned()))
}

/// Get an environment variable parsed into `T`, falling back to a default.
fn get_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string())),
        Err(_) => Ok(default),
    }
}
