//! Remote order/catalog backend client.
//!
//! The backend is the source of truth for saved carts, promo validity, and
//! address-based shipping quotes. The engine talks to it through the
//! [`RemoteBackend`] trait; [`HttpBackend`] is the production implementation
//! (JSON over HTTP via `reqwest`, per-request timeout, promo-validation
//! responses cached with `moka`). Failures here never block local cart
//! usability - callers fall back per the pricing rules.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use sartoria_core::{Money, PromoCode};

use crate::config::CartConfig;
use crate::error::{PromoError, RemoteError};
use crate::persist::PersistedCart;
use crate::types::{Address, CartState, PromoTerms};

/// Opaque session token for an authenticated shopper.
#[derive(Clone)]
pub struct SessionToken(SecretString);

impl SessionToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Expose the raw token for transport headers.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionToken").field(&"[REDACTED]").finish()
    }
}

/// Remote operations the cart engine consumes.
///
/// Implementations are expected to be cheap to clone (the HTTP client holds
/// its state behind an `Arc`); tests substitute an in-memory fake.
#[allow(async_fn_in_trait)] // engine runs on a single-threaded event loop
pub trait RemoteBackend: Clone {
    /// Fetch the authenticated user's last-saved cart, `None` if the user
    /// has no cart server-side.
    async fn fetch_cart(&self, session: &SessionToken)
    -> Result<Option<PersistedCart>, RemoteError>;

    /// Best-effort upload of the local cart state. Implementations retry
    /// transient failures internally; a returned error means attempts were
    /// exhausted and the cart should be flagged unsynced, not that the UI
    /// should see an exception.
    async fn push_cart(
        &self,
        session: &SessionToken,
        snapshot: &PersistedCart,
    ) -> Result<(), RemoteError>;

    /// Resolve authoritative promo terms for a code against the given cart.
    async fn validate_promo(
        &self,
        code: &PromoCode,
        snapshot: &CartState,
    ) -> Result<PromoTerms, PromoError>;

    /// Quote shipping for an address against the given cart.
    async fn quote_shipping(
        &self,
        address: &Address,
        snapshot: &CartState,
    ) -> Result<Money, RemoteError>;
}

// =============================================================================
// HttpBackend
// =============================================================================

/// Base delay for the push retry schedule.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
/// How much of a response body to keep in error messages.
const ERROR_BODY_LIMIT: usize = 200;

/// JSON-over-HTTP backend client.
#[derive(Clone)]
pub struct HttpBackend {
    inner: Arc<HttpBackendInner>,
}

struct HttpBackendInner {
    client: reqwest::Client,
    fetch_url: Url,
    sync_url: Url,
    promo_url: Url,
    quote_url: Url,
    api_token: SecretString,
    push_retry_limit: u32,
    promo_cache: Cache<String, PromoTerms>,
}

impl HttpBackend {
    /// Create a new backend client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or an endpoint
    /// URL cannot be derived from the configured base.
    pub fn new(config: &CartConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.network_timeout)
            .build()?;

        let promo_cache = Cache::builder()
            .max_capacity(256)
            .time_to_live(config.promo_cache_ttl)
            .build();

        Ok(Self {
            inner: Arc::new(HttpBackendInner {
                client,
                fetch_url: config.backend_url.join("/v1/cart/fetch")?,
                sync_url: config.backend_url.join("/v1/cart/sync")?,
                promo_url: config.backend_url.join("/v1/promo/validate")?,
                quote_url: config.backend_url.join("/v1/shipping/quote")?,
                api_token: config.api_token.clone(),
                push_retry_limit: config.push_retry_limit.max(1),
                promo_cache,
            }),
        })
    }

    /// Execute one JSON POST against an endpoint.
    async fn post<B, T>(
        &self,
        url: &Url,
        session: Option<&SessionToken>,
        body: &B,
    ) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .inner
            .client
            .post(url.clone())
            .header(
                "Authorization",
                format!("Bearer {}", self.inner.api_token.expose_secret()),
            )
            .json(body);
        if let Some(session) = session {
            request = request.header("X-Session-Token", session.expose());
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(RemoteError::RateLimited(retry_after));
        }

        // Read the body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: response_text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        Ok(serde_json::from_str(&response_text)?)
    }
}

#[derive(Deserialize)]
struct FetchCartResponse {
    cart: Option<PersistedCart>,
}

#[derive(Serialize)]
struct PromoValidationRequest<'a> {
    code: &'a PromoCode,
    cart: &'a CartState,
}

#[derive(Serialize)]
struct ShippingQuoteRequest<'a> {
    address: &'a Address,
    cart: &'a CartState,
}

#[derive(Deserialize)]
struct ShippingQuoteResponse {
    cost: Money,
}

impl RemoteBackend for HttpBackend {
    #[instrument(skip(self, session))]
    async fn fetch_cart(
        &self,
        session: &SessionToken,
    ) -> Result<Option<PersistedCart>, RemoteError> {
        let response: FetchCartResponse = self
            .post(
                &self.inner.fetch_url,
                Some(session),
                &serde_json::json!({}),
            )
            .await?;
        Ok(response.cart)
    }

    #[instrument(skip(self, session, snapshot), fields(revision = snapshot.revision))]
    async fn push_cart(
        &self,
        session: &SessionToken,
        snapshot: &PersistedCart,
    ) -> Result<(), RemoteError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result: Result<serde_json::Value, RemoteError> = self
                .post(&self.inner.sync_url, Some(session), snapshot)
                .await;

            let err = match result {
                Ok(_) => {
                    debug!(attempt, "cart push acknowledged");
                    return Ok(());
                }
                Err(err) => err,
            };

            if attempt >= self.inner.push_retry_limit || !err.is_transient() {
                return Err(err);
            }

            let delay = match &err {
                RemoteError::RateLimited(secs) => {
                    retry_delay(attempt).max(Duration::from_secs(*secs))
                }
                _ => retry_delay(attempt),
            };
            warn!(attempt, error = %err, ?delay, "cart push failed, retrying");
            tokio::time::sleep(jittered(delay)).await;
        }
    }

    #[instrument(skip(self, snapshot), fields(code = %code))]
    async fn validate_promo(
        &self,
        code: &PromoCode,
        snapshot: &CartState,
    ) -> Result<PromoTerms, PromoError> {
        if let Some(terms) = self.inner.promo_cache.get(code.as_str()).await {
            debug!("cache hit for promo terms");
            return Ok(terms);
        }

        let request = PromoValidationRequest {
            code,
            cart: snapshot,
        };
        let value: serde_json::Value = self
            .post(&self.inner.promo_url, None, &request)
            .await
            .map_err(PromoError::Network)?;

        let valid = value
            .get("valid")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if !valid {
            let reason = value
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("invalid_code");
            let min_purchase = value
                .get("min_purchase")
                .and_then(|raw| serde_json::from_value::<Money>(raw.clone()).ok());
            return Err(map_rejection(
                reason,
                code,
                snapshot.totals.subtotal,
                min_purchase,
            ));
        }

        let terms: PromoTerms = serde_json::from_value(value)
            .map_err(|e| PromoError::Network(RemoteError::Decode(e)))?;

        self.inner
            .promo_cache
            .insert(code.as_str().to_owned(), terms.clone())
            .await;

        Ok(terms)
    }

    #[instrument(skip(self, address, snapshot))]
    async fn quote_shipping(
        &self,
        address: &Address,
        snapshot: &CartState,
    ) -> Result<Money, RemoteError> {
        let request = ShippingQuoteRequest {
            address,
            cart: snapshot,
        };
        let response: ShippingQuoteResponse =
            self.post(&self.inner.quote_url, None, &request).await?;
        Ok(response.cost)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Exponential backoff schedule: 250ms, 500ms, 1s, ...
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY.saturating_mul(1_u32 << attempt.saturating_sub(1).min(8))
}

/// Apply +/-50% jitter so concurrent contexts don't retry in lockstep.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.5..=1.5_f64);
    delay.mul_f64(factor)
}

/// Map a backend rejection reason onto the promo error taxonomy.
fn map_rejection(
    reason: &str,
    code: &PromoCode,
    subtotal: Money,
    min_purchase: Option<Money>,
) -> PromoError {
    match reason {
        "expired" => PromoError::Expired,
        "min_purchase_not_met" => PromoError::MinPurchaseNotMet {
            required: min_purchase.unwrap_or(Money::ZERO),
            subtotal,
        },
        _ => PromoError::InvalidCode(code.as_str().to_owned()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(1), Duration::from_millis(250));
        assert_eq!(retry_delay(2), Duration::from_millis(500));
        assert_eq!(retry_delay(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let delay = jittered(base);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_map_rejection_reasons() {
        let code = PromoCode::parse("WELCOME10").unwrap();
        assert!(matches!(
            map_rejection("expired", &code, Money::ZERO, None),
            PromoError::Expired
        ));
        assert!(matches!(
            map_rejection(
                "min_purchase_not_met",
                &code,
                Money::from_minor_units(2000),
                Some(Money::from_minor_units(5000))
            ),
            PromoError::MinPurchaseNotMet { .. }
        ));
        assert!(matches!(
            map_rejection("no_such_code", &code, Money::ZERO, None),
            PromoError::InvalidCode(_)
        ));
    }

    #[test]
    fn test_session_token_debug_redacts() {
        let token = SessionToken::new("very-secret");
        assert!(!format!("{token:?}").contains("very-secret"));
    }
}
