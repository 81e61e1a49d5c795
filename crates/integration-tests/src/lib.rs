//! Integration tests for the Sartoria cart engine.
//!
//! The engine is exercised through its public API only: a [`CartStore`]
//! over [`MemoryStorage`] and a scriptable [`FakeBackend`] standing in for
//! the remote order/catalog backend. No network, no filesystem (except the
//! dedicated persistence tests), deterministic by construction.
//!
//! # Test Categories
//!
//! - `cart_operations` - local mutations, validation, totals invariants
//! - `promo_and_shipping` - network-backed promo and quote flows
//! - `persistence_and_sync` - storage round-trips, cross-tab and login
//!   reconciliation

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use sartoria_cart::{
    Address, CartConfig, CartState, CartStorage, CartStore, Customizations, MemoryStorage,
    PersistedCart, ProductRef, PromoError, PromoKind, PromoTerms, RemoteBackend, RemoteError,
    SessionToken,
};
use sartoria_core::{Money, ProductId, ProfileId, PromoCode};

/// Scriptable stand-in for the remote order/catalog backend.
///
/// Clones share state, mirroring the production client's `Arc` inner.
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeBackendState>>,
}

#[derive(Default)]
struct FakeBackendState {
    promos: HashMap<String, PromoTerms>,
    saved_cart: Option<PersistedCart>,
    quote: Option<Money>,
    fail_quotes: bool,
    fail_pushes: bool,
    push_count: u32,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeBackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a promo code resolvable.
    pub fn register_promo(&self, terms: PromoTerms) {
        let code = terms.code.as_str().to_owned();
        self.state().promos.insert(code, terms);
    }

    /// Seed the server-side saved cart returned on login.
    pub fn set_saved_cart(&self, cart: PersistedCart) {
        self.state().saved_cart = Some(cart);
    }

    /// Fix the shipping quote returned for any address.
    pub fn set_quote(&self, cost: Money) {
        self.state().quote = Some(cost);
    }

    /// Make every shipping quote fail with a server error.
    pub fn fail_quotes(&self) {
        self.state().fail_quotes = true;
    }

    /// Make every cart push fail with a server error.
    pub fn fail_pushes(&self) {
        self.state().fail_pushes = true;
    }

    /// How many cart pushes were acknowledged.
    #[must_use]
    pub fn push_count(&self) -> u32 {
        self.state().push_count
    }

    /// The last cart the backend accepted, if any.
    #[must_use]
    pub fn saved_cart(&self) -> Option<PersistedCart> {
        self.state().saved_cart.clone()
    }
}

impl RemoteBackend for FakeBackend {
    async fn fetch_cart(
        &self,
        _session: &SessionToken,
    ) -> Result<Option<PersistedCart>, RemoteError> {
        Ok(self.state().saved_cart.clone())
    }

    async fn push_cart(
        &self,
        _session: &SessionToken,
        snapshot: &PersistedCart,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.fail_pushes {
            return Err(RemoteError::Status {
                status: 502,
                body: "bad gateway".to_owned(),
            });
        }
        state.push_count += 1;
        state.saved_cart = Some(snapshot.clone());
        Ok(())
    }

    async fn validate_promo(
        &self,
        code: &PromoCode,
        snapshot: &CartState,
    ) -> Result<PromoTerms, PromoError> {
        let Some(terms) = self.state().promos.get(code.as_str()).cloned() else {
            return Err(PromoError::InvalidCode(code.as_str().to_owned()));
        };
        if let Some(expires_at) = terms.expires_at
            && expires_at < Utc::now()
        {
            return Err(PromoError::Expired);
        }
        if let Some(required) = terms.min_purchase
            && snapshot.totals.subtotal < required
        {
            return Err(PromoError::MinPurchaseNotMet {
                required,
                subtotal: snapshot.totals.subtotal,
            });
        }
        Ok(terms)
    }

    async fn quote_shipping(
        &self,
        _address: &Address,
        _snapshot: &CartState,
    ) -> Result<Money, RemoteError> {
        let state = self.state();
        if state.fail_quotes {
            return Err(RemoteError::Status {
                status: 503,
                body: "quote service down".to_owned(),
            });
        }
        Ok(state.quote.unwrap_or_else(|| Money::from_minor_units(750)))
    }
}

// =============================================================================
// Builders
// =============================================================================

/// A store over fresh in-memory storage and a fresh fake backend.
#[must_use]
pub fn test_store() -> (CartStore<MemoryStorage, FakeBackend>, FakeBackend) {
    let backend = FakeBackend::new();
    let store = store_over(MemoryStorage::new(), backend.clone());
    (store, backend)
}

/// A store over explicit storage and backend handles, for multi-context
/// scenarios (two tabs share a cloned `MemoryStorage`).
#[must_use]
pub fn store_over(
    storage: MemoryStorage,
    backend: FakeBackend,
) -> CartStore<MemoryStorage, FakeBackend> {
    CartStore::new(CartConfig::default(), storage, backend, profile())
}

/// The profile every test store runs under.
#[must_use]
pub fn profile() -> ProfileId {
    ProfileId::new("integration-profile")
}

/// Catalog product descriptor. `stock <= 0` means untracked.
#[must_use]
pub fn product(id: &str, price_minor: i64, stock: i32) -> ProductRef {
    ProductRef {
        id: ProductId::new(id),
        price: Money::from_minor_units(price_minor),
        stock_available: stock,
        is_custom: false,
    }
}

/// Percentage promo terms, e.g. `percent_promo("WELCOME10", 10)`.
///
/// # Panics
///
/// Panics if `code` is not a valid promo code (test fixture misuse).
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn percent_promo(code: &str, percent: i64) -> PromoTerms {
    PromoTerms {
        code: PromoCode::parse(code).unwrap(),
        kind: PromoKind::Percentage {
            rate: rust_decimal::Decimal::new(percent, 2),
            max_discount: None,
        },
        min_purchase: None,
        expires_at: None,
    }
}

/// Fixed-amount promo terms.
///
/// # Panics
///
/// Panics if `code` is not a valid promo code (test fixture misuse).
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn fixed_promo(code: &str, amount_minor: i64) -> PromoTerms {
    PromoTerms {
        code: PromoCode::parse(code).unwrap(),
        kind: PromoKind::Fixed {
            amount: Money::from_minor_units(amount_minor),
        },
        min_purchase: None,
        expires_at: None,
    }
}

/// A deliverable shipping address.
#[must_use]
pub fn address() -> Address {
    Address {
        line1: "12 Via Monte Napoleone".to_owned(),
        line2: None,
        city: "Milano".to_owned(),
        region: Some("MI".to_owned()),
        postal_code: "20121".to_owned(),
        country: "IT".to_owned(),
    }
}

/// Plain add with no customizations; panics on rejection.
///
/// # Panics
///
/// Panics if the add is rejected (test fixture misuse).
#[allow(clippy::unwrap_used)]
pub fn add<S: CartStorage>(store: &CartStore<S, FakeBackend>, product: &ProductRef, quantity: u32) {
    store
        .add_item(product, quantity, Customizations::none(), None)
        .unwrap();
}
