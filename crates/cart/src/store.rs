//! The cart store: stateful core of the engine.
//!
//! Owns [`CartState`] exclusively. Every mutation goes through one commit
//! path: validate, mutate, recompute totals, persist a snapshot, notify
//! subscribers. There is no code path that changes `items` without a totals
//! recomputation, and a rejected mutation leaves prior state fully intact.
//!
//! The store handle is cheaply cloneable (`Arc` inner). State sits behind a
//! `std::sync::RwLock` that is never held across an `.await`: async
//! operations capture what they need, release the lock, talk to the network,
//! then re-acquire and check the response is still applicable before
//! applying it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use sartoria_core::{LineItemId, Money, ProfileId, PromoCode};

use crate::config::CartConfig;
use crate::error::{CartError, PromoError, RemoteError};
use crate::persist::{CartStorage, PersistedCart};
use crate::pricing::{self, ShippingCharge};
use crate::remote::{RemoteBackend, SessionToken};
use crate::types::{
    AddOutcome, Address, AppliedPromo, CartState, Customizations, LineItem, ProductRef,
    StockNotice,
};
use crate::validate::{quantity_ceiling, validate_product, validate_quantity, validate_stock};

/// Result of `calculate_shipping`.
///
/// A failed quote is a degraded outcome, not an error: the flat rate is in
/// effect and `warning` carries the cause for a non-blocking UI notice.
#[derive(Debug)]
pub struct ShippingOutcome {
    /// Shipping charge now in effect for the cart.
    pub charge: ShippingCharge,
    /// Present when the quote failed and the flat-rate fallback applies.
    pub warning: Option<RemoteError>,
}

/// Whether a state transition actually changed anything worth committing.
enum Mutation<T> {
    Changed(T),
    Unchanged(T),
}

/// The cart store.
pub struct CartStore<S, R> {
    inner: Arc<StoreInner<S, R>>,
}

impl<S, R> Clone for CartStore<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<S, R> {
    profile: ProfileId,
    config: CartConfig,
    storage: S,
    remote: R,
    state: RwLock<CartState>,
    /// Last revision this context wrote to storage.
    revision: AtomicU64,
    /// Local changes not yet pushed to the remote backend.
    dirty: AtomicBool,
    session: RwLock<Option<SessionToken>>,
    tx: watch::Sender<CartState>,
}

impl<S: CartStorage, R: RemoteBackend> CartStore<S, R> {
    /// Create a store for a profile, hydrating from persisted storage.
    ///
    /// A missing record means a fresh guest cart; an unreadable record is
    /// logged and treated as missing (the cart must never be blocked by a
    /// bad snapshot).
    #[must_use]
    pub fn new(config: CartConfig, storage: S, remote: R, profile: ProfileId) -> Self {
        let (mut state, revision) = match storage.load(&profile) {
            Ok(Some(record)) => {
                let revision = record.revision;
                (state_from_record(&record), revision)
            }
            Ok(None) => (CartState::empty(), 0),
            Err(e) => {
                warn!(error = %e, %profile, "failed to hydrate cart, starting empty");
                (CartState::empty(), 0)
            }
        };
        recompute(&mut state, &config);

        let (tx, _rx) = watch::channel(state.clone());
        Self {
            inner: Arc::new(StoreInner {
                profile,
                config,
                storage,
                remote,
                state: RwLock::new(state),
                revision: AtomicU64::new(revision),
                dirty: AtomicBool::new(false),
                session: RwLock::new(None),
                tx,
            }),
        }
    }

    // =========================================================================
    // Read access
    // =========================================================================

    /// Subscribe to state snapshots; the receiver sees every committed
    /// mutation in order.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartState> {
        self.inner.tx.subscribe()
    }

    /// Current state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartState {
        self.read().clone()
    }

    /// Total units across all line items (the cart badge count).
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.read().item_count()
    }

    /// Last revision this context wrote to storage.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Acquire)
    }

    /// Whether local changes have not yet been pushed to the backend.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Attach an authenticated session. Called by the synchronizer on login.
    pub fn set_session(&self, token: SessionToken) {
        *self.write_session() = Some(token);
    }

    /// Drop the session. The cart itself is retained as a guest cart;
    /// logging out must not destroy a pending cart.
    pub fn clear_session(&self) {
        *self.write_session() = None;
    }

    /// Current session token, if authenticated.
    #[must_use]
    pub fn session(&self) -> Option<SessionToken> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // =========================================================================
    // Local mutations (synchronous, atomic)
    // =========================================================================

    /// Add a product to the cart.
    ///
    /// An existing line item with the same product+customizations absorbs
    /// the quantity instead of a duplicate row appearing. Quantities beyond
    /// the purchasable ceiling are clamped, never silently: the returned
    /// [`AddOutcome`] carries a [`StockNotice`] whenever the cart holds less
    /// than was asked for.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidProduct`] or [`CartError::InvalidQuantity`]
    /// without touching the cart.
    pub fn add_item(
        &self,
        product: &ProductRef,
        quantity: u32,
        customizations: Customizations,
        custom_details: Option<serde_json::Value>,
    ) -> Result<AddOutcome, CartError> {
        validate_product(product)?;
        validate_quantity(quantity)?;

        let fingerprint = customizations.fingerprint();
        let ceiling = quantity_ceiling(product.stock_available);

        self.apply(|state| {
            if let Some(existing) = state
                .items
                .iter_mut()
                .find(|item| item.matches(&product.id, &fingerprint))
            {
                // Refresh the advisory stock count while we have fresh data.
                let stock_refreshed = existing.stock_available != product.stock_available;
                existing.stock_available = product.stock_available;
                let requested = existing.quantity.saturating_add(quantity);
                let item_id = existing.id;

                if requested <= ceiling {
                    existing.quantity = requested;
                    return Ok(Mutation::Changed(AddOutcome {
                        item_id,
                        quantity: requested,
                        stock_notice: None,
                    }));
                }

                let notice = StockNotice {
                    product_id: product.id.clone(),
                    requested,
                    available: ceiling,
                };
                if existing.quantity == ceiling && !stock_refreshed {
                    // Already at the cap; signal without a redundant commit.
                    return Ok(Mutation::Unchanged(AddOutcome {
                        item_id,
                        quantity: ceiling,
                        stock_notice: Some(notice),
                    }));
                }
                existing.quantity = ceiling;
                return Ok(Mutation::Changed(AddOutcome {
                    item_id,
                    quantity: ceiling,
                    stock_notice: Some(notice),
                }));
            }

            let (granted, stock_notice) = if quantity > ceiling {
                (
                    ceiling,
                    Some(StockNotice {
                        product_id: product.id.clone(),
                        requested: quantity,
                        available: ceiling,
                    }),
                )
            } else {
                (quantity, None)
            };

            let item = LineItem {
                id: LineItemId::generate(),
                product_id: product.id.clone(),
                quantity: granted,
                price_at_add: product.price,
                stock_available: product.stock_available,
                customizations: customizations.clone(),
                is_custom: product.is_custom,
                custom_details: custom_details.clone(),
            };
            let item_id = item.id;
            state.items.push(item);

            Ok(Mutation::Changed(AddOutcome {
                item_id,
                quantity: granted,
                stock_notice,
            }))
        })
    }

    /// Replace a line item's quantity.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::ItemNotFound`], [`CartError::InvalidQuantity`]
    /// or [`CartError::InsufficientStock`]; on any error the item's prior
    /// quantity is unchanged.
    pub fn update_quantity(&self, item_id: LineItemId, new_quantity: u32) -> Result<(), CartError> {
        self.apply(|state| {
            let Some(item) = state.items.iter_mut().find(|item| item.id == item_id) else {
                return Err(CartError::ItemNotFound(item_id));
            };
            validate_quantity(new_quantity)?;
            validate_stock(new_quantity, item.stock_available)?;

            if item.quantity == new_quantity {
                return Ok(Mutation::Unchanged(()));
            }
            item.quantity = new_quantity;
            Ok(Mutation::Changed(()))
        })
    }

    /// Remove a line item. Removal is idempotent: a missing id is a no-op,
    /// not an error.
    pub fn remove_item(&self, item_id: LineItemId) {
        self.apply_ok(|state| {
            let before = state.items.len();
            state.items.retain(|item| item.id != item_id);
            if state.items.len() == before {
                Mutation::Unchanged(())
            } else {
                Mutation::Changed(())
            }
        });
    }

    /// Empty the cart and drop any applied promo.
    pub fn clear(&self) {
        self.apply_ok(|state| {
            if state.items.is_empty() && state.promo.is_none() {
                return Mutation::Unchanged(());
            }
            state.items.clear();
            state.promo = None;
            Mutation::Changed(())
        });
    }

    /// React to the order-submission collaborator reporting success.
    pub fn mark_order_submitted(&self) {
        info!(profile = %self.inner.profile, "order submitted, clearing cart");
        self.clear();
    }

    /// Detach the applied promo. Always succeeds.
    pub fn remove_promo_code(&self) {
        self.apply_ok(|state| {
            if state.promo.is_none() {
                Mutation::Unchanged(())
            } else {
                state.promo = None;
                Mutation::Changed(())
            }
        });
    }

    // =========================================================================
    // Network-backed operations (non-blocking for local usage)
    // =========================================================================

    /// Apply a promo code.
    ///
    /// The code format is checked locally (fast fail), then the backend
    /// resolves authoritative terms. The minimum-purchase gate is re-checked
    /// against the subtotal *after* the network call, since the cart may
    /// have been mutated while the validation was in flight.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Promo`] with the rejection reason; any
    /// previously applied promo is left untouched.
    #[instrument(skip(self), fields(code = raw_code))]
    pub async fn apply_promo_code(&self, raw_code: &str) -> Result<(), CartError> {
        let code = PromoCode::parse(raw_code).map_err(PromoError::Format)?;

        let snapshot = self.snapshot();
        let terms = self.inner.remote.validate_promo(&code, &snapshot).await?;

        if let Some(expires_at) = terms.expires_at
            && expires_at < Utc::now()
        {
            return Err(PromoError::Expired.into());
        }

        self.apply(|state| {
            let subtotal = pricing::subtotal(&state.items);
            if let Some(required) = terms.min_purchase
                && subtotal < required
            {
                return Err(PromoError::MinPurchaseNotMet { required, subtotal }.into());
            }
            state.promo = Some(AppliedPromo {
                terms: terms.clone(),
                discount: Money::ZERO, // recomputed on commit
                valid: true,
            });
            Ok(Mutation::Changed(()))
        })
    }

    /// Store a shipping address and fetch an address-based quote.
    ///
    /// The address is committed immediately; the quote resolves async. A
    /// quote that arrives after the address changed again is discarded. A
    /// failed quote degrades to the flat rate with a non-fatal warning -
    /// the cart stays fully usable.
    #[instrument(skip(self, address))]
    pub async fn calculate_shipping(&self, address: Address) -> ShippingOutcome {
        self.apply_ok(|state| {
            if state.shipping_address.as_ref() == Some(&address) {
                Mutation::Unchanged(())
            } else {
                state.shipping_address = Some(address.clone());
                // A quote for the old address is meaningless now.
                state.shipping_quote = None;
                Mutation::Changed(())
            }
        });

        let snapshot = self.snapshot();
        let params = self.inner.config.pricing_params();
        if snapshot.totals.subtotal >= params.free_shipping_threshold {
            return ShippingOutcome {
                charge: ShippingCharge::Free,
                warning: None,
            };
        }

        match self.inner.remote.quote_shipping(&address, &snapshot).await {
            Ok(cost) => {
                let applied = self.apply_ok(|state| {
                    if state.shipping_address.as_ref() == Some(&address) {
                        state.shipping_quote = Some(cost);
                        Mutation::Changed(true)
                    } else {
                        Mutation::Unchanged(false)
                    }
                });
                if applied {
                    ShippingOutcome {
                        charge: ShippingCharge::Quoted(cost),
                        warning: None,
                    }
                } else {
                    debug!("address changed while quote was in flight, discarding");
                    ShippingOutcome {
                        charge: self.current_shipping_charge(),
                        warning: None,
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "shipping quote unavailable, falling back to flat rate");
                ShippingOutcome {
                    charge: self.current_shipping_charge(),
                    warning: Some(err),
                }
            }
        }
    }

    // =========================================================================
    // Synchronizer interface
    // =========================================================================

    /// Install a merged record as the new state (cross-context or login
    /// reconciliation). Commits through the normal path: recompute, persist,
    /// notify.
    pub(crate) fn apply_record(&self, record: &PersistedCart) {
        self.apply_ok(|state| {
            state.items = record.items.clone();
            state.promo = record.promo.clone();
            // A quote only survives if it still matches the address.
            if state.shipping_address != record.shipping_address {
                state.shipping_quote = None;
            }
            state.shipping_address = record.shipping_address.clone();
            state.last_synced_at = record.last_synced_at;
            Mutation::Changed(())
        });
    }

    /// Record a successful remote reconciliation without re-flagging the
    /// cart as dirty.
    pub(crate) fn mark_synced(&self, at: DateTime<Utc>) {
        let snapshot = {
            let mut state = self.write();
            state.last_synced_at = Some(at);
            state.clone()
        };
        self.inner.dirty.store(false, Ordering::Release);
        self.persist(&snapshot);
        self.inner.tx.send_replace(snapshot);
    }

    /// Fast-forward the revision counter past a foreign write so the next
    /// local write sorts after it.
    pub(crate) fn observe_revision(&self, revision: u64) {
        self.inner.revision.fetch_max(revision, Ordering::AcqRel);
    }

    pub(crate) fn profile(&self) -> &ProfileId {
        &self.inner.profile
    }

    pub(crate) fn storage(&self) -> &S {
        &self.inner.storage
    }

    pub(crate) fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Current persisted-record view of the live state.
    pub(crate) fn to_record(&self) -> PersistedCart {
        PersistedCart::from_state(&self.read(), self.revision())
    }

    // =========================================================================
    // Commit path
    // =========================================================================

    fn read(&self) -> RwLockReadGuard<'_, CartState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CartState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<SessionToken>> {
        self.inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a fallible state transition. On `Err` or `Unchanged` nothing is
    /// committed; on `Changed` totals are recomputed and the snapshot is
    /// persisted and broadcast - all under one lock acquisition, so no
    /// partially-mutated state is ever observable.
    fn apply<T>(
        &self,
        f: impl FnOnce(&mut CartState) -> Result<Mutation<T>, CartError>,
    ) -> Result<T, CartError> {
        let (value, snapshot) = {
            let mut state = self.write();
            match f(&mut state)? {
                Mutation::Unchanged(value) => return Ok(value),
                Mutation::Changed(value) => {
                    recompute(&mut state, &self.inner.config);
                    (value, state.clone())
                }
            }
        };

        self.inner.dirty.store(true, Ordering::Release);
        self.persist(&snapshot);
        self.inner.tx.send_replace(snapshot);
        Ok(value)
    }

    /// Infallible variant of [`Self::apply`].
    fn apply_ok<T>(&self, f: impl FnOnce(&mut CartState) -> Mutation<T>) -> T {
        match self.apply(|state| Ok(f(state))) {
            Ok(value) => value,
            Err(_) => unreachable!("infallible transition"),
        }
    }

    /// Best-effort persistence; a failed write degrades to a warning.
    fn persist(&self, snapshot: &CartState) {
        let revision = self.inner.revision.fetch_add(1, Ordering::AcqRel) + 1;
        let record = PersistedCart::from_state(snapshot, revision);
        if let Err(e) = self.inner.storage.save(&self.inner.profile, &record) {
            warn!(error = %e, profile = %self.inner.profile, "failed to persist cart snapshot");
        }
    }

    fn current_shipping_charge(&self) -> ShippingCharge {
        let state = self.read();
        pricing::shipping(
            state.totals.subtotal,
            state.shipping_quote,
            &self.inner.config.pricing_params(),
        )
    }
}

/// Rebuild totals and the promo validity flag from the current items.
fn recompute(state: &mut CartState, config: &CartConfig) {
    let terms = state.promo.as_ref().map(|promo| promo.terms.clone());
    let (totals, promo_ok) = pricing::compute(
        &state.items,
        terms.as_ref(),
        state.shipping_quote,
        &config.pricing_params(),
    );
    state.totals = totals;
    if let Some(promo) = &mut state.promo {
        promo.discount = totals.discount;
        promo.valid = promo_ok;
    }
}

/// Live state from a persisted record; totals are recomputed by the caller.
fn state_from_record(record: &PersistedCart) -> CartState {
    CartState {
        items: record.items.clone(),
        promo: record.promo.clone(),
        shipping_address: record.shipping_address.clone(),
        shipping_quote: None,
        totals: crate::types::Totals::default(),
        last_synced_at: record.last_synced_at,
    }
}
