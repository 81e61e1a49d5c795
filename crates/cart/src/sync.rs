//! Cross-context synchronizer.
//!
//! A cart can be open in several contexts at once: another browser tab over
//! the same persisted record, and (for authenticated shoppers) a saved cart
//! on the remote backend. The synchronizer reconciles all of them against
//! one rule set:
//!
//! - line items merge as a union keyed by product+customizations, with the
//!   larger quantity winning a conflict (clamped to the purchasable ceiling)
//! - scalar fields (promo, shipping address) are last-write-wins by the
//!   record's `updated_at`, the foreign side winning an exact tie
//!
//! The merged result is installed through the store's normal commit path,
//! so subscribers see it like any other mutation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::CartError;
use crate::persist::{CartStorage, PersistedCart};
use crate::remote::{RemoteBackend, SessionToken};
use crate::store::CartStore;
use crate::types::LineItem;
use crate::validate::quantity_ceiling;

/// Where a context currently is in the reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Watching for external changes.
    Idle,
    /// A merge is in progress.
    Reconciling,
}

/// Synchronizer for one store handle.
///
/// Cheap to clone (the store is `Arc`-backed); the embedding application
/// calls [`poll_external`](Self::poll_external) on its storage-change signal
/// and [`push_if_dirty`](Self::push_if_dirty) on its sync cadence.
pub struct CartSync<S, R> {
    store: CartStore<S, R>,
    reconciling: Arc<AtomicBool>,
}

impl<S, R> Clone for CartSync<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            reconciling: Arc::clone(&self.reconciling),
        }
    }
}

impl<S: CartStorage, R: RemoteBackend> CartSync<S, R> {
    /// Wrap a store handle.
    #[must_use]
    pub fn new(store: CartStore<S, R>) -> Self {
        Self {
            store,
            reconciling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current phase of this context's reconciliation cycle.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        if self.reconciling.load(Ordering::Acquire) {
            SyncPhase::Reconciling
        } else {
            SyncPhase::Idle
        }
    }

    /// Check the persisted record for a write made by another context and
    /// reconcile it into the live state.
    ///
    /// Returns whether a foreign change was found and merged. Our own writes
    /// are recognized by revision and skipped, as is a poll arriving while a
    /// merge is already in progress (subscriber callbacks re-entering the
    /// synchronizer must not recurse).
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Storage`] if the record exists but cannot be
    /// read.
    #[instrument(skip(self), fields(profile = %self.store.profile()))]
    pub fn poll_external(&self) -> Result<bool, CartError> {
        if self.reconciling.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let result = self.reconcile_external();
        self.reconciling.store(false, Ordering::Release);
        result
    }

    fn reconcile_external(&self) -> Result<bool, CartError> {
        let Some(foreign) = self.store.storage().load(self.store.profile())? else {
            return Ok(false);
        };
        if foreign.revision <= self.store.revision() {
            return Ok(false);
        }

        debug!(
            foreign_revision = foreign.revision,
            local_revision = self.store.revision(),
            "external cart change detected"
        );
        let local = self.store.to_record();
        let merged = merge(&local, &foreign);
        self.store.observe_revision(foreign.revision);

        // A foreign record that merges to our existing content (e.g. the
        // other tab merging our own write back) must not re-commit, or two
        // polling tabs would bump revisions at each other forever.
        if merged.items == local.items
            && merged.promo == local.promo
            && merged.shipping_address == local.shipping_address
        {
            return Ok(false);
        }

        self.store.apply_record(&merged);
        Ok(true)
    }

    /// Handle a login: attach the session, pull the server-side cart, merge
    /// it with the local one and push the result back.
    ///
    /// A guest cart is never discarded by logging in; at worst the merge is
    /// the identity when the server has nothing saved.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Remote`] if the saved cart cannot be fetched.
    /// A failed push after a successful merge is downgraded to a warning
    /// and the cart stays flagged unsynced.
    #[instrument(skip(self, session), fields(profile = %self.store.profile()))]
    pub async fn on_login(&self, session: SessionToken) -> Result<(), CartError> {
        self.store.set_session(session.clone());

        let saved = self.store.remote().fetch_cart(&session).await?;
        if let Some(saved) = saved {
            info!(
                remote_items = saved.items.len(),
                "merging server-side cart into local cart"
            );
            let merged = merge(&self.store.to_record(), &saved);
            self.store.apply_record(&merged);
        }

        match self
            .store
            .remote()
            .push_cart(&session, &self.store.to_record())
            .await
        {
            Ok(()) => self.store.mark_synced(Utc::now()),
            Err(e) => warn!(error = %e, "post-login cart push failed, will retry later"),
        }
        Ok(())
    }

    /// Handle a logout: drop the session, keep the cart as a guest cart.
    pub fn on_logout(&self) {
        self.store.clear_session();
    }

    /// Push the cart to the backend if it has unsynced changes and a
    /// session is attached. Returns whether a push happened.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Remote`] when the push exhausted its retries;
    /// the cart stays flagged unsynced and local state is untouched.
    #[instrument(skip(self), fields(profile = %self.store.profile()))]
    pub async fn push_if_dirty(&self) -> Result<bool, CartError> {
        if !self.store.is_dirty() {
            return Ok(false);
        }
        let Some(session) = self.store.session() else {
            return Ok(false);
        };

        self.store
            .remote()
            .push_cart(&session, &self.store.to_record())
            .await?;
        self.store.mark_synced(Utc::now());
        Ok(true)
    }
}

/// Merge two cart records per the reconciliation rules.
fn merge(local: &PersistedCart, foreign: &PersistedCart) -> PersistedCart {
    // Exact tie goes to the foreign side.
    let newer = if foreign.updated_at >= local.updated_at {
        foreign
    } else {
        local
    };

    PersistedCart {
        revision: local.revision.max(foreign.revision),
        updated_at: Utc::now(),
        items: merge_items(&local.items, &foreign.items),
        promo: newer.promo.clone(),
        shipping_address: newer.shipping_address.clone(),
        last_synced_at: local.last_synced_at.max(foreign.last_synced_at),
    }
}

/// Union of both item lists keyed by product+customizations.
///
/// Conflicting quantities resolve to the larger one so a merge never loses
/// an intent to buy, clamped to the purchasable ceiling from the item's
/// advisory stock. Foreign-only lines get the same clamp, so an oversized
/// quantity written by another context never enters the live cart.
/// Local items keep their line-item ids.
fn merge_items(local: &[LineItem], foreign: &[LineItem]) -> Vec<LineItem> {
    let mut merged = local.to_vec();
    for theirs in foreign {
        let fingerprint = theirs.customizations.fingerprint();
        if let Some(ours) = merged
            .iter_mut()
            .find(|item| item.matches(&theirs.product_id, &fingerprint))
        {
            let wanted = ours.quantity.max(theirs.quantity);
            ours.quantity = wanted.min(quantity_ceiling(ours.stock_available));
        } else {
            let mut taken = theirs.clone();
            taken.quantity = taken.quantity.min(quantity_ceiling(taken.stock_available));
            merged.push(taken);
        }
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::Duration;

    use sartoria_core::{LineItemId, Money, ProductId, ProfileId, PromoCode};

    use crate::config::CartConfig;
    use crate::error::{PromoError, RemoteError};
    use crate::persist::MemoryStorage;
    use crate::types::{
        Address, AppliedPromo, CartState, Customizations, ProductRef, PromoKind, PromoTerms,
    };

    /// Backend fake with a scriptable server-side cart and push recording.
    #[derive(Clone, Default)]
    struct FakeBackend {
        saved: Arc<Mutex<Option<PersistedCart>>>,
        pushes: Arc<Mutex<u32>>,
        fail_push: Arc<Mutex<bool>>,
    }

    impl RemoteBackend for FakeBackend {
        async fn fetch_cart(
            &self,
            _session: &SessionToken,
        ) -> Result<Option<PersistedCart>, RemoteError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn push_cart(
            &self,
            _session: &SessionToken,
            snapshot: &PersistedCart,
        ) -> Result<(), RemoteError> {
            if *self.fail_push.lock().unwrap() {
                return Err(RemoteError::Status {
                    status: 502,
                    body: "bad gateway".to_owned(),
                });
            }
            *self.pushes.lock().unwrap() += 1;
            *self.saved.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }

        async fn validate_promo(
            &self,
            code: &PromoCode,
            _snapshot: &CartState,
        ) -> Result<PromoTerms, PromoError> {
            Err(PromoError::InvalidCode(code.as_str().to_owned()))
        }

        async fn quote_shipping(
            &self,
            _address: &Address,
            _snapshot: &CartState,
        ) -> Result<Money, RemoteError> {
            Ok(Money::from_minor_units(750))
        }
    }

    fn store_on(
        storage: MemoryStorage,
        backend: FakeBackend,
    ) -> CartStore<MemoryStorage, FakeBackend> {
        CartStore::new(
            CartConfig::default(),
            storage,
            backend,
            ProfileId::new("profile-1"),
        )
    }

    fn product(id: &str, minor: i64, stock: i32) -> ProductRef {
        ProductRef {
            id: ProductId::new(id),
            price: Money::from_minor_units(minor),
            stock_available: stock,
            is_custom: false,
        }
    }

    fn line(product: &str, quantity: u32, stock: i32) -> LineItem {
        LineItem {
            id: LineItemId::generate(),
            product_id: ProductId::new(product),
            quantity,
            price_at_add: Money::from_minor_units(1000),
            stock_available: stock,
            customizations: Customizations::none(),
            is_custom: false,
            custom_details: None,
        }
    }

    #[test]
    fn test_merge_items_union_with_larger_quantity() {
        let local = vec![line("a", 2, 0), line("b", 1, 0)];
        let foreign = vec![line("a", 5, 0), line("c", 3, 0)];

        let merged = merge_items(&local, &foreign);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].quantity, 5); // a: larger wins
        assert_eq!(merged[1].quantity, 1); // b: local only
        assert_eq!(merged[2].quantity, 3); // c: foreign only
        // local line-item identity survives the merge
        assert_eq!(merged[0].id, local[0].id);
    }

    #[test]
    fn test_merge_items_clamps_to_stock() {
        let local = vec![line("a", 2, 3)];
        let foreign = vec![line("a", 9, 3)];

        let merged = merge_items(&local, &foreign);
        assert_eq!(merged[0].quantity, 3);
    }

    #[test]
    fn test_merge_items_clamps_foreign_only_lines() {
        // No local counterpart to borrow a ceiling from: the foreign line's
        // own advisory stock still caps it.
        let local = vec![line("a", 1, 0)];
        let foreign = vec![line("scarce", 150, 3), line("untracked", 150, 0)];

        let merged = merge_items(&local, &foreign);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].quantity, 3);
        assert_eq!(merged[2].quantity, 99); // untracked stock caps at the hard limit
    }

    #[test]
    fn test_poll_clamps_oversized_foreign_record() {
        let storage = MemoryStorage::new();
        let store = store_on(storage.clone(), FakeBackend::default());
        let sync = CartSync::new(store.clone());

        // Another context persisted a quantity above the product's stock.
        let mut state = CartState::empty();
        state.items.push(line("scarce", 150, 3));
        storage
            .save(&ProfileId::new("profile-1"), &PersistedCart::from_state(&state, 7))
            .unwrap();

        assert!(sync.poll_external().unwrap());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].quantity, 3);
    }

    #[test]
    fn test_merge_scalars_last_write_wins_foreign_on_tie() {
        let mut state = CartState::empty();
        state.promo = Some(AppliedPromo {
            terms: PromoTerms {
                code: PromoCode::parse("LOCAL").unwrap(),
                kind: PromoKind::Fixed {
                    amount: Money::from_minor_units(100),
                },
                min_purchase: None,
                expires_at: None,
            },
            discount: Money::ZERO,
            valid: true,
        });
        let mut local = PersistedCart::from_state(&state, 1);
        let mut foreign = local.clone();
        foreign.promo = None;

        // Same updated_at: the foreign side wins.
        foreign.updated_at = local.updated_at;
        assert!(merge(&local, &foreign).promo.is_none());

        // Local strictly newer: local wins.
        local.updated_at = foreign.updated_at + Duration::seconds(5);
        assert!(merge(&local, &foreign).promo.is_some());
    }

    #[test]
    fn test_poll_detects_foreign_write() {
        let storage = MemoryStorage::new();
        let backend = FakeBackend::default();
        let tab_a = store_on(storage.clone(), backend.clone());
        let tab_b = store_on(storage, backend);
        let sync_a = CartSync::new(tab_a.clone());

        tab_b
            .add_item(&product("p1", 1000, 0), 2, Customizations::none(), None)
            .unwrap();

        assert!(sync_a.poll_external().unwrap());
        let state = tab_a.snapshot();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].quantity, 2);
        // totals were recomputed during the merge commit
        assert_eq!(state.totals.subtotal, Money::from_minor_units(2000));
    }

    #[test]
    fn test_poll_ignores_own_writes() {
        let storage = MemoryStorage::new();
        let store = store_on(storage, FakeBackend::default());
        let sync = CartSync::new(store.clone());

        store
            .add_item(&product("p1", 1000, 0), 1, Customizations::none(), None)
            .unwrap();
        assert!(!sync.poll_external().unwrap());
    }

    #[test]
    fn test_two_tabs_converge() {
        let storage = MemoryStorage::new();
        let backend = FakeBackend::default();
        let tab_a = store_on(storage.clone(), backend.clone());
        let tab_b = store_on(storage, backend);
        let sync_a = CartSync::new(tab_a.clone());
        let sync_b = CartSync::new(tab_b.clone());

        tab_a
            .add_item(&product("a", 1000, 0), 1, Customizations::none(), None)
            .unwrap();
        // B notices A's write, then adds its own item on top of the merge.
        assert!(sync_b.poll_external().unwrap());
        tab_b
            .add_item(&product("b", 2000, 0), 1, Customizations::none(), None)
            .unwrap();
        // A picks up the union; B sees nothing new afterwards.
        assert!(sync_a.poll_external().unwrap());
        assert!(!sync_b.poll_external().unwrap());

        let a = tab_a.snapshot();
        let b = tab_b.snapshot();
        assert_eq!(a.item_count(), 2);
        assert_eq!(b.item_count(), 2);
        assert_eq!(a.totals, b.totals);
    }

    #[tokio::test]
    async fn test_login_merges_saved_cart_and_pushes() {
        let backend = FakeBackend::default();
        let saved_state = {
            let mut state = CartState::empty();
            state.items.push(line("saved", 3, 0));
            state
        };
        *backend.saved.lock().unwrap() = Some(PersistedCart::from_state(&saved_state, 10));

        let store = store_on(MemoryStorage::new(), backend.clone());
        store
            .add_item(&product("local", 1500, 0), 1, Customizations::none(), None)
            .unwrap();
        let sync = CartSync::new(store.clone());

        sync.on_login(SessionToken::new("tok")).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.items.len(), 2);
        assert!(state.last_synced_at.is_some());
        assert!(!store.is_dirty());
        assert_eq!(*backend.pushes.lock().unwrap(), 1);
        // the pushed cart is the merged one
        let pushed = backend.saved.lock().unwrap().clone().unwrap();
        assert_eq!(pushed.items.len(), 2);
    }

    #[tokio::test]
    async fn test_login_push_failure_is_nonfatal() {
        let backend = FakeBackend::default();
        *backend.fail_push.lock().unwrap() = true;

        let store = store_on(MemoryStorage::new(), backend);
        store
            .add_item(&product("p1", 1000, 0), 1, Customizations::none(), None)
            .unwrap();
        let sync = CartSync::new(store.clone());

        sync.on_login(SessionToken::new("tok")).await.unwrap();
        // merge happened, but the cart stays flagged unsynced
        assert!(store.is_dirty());
    }

    #[tokio::test]
    async fn test_push_if_dirty_requires_session_and_changes() {
        let backend = FakeBackend::default();
        let store = store_on(MemoryStorage::new(), backend.clone());
        let sync = CartSync::new(store.clone());

        // clean cart: nothing to do
        assert!(!sync.push_if_dirty().await.unwrap());

        store
            .add_item(&product("p1", 1000, 0), 1, Customizations::none(), None)
            .unwrap();
        // dirty but anonymous: still nothing to do
        assert!(!sync.push_if_dirty().await.unwrap());

        store.set_session(SessionToken::new("tok"));
        assert!(sync.push_if_dirty().await.unwrap());
        assert!(!store.is_dirty());
        assert_eq!(*backend.pushes.lock().unwrap(), 1);

        // synced: subsequent calls are no-ops
        assert!(!sync.push_if_dirty().await.unwrap());
    }

    #[test]
    fn test_phase_returns_to_idle_after_poll() {
        let sync = CartSync::new(store_on(MemoryStorage::new(), FakeBackend::default()));
        assert_eq!(sync.phase(), SyncPhase::Idle);
        sync.poll_external().unwrap();
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_logout_keeps_guest_cart() {
        let store = store_on(MemoryStorage::new(), FakeBackend::default());
        store
            .add_item(&product("p1", 1000, 0), 1, Customizations::none(), None)
            .unwrap();
        store.set_session(SessionToken::new("tok"));
        let sync = CartSync::new(store.clone());

        sync.on_logout();
        assert!(store.session().is_none());
        assert_eq!(store.item_count(), 1);
    }
}
