//! Local cart operations through the public API: adds, merges, quantity
//! updates, removals, and the totals invariant that must hold after every
//! single mutation.

use sartoria_cart::{CartError, Customizations};
use sartoria_core::Money;
use sartoria_integration_tests::{add, product, test_store};

// =============================================================================
// Adding Items
// =============================================================================

#[test]
fn test_add_snapshots_price_and_recomputes_totals() {
    let (store, _backend) = test_store();

    add(&store, &product("oxford-shirt", 1999, 10), 2);

    let state = store.snapshot();
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.totals.subtotal, Money::from_minor_units(3998));
    // 5% tax, rounded half-up to the minor unit
    assert_eq!(state.totals.tax, Money::from_minor_units(200));
    // below the $100 threshold with no quote: flat $10
    assert_eq!(state.totals.shipping, Money::from_minor_units(1000));
    assert_eq!(state.totals.total, Money::from_minor_units(5198));
}

#[test]
fn test_same_product_merges_into_one_line() {
    let (store, _backend) = test_store();
    let shirt = product("oxford-shirt", 1999, 10);

    add(&store, &shirt, 2);
    add(&store, &shirt, 3);

    let state = store.snapshot();
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.item_count(), 5);
}

#[test]
fn test_customizations_split_lines() {
    let (store, _backend) = test_store();
    let suit = product("bespoke-suit", 89_900, 0);

    store
        .add_item(
            &suit,
            1,
            Customizations::none().with("fabric", "linen").with("size", "42R"),
            None,
        )
        .unwrap();
    store
        .add_item(
            &suit,
            1,
            Customizations::none().with("fabric", "wool").with("size", "42R"),
            None,
        )
        .unwrap();

    assert_eq!(store.snapshot().items.len(), 2);
    assert_eq!(store.item_count(), 2);
}

#[test]
fn test_add_beyond_stock_clamps_with_notice() {
    let (store, _backend) = test_store();
    let scarce = product("limited-tie", 4500, 3);

    let outcome = store
        .add_item(&scarce, 2, Customizations::none(), None)
        .unwrap();
    assert!(outcome.stock_notice.is_none());

    // Second add would take the line to 5; only 3 are purchasable.
    let outcome = store
        .add_item(&scarce, 3, Customizations::none(), None)
        .unwrap();
    let notice = outcome.stock_notice.expect("clamp must be surfaced");
    assert_eq!(notice.requested, 5);
    assert_eq!(notice.available, 3);
    assert_eq!(store.item_count(), 3);
}

#[test]
fn test_untracked_stock_caps_at_max_quantity() {
    let (store, _backend) = test_store();
    let untracked = product("pocket-square", 900, 0);

    let outcome = store
        .add_item(&untracked, 99, Customizations::none(), None)
        .unwrap();
    assert!(outcome.stock_notice.is_none());
    assert_eq!(outcome.quantity, 99);

    // 99 is the hard per-line cap even with untracked stock.
    let err = store
        .add_item(&untracked, 100, Customizations::none(), None)
        .unwrap_err();
    assert!(matches!(err, CartError::InvalidQuantity { requested: 100 }));
}

// =============================================================================
// Updating and Removing
// =============================================================================

#[test]
fn test_update_quantity_strictly_validates() {
    let (store, _backend) = test_store();
    let outcome = store
        .add_item(&product("belt", 2500, 4), 2, Customizations::none(), None)
        .unwrap();

    // Unlike add, update never clamps: over-stock is a hard rejection.
    let err = store.update_quantity(outcome.item_id, 6).unwrap_err();
    assert!(matches!(
        err,
        CartError::InsufficientStock {
            requested: 6,
            available: 4
        }
    ));
    assert_eq!(store.item_count(), 2);

    store.update_quantity(outcome.item_id, 4).unwrap();
    assert_eq!(store.item_count(), 4);
}

#[test]
fn test_remove_and_clear() {
    let (store, _backend) = test_store();
    let kept = store
        .add_item(&product("a", 1000, 0), 1, Customizations::none(), None)
        .unwrap();
    let removed = store
        .add_item(&product("b", 2000, 0), 1, Customizations::none(), None)
        .unwrap();

    store.remove_item(removed.item_id);
    let state = store.snapshot();
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items.first().map(|i| i.id), Some(kept.item_id));
    assert_eq!(state.totals.subtotal, Money::from_minor_units(1000));

    store.clear();
    let state = store.snapshot();
    assert!(state.items.is_empty());
    assert_eq!(state.totals.total, Money::ZERO);
}

#[test]
fn test_order_submission_empties_cart() {
    let (store, _backend) = test_store();
    add(&store, &product("a", 1000, 0), 2);

    store.mark_order_submitted();
    assert_eq!(store.item_count(), 0);
    assert_eq!(store.snapshot().totals.total, Money::ZERO);
}

// =============================================================================
// Totals Invariant
// =============================================================================

#[test]
fn test_free_shipping_kicks_in_at_threshold() {
    let (store, _backend) = test_store();

    // $99.99: flat shipping
    add(&store, &product("jacket", 9999, 0), 1);
    assert_eq!(
        store.snapshot().totals.shipping,
        Money::from_minor_units(1000)
    );

    // one more item crosses $100: free
    add(&store, &product("socks", 500, 0), 1);
    assert_eq!(store.snapshot().totals.shipping, Money::ZERO);
}

#[test]
fn test_subscribers_see_every_commit_in_order() {
    let (store, _backend) = test_store();
    let rx = store.subscribe();

    add(&store, &product("a", 1000, 0), 1);
    assert_eq!(rx.borrow().item_count(), 1);

    add(&store, &product("b", 2000, 0), 2);
    let seen = rx.borrow().clone();
    assert_eq!(seen.item_count(), 3);
    assert_eq!(seen.totals.subtotal, Money::from_minor_units(5000));
}
