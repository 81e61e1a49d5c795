//! Cart data model.
//!
//! [`CartState`] is the aggregate root, owned exclusively by the
//! [`CartStore`](crate::store::CartStore). Everything else here is either a
//! read-only descriptor handed in by collaborators ([`ProductRef`]) or a
//! value type embedded in the state. Calling code never mutates these
//! directly; all changes go through store operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sartoria_core::{LineItemId, Money, ProductId, PromoCode};

/// Read-only product descriptor from the catalog collaborator.
///
/// The cart holds no ownership over the product; it snapshots the price at
/// add-time and treats the stock count as advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRef {
    /// Catalog identifier.
    pub id: ProductId,
    /// Current unit price.
    pub price: Money,
    /// Last-known stock count; `<= 0` means untracked.
    pub stock_available: i32,
    /// Whether this is a custom-tailoring product.
    pub is_custom: bool,
}

/// Customization payload for a line item (fabric, color, size, measurements).
///
/// Part of the line item's identity: two otherwise-identical products with
/// different customizations are different line items. The map is ordered so
/// the fingerprint is stable regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Customizations(BTreeMap<String, String>);

impl Customizations {
    /// Empty customizations (a plain, uncustomized product).
    #[must_use]
    pub const fn none() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether any customization is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic identity string for duplicate detection.
    ///
    /// Keys are already sorted by the map; the unit separator keeps
    /// `("a", "b=c")` and `("a=b", "c")` distinct.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.0 {
            if !out.is_empty() {
                out.push('\u{1f}');
            }
            out.push_str(key);
            out.push('\u{1e}');
            out.push_str(value);
        }
        out
    }
}

/// One entry in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Unique within the cart, generated at add-time.
    pub id: LineItemId,
    /// Weak reference to the catalog product.
    pub product_id: ProductId,
    /// Units of this line item, always in `[1, 99]`.
    pub quantity: u32,
    /// Unit price snapshotted when the item was added. The cart never
    /// silently re-prices from a live catalog lookup.
    pub price_at_add: Money,
    /// Last-known stock for the product; advisory, `<= 0` means untracked.
    pub stock_available: i32,
    /// Customization payload, part of this line item's identity.
    pub customizations: Customizations,
    /// Whether this is a custom-tailoring order.
    pub is_custom: bool,
    /// Extended custom-order payload; opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_details: Option<serde_json::Value>,
}

impl LineItem {
    /// `price_at_add x quantity`.
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.price_at_add.mul_quantity(self.quantity)
    }

    /// Whether this line item is the same product+customizations combination.
    #[must_use]
    pub fn matches(&self, product_id: &ProductId, fingerprint: &str) -> bool {
        &self.product_id == product_id && self.customizations.fingerprint() == fingerprint
    }
}

/// How a promo discounts the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromoKind {
    /// Percentage off the subtotal, optionally capped.
    Percentage {
        /// Discount rate (e.g. `0.10` for 10%).
        rate: Decimal,
        /// Cap on the discount amount, if any.
        max_discount: Option<Money>,
    },
    /// Fixed amount off, never exceeding the subtotal.
    Fixed {
        /// Discount amount.
        amount: Money,
    },
}

/// Authoritative promo terms resolved by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoTerms {
    /// The code as entered (normalized).
    pub code: PromoCode,
    /// Discount rule.
    #[serde(flatten)]
    pub kind: PromoKind,
    /// Minimum subtotal for the discount to apply.
    pub min_purchase: Option<Money>,
    /// Expiry, enforced server-side; kept for display.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A promo currently attached to the cart, with its effective discount.
///
/// If later mutations drop the subtotal below `min_purchase`, the promo
/// stays applied with a zero discount and `valid == false` rather than
/// being silently removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPromo {
    /// Resolved terms.
    pub terms: PromoTerms,
    /// Discount currently in effect for this cart.
    pub discount: Money,
    /// Whether the terms are currently satisfied.
    pub valid: bool,
}

/// Shipping address, used only to compute shipping cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

/// Derived totals; never independently settable, recomputed after every
/// mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
}

/// The cart aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartState {
    /// Line items in insertion order (significant for display only).
    pub items: Vec<LineItem>,
    /// Applied promo, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo: Option<AppliedPromo>,
    /// Shipping address, if the shopper has provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,
    /// Address-based shipping quote currently in effect, if any. Cleared
    /// whenever the address changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_quote: Option<Money>,
    /// Derived totals, consistent with `items` + `promo` at all times.
    pub totals: Totals,
    /// Last successful remote reconciliation; `None` for guest-only carts.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CartState {
    /// A fresh, empty cart.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            promo: None,
            shipping_address: None,
            shipping_quote: None,
            totals: Totals::default(),
            last_synced_at: None,
        }
    }

    /// Total units across all line items (the cart badge count).
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Find a line item by id.
    #[must_use]
    pub fn find_item(&self, id: LineItemId) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Find a line item with the same product+customizations combination.
    #[must_use]
    pub fn find_matching(&self, product_id: &ProductId, fingerprint: &str) -> Option<&LineItem> {
        self.items
            .iter()
            .find(|item| item.matches(product_id, fingerprint))
    }
}

/// Notice that an add was clamped to the purchasable ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockNotice {
    /// Product whose stock was exceeded.
    pub product_id: ProductId,
    /// Quantity the caller asked for (including any existing line quantity).
    pub requested: u32,
    /// Quantity the cart actually holds now.
    pub available: u32,
}

/// Result of a successful `add_item`.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    /// Line item that was created or merged into.
    pub item_id: LineItemId,
    /// Quantity the line item holds after the add.
    pub quantity: u32,
    /// Present when the quantity was clamped rather than added in full.
    pub stock_notice: Option<StockNotice>,
}
