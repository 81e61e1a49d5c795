//! Pricing calculator.
//!
//! Pure functions over [`Money`]: subtotal, tax, shipping, discount, total.
//! All of them are deterministic given identical inputs, which keeps tests
//! reproducible and makes replay during conflict reconciliation safe.

use rust_decimal::Decimal;

use sartoria_core::Money;

use crate::types::{LineItem, PromoKind, PromoTerms, Totals};

/// Externally supplied pricing context.
#[derive(Debug, Clone, Copy)]
pub struct PricingParams {
    /// Tax rate applied to the subtotal (e.g. `0.05`).
    pub tax_rate: Decimal,
    /// Flat shipping rate used when no quote is available.
    pub flat_shipping: Money,
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Money,
}

/// How the shipping charge was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShippingCharge {
    /// Subtotal met the free-shipping threshold.
    Free,
    /// Address-based quote from the remote backend.
    Quoted(Money),
    /// Flat-rate fallback (no address, or quote unavailable).
    Flat(Money),
}

impl ShippingCharge {
    /// The monetary amount of the charge.
    #[must_use]
    pub const fn amount(&self) -> Money {
        match self {
            Self::Free => Money::ZERO,
            Self::Quoted(amount) | Self::Flat(amount) => *amount,
        }
    }
}

/// Outcome of applying promo terms to a subtotal.
#[derive(Debug, Clone, Copy)]
pub struct DiscountOutcome {
    /// Effective discount, non-negative, never above the subtotal.
    pub amount: Money,
    /// Whether the terms' minimum purchase is currently satisfied. When
    /// false the discount is zero but the promo may stay applied, flagged
    /// invalid for this cart.
    pub min_purchase_met: bool,
}

/// Sum of `price_at_add x quantity` over all items.
#[must_use]
pub fn subtotal(items: &[LineItem]) -> Money {
    items.iter().map(LineItem::line_total).sum()
}

/// Tax on a subtotal, rounded half-up to the minor unit.
#[must_use]
pub fn tax(subtotal: Money, rate: Decimal) -> Money {
    subtotal.mul_rate(rate)
}

/// Shipping charge for a subtotal, preferring a quote when one is present.
///
/// An empty cart has nothing to ship, so a zero subtotal is never charged
/// the flat rate.
#[must_use]
pub fn shipping(subtotal: Money, quote: Option<Money>, params: &PricingParams) -> ShippingCharge {
    if subtotal == Money::ZERO || subtotal >= params.free_shipping_threshold {
        return ShippingCharge::Free;
    }
    quote.map_or(ShippingCharge::Flat(params.flat_shipping), |amount| {
        ShippingCharge::Quoted(amount)
    })
}

/// Discount for the given promo terms against a subtotal.
#[must_use]
pub fn discount(subtotal: Money, promo: Option<&PromoTerms>) -> DiscountOutcome {
    let Some(terms) = promo else {
        return DiscountOutcome {
            amount: Money::ZERO,
            min_purchase_met: true,
        };
    };

    if let Some(min_purchase) = terms.min_purchase
        && subtotal < min_purchase
    {
        return DiscountOutcome {
            amount: Money::ZERO,
            min_purchase_met: false,
        };
    }

    let amount = match &terms.kind {
        PromoKind::Percentage { rate, max_discount } => {
            let raw = subtotal.mul_rate(*rate);
            max_discount.map_or(raw, |cap| raw.min(cap))
        }
        PromoKind::Fixed { amount } => (*amount).min(subtotal),
    };

    DiscountOutcome {
        amount: amount.max(Money::ZERO),
        min_purchase_met: true,
    }
}

/// Grand total, floored at zero.
#[must_use]
pub fn total(subtotal: Money, tax: Money, shipping: Money, discount: Money) -> Money {
    (subtotal + tax + shipping).saturating_sub(discount)
}

/// Recompute the full totals block for a cart.
///
/// Returns the totals plus whether the promo terms (if any) are currently
/// satisfied, so the store can flag a stale promo without dropping it.
#[must_use]
pub fn compute(
    items: &[LineItem],
    promo: Option<&PromoTerms>,
    quote: Option<Money>,
    params: &PricingParams,
) -> (Totals, bool) {
    let subtotal = subtotal(items);
    let tax = tax(subtotal, params.tax_rate);
    let shipping = shipping(subtotal, quote, params).amount();
    let outcome = discount(subtotal, promo);
    let total = total(subtotal, tax, shipping, outcome.amount);

    (
        Totals {
            subtotal,
            tax,
            shipping,
            discount: outcome.amount,
            total,
        },
        outcome.min_purchase_met,
    )
}
