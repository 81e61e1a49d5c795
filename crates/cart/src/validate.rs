//! Validation rules for cart mutations.
//!
//! Pure, side-effect-free functions. The store decides policy (clamp vs
//! reject); these functions just report what is allowed and why.

use crate::error::CartError;
use crate::types::{LineItem, ProductRef};

/// Minimum quantity for a line item.
pub const MIN_QUANTITY: u32 = 1;
/// Maximum quantity for a line item.
pub const MAX_QUANTITY: u32 = 99;

/// Check that a quantity is within `[1, 99]`.
///
/// # Errors
///
/// Returns [`CartError::InvalidQuantity`] otherwise.
pub const fn validate_quantity(quantity: u32) -> Result<(), CartError> {
    if quantity >= MIN_QUANTITY && quantity <= MAX_QUANTITY {
        Ok(())
    } else {
        Err(CartError::InvalidQuantity {
            requested: quantity,
        })
    }
}

/// Check a requested quantity against the last-known stock.
///
/// A stock count of zero or less means the product is untracked and any
/// quantity passes. The authoritative check happens server-side at order
/// submission; this is the advisory client-side gate.
///
/// # Errors
///
/// Returns [`CartError::InsufficientStock`] carrying the available count.
pub fn validate_stock(requested: u32, stock_available: i32) -> Result<(), CartError> {
    if stock_available <= 0 {
        return Ok(());
    }
    let available = u32::try_from(stock_available).unwrap_or(0);
    if requested <= available {
        Ok(())
    } else {
        Err(CartError::InsufficientStock {
            requested,
            available,
        })
    }
}

/// Check that a product descriptor is addable.
///
/// # Errors
///
/// Returns [`CartError::InvalidProduct`] if the id is unresolvable or the
/// price is negative.
pub fn validate_product(product: &ProductRef) -> Result<(), CartError> {
    if product.id.is_empty() {
        return Err(CartError::InvalidProduct(
            "product has no resolvable id".to_owned(),
        ));
    }
    if product.price.is_negative() {
        return Err(CartError::InvalidProduct(format!(
            "product {} has a negative price",
            product.id
        )));
    }
    Ok(())
}

/// Maximum purchasable quantity given a stock count.
#[must_use]
pub fn quantity_ceiling(stock_available: i32) -> u32 {
    if stock_available <= 0 {
        MAX_QUANTITY
    } else {
        u32::try_from(stock_available)
            .unwrap_or(MAX_QUANTITY)
            .min(MAX_QUANTITY)
    }
}

/// Outcome of checking a quantity increase against bounds and stock.
#[derive(Debug)]
pub enum QuantityCheck {
    /// The full increase is allowed.
    Allowed {
        /// Quantity the item would hold after the increase.
        new_quantity: u32,
    },
    /// The increase exceeds a limit; the engine reports the ceiling and the
    /// precise reason, the caller chooses clamp or hard failure.
    Limited {
        /// Maximum allowed quantity for this item.
        ceiling: u32,
        /// Why the full increase is not allowed.
        reason: CartError,
    },
}

/// Combine quantity and stock validation for an increment operation.
#[must_use]
pub fn can_increase_quantity(item: &LineItem, delta: u32) -> QuantityCheck {
    let requested = item.quantity.saturating_add(delta);
    let ceiling = quantity_ceiling(item.stock_available);

    if requested > MAX_QUANTITY {
        return QuantityCheck::Limited {
            ceiling,
            reason: CartError::InvalidQuantity { requested },
        };
    }
    if let Err(reason) = validate_stock(requested, item.stock_available) {
        return QuantityCheck::Limited { ceiling, reason };
    }
    QuantityCheck::Allowed {
        new_quantity: requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Customizations;
    use sartoria_core::{LineItemId, Money, ProductId};

    fn item(quantity: u32, stock_available: i32) -> LineItem {
        LineItem {
            id: LineItemId::generate(),
            product_id: ProductId::new("p1"),
            quantity,
            price_at_add: Money::from_minor_units(1000),
            stock_available,
            customizations: Customizations::none(),
            is_custom: false,
            custom_details: None,
        }
    }

    #[test]
    fn test_validate_quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(99).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(CartError::InvalidQuantity { requested: 0 })
        ));
        assert!(matches!(
            validate_quantity(100),
            Err(CartError::InvalidQuantity { requested: 100 })
        ));
    }

    #[test]
    fn test_validate_stock_untracked_passes() {
        assert!(validate_stock(50, 0).is_ok());
        assert!(validate_stock(99, -1).is_ok());
    }

    #[test]
    fn test_validate_stock_carries_available_count() {
        assert!(validate_stock(3, 3).is_ok());
        assert!(matches!(
            validate_stock(5, 3),
            Err(CartError::InsufficientStock {
                requested: 5,
                available: 3
            })
        ));
    }

    #[test]
    fn test_validate_product() {
        let good = ProductRef {
            id: ProductId::new("p1"),
            price: Money::from_minor_units(1000),
            stock_available: 5,
            is_custom: false,
        };
        assert!(validate_product(&good).is_ok());

        let no_id = ProductRef {
            id: ProductId::new(""),
            ..good.clone()
        };
        assert!(matches!(
            validate_product(&no_id),
            Err(CartError::InvalidProduct(_))
        ));

        let negative = ProductRef {
            price: Money::from_minor_units(-1),
            ..good
        };
        assert!(matches!(
            validate_product(&negative),
            Err(CartError::InvalidProduct(_))
        ));
    }

    #[test]
    fn test_quantity_ceiling() {
        assert_eq!(quantity_ceiling(0), MAX_QUANTITY);
        assert_eq!(quantity_ceiling(-3), MAX_QUANTITY);
        assert_eq!(quantity_ceiling(5), 5);
        assert_eq!(quantity_ceiling(500), MAX_QUANTITY);
    }

    #[test]
    fn test_can_increase_within_stock() {
        let check = can_increase_quantity(&item(2, 10), 3);
        assert!(matches!(check, QuantityCheck::Allowed { new_quantity: 5 }));
    }

    #[test]
    fn test_can_increase_reports_stock_ceiling() {
        let check = can_increase_quantity(&item(2, 3), 4);
        match check {
            QuantityCheck::Limited { ceiling, reason } => {
                assert_eq!(ceiling, 3);
                assert!(matches!(
                    reason,
                    CartError::InsufficientStock {
                        requested: 6,
                        available: 3
                    }
                ));
            }
            QuantityCheck::Allowed { .. } => panic!("expected limit"),
        }
    }

    #[test]
    fn test_can_increase_reports_bound_ceiling() {
        let check = can_increase_quantity(&item(98, 0), 5);
        match check {
            QuantityCheck::Limited { ceiling, reason } => {
                assert_eq!(ceiling, MAX_QUANTITY);
                assert!(matches!(reason, CartError::InvalidQuantity { .. }));
            }
            QuantityCheck::Allowed { .. } => panic!("expected limit"),
        }
    }
}
