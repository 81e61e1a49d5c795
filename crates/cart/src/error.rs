//! Error taxonomy for the cart engine.
//!
//! Validation failures (`InvalidQuantity`, `InvalidProduct`, `ItemNotFound`,
//! `InsufficientStock`) are expected user-input conditions: they are returned
//! synchronously to the caller and never logged as system errors. Network
//! failures degrade to documented fallbacks (flat shipping, advisory promo
//! rejection) and surface as non-blocking warnings. Every rejected mutation
//! leaves prior state intact and carries enough structure (kind + relevant
//! numbers) for the UI to render a precise message.

use thiserror::Error;

use sartoria_core::{LineItemId, Money, PromoCodeError};

use crate::validate::{MAX_QUANTITY, MIN_QUANTITY};

/// Errors returned by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Requested quantity is outside the allowed bounds.
    #[error("quantity must be between {MIN_QUANTITY} and {MAX_QUANTITY} (requested {requested})")]
    InvalidQuantity {
        /// Quantity the caller asked for.
        requested: u32,
    },

    /// Requested quantity exceeds the last-known stock for the product.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Quantity the caller asked for.
        requested: u32,
        /// Last-known purchasable quantity.
        available: u32,
    },

    /// Product descriptor is not addable (missing id, negative price).
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    /// No line item with the given id exists in the cart.
    #[error("line item not found: {0}")]
    ItemNotFound(LineItemId),

    /// Promo code was rejected.
    #[error(transparent)]
    Promo(#[from] PromoError),

    /// Remote backend call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Reasons a promo code application can fail.
///
/// The remote backend is the only source of truth for promo validity; the
/// `Format` variant is the advisory fast-fail local check.
#[derive(Debug, Error)]
pub enum PromoError {
    /// Code failed the local format check.
    #[error("invalid promo code: {0}")]
    Format(#[from] PromoCodeError),

    /// Backend does not recognize the code.
    #[error("promo code {0} is not valid")]
    InvalidCode(String),

    /// The code exists but has expired.
    #[error("promo code has expired")]
    Expired,

    /// Cart subtotal is below the code's minimum purchase.
    #[error("minimum purchase of {required} not met (subtotal {subtotal})")]
    MinPurchaseNotMet {
        /// Minimum subtotal required by the promo terms.
        required: Money,
        /// Current cart subtotal.
        subtotal: Money,
    },

    /// Validation could not be completed because the backend was unreachable.
    #[error("promo validation unavailable: {0}")]
    Network(#[source] RemoteError),
}

/// Errors from the remote order/catalog backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Rate limited by the backend.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// An endpoint URL could not be built from the configured base.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RemoteError {
    /// Whether a retry could plausibly succeed (used by the push loop).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }
}

/// Errors from the local persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Stored record exists but is unusable.
    #[error("corrupt cart record: {0}")]
    Corrupt(String),
}
