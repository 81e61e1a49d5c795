//! Cart and pricing engine for a custom-tailoring storefront.
//!
//! The engine owns cart state for one browser profile: line items with
//! snapshotted prices and customization payloads, an optionally applied
//! promo, a shipping address with its quote, and totals that are recomputed
//! after every mutation. Local operations are synchronous and atomic;
//! network-backed operations (promo validation, shipping quotes, remote
//! cart sync) are async and degrade to documented fallbacks so the cart is
//! never blocked by a flaky backend.
//!
//! Entry points:
//! - [`CartStore`](store::CartStore) for all cart operations
//! - [`CartSync`](sync::CartSync) for cross-tab and login/logout
//!   reconciliation
//! - [`CartConfig`](config::CartConfig) to wire pricing parameters and the
//!   backend endpoint from the environment

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod persist;
pub mod pricing;
pub mod remote;
pub mod store;
pub mod sync;
pub mod types;
pub mod validate;

pub use config::{CartConfig, ConfigError};
pub use error::{CartError, PromoError, RemoteError, StorageError};
pub use persist::{CartStorage, JsonFileStorage, MemoryStorage, PersistedCart};
pub use pricing::{PricingParams, ShippingCharge};
pub use remote::{HttpBackend, RemoteBackend, SessionToken};
pub use store::{CartStore, ShippingOutcome};
pub use sync::{CartSync, SyncPhase};
pub use types::{
    AddOutcome, Address, AppliedPromo, CartState, Customizations, LineItem, ProductRef, PromoKind,
    PromoTerms, StockNotice, Totals,
};
