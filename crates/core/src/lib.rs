//! Sartoria Core - Shared types library.
//!
//! This crate provides the common types used across the Sartoria cart
//! engine and its consumers:
//! - `cart` - The cart & pricing engine
//! - `integration-tests` - End-to-end scenario tests
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no
//! storage access. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money, and promo codes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
