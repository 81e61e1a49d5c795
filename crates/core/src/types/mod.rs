//! Shared type definitions.

mod id;
mod money;
mod promo_code;

pub use id::*;
pub use money::*;
pub use promo_code::*;
