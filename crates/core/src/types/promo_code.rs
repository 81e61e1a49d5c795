//! Promotional code type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`PromoCode`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum PromoCodeError {
    /// The input string is empty.
    #[error("promo code cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("promo code must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character outside `[A-Za-z0-9_-]`.
    #[error("promo code contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// A promotional code.
///
/// This type only enforces the code *format*; whether a code is actually
/// redeemable (terms, expiry, thresholds) is decided server-side. Codes are
/// normalized to uppercase so `welcome10` and `WELCOME10` compare equal.
///
/// ## Constraints
///
/// - Length: 1-24 characters
/// - Characters: ASCII letters, digits, `-`, `_`
///
/// ## Examples
///
/// ```
/// use sartoria_core::PromoCode;
///
/// // Valid codes
/// assert!(PromoCode::parse("WELCOME10").is_ok());
/// assert!(PromoCode::parse("spring-sale_24").is_ok());
///
/// // Invalid codes
/// assert!(PromoCode::parse("").is_err());          // empty
/// assert!(PromoCode::parse("10% OFF").is_err());   // invalid characters
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PromoCode(String);

impl PromoCode {
    /// Maximum length of a promo code.
    pub const MAX_LENGTH: usize = 24;

    /// Parse a `PromoCode` from a string, normalizing to uppercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the input:
    /// - Is empty
    /// - Is longer than 24 characters
    /// - Contains a character outside `[A-Za-z0-9_-]`
    pub fn parse(s: &str) -> Result<Self, PromoCodeError> {
        if s.is_empty() {
            return Err(PromoCodeError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(PromoCodeError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(PromoCodeError::InvalidCharacter(c));
        }

        Ok(Self(s.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `PromoCode` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PromoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PromoCode {
    type Err = PromoCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PromoCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
