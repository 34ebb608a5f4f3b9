//! Order number type.
//!
//! Orders are keyed by a human-readable number rather than a surrogate
//! integer: the local creation time formatted as `YYYYMMDDHHMMSS` followed by
//! the buyer's user id. Uniqueness is enforced by the storage layer (primary
//! key), not by this type.

use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::id::UserId;

/// Length of the timestamp prefix.
const TIMESTAMP_LEN: usize = 14;

/// Maximum accepted length (timestamp + a 10 digit user id).
const MAX_LEN: usize = TIMESTAMP_LEN + 10;

/// Errors that can occur when parsing an [`OrderNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderNumberError {
    /// The input string is empty.
    #[error("order number cannot be empty")]
    Empty,
    /// The input is too short to hold a timestamp and a user id.
    #[error("order number must be at least {min} digits")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
    },
    /// The input is longer than any valid order number.
    #[error("order number must be at most {max} digits")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains something other than ASCII digits.
    #[error("order number must contain only digits")]
    NotNumeric,
}

/// A unique, time-ordered order identifier.
///
/// ## Examples
///
/// ```
/// use chrono::NaiveDate;
/// use daily_fresh_core::{OrderNumber, UserId};
///
/// let at = NaiveDate::from_ymd_opt(2026, 3, 1)
///     .unwrap()
///     .and_hms_opt(9, 5, 7)
///     .unwrap();
/// let number = OrderNumber::generate(at, UserId::new(42));
/// assert_eq!(number.as_str(), "2026030109050742");
///
/// assert!(OrderNumber::parse("2026030109050742").is_ok());
/// assert!(OrderNumber::parse("20260301").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Build the order number for an order placed by `user` at `at`.
    #[must_use]
    pub fn generate(at: NaiveDateTime, user: UserId) -> Self {
        Self(format!("{}{}", at.format("%Y%m%d%H%M%S"), user))
    }

    /// Parse an order number received from a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, not all digits, or has a length
    /// that cannot hold a timestamp followed by a user id.
    pub fn parse(s: &str) -> Result<Self, OrderNumberError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(OrderNumberError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderNumberError::NotNumeric);
        }
        if s.len() <= TIMESTAMP_LEN {
            return Err(OrderNumberError::TooShort {
                min: TIMESTAMP_LEN + 1,
            });
        }
        if s.len() > MAX_LEN {
            return Err(OrderNumberError::TooLong { max: MAX_LEN });
        }
        Ok(Self(s.to_owned()))
    }

    /// Get the order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
