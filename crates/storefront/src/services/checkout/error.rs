//! Checkout error types.

use thiserror::Error;

use daily_fresh_core::{OrderNumber, SkuId};

use crate::db::RepositoryError;

/// Errors from a stock reservation step.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The SKU row does not exist.
    #[error("sku {0} not found")]
    SkuNotFound(SkuId),

    /// Not enough stock for the requested quantity.
    #[error("insufficient stock for sku {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: SkuId,
        requested: u32,
        available: u32,
    },

    /// The row kept changing under an optimistic update.
    #[error("sku {sku_id} changed concurrently on {attempts} attempts")]
    Contention { sku_id: SkuId, attempts: u32 },

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Errors from committing an order.
///
/// Each variant maps to a stable result code returned to clients; see
/// [`CommitError::code`].
#[derive(Debug, Error)]
pub enum CommitError {
    /// No user in the session.
    #[error("not logged in")]
    Unauthenticated,

    /// A required field is missing or malformed, or a SKU is not in the cart.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The payment method code is not recognised.
    #[error("invalid payment method")]
    InvalidPaymentMethod,

    /// The address does not exist or belongs to someone else.
    #[error("address not found")]
    AddressNotFound,

    /// A SKU does not exist.
    #[error("sku {0} not found")]
    SkuNotFound(SkuId),

    /// A SKU has less stock than the cart quantity.
    #[error("insufficient stock for sku {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: SkuId,
        requested: u32,
        available: u32,
    },

    /// The generated order number already exists.
    #[error("order {0} already exists")]
    DuplicateOrder(OrderNumber),

    /// Optimistic retries were exhausted.
    #[error("sku {sku_id} changed concurrently on {attempts} attempts")]
    Contention { sku_id: SkuId, attempts: u32 },

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CommitError {
    /// Result code for the commit endpoint.
    ///
    /// `5` is reserved for success.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Unauthenticated => 0,
            Self::InvalidInput(_) => 1,
            Self::InvalidPaymentMethod => 2,
            Self::AddressNotFound => 3,
            Self::SkuNotFound(_) => 4,
            Self::InsufficientStock { .. } => 6,
            Self::DuplicateOrder(_) | Self::Contention { .. } | Self::Repository(_) => 7,
        }
    }

    /// Whether this is a transaction failure rather than a client error.
    #[must_use]
    pub const fn is_transaction_failure(&self) -> bool {
        self.code() == 7
    }

    /// Short message safe to show to the buyer.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Please log in first",
            Self::InvalidInput(_) => "Incomplete order data",
            Self::InvalidPaymentMethod => "Invalid payment method",
            Self::AddressNotFound => "Invalid address",
            Self::SkuNotFound(_) => "Product not found",
            Self::InsufficientStock { .. } => "Insufficient stock",
            Self::DuplicateOrder(_) | Self::Contention { .. } | Self::Repository(_) => {
                "Failed to place order"
            }
        }
    }
}

impl From<LedgerError> for CommitError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::SkuNotFound(sku_id) => Self::SkuNotFound(sku_id),
            LedgerError::InsufficientStock {
                sku_id,
                requested,
                available,
            } => Self::InsufficientStock {
                sku_id,
                requested,
                available,
            },
            LedgerError::Contention { sku_id, attempts } => Self::Contention { sku_id, attempts },
            LedgerError::Repository(e) => Self::Repository(e),
        }
    }
}
