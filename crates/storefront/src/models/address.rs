//! Shipping address domain type.

use daily_fresh_core::{AddressId, UserId};

/// A user's shipping address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Unique address ID.
    pub id: AddressId,
    /// Owning user.
    pub user_id: UserId,
    /// Name of the person receiving the delivery.
    pub receiver: String,
    /// Full street address.
    pub addr: String,
    /// Postal code.
    pub zip_code: Option<String>,
    /// Contact phone number.
    pub phone: String,
    /// Whether this is the user's default address.
    pub is_default: bool,
}
