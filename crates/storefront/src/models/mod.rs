//! Domain models for storefront.
//!
//! These types represent validated domain objects separate from database row
//! types. Computed presentation fields (subtotals, status names) live in view
//! structs in the route layer, never on these types.

pub mod address;
pub mod catalog;
pub mod order;
pub mod session;

pub use address::Address;
pub use catalog::Sku;
pub use order::{CartLine, Order, OrderLine};
pub use session::{CurrentUser, keys as session_keys};
