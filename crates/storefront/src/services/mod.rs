//! Business logic services for storefront.
//!
//! # Services
//!
//! - `cart` - Cart add/update/delete and cart views
//! - `checkout` - Order commit engine and stock reservation strategies
//! - `payment` - Gateway payments and the reconciliation loop
//! - `review` - Post-delivery reviews

pub mod cart;
pub mod checkout;
pub mod payment;
pub mod review;

pub use cart::{CartError, CartItem, CartService};
pub use checkout::{CheckoutService, CommitError, CommitForm, OrderReceipt, StockStrategy};
pub use payment::{PaymentError, PaymentService};
pub use review::{ReviewError, ReviewService};
