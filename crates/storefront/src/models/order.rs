//! Order and cart domain types.

use chrono::{DateTime, Utc};

use daily_fresh_core::{AddressId, OrderNumber, OrderStatus, PayMethod, Price, SkuId, UserId};

/// One line of a user's cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    /// SKU in the cart.
    pub sku_id: SkuId,
    /// Desired quantity (always positive).
    pub quantity: u32,
}

/// A persisted order.
///
/// `total_count` and `total_price` are derived sums written once at commit.
/// `total_price` includes `transit_price`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Unique order number (`<timestamp><user id>`).
    pub order_id: OrderNumber,
    /// Buyer.
    pub user_id: UserId,
    /// Shipping address.
    pub address_id: AddressId,
    /// Payment method chosen at checkout.
    pub pay_method: PayMethod,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Sum of line quantities.
    pub total_count: u32,
    /// Sum of line totals plus shipping.
    pub total_price: Price,
    /// Flat shipping fee.
    pub transit_price: Price,
    /// Payment gateway transaction reference, set once paid.
    pub trade_no: Option<String>,
    /// When the order was committed.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Sum of line totals, excluding shipping.
    #[must_use]
    pub fn goods_price(&self) -> Price {
        Price::new(self.total_price.amount() - self.transit_price.amount()).unwrap_or(Price::ZERO)
    }
}

/// One line of an order, with the price frozen at purchase time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    /// Owning order.
    pub order_id: OrderNumber,
    /// Purchased SKU.
    pub sku_id: SkuId,
    /// Units purchased.
    pub quantity: u32,
    /// Unit price at commit time.
    pub unit_price: Price,
    /// Buyer's review, set after delivery.
    pub comment: Option<String>,
}

impl OrderLine {
    /// Line total at the frozen unit price.
    #[must_use]
    pub fn amount(&self) -> Price {
        daily_fresh_core::line_total(self.unit_price, self.quantity)
    }
}
