//! Catalog domain types.

use daily_fresh_core::{GoodsId, Price, SkuId};

/// A purchasable stock unit (a size or variant of a product).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sku {
    /// Unique SKU ID.
    pub id: SkuId,
    /// Product group this SKU belongs to.
    pub goods_id: GoodsId,
    /// Display name.
    pub name: String,
    /// Selling unit (e.g. "500g", "box").
    pub unit: String,
    /// Current unit price.
    pub price: Price,
    /// Units available for sale. Never negative.
    pub stock: u32,
    /// Units sold to date.
    pub sales: u32,
}

impl Sku {
    /// Whether `quantity` units can be taken from current stock.
    #[must_use]
    pub const fn can_fulfil(&self, quantity: u32) -> bool {
        quantity <= self.stock
    }
}
