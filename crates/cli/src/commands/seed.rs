//! Seed the catalog with SKUs for local testing.
//!
//! # Usage
//!
//! ```bash
//! df-cli seed sku --name "Strawberries 500g" --goods-id 1 --unit box --price 12.50 --stock 40
//! ```

use rust_decimal::Decimal;
use tracing::info;

use daily_fresh_core::{GoodsId, Price};
use daily_fresh_storefront::db::{CatalogRepository, create_pool};

use super::{CommandError, database_url};

/// A SKU to insert.
#[derive(Debug, Clone)]
pub struct NewSku {
    pub name: String,
    pub goods_id: i32,
    pub unit: String,
    pub price: String,
    pub stock: u32,
}

/// Parse a price argument such as `12.50`.
///
/// # Errors
///
/// Returns `CommandError::InvalidArgument` for malformed or negative amounts.
pub fn parse_price(raw: &str) -> Result<Price, CommandError> {
    raw.trim()
        .parse::<Decimal>()
        .ok()
        .and_then(Price::new)
        .ok_or_else(|| CommandError::InvalidArgument(format!("invalid price: {raw}")))
}

/// Insert one SKU.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the insert fails.
pub async fn sku(new: &NewSku) -> Result<(), CommandError> {
    let price = parse_price(&new.price)?;
    if new.name.trim().is_empty() {
        return Err(CommandError::InvalidArgument("name must not be empty".to_string()));
    }

    let pool = create_pool(&database_url()?).await?;
    let repo = CatalogRepository::new(pool);
    let sku = repo
        .insert(
            GoodsId::new(new.goods_id),
            new.name.trim(),
            new.unit.trim(),
            price,
            new.stock,
        )
        .await?;

    info!(sku_id = %sku.id, name = %sku.name, price = %sku.price, stock = sku.stock, "SKU created");
    Ok(())
}
