//! Cart route handlers.
//!
//! The mutating endpoints answer with an [`ApiResponse`] code:
//!
//! | endpoint | 0 | 1 | 2 | 3 | 4 | 5 |
//! |----------|---|---|---|---|---|---|
//! | add, update | not logged in | incomplete | bad count | no SKU | short stock | ok |
//! | delete | not logged in | bad id | no SKU | ok | | |

use axum::{Form, Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use daily_fresh_core::{Price, SkuId};

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::middleware::{OptionalAuth, RequireAuth};
use crate::services::{CartError, CartItem};
use crate::state::AppState;

/// Form for add and update.
#[derive(Debug, Deserialize)]
pub struct CartForm {
    pub sku_id: Option<String>,
    pub count: Option<String>,
}

/// Form for delete.
#[derive(Debug, Deserialize)]
pub struct CartDeleteForm {
    pub sku_id: Option<String>,
}

/// One cart line as shown to the buyer.
#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub sku_id: SkuId,
    pub name: String,
    pub unit: String,
    pub price: String,
    pub quantity: u32,
    pub amount: String,
}

/// The whole cart as shown to the buyer.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub total_count: u32,
    pub total_price: String,
}

impl From<&CartItem> for CartLineView {
    fn from(item: &CartItem) -> Self {
        Self {
            sku_id: item.sku.id,
            name: item.sku.name.clone(),
            unit: item.sku.unit.clone(),
            price: item.sku.price.to_string(),
            quantity: item.quantity,
            amount: item.sku.price.times(item.quantity).to_string(),
        }
    }
}

impl CartView {
    /// Build the view from joined cart lines.
    #[must_use]
    pub fn from_items(items: &[CartItem]) -> Self {
        let total_count = items.iter().map(|i| i.quantity).sum();
        let total_price: Price = items.iter().map(|i| i.sku.price.times(i.quantity)).sum();
        Self {
            items: items.iter().map(CartLineView::from).collect(),
            total_count,
            total_price: total_price.to_string(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Display the cart.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<CartView>> {
    let items = state.cart().contents(user.id).await?;
    Ok(Json(CartView::from_items(&items)))
}

/// Add units of a SKU to the cart.
#[instrument(skip(state, user, form))]
pub async fn add(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<CartForm>,
) -> Result<ApiResponse> {
    let Some(user) = user else {
        return Ok(ApiResponse::new(0, "Please log in first"));
    };
    let (sku_id, count) = match parse_form(&form) {
        Ok(parsed) => parsed,
        Err(response) => return Ok(response),
    };

    match state.cart().add(user.id, sku_id, count).await {
        Ok(lines) => Ok(ApiResponse::new(5, "Added to cart").with_total_count(lines)),
        Err(e) => quantity_error(e),
    }
}

/// Set the quantity of a SKU in the cart.
#[instrument(skip(state, user, form))]
pub async fn update(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<CartForm>,
) -> Result<ApiResponse> {
    let Some(user) = user else {
        return Ok(ApiResponse::new(0, "Please log in first"));
    };
    let (sku_id, count) = match parse_form(&form) {
        Ok(parsed) => parsed,
        Err(response) => return Ok(response),
    };

    match state.cart().update(user.id, sku_id, count).await {
        Ok(units) => Ok(ApiResponse::new(5, "Cart updated").with_total_count(units)),
        Err(e) => quantity_error(e),
    }
}

/// Remove a SKU from the cart.
#[instrument(skip(state, user, form))]
pub async fn delete(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<CartDeleteForm>,
) -> Result<ApiResponse> {
    let Some(user) = user else {
        return Ok(ApiResponse::new(0, "Please log in first"));
    };
    let Some(sku_id) = form.sku_id.as_deref().and_then(|s| s.parse::<SkuId>().ok()) else {
        return Ok(ApiResponse::new(1, "Invalid product id"));
    };

    match state.cart().delete(user.id, sku_id).await {
        Ok(units) => Ok(ApiResponse::new(3, "Removed from cart").with_total_count(units)),
        Err(CartError::SkuNotFound(_)) => Ok(ApiResponse::new(2, "Product not found")),
        Err(e) => Err(AppError::from(e)),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_form(form: &CartForm) -> std::result::Result<(SkuId, u32), ApiResponse> {
    let (Some(sku_id), Some(count)) = (form.sku_id.as_deref(), form.count.as_deref()) else {
        return Err(ApiResponse::new(1, "Incomplete data"));
    };
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|_| ApiResponse::new(2, "Invalid quantity"))?;
    // An id that does not parse cannot name a SKU.
    let sku_id = sku_id
        .parse::<SkuId>()
        .map_err(|_| ApiResponse::new(3, "Product not found"))?;
    Ok((sku_id, count))
}

fn quantity_error(err: CartError) -> Result<ApiResponse> {
    match err {
        CartError::InvalidCount => Ok(ApiResponse::new(2, "Invalid quantity")),
        CartError::SkuNotFound(_) => Ok(ApiResponse::new(3, "Product not found")),
        CartError::InsufficientStock { .. } => Ok(ApiResponse::new(4, "Insufficient stock")),
        CartError::Repository(e) => Err(AppError::Database(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(sku_id: Option<&str>, count: Option<&str>) -> CartForm {
        CartForm {
            sku_id: sku_id.map(str::to_owned),
            count: count.map(str::to_owned),
        }
    }

    fn code(result: std::result::Result<(SkuId, u32), ApiResponse>) -> Option<u8> {
        result.err().map(|r| r.res)
    }

    #[test]
    fn test_form_codes() {
        assert_eq!(code(parse_form(&form(None, Some("1")))), Some(1));
        assert_eq!(code(parse_form(&form(Some("1"), None))), Some(1));
        assert_eq!(code(parse_form(&form(Some("1"), Some("-2")))), Some(2));
        assert_eq!(code(parse_form(&form(Some("1"), Some("two")))), Some(2));
        assert_eq!(code(parse_form(&form(Some("x"), Some("2")))), Some(3));
        assert_eq!(
            parse_form(&form(Some("7"), Some(" 2 "))).ok(),
            Some((SkuId::new(7), 2))
        );
    }
}
