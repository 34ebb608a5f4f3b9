//! Order route handlers: placement preview, commit and payment.

use axum::{Form, Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use daily_fresh_core::{OrderNumber, Price};

use super::ApiResponse;
use super::cart::CartLineView;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::{OptionalAuth, RequireAuth};
use crate::models::Address;
use crate::services::PaymentError;
use crate::services::checkout::{CommitForm, parse_sku_ids};
use crate::services::payment::{ReconcileError, ReconcileOutcome};
use crate::state::AppState;

/// Form for the placement preview.
#[derive(Debug, Deserialize)]
pub struct PlaceForm {
    /// SKU ids separated by commas or whitespace.
    pub sku_ids: Option<String>,
}

/// Form naming one order.
#[derive(Debug, Deserialize)]
pub struct OrderForm {
    pub order_id: Option<String>,
}

/// Delivery address choice on the placement page.
#[derive(Debug, Clone, Serialize)]
pub struct AddressView {
    pub id: i32,
    pub receiver: String,
    pub addr: String,
    pub phone: String,
    pub is_default: bool,
}

impl From<&Address> for AddressView {
    fn from(address: &Address) -> Self {
        Self {
            id: address.id.as_i32(),
            receiver: address.receiver.clone(),
            addr: address.addr.clone(),
            phone: address.phone.clone(),
            is_default: address.is_default,
        }
    }
}

/// Everything the placement page shows before the buyer commits.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceView {
    pub items: Vec<CartLineView>,
    pub total_count: u32,
    pub total_price: String,
    pub transit_price: String,
    /// Items plus shipping.
    pub total_pay: String,
    pub addresses: Vec<AddressView>,
    /// Echoed back in the commit form.
    pub sku_ids: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Preview the selected cart lines. Nothing is written.
#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn place(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Form(form): Form<PlaceForm>,
) -> Result<Json<PlaceView>> {
    let sku_ids = form
        .sku_ids
        .as_deref()
        .map(parse_sku_ids)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?
        .ok_or_else(|| AppError::BadRequest("no products selected".to_string()))?;

    let items = state.cart().selection(user.id, &sku_ids).await?;
    let addresses = state.addresses().list_for_user(user.id).await?;

    let total_count = items.iter().map(|i| i.quantity).sum();
    let total_price: Price = items.iter().map(|i| i.sku.price.times(i.quantity)).sum();
    let transit_price = state.checkout().transit_price();

    Ok(Json(PlaceView {
        items: items.iter().map(CartLineView::from).collect(),
        total_count,
        total_price: total_price.to_string(),
        transit_price: transit_price.to_string(),
        total_pay: (total_price + transit_price).to_string(),
        addresses: addresses.iter().map(AddressView::from).collect(),
        sku_ids: sku_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }))
}

/// Commit the selected cart lines as an order.
///
/// Codes: 0 not logged in, 1 invalid input, 2 invalid payment method,
/// 3 unknown address, 4 unknown SKU, 5 created, 6 insufficient stock,
/// 7 transaction failure.
#[instrument(skip(state, user, form))]
pub async fn commit(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<CommitForm>,
) -> ApiResponse {
    match state.checkout().commit(user.map(|u| u.id), &form).await {
        Ok(receipt) => {
            state.catalog().invalidate(&receipt.sku_ids).await;
            add_breadcrumb(
                "order",
                "Committed order",
                Some(&[("order_id", receipt.order_id.as_str())]),
            );
            ApiResponse::new(5, "Order created").with_order_id(&receipt.order_id)
        }
        Err(e) => ApiResponse::new(e.code(), e.public_message()),
    }
}

/// Create a gateway payment for an unpaid order.
///
/// Codes: 0 not logged in, 1 bad order id, 2 order cannot be paid,
/// 3 created (with `pay_url`), 4 gateway failure.
#[instrument(skip(state, user, form))]
pub async fn pay(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<OrderForm>,
) -> Result<ApiResponse> {
    let Some(user) = user else {
        return Ok(ApiResponse::new(0, "Please log in first"));
    };
    let Some(order_id) = parse_order_id(&form) else {
        return Ok(ApiResponse::new(1, "Invalid order id"));
    };

    match state.payment().start(user.id, &order_id).await {
        Ok(intent) => Ok(ApiResponse::new(3, "Redirecting to payment").with_pay_url(intent.pay_url)),
        Err(PaymentError::OrderNotFound | PaymentError::NotPayable { .. }) => {
            Ok(ApiResponse::new(2, "Order error"))
        }
        Err(PaymentError::Gateway(e)) => {
            warn!(error = %e, "payment creation failed");
            Ok(ApiResponse::new(4, "Payment service unavailable"))
        }
        Err(PaymentError::Repository(e)) => Err(AppError::Database(e)),
        Err(PaymentError::Reconcile(e)) => Err(AppError::Internal(e.to_string())),
    }
}

/// Wait for the gateway to settle an order's payment.
///
/// Codes: 0 not logged in, 1 bad order id, 2 order error, 3 paid,
/// 4 payment failed or not confirmed in time.
#[instrument(skip(state, user, form))]
pub async fn check(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<OrderForm>,
) -> Result<ApiResponse> {
    let Some(user) = user else {
        return Ok(ApiResponse::new(0, "Please log in first"));
    };
    let Some(order_id) = parse_order_id(&form) else {
        return Ok(ApiResponse::new(1, "Invalid order id"));
    };

    // Dropping the request future also stops the poll.
    let cancel = state.shutdown_token().child_token();
    match state.payment().check(user.id, &order_id, &cancel).await {
        Ok(ReconcileOutcome::Settled { .. } | ReconcileOutcome::AlreadySettled) => {
            Ok(ApiResponse::new(3, "Payment successful"))
        }
        Err(PaymentError::OrderNotFound | PaymentError::NotPayable { .. }) => {
            Ok(ApiResponse::new(2, "Order error"))
        }
        Err(PaymentError::Reconcile(ReconcileError::Repository(e)) | PaymentError::Repository(e)) => {
            Err(AppError::Database(e))
        }
        Err(PaymentError::Reconcile(ReconcileError::Cancelled)) => {
            Ok(ApiResponse::new(4, "Payment check interrupted"))
        }
        Err(PaymentError::Reconcile(ReconcileError::TimedOut(_))) => {
            Ok(ApiResponse::new(4, "Payment not confirmed yet"))
        }
        Err(PaymentError::Reconcile(_) | PaymentError::Gateway(_)) => {
            Ok(ApiResponse::new(4, "Payment failed"))
        }
    }
}

fn parse_order_id(form: &OrderForm) -> Option<OrderNumber> {
    form.order_id
        .as_deref()
        .and_then(|id| OrderNumber::parse(id.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_id() {
        let form = |id: Option<&str>| OrderForm {
            order_id: id.map(str::to_owned),
        };
        assert!(parse_order_id(&form(None)).is_none());
        assert!(parse_order_id(&form(Some("abc"))).is_none());
        assert_eq!(
            parse_order_id(&form(Some(" 2026010112000042 ")))
                .as_ref()
                .map(OrderNumber::as_str),
            Some("2026010112000042")
        );
    }
}
