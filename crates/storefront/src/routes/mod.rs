//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                     - Liveness check
//! GET  /health/ready               - Readiness check (database)
//!
//! # Cart
//! GET  /cart                       - Cart view (requires auth)
//! POST /cart/add                   - Add units of a SKU
//! POST /cart/update                - Set the quantity of a SKU
//! POST /cart/delete                - Remove a SKU
//!
//! # Orders
//! POST /order/place                - Preview of the selected cart lines (requires auth)
//! POST /order/commit               - Commit the selected cart lines as an order
//! POST /order/pay                  - Create a gateway payment
//! POST /order/check                - Wait for the gateway to settle a payment
//! GET  /order/comment/{order_id}   - Order view for reviewing (requires auth)
//! POST /order/comment/{order_id}   - Submit reviews (requires auth)
//! ```
//!
//! The cart and order `POST` endpoints answer `200` with an [`ApiResponse`]
//! for every client-facing outcome, carried in its `res` code. Only server
//! failures become an [`AppError`](crate::error::AppError).

pub mod cart;
pub mod comment;
pub mod health;
pub mod order;

use axum::{
    Json, Router,
    body::Body,
    http::Request,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tower_sessions::SessionStore;

use crate::middleware::{create_session_layer, request_id_middleware};
use crate::state::AppState;

/// JSON body of the cart and order endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Endpoint-specific result code.
    pub res: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_url: Option<String>,
}

impl ApiResponse {
    /// A response with a code and a message.
    #[must_use]
    pub fn new(res: u8, errmsg: impl Into<String>) -> Self {
        Self {
            res,
            errmsg: Some(errmsg.into()),
            total_count: None,
            order_id: None,
            pay_url: None,
        }
    }

    #[must_use]
    pub const fn with_total_count(mut self, total_count: u32) -> Self {
        self.total_count = Some(total_count);
        self
    }

    #[must_use]
    pub fn with_order_id(mut self, order_id: impl ToString) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }

    #[must_use]
    pub fn with_pay_url(mut self, pay_url: String) -> Self {
        self.pay_url = Some(pay_url);
        self
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/delete", post(cart::delete))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/place", post(order::place))
        .route("/commit", post(order::commit))
        .route("/pay", post(order::pay))
        .route("/check", post(order::check))
        .route(
            "/comment/{order_id}",
            get(comment::show).post(comment::submit),
        )
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/cart", cart_routes())
        .nest("/order", order_routes())
}

/// The storefront router with its middleware stack.
///
/// Layers, innermost first: sessions, request id, `TraceLayer`, Sentry.
pub fn router<S>(state: AppState, session_store: S) -> Router
where
    S: SessionStore + Clone,
{
    let session_layer = create_session_layer(session_store, state.config());

    routes()
        .layer(session_layer)
        .with_state(state)
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_omits_empty_fields() {
        let body = serde_json::to_value(ApiResponse::new(0, "Please log in first")).unwrap_or_default();
        assert_eq!(
            body,
            serde_json::json!({"res": 0, "errmsg": "Please log in first"})
        );

        let body = serde_json::to_value(
            ApiResponse::new(3, "ok").with_pay_url("https://pay.example/x".to_string()),
        )
        .unwrap_or_default();
        assert_eq!(body["pay_url"], "https://pay.example/x");
        assert!(body.get("order_id").is_none());
    }
}
