//! Order review handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::instrument;

use daily_fresh_core::{OrderNumber, OrderStatus, SkuId};

use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::models::{Order, OrderLine, Sku};
use crate::services::review::ReviewEntry;
use crate::state::AppState;
use crate::store::Catalog;

/// One order line on the review page.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLineView {
    pub sku_id: SkuId,
    /// Empty if the SKU has since left the catalog.
    pub name: String,
    pub quantity: u32,
    pub unit_price: String,
    pub amount: String,
    pub comment: Option<String>,
}

/// An order as shown on the review page.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order_id: String,
    pub status: OrderStatus,
    pub status_name: &'static str,
    pub pay_method: &'static str,
    pub created_at: String,
    pub total_count: u32,
    pub total_price: String,
    pub transit_price: String,
    pub lines: Vec<OrderLineView>,
}

impl OrderView {
    fn new(order: &Order, lines: &[OrderLine], skus: &[Sku]) -> Self {
        Self {
            order_id: order.order_id.to_string(),
            status: order.status,
            status_name: order.status.name(),
            pay_method: order.pay_method.label(),
            created_at: order.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            total_count: order.total_count,
            total_price: order.total_price.to_string(),
            transit_price: order.transit_price.to_string(),
            lines: lines
                .iter()
                .map(|line| OrderLineView {
                    sku_id: line.sku_id,
                    name: skus
                        .iter()
                        .find(|s| s.id == line.sku_id)
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                    quantity: line.quantity,
                    unit_price: line.unit_price.to_string(),
                    amount: line.amount().to_string(),
                    comment: line.comment.clone(),
                })
                .collect(),
        }
    }
}

fn parse_order_id(raw: &str) -> Result<OrderNumber> {
    OrderNumber::parse(raw).map_err(|_| AppError::NotFound("order".to_string()))
}

/// Show an order with its lines for reviewing.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>> {
    let order_id = parse_order_id(&order_id)?;
    let (order, lines) = state.reviews().order_with_lines(user.id, &order_id).await?;
    let sku_ids: Vec<SkuId> = lines.iter().map(|l| l.sku_id).collect();
    let skus = state.catalog().skus(&sku_ids).await?;
    Ok(Json(OrderView::new(&order, &lines, &skus)))
}

/// Submit one review per order line and complete the order.
#[instrument(skip(state, user, entries), fields(user_id = %user.id))]
pub async fn submit(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(order_id): Path<String>,
    Json(entries): Json<Vec<ReviewEntry>>,
) -> Result<StatusCode> {
    let order_id = parse_order_id(&order_id)?;
    state.reviews().submit(user.id, &order_id, &entries).await?;
    Ok(StatusCode::NO_CONTENT)
}
