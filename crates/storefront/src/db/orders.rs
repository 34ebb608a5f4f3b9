//! Order repository for reads and post-commit status transitions.
//!
//! Orders are created only through [`super::ledger`]; this repository never
//! inserts them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use daily_fresh_core::{
    AddressId, OrderNumber, OrderStatus, PayMethod, Price, SkuId, UserId,
};

use super::{RepositoryError, to_count};
use crate::models::{Order, OrderLine};
use crate::store::OrderStore;

/// Internal row type for database queries.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: OrderNumber,
    user_id: i32,
    address_id: i32,
    pay_method: PayMethod,
    order_status: OrderStatus,
    total_count: i32,
    total_price: Price,
    transit_price: Price,
    trade_no: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            order_id: row.order_id,
            user_id: UserId::new(row.user_id),
            address_id: AddressId::new(row.address_id),
            pay_method: row.pay_method,
            status: row.order_status,
            total_count: to_count(row.total_count, "total_count")?,
            total_price: row.total_price,
            transit_price: row.transit_price,
            trade_no: row.trade_no,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderLineRow {
    order_id: OrderNumber,
    sku_id: i32,
    quantity: i32,
    unit_price: Price,
    comment: Option<String>,
}

impl TryFrom<OrderLineRow> for OrderLine {
    type Error = RepositoryError;

    fn try_from(row: OrderLineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            order_id: row.order_id,
            sku_id: SkuId::new(row.sku_id),
            quantity: to_count(row.quantity, "quantity")?,
            unit_price: row.unit_price,
            comment: row.comment,
        })
    }
}

const ORDER_COLUMNS: &str = "order_id, user_id, address_id, pay_method, order_status, \
     total_count, total_price, transit_price, trade_no, created_at";

/// Repository for order database operations.
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn find(&self, order_id: &OrderNumber) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM storefront.order_info WHERE order_id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_for_user(
        &self,
        user: UserId,
        order_id: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.order_info WHERE order_id = $1 AND user_id = $2"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .bind(user)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn lines(&self, order_id: &OrderNumber) -> Result<Vec<OrderLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderLineRow>(
            r"
            SELECT order_id, sku_id, quantity, unit_price, comment
            FROM storefront.order_line
            WHERE order_id = $1
            ORDER BY sku_id
            ",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_paid(
        &self,
        order_id: &OrderNumber,
        trade_no: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.order_info
            SET order_status = $2, trade_no = $3
            WHERE order_id = $1 AND order_status = ANY($4)
            ",
        )
        .bind(order_id)
        .bind(OrderStatus::AwaitingReview)
        .bind(trade_no)
        .bind(OrderStatus::source_codes(OrderStatus::AwaitingReview))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_review(
        &self,
        order_id: &OrderNumber,
        comments: &[(SkuId, String)],
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r"
            UPDATE storefront.order_info
            SET order_status = $2
            WHERE order_id = $1 AND order_status = ANY($3)
            ",
        )
        .bind(order_id)
        .bind(OrderStatus::Reviewed)
        .bind(OrderStatus::source_codes(OrderStatus::Reviewed))
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (sku_id, comment) in comments {
            let updated = sqlx::query(
                r"
                UPDATE storefront.order_line
                SET comment = $3
                WHERE order_id = $1 AND sku_id = $2
                ",
            )
            .bind(order_id)
            .bind(sku_id)
            .bind(comment)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() != 1 {
                tx.rollback().await?;
                return Err(RepositoryError::NotFound);
            }
        }

        tx.commit().await?;
        Ok(true)
    }
}
