//! `PostgreSQL` inventory ledger.
//!
//! Each [`PgLedgerTransaction`] owns one database transaction at the default
//! `READ COMMITTED` isolation. Row locks come from `SELECT ... FOR UPDATE`;
//! conditional writes rely on `UPDATE ... WHERE stock = $expected`, which
//! re-evaluates its predicate after waiting on a concurrent writer.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use daily_fresh_core::{OrderNumber, Price, SkuId};

use super::{RepositoryError, to_count, to_db_count};
use crate::models::OrderLine;
use crate::store::{InventoryLedger, LedgerTransaction, NewOrder, StockLevel};

#[derive(Debug, sqlx::FromRow)]
struct StockRow {
    id: i32,
    price: Price,
    stock: i32,
    sales: i32,
}

impl TryFrom<StockRow> for StockLevel {
    type Error = RepositoryError;

    fn try_from(row: StockRow) -> Result<Self, Self::Error> {
        Ok(Self {
            sku_id: SkuId::new(row.id),
            price: row.price,
            stock: to_count(row.stock, "stock")?,
            sales: to_count(row.sales, "sales")?,
        })
    }
}

/// Opens ledger transactions on a connection pool.
#[derive(Clone)]
pub struct PgInventoryLedger {
    pool: PgPool,
}

impl PgInventoryLedger {
    /// Create a ledger over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }
}

/// A ledger transaction backed by a database transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    #[instrument(skip(self), fields(sku_id = %id))]
    async fn lock_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError> {
        let row = sqlx::query_as::<_, StockRow>(
            r"
            SELECT id, price, stock, sales
            FROM storefront.sku
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn read_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError> {
        let row = sqlx::query_as::<_, StockRow>(
            r"
            SELECT id, price, stock, sales
            FROM storefront.sku
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn write_stock(
        &mut self,
        id: SkuId,
        stock: u32,
        sales: u32,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.sku
            SET stock = $2, sales = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(to_db_count(stock)?)
        .bind(to_db_count(sales)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn write_stock_if(
        &mut self,
        id: SkuId,
        expected_stock: u32,
        stock: u32,
        sales: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.sku
            SET stock = $3, sales = $4
            WHERE id = $1 AND stock = $2
            ",
        )
        .bind(id)
        .bind(to_db_count(expected_stock)?)
        .bind(to_db_count(stock)?)
        .bind(to_db_count(sales)?)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.order_info
                (order_id, user_id, address_id, pay_method, order_status,
                 total_count, total_price, transit_price, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, 0, $6, $7)
            ",
        )
        .bind(&order.order_id)
        .bind(order.user_id)
        .bind(order.address_id)
        .bind(order.pay_method)
        .bind(daily_fresh_core::OrderStatus::Unpaid)
        .bind(order.transit_price)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!(
                    "order {} already exists",
                    order.order_id
                ));
            }
            RepositoryError::Database(e)
        })?;

        Ok(())
    }

    async fn insert_line(&mut self, line: &OrderLine) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.order_line (order_id, sku_id, quantity, unit_price, comment)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&line.order_id)
        .bind(line.sku_id)
        .bind(to_db_count(line.quantity)?)
        .bind(line.unit_price)
        .bind(&line.comment)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!(
                    "sku {} already on order {}",
                    line.sku_id, line.order_id
                ));
            }
            RepositoryError::Database(e)
        })?;

        Ok(())
    }

    async fn set_totals(
        &mut self,
        order_id: &OrderNumber,
        total_count: u32,
        total_price: Price,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.order_info
            SET total_count = $2, total_price = $3
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .bind(to_db_count(total_count)?)
        .bind(total_price)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
