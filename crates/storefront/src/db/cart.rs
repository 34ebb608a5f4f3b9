//! Cart repository.
//!
//! Carts live in an `UNLOGGED` table: they are cheap to write and may be lost
//! on a database crash, which only empties users' carts.

use async_trait::async_trait;
use sqlx::PgPool;

use daily_fresh_core::{SkuId, UserId};

use super::{RepositoryError, to_count, to_db_count};
use crate::models::CartLine;
use crate::store::CartStore;

#[derive(Debug, sqlx::FromRow)]
struct CartLineRow {
    sku_id: i32,
    quantity: i32,
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = RepositoryError;

    fn try_from(row: CartLineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            sku_id: SkuId::new(row.sku_id),
            quantity: to_count(row.quantity, "cart quantity")?,
        })
    }
}

/// Repository for cart database operations.
#[derive(Clone)]
pub struct CartRepository {
    pool: PgPool,
}

impl CartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for CartRepository {
    async fn quantity(&self, user: UserId, sku: SkuId) -> Result<Option<u32>, RepositoryError> {
        let quantity: Option<i32> = sqlx::query_scalar(
            r"
            SELECT quantity FROM storefront.cart_line
            WHERE user_id = $1 AND sku_id = $2
            ",
        )
        .bind(user)
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        quantity.map(|q| to_count(q, "cart quantity")).transpose()
    }

    async fn lines(&self, user: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, CartLineRow>(
            r"
            SELECT sku_id, quantity FROM storefront.cart_line
            WHERE user_id = $1
            ORDER BY sku_id
            ",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn line_count(&self, user: UserId) -> Result<u32, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM storefront.cart_line
            WHERE user_id = $1
            ",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(count)
            .map_err(|_| RepositoryError::DataCorruption(format!("cart line count: {count}")))
    }

    async fn set_quantity(
        &self,
        user: UserId,
        sku: SkuId,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.cart_line (user_id, sku_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, sku_id) DO UPDATE SET quantity = EXCLUDED.quantity
            ",
        )
        .bind(user)
        .bind(sku)
        .bind(to_db_count(quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, user: UserId, skus: &[SkuId]) -> Result<(), RepositoryError> {
        let raw: Vec<i32> = skus.iter().map(SkuId::as_i32).collect();
        sqlx::query(
            r"
            DELETE FROM storefront.cart_line
            WHERE user_id = $1 AND sku_id = ANY($2)
            ",
        )
        .bind(user)
        .bind(&raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
