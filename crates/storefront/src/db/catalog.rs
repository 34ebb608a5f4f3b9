//! SKU repository for catalog reads and seeding.

use async_trait::async_trait;
use sqlx::PgPool;

use daily_fresh_core::{GoodsId, Price, SkuId};

use super::{RepositoryError, to_count, to_db_count};
use crate::models::Sku;
use crate::store::Catalog;

/// Internal row type for database queries.
#[derive(Debug, sqlx::FromRow)]
struct SkuRow {
    id: i32,
    goods_id: i32,
    name: String,
    unit: String,
    price: Price,
    stock: i32,
    sales: i32,
}

impl TryFrom<SkuRow> for Sku {
    type Error = RepositoryError;

    fn try_from(row: SkuRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SkuId::new(row.id),
            goods_id: GoodsId::new(row.goods_id),
            name: row.name,
            unit: row.unit,
            price: row.price,
            stock: to_count(row.stock, "stock")?,
            sales: to_count(row.sales, "sales")?,
        })
    }
}

/// Repository for SKU database operations.
#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    /// Create a new catalog repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new SKU with zero sales. Used by the CLI seeder.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn insert(
        &self,
        goods_id: GoodsId,
        name: &str,
        unit: &str,
        price: Price,
        stock: u32,
    ) -> Result<Sku, RepositoryError> {
        let row = sqlx::query_as::<_, SkuRow>(
            r"
            INSERT INTO storefront.sku (goods_id, name, unit, price, stock, sales)
            VALUES ($1, $2, $3, $4, $5, 0)
            RETURNING id, goods_id, name, unit, price, stock, sales
            ",
        )
        .bind(goods_id)
        .bind(name)
        .bind(unit)
        .bind(price)
        .bind(to_db_count(stock)?)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }
}

#[async_trait]
impl Catalog for CatalogRepository {
    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        let row = sqlx::query_as::<_, SkuRow>(
            r"
            SELECT id, goods_id, name, unit, price, stock, sales
            FROM storefront.sku
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>, RepositoryError> {
        let raw: Vec<i32> = ids.iter().map(SkuId::as_i32).collect();
        let rows = sqlx::query_as::<_, SkuRow>(
            r"
            SELECT id, goods_id, name, unit, price, stock, sales
            FROM storefront.sku
            WHERE id = ANY($1)
            ",
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;

        let mut skus = rows
            .into_iter()
            .map(Sku::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        skus.sort_by_key(|sku| ids.iter().position(|id| *id == sku.id));
        Ok(skus)
    }
}
