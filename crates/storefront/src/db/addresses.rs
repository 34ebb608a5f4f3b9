//! Address repository for database operations.

use async_trait::async_trait;
use sqlx::PgPool;

use daily_fresh_core::{AddressId, UserId};

use super::RepositoryError;
use crate::models::Address;
use crate::store::AddressBook;

/// Internal row type for database queries.
#[derive(Debug, sqlx::FromRow)]
struct AddressRow {
    id: i32,
    user_id: i32,
    receiver: String,
    addr: String,
    zip_code: Option<String>,
    phone: String,
    is_default: bool,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: AddressId::new(row.id),
            user_id: UserId::new(row.user_id),
            receiver: row.receiver,
            addr: row.addr,
            zip_code: row.zip_code,
            phone: row.phone,
            is_default: row.is_default,
        }
    }
}

/// Repository for address database operations.
#[derive(Clone)]
pub struct AddressRepository {
    pool: PgPool,
}

impl AddressRepository {
    /// Create a new address repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressBook for AddressRepository {
    async fn find_for_user(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<Option<Address>, RepositoryError> {
        let row = sqlx::query_as::<_, AddressRow>(
            r"
            SELECT id, user_id, receiver, addr, zip_code, phone, is_default
            FROM storefront.address
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(id)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Address>, RepositoryError> {
        let rows = sqlx::query_as::<_, AddressRow>(
            r"
            SELECT id, user_id, receiver, addr, zip_code, phone, is_default
            FROM storefront.address
            WHERE user_id = $1
            ORDER BY is_default DESC, id
            ",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
