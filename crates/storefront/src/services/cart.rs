//! Cart operations.
//!
//! Quantities are validated against the catalog's displayed stock. The check
//! is advisory: the checkout engine re-validates stock inside its transaction.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use daily_fresh_core::{SkuId, UserId};

use crate::db::RepositoryError;
use crate::models::Sku;
use crate::store::{CartStore, Catalog};

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantity was zero.
    #[error("quantity must be positive")]
    InvalidCount,

    /// The SKU does not exist.
    #[error("sku {0} not found")]
    SkuNotFound(SkuId),

    /// The requested quantity exceeds stock.
    #[error("only {available} in stock")]
    InsufficientStock { available: u32 },

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// A cart line joined with its SKU.
#[derive(Debug, Clone)]
pub struct CartItem {
    pub sku: Sku,
    pub quantity: u32,
}

/// Cart service over a [`CartStore`] and a (usually cached) [`Catalog`].
#[derive(Clone)]
pub struct CartService {
    catalog: Arc<dyn Catalog>,
    carts: Arc<dyn CartStore>,
}

impl CartService {
    /// Create a cart service.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, carts: Arc<dyn CartStore>) -> Self {
        Self { catalog, carts }
    }

    /// Add `count` units of a SKU on top of any quantity already in the cart.
    ///
    /// Returns the number of distinct SKUs in the cart afterwards.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidCount` for a zero count,
    /// `CartError::SkuNotFound` for an unknown SKU and
    /// `CartError::InsufficientStock` if the new quantity exceeds stock.
    #[instrument(skip(self), fields(user_id = %user, sku_id = %sku_id))]
    pub async fn add(&self, user: UserId, sku_id: SkuId, count: u32) -> Result<u32, CartError> {
        if count == 0 {
            return Err(CartError::InvalidCount);
        }
        let sku = self.sku(sku_id).await?;
        let existing = self.carts.quantity(user, sku_id).await?.unwrap_or(0);
        let quantity = existing.saturating_add(count);
        if !sku.can_fulfil(quantity) {
            return Err(CartError::InsufficientStock {
                available: sku.stock,
            });
        }

        self.carts.set_quantity(user, sku_id, quantity).await?;
        Ok(self.carts.line_count(user).await?)
    }

    /// Replace the quantity of a SKU.
    ///
    /// Returns the total number of units in the cart afterwards.
    ///
    /// # Errors
    ///
    /// Same as [`CartService::add`].
    #[instrument(skip(self), fields(user_id = %user, sku_id = %sku_id))]
    pub async fn update(&self, user: UserId, sku_id: SkuId, count: u32) -> Result<u32, CartError> {
        if count == 0 {
            return Err(CartError::InvalidCount);
        }
        let sku = self.sku(sku_id).await?;
        if !sku.can_fulfil(count) {
            return Err(CartError::InsufficientStock {
                available: sku.stock,
            });
        }

        self.carts.set_quantity(user, sku_id, count).await?;
        self.total_units(user).await
    }

    /// Remove a SKU from the cart.
    ///
    /// Returns the total number of units left in the cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::SkuNotFound` for an unknown SKU.
    #[instrument(skip(self), fields(user_id = %user, sku_id = %sku_id))]
    pub async fn delete(&self, user: UserId, sku_id: SkuId) -> Result<u32, CartError> {
        self.sku(sku_id).await?;
        self.carts.remove(user, &[sku_id]).await?;
        self.total_units(user).await
    }

    /// All cart lines joined with their SKUs. Lines whose SKU has
    /// disappeared from the catalog are skipped.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if a store read fails.
    pub async fn contents(&self, user: UserId) -> Result<Vec<CartItem>, CartError> {
        let lines: Vec<(SkuId, u32)> = self
            .carts
            .lines(user)
            .await?
            .into_iter()
            .map(|l| (l.sku_id, l.quantity))
            .collect();
        let ids: Vec<SkuId> = lines.iter().map(|&(id, _)| id).collect();
        self.join(&lines, &ids).await
    }

    /// The subset of the cart named by `sku_ids`, in the given order.
    /// SKUs that are not in the cart or the catalog are skipped.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if a store read fails.
    pub async fn selection(
        &self,
        user: UserId,
        sku_ids: &[SkuId],
    ) -> Result<Vec<CartItem>, CartError> {
        let mut selected = Vec::with_capacity(sku_ids.len());
        for &sku_id in sku_ids {
            if let Some(quantity) = self.carts.quantity(user, sku_id).await? {
                selected.push((sku_id, quantity));
            }
        }
        self.join(&selected, sku_ids).await
    }

    async fn join(
        &self,
        lines: &[(SkuId, u32)],
        ids: &[SkuId],
    ) -> Result<Vec<CartItem>, CartError> {
        let skus = self.catalog.skus(ids).await?;
        Ok(lines
            .iter()
            .filter_map(|&(sku_id, quantity)| {
                skus.iter()
                    .find(|s| s.id == sku_id)
                    .map(|sku| CartItem {
                        sku: sku.clone(),
                        quantity,
                    })
            })
            .collect())
    }

    async fn sku(&self, sku_id: SkuId) -> Result<Sku, CartError> {
        self.catalog
            .sku(sku_id)
            .await?
            .ok_or(CartError::SkuNotFound(sku_id))
    }

    async fn total_units(&self, user: UserId) -> Result<u32, CartError> {
        let lines = self.carts.lines(user).await?;
        Ok(lines.iter().map(|l| l.quantity).sum())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use daily_fresh_core::{GoodsId, Price};

    const USER: UserId = UserId::new(1);

    fn service(stock: u32) -> (CartService, MemoryStore) {
        let store = MemoryStore::new();
        store.insert_sku(Sku {
            id: SkuId::new(1),
            goods_id: GoodsId::new(1),
            name: "strawberries".to_owned(),
            unit: "box".to_owned(),
            price: Price::from_units(10),
            stock,
            sales: 0,
        });
        let shared = Arc::new(store.clone());
        (CartService::new(shared.clone(), shared), store)
    }

    #[tokio::test]
    async fn test_add_accumulates_quantity() {
        let (cart, store) = service(5);

        assert_eq!(cart.add(USER, SkuId::new(1), 2).await.unwrap(), 1);
        assert_eq!(cart.add(USER, SkuId::new(1), 3).await.unwrap(), 1);
        assert_eq!(
            store.quantity(USER, SkuId::new(1)).await.unwrap(),
            Some(5)
        );
    }

    #[tokio::test]
    async fn test_add_rejects_total_above_stock() {
        let (cart, _) = service(5);
        cart.add(USER, SkuId::new(1), 4).await.unwrap();

        let err = cart.add(USER, SkuId::new(1), 2).await.unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock { available: 5 }));
    }

    #[tokio::test]
    async fn test_update_and_delete_report_total_units() {
        let (cart, _) = service(9);
        cart.add(USER, SkuId::new(1), 1).await.unwrap();

        assert_eq!(cart.update(USER, SkuId::new(1), 7).await.unwrap(), 7);
        assert_eq!(cart.delete(USER, SkuId::new(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_sku_and_zero_count() {
        let (cart, _) = service(5);

        assert!(matches!(
            cart.add(USER, SkuId::new(2), 1).await,
            Err(CartError::SkuNotFound(_))
        ));
        assert!(matches!(
            cart.update(USER, SkuId::new(1), 0).await,
            Err(CartError::InvalidCount)
        ));
    }
}
