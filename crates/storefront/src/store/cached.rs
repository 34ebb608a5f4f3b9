//! Read-through SKU cache for display paths.
//!
//! Cart and preview pages show names, units and prices that tolerate a short
//! staleness window. The checkout engine never reads through this cache; it
//! reads stock inside its own transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use daily_fresh_core::SkuId;

use super::Catalog;
use crate::db::RepositoryError;
use crate::models::Sku;

/// [`Catalog`] decorator caching individual SKUs.
#[derive(Clone)]
pub struct CachedCatalog {
    inner: Arc<dyn Catalog>,
    cache: Cache<SkuId, Sku>,
}

impl CachedCatalog {
    /// Wrap `inner` with a cache of `max_capacity` entries living `ttl`.
    #[must_use]
    pub fn new(inner: Arc<dyn Catalog>, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    /// Drop cached SKUs so the next read goes to the backing store.
    ///
    /// Called after a commit changes their stock.
    pub async fn invalidate(&self, ids: &[SkuId]) {
        for id in ids {
            self.cache.invalidate(id).await;
        }
    }
}

#[async_trait]
impl Catalog for CachedCatalog {
    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        if let Some(sku) = self.cache.get(&id).await {
            return Ok(Some(sku));
        }

        let sku = self.inner.sku(id).await?;
        if let Some(ref sku) = sku {
            self.cache.insert(id, sku.clone()).await;
        }
        Ok(sku)
    }

    async fn skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>, RepositoryError> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.cache.get(id).await {
                Some(sku) => found.push(sku),
                None => missing.push(*id),
            }
        }

        if !missing.is_empty() {
            for sku in self.inner.skus(&missing).await? {
                self.cache.insert(sku.id, sku.clone()).await;
                found.push(sku);
            }
        }

        found.sort_by_key(|sku| ids.iter().position(|id| *id == sku.id));
        Ok(found)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use daily_fresh_core::{GoodsId, Price};

    fn sku(id: i32, price: u32) -> Sku {
        Sku {
            id: SkuId::new(id),
            goods_id: GoodsId::new(1),
            name: "apple".to_owned(),
            unit: "kg".to_owned(),
            price: Price::from_units(price),
            stock: 10,
            sales: 0,
        }
    }

    #[tokio::test]
    async fn test_serves_cached_value_until_invalidated() {
        let store = MemoryStore::new();
        store.insert_sku(sku(1, 5));
        let cached = CachedCatalog::new(Arc::new(store.clone()), 100, Duration::from_secs(60));

        assert_eq!(cached.sku(SkuId::new(1)).await.unwrap().unwrap().price, Price::from_units(5));

        store.insert_sku(sku(1, 7));
        assert_eq!(cached.sku(SkuId::new(1)).await.unwrap().unwrap().price, Price::from_units(5));

        cached.invalidate(&[SkuId::new(1)]).await;
        assert_eq!(cached.sku(SkuId::new(1)).await.unwrap().unwrap().price, Price::from_units(7));
    }

    #[tokio::test]
    async fn test_batch_read_keeps_requested_order() {
        let store = MemoryStore::new();
        store.insert_sku(sku(1, 5));
        store.insert_sku(sku(2, 6));
        let cached = CachedCatalog::new(Arc::new(store), 100, Duration::from_secs(60));

        cached.sku(SkuId::new(2)).await.unwrap();
        let skus = cached.skus(&[SkuId::new(2), SkuId::new(1), SkuId::new(9)]).await.unwrap();
        let ids: Vec<_> = skus.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SkuId::new(2), SkuId::new(1)]);
    }
}
