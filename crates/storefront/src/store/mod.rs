//! Storage seams for the checkout and payment services.
//!
//! Every backend implements these traits: `db` for `PostgreSQL`, [`memory`]
//! for tests and local runs. Services hold them as `Arc<dyn Trait>`.
//!
//! [`InventoryLedger`] opens a [`LedgerTransaction`]; everything written
//! through one transaction becomes visible atomically on `commit` or not at
//! all. Dropping a transaction without committing rolls it back.

pub mod cached;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use daily_fresh_core::{AddressId, OrderNumber, PayMethod, Price, SkuId, UserId};

use crate::db::RepositoryError;
use crate::models::{Address, CartLine, Order, OrderLine, Sku};

pub use cached::CachedCatalog;
pub use memory::MemoryStore;

// =============================================================================
// Read-side stores
// =============================================================================

/// Read access to the product catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a single SKU.
    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError>;

    /// Fetch several SKUs. Missing ids are skipped; order follows `ids`.
    async fn skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>, RepositoryError>;
}

/// A user's saved shipping addresses.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Fetch an address only if it belongs to `user`.
    async fn find_for_user(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<Option<Address>, RepositoryError>;

    /// All of the user's addresses, default first.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<Address>, RepositoryError>;
}

/// Per-user cart quantities.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Quantity of `sku` in the user's cart.
    async fn quantity(&self, user: UserId, sku: SkuId) -> Result<Option<u32>, RepositoryError>;

    /// All lines in the user's cart, ordered by SKU id.
    async fn lines(&self, user: UserId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Number of distinct SKUs in the user's cart.
    async fn line_count(&self, user: UserId) -> Result<u32, RepositoryError>;

    /// Set the quantity of `sku`, inserting the line if absent.
    async fn set_quantity(
        &self,
        user: UserId,
        sku: SkuId,
        quantity: u32,
    ) -> Result<(), RepositoryError>;

    /// Remove the given SKUs from the user's cart. Absent lines are ignored.
    async fn remove(&self, user: UserId, skus: &[SkuId]) -> Result<(), RepositoryError>;
}

/// Committed orders and their post-commit transitions.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch an order by number.
    async fn find(&self, order_id: &OrderNumber) -> Result<Option<Order>, RepositoryError>;

    /// Fetch an order only if it belongs to `user`.
    async fn find_for_user(
        &self,
        user: UserId,
        order_id: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Lines of an order, ordered by SKU id.
    async fn lines(&self, order_id: &OrderNumber) -> Result<Vec<OrderLine>, RepositoryError>;

    /// Record a successful payment: `Unpaid` to `AwaitingReview` with the
    /// gateway's trade number.
    ///
    /// Returns `false` when the order was not `Unpaid` (already settled), in
    /// which case nothing is written.
    async fn mark_paid(&self, order_id: &OrderNumber, trade_no: &str)
    -> Result<bool, RepositoryError>;

    /// Store one review per line and move the order to `Reviewed`, atomically.
    ///
    /// Returns `false` when the order was not `AwaitingReview`, in which case
    /// nothing is written.
    async fn record_review(
        &self,
        order_id: &OrderNumber,
        comments: &[(SkuId, String)],
    ) -> Result<bool, RepositoryError>;
}

// =============================================================================
// Transactional inventory ledger
// =============================================================================

/// Stock counters for one SKU as seen inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    /// SKU id.
    pub sku_id: SkuId,
    /// Current unit price.
    pub price: Price,
    /// Units available.
    pub stock: u32,
    /// Units sold.
    pub sales: u32,
}

/// Header of an order being committed. Totals start at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_id: OrderNumber,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub pay_method: PayMethod,
    pub transit_price: Price,
    pub created_at: DateTime<Utc>,
}

/// Opens inventory transactions.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Begin a new transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, RepositoryError>;
}

/// One all-or-nothing unit of inventory and order writes.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Read a SKU's counters and hold its row lock until the transaction ends.
    async fn lock_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError>;

    /// Read a SKU's counters without locking.
    async fn read_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError>;

    /// Overwrite a SKU's counters. The row lock is taken if not already held.
    async fn write_stock(&mut self, id: SkuId, stock: u32, sales: u32)
    -> Result<(), RepositoryError>;

    /// Overwrite a SKU's counters only if its stock still equals
    /// `expected_stock`. Returns whether the write happened.
    async fn write_stock_if(
        &mut self,
        id: SkuId,
        expected_stock: u32,
        stock: u32,
        sales: u32,
    ) -> Result<bool, RepositoryError>;

    /// Insert an order header.
    ///
    /// Fails with [`RepositoryError::Conflict`] if the order number exists.
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError>;

    /// Insert an order line.
    async fn insert_line(&mut self, line: &OrderLine) -> Result<(), RepositoryError>;

    /// Write the derived totals of an order inserted in this transaction.
    async fn set_totals(
        &mut self,
        order_id: &OrderNumber,
        total_count: u32,
        total_price: Price,
    ) -> Result<(), RepositoryError>;

    /// Make every write visible.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    /// Discard every write and release held locks.
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}
