//! In-memory storage backend.
//!
//! Implements every storage trait over process-local state so the services
//! can run without a database (tests, demos, `STOREFRONT_DATABASE_URL` unset).
//!
//! Transactions mirror the `PostgreSQL` ledger: each SKU has a row lock that a
//! transaction holds from first lock or write until it ends, writes are
//! buffered and applied on commit, and an order number is reserved as soon as
//! it is inserted so a concurrent duplicate fails immediately.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use daily_fresh_core::{AddressId, OrderNumber, OrderStatus, Price, SkuId, UserId};

use super::{
    AddressBook, CartStore, Catalog, InventoryLedger, LedgerTransaction, NewOrder, OrderStore,
    StockLevel,
};
use crate::db::RepositoryError;
use crate::models::{Address, CartLine, Order, OrderLine, Sku};

#[derive(Default)]
struct State {
    skus: BTreeMap<SkuId, Sku>,
    addresses: Vec<Address>,
    carts: BTreeMap<(UserId, SkuId), u32>,
    orders: BTreeMap<OrderNumber, Order>,
    lines: Vec<OrderLine>,
    reserved_order_ids: HashSet<OrderNumber>,
}

impl State {
    fn stock_level(&self, id: SkuId) -> Option<StockLevel> {
        self.skus.get(&id).map(|sku| StockLevel {
            sku_id: sku.id,
            price: sku.price,
            stock: sku.stock,
            sales: sku.sales,
        })
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<SkuId, Arc<RowLock<()>>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: SkuId) -> Arc<RowLock<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }
}

/// Process-local store implementing every storage trait.
///
/// Cloning is cheap and clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a SKU.
    pub fn insert_sku(&self, sku: Sku) {
        self.shared.state().skus.insert(sku.id, sku);
    }

    /// Insert an address.
    pub fn insert_address(&self, address: Address) {
        let mut state = self.shared.state();
        state.addresses.retain(|a| a.id != address.id);
        state.addresses.push(address);
    }

    /// Committed state of a SKU.
    #[must_use]
    pub fn sku_snapshot(&self, id: SkuId) -> Option<Sku> {
        self.shared.state().skus.get(&id).cloned()
    }

    /// All committed orders, ordered by number.
    #[must_use]
    pub fn all_orders(&self) -> Vec<Order> {
        self.shared.state().orders.values().cloned().collect()
    }

    /// Number of committed order lines across all orders.
    #[must_use]
    pub fn order_line_count(&self) -> usize {
        self.shared.state().lines.len()
    }

    /// Overwrite an order's status, bypassing transition rules.
    ///
    /// Stands in for fulfilment systems that move orders along outside this
    /// service.
    pub fn force_status(&self, order_id: &OrderNumber, status: OrderStatus) -> bool {
        self.shared
            .state()
            .orders
            .get_mut(order_id)
            .map(|order| order.status = status)
            .is_some()
    }
}

// =============================================================================
// Read-side stores
// =============================================================================

#[async_trait]
impl Catalog for MemoryStore {
    async fn sku(&self, id: SkuId) -> Result<Option<Sku>, RepositoryError> {
        Ok(self.sku_snapshot(id))
    }

    async fn skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>, RepositoryError> {
        let state = self.shared.state();
        Ok(ids.iter().filter_map(|id| state.skus.get(id).cloned()).collect())
    }
}

#[async_trait]
impl AddressBook for MemoryStore {
    async fn find_for_user(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<Option<Address>, RepositoryError> {
        let state = self.shared.state();
        Ok(state
            .addresses
            .iter()
            .find(|a| a.id == id && a.user_id == user)
            .cloned())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Address>, RepositoryError> {
        let state = self.shared.state();
        let mut addresses: Vec<Address> = state
            .addresses
            .iter()
            .filter(|a| a.user_id == user)
            .cloned()
            .collect();
        addresses.sort_by_key(|a| (!a.is_default, a.id));
        Ok(addresses)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn quantity(&self, user: UserId, sku: SkuId) -> Result<Option<u32>, RepositoryError> {
        Ok(self.shared.state().carts.get(&(user, sku)).copied())
    }

    async fn lines(&self, user: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let state = self.shared.state();
        Ok(state
            .carts
            .range((user, SkuId::new(i32::MIN))..=(user, SkuId::new(i32::MAX)))
            .map(|(&(_, sku_id), &quantity)| CartLine { sku_id, quantity })
            .collect())
    }

    async fn line_count(&self, user: UserId) -> Result<u32, RepositoryError> {
        let state = self.shared.state();
        let count = state.carts.keys().filter(|(owner, _)| *owner == user).count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn set_quantity(
        &self,
        user: UserId,
        sku: SkuId,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        self.shared.state().carts.insert((user, sku), quantity);
        Ok(())
    }

    async fn remove(&self, user: UserId, skus: &[SkuId]) -> Result<(), RepositoryError> {
        let mut state = self.shared.state();
        for sku in skus {
            state.carts.remove(&(user, *sku));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find(&self, order_id: &OrderNumber) -> Result<Option<Order>, RepositoryError> {
        Ok(self.shared.state().orders.get(order_id).cloned())
    }

    async fn find_for_user(
        &self,
        user: UserId,
        order_id: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .shared
            .state()
            .orders
            .get(order_id)
            .filter(|o| o.user_id == user)
            .cloned())
    }

    async fn lines(&self, order_id: &OrderNumber) -> Result<Vec<OrderLine>, RepositoryError> {
        let state = self.shared.state();
        let mut lines: Vec<OrderLine> = state
            .lines
            .iter()
            .filter(|l| &l.order_id == order_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.sku_id);
        Ok(lines)
    }


    async fn mark_paid(
        &self,
        order_id: &OrderNumber,
        trade_no: &str,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.shared.state();
        match state.orders.get_mut(order_id) {
            Some(order) if order.status.can_transition_to(OrderStatus::AwaitingReview) => {
                order.status = OrderStatus::AwaitingReview;
                order.trade_no = Some(trade_no.to_owned());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn record_review(
        &self,
        order_id: &OrderNumber,
        comments: &[(SkuId, String)],
    ) -> Result<bool, RepositoryError> {
        let mut state = self.shared.state();
        match state.orders.get(order_id) {
            Some(order) if order.status.can_transition_to(OrderStatus::Reviewed) => {}
            Some(_) => return Ok(false),
            None => return Err(RepositoryError::NotFound),
        }

        let all_present = comments.iter().all(|(sku_id, _)| {
            state
                .lines
                .iter()
                .any(|l| &l.order_id == order_id && l.sku_id == *sku_id)
        });
        if !all_present {
            return Err(RepositoryError::NotFound);
        }

        for (sku_id, comment) in comments {
            if let Some(line) = state
                .lines
                .iter_mut()
                .find(|l| &l.order_id == order_id && l.sku_id == *sku_id)
            {
                line.comment = Some(comment.clone());
            }
        }
        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = OrderStatus::Reviewed;
        }
        Ok(true)
    }
}

// =============================================================================
// Inventory ledger
// =============================================================================

#[async_trait]
impl InventoryLedger for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, RepositoryError> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            stock_writes: BTreeMap::new(),
            orders: Vec::new(),
            lines: Vec::new(),
        }))
    }
}

/// A buffered transaction over [`MemoryStore`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<SkuId, OwnedMutexGuard<()>>,
    stock_writes: BTreeMap<SkuId, (u32, u32)>,
    orders: Vec<Order>,
    lines: Vec<OrderLine>,
}

impl MemoryTransaction {
    async fn acquire(&mut self, id: SkuId) {
        if self.held.contains_key(&id) {
            return;
        }
        let lock = self.shared.row_lock(id);
        let guard = lock.lock_owned().await;
        self.held.insert(id, guard);
    }

    fn exists(&self, id: SkuId) -> bool {
        self.shared.state().skus.contains_key(&id)
    }

    /// Committed counters overlaid with this transaction's own writes.
    fn level(&self, id: SkuId) -> Option<StockLevel> {
        let mut level = self.shared.state().stock_level(id)?;
        if let Some(&(stock, sales)) = self.stock_writes.get(&id) {
            level.stock = stock;
            level.sales = sales;
        }
        Some(level)
    }

    fn release_reservations(&mut self) {
        if self.orders.is_empty() {
            return;
        }
        let mut state = self.shared.state();
        for order in self.orders.drain(..) {
            state.reserved_order_ids.remove(&order.order_id);
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release_reservations();
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn lock_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError> {
        if !self.exists(id) {
            return Ok(None);
        }
        self.acquire(id).await;
        Ok(self.level(id))
    }

    async fn read_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError> {
        Ok(self.level(id))
    }

    async fn write_stock(
        &mut self,
        id: SkuId,
        stock: u32,
        sales: u32,
    ) -> Result<(), RepositoryError> {
        if !self.exists(id) {
            return Err(RepositoryError::NotFound);
        }
        self.acquire(id).await;
        self.stock_writes.insert(id, (stock, sales));
        Ok(())
    }

    async fn write_stock_if(
        &mut self,
        id: SkuId,
        expected_stock: u32,
        stock: u32,
        sales: u32,
    ) -> Result<bool, RepositoryError> {
        if !self.exists(id) {
            return Ok(false);
        }
        self.acquire(id).await;
        match self.level(id) {
            Some(level) if level.stock == expected_stock => {
                self.stock_writes.insert(id, (stock, sales));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError> {
        {
            let mut state = self.shared.state();
            if state.orders.contains_key(&order.order_id)
                || !state.reserved_order_ids.insert(order.order_id.clone())
            {
                return Err(RepositoryError::Conflict(format!(
                    "order {} already exists",
                    order.order_id
                )));
            }
        }

        self.orders.push(Order {
            order_id: order.order_id.clone(),
            user_id: order.user_id,
            address_id: order.address_id,
            pay_method: order.pay_method,
            status: OrderStatus::Unpaid,
            total_count: 0,
            total_price: Price::ZERO,
            transit_price: order.transit_price,
            trade_no: None,
            created_at: order.created_at,
        });
        Ok(())
    }

    async fn insert_line(&mut self, line: &OrderLine) -> Result<(), RepositoryError> {
        if !self.orders.iter().any(|o| o.order_id == line.order_id) {
            return Err(RepositoryError::NotFound);
        }
        if self
            .lines
            .iter()
            .any(|l| l.order_id == line.order_id && l.sku_id == line.sku_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "sku {} already on order {}",
                line.sku_id, line.order_id
            )));
        }
        self.lines.push(line.clone());
        Ok(())
    }

    async fn set_totals(
        &mut self,
        order_id: &OrderNumber,
        total_count: u32,
        total_price: Price,
    ) -> Result<(), RepositoryError> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| &o.order_id == order_id)
            .ok_or(RepositoryError::NotFound)?;
        order.total_count = total_count;
        order.total_price = total_price;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let mut this = self;
        let orders = std::mem::take(&mut this.orders);
        let lines = std::mem::take(&mut this.lines);
        let writes = std::mem::take(&mut this.stock_writes);

        let mut state = this.shared.state();
        for (id, (stock, sales)) in writes {
            if let Some(sku) = state.skus.get_mut(&id) {
                sku.stock = stock;
                sku.sales = sales;
            }
        }
        for order in orders {
            state.reserved_order_ids.remove(&order.order_id);
            state.orders.insert(order.order_id.clone(), order);
        }
        state.lines.extend(lines);
        drop(state);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        drop(self);
        Ok(())
    }
}
