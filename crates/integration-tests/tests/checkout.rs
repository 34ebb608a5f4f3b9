//! Order commit engine against the in-memory ledger.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use daily_fresh_core::{OrderNumber, PayMethod, Price, SkuId, UserId};
use daily_fresh_integration_tests::{BUYER, BUYER_ADDRESS, Shop, commit_form, fixed_time};
use daily_fresh_storefront::db::RepositoryError;
use daily_fresh_storefront::models::OrderLine;
use daily_fresh_storefront::services::checkout::{
    CheckoutService, CommitError, CommitForm, LedgerError, Optimistic, StockReservation,
    StockStrategy,
};
use daily_fresh_storefront::store::{
    CartStore, InventoryLedger, LedgerTransaction, MemoryStore, NewOrder, OrderStore, StockLevel,
};

const STRATEGIES: [StockStrategy; 2] = [
    StockStrategy::Pessimistic,
    StockStrategy::Optimistic { max_attempts: 3 },
];

#[tokio::test]
async fn test_commit_fails_when_one_sku_is_out_of_stock() {
    for strategy in STRATEGIES {
        let shop = Shop::new();
        let a = shop.add_sku(1, 10, 5);
        let b = shop.add_sku(2, 20, 0);
        shop.put_in_cart(BUYER, a, 2).await;
        shop.put_in_cart(BUYER, b, 1).await;

        let err = shop
            .checkout(strategy)
            .commit(Some(BUYER), &commit_form(&[a, b], PayMethod::Gateway))
            .await
            .unwrap_err();

        assert!(
            matches!(err, CommitError::InsufficientStock { sku_id, .. } if sku_id == b),
            "{strategy}: {err:?}"
        );
        assert_eq!(err.code(), 6);
        assert_eq!(shop.stock_and_sales(a), (5, 0));
        assert!(shop.store.all_orders().is_empty());
        assert_eq!(shop.store.order_line_count(), 0);
        // Cart untouched on failure.
        assert_eq!(shop.store.quantity(BUYER, a).await.unwrap(), Some(2));
    }
}

#[tokio::test]
async fn test_commit_writes_order_lines_and_stock() {
    for strategy in STRATEGIES {
        let shop = Shop::new();
        let a = shop.add_sku(1, 10, 5);
        let b = shop.add_sku(2, 20, 3);
        shop.put_in_cart(BUYER, a, 2).await;
        shop.put_in_cart(BUYER, b, 1).await;

        let checkout = shop.checkout(strategy);
        let receipt = checkout
            .commit(Some(BUYER), &commit_form(&[b, a], PayMethod::Gateway))
            .await
            .unwrap();

        let transit = checkout.transit_price();
        assert_eq!(receipt.total_count, 3);
        assert_eq!(
            receipt.total_price,
            Price::from_units(2 * 10 + 20) + transit
        );
        assert_eq!(shop.stock_and_sales(a), (3, 2));
        assert_eq!(shop.stock_and_sales(b), (2, 1));

        let order = shop.store.find(&receipt.order_id).await.unwrap().unwrap();
        assert_eq!(order.user_id, BUYER);
        assert_eq!(order.address_id, BUYER_ADDRESS);
        assert_eq!(order.total_price, receipt.total_price);
        assert_eq!(order.goods_price(), Price::from_units(40));

        let lines = OrderStore::lines(&shop.store, &receipt.order_id).await.unwrap();
        let items: Price = lines.iter().map(|l| l.amount()).sum();
        assert_eq!(items + transit, order.total_price);
        assert_eq!(lines.iter().map(|l| l.quantity).sum::<u32>(), order.total_count);

        // Committed lines leave the cart.
        assert!(CartStore::lines(&shop.store, BUYER).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_line_prices_are_frozen_at_commit() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    shop.put_in_cart(BUYER, a, 1).await;

    let receipt = shop
        .checkout(StockStrategy::Pessimistic)
        .commit(Some(BUYER), &commit_form(&[a], PayMethod::CashOnDelivery))
        .await
        .unwrap();

    // Reprice after the commit.
    shop.add_sku(1, 99, 4);
    let lines = OrderStore::lines(&shop.store, &receipt.order_id).await.unwrap();
    assert_eq!(lines[0].unit_price, Price::from_units(10));
}

#[tokio::test]
async fn test_validation_rejects_before_writing() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    shop.put_in_cart(BUYER, a, 1).await;
    let checkout = shop.checkout(StockStrategy::Pessimistic);

    let err = checkout
        .commit(None, &commit_form(&[a], PayMethod::Gateway))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 0);

    let err = checkout
        .commit(Some(BUYER), &CommitForm::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), 1);

    let mut form = commit_form(&[a], PayMethod::Gateway);
    form.pay_method = Some("9".to_string());
    let err = checkout.commit(Some(BUYER), &form).await.unwrap_err();
    assert_eq!(err.code(), 2);

    let mut form = commit_form(&[a], PayMethod::Gateway);
    form.addr_id = Some("999".to_string());
    let err = checkout.commit(Some(BUYER), &form).await.unwrap_err();
    assert_eq!(err.code(), 3);

    // Someone else's address.
    let stranger = UserId::new(77);
    let err = checkout
        .commit(Some(stranger), &commit_form(&[a], PayMethod::Gateway))
        .await
        .unwrap_err();
    assert!(matches!(err, CommitError::AddressNotFound));

    assert!(shop.store.all_orders().is_empty());
    assert_eq!(shop.stock_and_sales(a), (5, 0));
}

#[tokio::test]
async fn test_unknown_sku_rolls_back_earlier_lines() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    let ghost = SkuId::new(50);
    shop.put_in_cart(BUYER, a, 2).await;
    shop.put_in_cart(BUYER, ghost, 1).await;

    let err = shop
        .checkout(StockStrategy::Pessimistic)
        .commit(Some(BUYER), &commit_form(&[a, ghost], PayMethod::Gateway))
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::SkuNotFound(id) if id == ghost));
    assert_eq!(err.code(), 4);
    assert_eq!(shop.stock_and_sales(a), (5, 0));
    assert!(shop.store.all_orders().is_empty());
    assert_eq!(shop.store.order_line_count(), 0);
}

// A selected SKU without a cart line is a malformed request, not a failed
// transaction: InvalidInput, code 1.
#[tokio::test]
async fn test_sku_missing_from_cart_is_invalid_input_code_1() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    let b = shop.add_sku(2, 10, 5);
    shop.put_in_cart(BUYER, a, 1).await;

    let err = shop
        .checkout(StockStrategy::Pessimistic)
        .commit(Some(BUYER), &commit_form(&[a, b], PayMethod::Gateway))
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::InvalidInput(_)));
    assert_eq!(err.code(), 1);
    assert_eq!(shop.stock_and_sales(a), (5, 0));
    assert!(shop.store.all_orders().is_empty());
}

#[tokio::test]
async fn test_same_second_commit_is_a_duplicate_order() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    let checkout = shop
        .checkout(StockStrategy::Pessimistic)
        .with_clock(fixed_time);

    shop.put_in_cart(BUYER, a, 1).await;
    let first = checkout
        .commit(Some(BUYER), &commit_form(&[a], PayMethod::Gateway))
        .await
        .unwrap();
    assert_eq!(first.order_id.as_str(), "2026030109300042");

    shop.put_in_cart(BUYER, a, 1).await;
    let err = checkout
        .commit(Some(BUYER), &commit_form(&[a], PayMethod::Gateway))
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::DuplicateOrder(ref id) if *id == first.order_id));
    assert_eq!(err.code(), 7);
    assert_eq!(shop.store.all_orders().len(), 1);
    assert_eq!(shop.stock_and_sales(a), (4, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_never_oversell() {
    const BUYERS: i32 = 8;
    const STOCK: u32 = 5;

    for strategy in STRATEGIES {
        let shop = Shop::new();
        let a = shop.add_sku(1, 10, STOCK);
        let checkout = Arc::new(shop.checkout(strategy));

        let mut handles = Vec::new();
        for n in 0..BUYERS {
            let user = UserId::new(100 + n);
            let address = daily_fresh_core::AddressId::new(100 + n);
            shop.add_address(user, address);
            shop.put_in_cart(user, a, 1).await;

            let checkout = Arc::clone(&checkout);
            let mut form = commit_form(&[a], PayMethod::CashOnDelivery);
            form.addr_id = Some(address.to_string());
            handles.push(tokio::spawn(async move {
                checkout.commit(Some(user), &form).await
            }));
        }

        let mut committed = 0u32;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => committed += 1,
                Err(CommitError::InsufficientStock { .. }) => {}
                Err(other) => panic!("{strategy}: unexpected {other:?}"),
            }
        }

        assert_eq!(committed, STOCK, "{strategy}");
        assert_eq!(shop.stock_and_sales(a), (0, STOCK), "{strategy}");
        assert_eq!(shop.store.all_orders().len(), STOCK as usize);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_carts_do_not_deadlock() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 100);
    let b = shop.add_sku(2, 20, 100);
    let checkout = Arc::new(shop.checkout(StockStrategy::Pessimistic));

    let mut handles = Vec::new();
    for n in 0..6 {
        let user = UserId::new(200 + n);
        let address = daily_fresh_core::AddressId::new(200 + n);
        shop.add_address(user, address);
        shop.put_in_cart(user, a, 1).await;
        shop.put_in_cart(user, b, 1).await;

        // Half the buyers list the SKUs in reverse.
        let skus = if n % 2 == 0 { [a, b] } else { [b, a] };
        let mut form = commit_form(&skus, PayMethod::BankCard);
        form.addr_id = Some(address.to_string());
        let checkout = Arc::clone(&checkout);
        handles.push(tokio::spawn(async move {
            checkout.commit(Some(user), &form).await
        }));
    }

    let all = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(all.is_ok(), "commits deadlocked");
    assert_eq!(shop.stock_and_sales(a), (94, 6));
    assert_eq!(shop.stock_and_sales(b), (94, 6));
}

// =============================================================================
// Optimistic retry budget
// =============================================================================

/// A ledger whose conditional writes to one SKU always lose the race.
struct ContendedLedger {
    store: MemoryStore,
    contended: SkuId,
    reads: Arc<AtomicU32>,
}

struct ContendedTransaction {
    inner: Box<dyn LedgerTransaction>,
    contended: SkuId,
    reads: Arc<AtomicU32>,
}

#[async_trait]
impl InventoryLedger for ContendedLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, RepositoryError> {
        Ok(Box::new(ContendedTransaction {
            inner: self.store.begin().await?,
            contended: self.contended,
            reads: Arc::clone(&self.reads),
        }))
    }
}

#[async_trait]
impl LedgerTransaction for ContendedTransaction {
    async fn lock_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError> {
        self.inner.lock_sku(id).await
    }

    async fn read_sku(&mut self, id: SkuId) -> Result<Option<StockLevel>, RepositoryError> {
        if id == self.contended {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.read_sku(id).await
    }

    async fn write_stock(
        &mut self,
        id: SkuId,
        stock: u32,
        sales: u32,
    ) -> Result<(), RepositoryError> {
        self.inner.write_stock(id, stock, sales).await
    }

    async fn write_stock_if(
        &mut self,
        id: SkuId,
        expected_stock: u32,
        stock: u32,
        sales: u32,
    ) -> Result<bool, RepositoryError> {
        if id == self.contended {
            return Ok(false);
        }
        self.inner
            .write_stock_if(id, expected_stock, stock, sales)
            .await
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError> {
        self.inner.insert_order(order).await
    }

    async fn insert_line(&mut self, line: &OrderLine) -> Result<(), RepositoryError> {
        self.inner.insert_line(line).await
    }

    async fn set_totals(
        &mut self,
        order_id: &OrderNumber,
        total_count: u32,
        total_price: Price,
    ) -> Result<(), RepositoryError> {
        self.inner.set_totals(order_id, total_count, total_price).await
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_optimistic_gives_up_after_max_attempts() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    let ledger = ContendedLedger {
        store: shop.store.clone(),
        contended: a,
        reads: Arc::new(AtomicU32::new(0)),
    };

    let mut tx = ledger.begin().await.unwrap();
    let err = Optimistic::new(4)
        .reserve(&mut *tx, a, 1)
        .await
        .unwrap_err();
    tx.rollback().await.unwrap();

    assert!(matches!(
        err,
        LedgerError::Contention { sku_id, attempts: 4 } if sku_id == a
    ));
    assert_eq!(ledger.reads.load(Ordering::SeqCst), 4);
    assert_eq!(shop.stock_and_sales(a), (5, 0));
}

#[tokio::test]
async fn test_commit_contention_rolls_back_whole_order() {
    let shop = Shop::new();
    let a = shop.add_sku(1, 10, 5);
    let b = shop.add_sku(2, 20, 5);
    shop.put_in_cart(BUYER, a, 2).await;
    shop.put_in_cart(BUYER, b, 1).await;

    let store = Arc::new(shop.store.clone());
    let reads = Arc::new(AtomicU32::new(0));
    let ledger = Arc::new(ContendedLedger {
        store: shop.store.clone(),
        contended: b,
        reads: Arc::clone(&reads),
    });
    let checkout = CheckoutService::new(
        store.clone(),
        store,
        ledger,
        StockStrategy::Optimistic { max_attempts: 3 },
    );

    let err = checkout
        .commit(Some(BUYER), &commit_form(&[a, b], PayMethod::Gateway))
        .await
        .unwrap_err();

    assert!(matches!(err, CommitError::Contention { sku_id, attempts: 3 } if sku_id == b));
    assert_eq!(err.code(), 7);
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    // SKU a was reserved before b gave up; none of it survives.
    assert_eq!(shop.stock_and_sales(a), (5, 0));
    assert_eq!(shop.stock_and_sales(b), (5, 0));
    assert!(shop.store.all_orders().is_empty());
    assert_eq!(shop.store.order_line_count(), 0);
    assert_eq!(shop.store.quantity(BUYER, a).await.unwrap(), Some(2));
}
