//! Payment creation and the reconciliation loop, on paused time.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use daily_fresh_core::{OrderNumber, OrderStatus, PayMethod, UserId};
use daily_fresh_integration_tests::{
    BUYER, ScriptedGateway, Shop, closed, commit_form, fast_poll, processing, settled, waiting,
};
use daily_fresh_storefront::services::checkout::StockStrategy;
use daily_fresh_storefront::services::payment::{
    PaymentError, PaymentGateway, PaymentService, ReconcileError, ReconcileOutcome,
};
use daily_fresh_storefront::store::OrderStore;

async fn place_order(shop: &Shop, pay_method: PayMethod) -> OrderNumber {
    let sku = shop.add_sku(1, 12, 10);
    shop.put_in_cart(BUYER, sku, 2).await;
    shop.checkout(StockStrategy::Pessimistic)
        .commit(Some(BUYER), &commit_form(&[sku], pay_method))
        .await
        .unwrap()
        .order_id
}

fn payment(shop: &Shop, gateway: &Arc<ScriptedGateway>) -> PaymentService {
    let gateway: Arc<dyn PaymentGateway> = gateway.clone();
    PaymentService::new(Arc::new(shop.store.clone()), gateway, fast_poll())
}

#[tokio::test(start_paused = true)]
async fn test_pending_then_settled_marks_order_paid() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![
        Ok(waiting()),
        Ok(processing()),
        Ok(settled("T-100")),
    ]));

    let outcome = payment(&shop, &gateway)
        .check(BUYER, &order_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Settled {
            trade_no: "T-100".to_string()
        }
    );
    assert_eq!(gateway.queries(), 3);
    let order = shop.store.find(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingReview);
    assert_eq!(order.trade_no.as_deref(), Some("T-100"));
}

#[tokio::test(start_paused = true)]
async fn test_check_on_paid_order_is_idempotent() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(settled("T-1"))]));
    let service = payment(&shop, &gateway);
    let cancel = CancellationToken::new();

    service.check(BUYER, &order_id, &cancel).await.unwrap();
    let again = service.check(BUYER, &order_id, &cancel).await.unwrap();

    assert_eq!(again, ReconcileOutcome::AlreadySettled);
    assert_eq!(gateway.queries(), 1);
    let order = shop.store.find(&order_id).await.unwrap().unwrap();
    assert_eq!(order.trade_no.as_deref(), Some("T-1"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_checks_record_payment_once() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(settled("T-9"))]));
    let service = payment(&shop, &gateway);
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        service.check(BUYER, &order_id, &cancel),
        service.check(BUYER, &order_id, &cancel),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let settled_count = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Settled { .. }))
        .count();
    assert_eq!(settled_count, 1, "{outcomes:?}");
}

#[tokio::test(start_paused = true)]
async fn test_closed_trade_fails_without_mutation() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(waiting()), Ok(closed())]));

    let err = payment(&shop, &gateway)
        .check(BUYER, &order_id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Reconcile(ReconcileError::Rejected { .. })
    ));
    let order = shop.store.find(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Unpaid);
    assert!(order.trade_no.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_gateway_error_is_terminal() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Err("bad gateway".to_string())]));

    let err = payment(&shop, &gateway)
        .check(BUYER, &order_id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Reconcile(ReconcileError::Gateway(_))
    ));
    assert_eq!(gateway.queries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_forever_times_out_at_deadline() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(waiting())]));

    let started = tokio::time::Instant::now();
    let err = payment(&shop, &gateway)
        .check(BUYER, &order_id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Reconcile(ReconcileError::TimedOut(d)) if d == fast_poll().deadline
    ));
    assert!(started.elapsed() >= fast_poll().deadline);
    assert!(gateway.queries() > 3);
    let order = shop.store.find(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Unpaid);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_polling() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(waiting())]));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });

    let err = payment(&shop, &gateway)
        .check(BUYER, &order_id, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Reconcile(ReconcileError::Cancelled)
    ));
    let polled = gateway.queries();
    assert!(polled >= 1);

    // Nothing keeps polling after the call returned.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.queries(), polled);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_token_never_polls() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(settled("T-2"))]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = payment(&shop, &gateway)
        .check(BUYER, &order_id, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::Reconcile(ReconcileError::Cancelled)
    ));
    assert_eq!(gateway.queries(), 0);
}

#[tokio::test]
async fn test_start_requires_unpaid_gateway_order_of_the_buyer() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::Gateway).await;
    let gateway = Arc::new(ScriptedGateway::new(Vec::new()));
    let service = payment(&shop, &gateway);

    let intent = service.start(BUYER, &order_id).await.unwrap();
    assert_eq!(intent.pay_url, "https://gateway.test/pay/abc");

    let err = service
        .start(UserId::new(77), &order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::OrderNotFound));

    shop.store.force_status(&order_id, OrderStatus::AwaitingReview);
    let err = service.start(BUYER, &order_id).await.unwrap_err();
    assert!(matches!(err, PaymentError::NotPayable { .. }));
}

#[tokio::test]
async fn test_cash_orders_cannot_be_paid_online() {
    let shop = Shop::new();
    let order_id = place_order(&shop, PayMethod::CashOnDelivery).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(settled("T-3"))]));
    let service = payment(&shop, &gateway);

    assert!(matches!(
        service.start(BUYER, &order_id).await,
        Err(PaymentError::NotPayable { .. })
    ));
    assert!(matches!(
        service
            .check(BUYER, &order_id, &CancellationToken::new())
            .await,
        Err(PaymentError::NotPayable { .. })
    ));
    assert_eq!(gateway.queries(), 0);
}
