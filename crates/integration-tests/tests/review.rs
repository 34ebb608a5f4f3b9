//! Reviews of delivered orders.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use daily_fresh_core::{OrderNumber, OrderStatus, PayMethod, SkuId, UserId};
use daily_fresh_integration_tests::{BUYER, Shop, commit_form};
use daily_fresh_storefront::services::checkout::StockStrategy;
use daily_fresh_storefront::services::review::{
    MAX_COMMENT_CHARS, ReviewEntry, ReviewError, ReviewService,
};
use daily_fresh_storefront::store::OrderStore;

struct Delivered {
    shop: Shop,
    order_id: OrderNumber,
    apples: SkuId,
    pears: SkuId,
}

async fn delivered_order() -> Delivered {
    let shop = Shop::new();
    let apples = shop.add_sku(1, 8, 10);
    let pears = shop.add_sku(2, 6, 10);
    shop.put_in_cart(BUYER, apples, 1).await;
    shop.put_in_cart(BUYER, pears, 2).await;
    let order_id = shop
        .checkout(StockStrategy::Pessimistic)
        .commit(Some(BUYER), &commit_form(&[apples, pears], PayMethod::BankCard))
        .await
        .unwrap()
        .order_id;
    assert!(shop.store.force_status(&order_id, OrderStatus::AwaitingReview));
    Delivered {
        shop,
        order_id,
        apples,
        pears,
    }
}

fn entry(sku_id: SkuId, content: &str) -> ReviewEntry {
    ReviewEntry {
        sku_id,
        content: content.to_string(),
    }
}

fn reviews(shop: &Shop) -> ReviewService {
    ReviewService::new(Arc::new(shop.store.clone()))
}

#[tokio::test]
async fn test_review_completes_order() {
    let d = delivered_order().await;

    reviews(&d.shop)
        .submit(
            BUYER,
            &d.order_id,
            &[entry(d.pears, "  juicy  "), entry(d.apples, "crisp")],
        )
        .await
        .unwrap();

    let order = d.shop.store.find(&d.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Reviewed);

    let lines = OrderStore::lines(&d.shop.store, &d.order_id).await.unwrap();
    let comment = |sku| {
        lines
            .iter()
            .find(|l| l.sku_id == sku)
            .and_then(|l| l.comment.clone())
    };
    assert_eq!(comment(d.apples).as_deref(), Some("crisp"));
    assert_eq!(comment(d.pears).as_deref(), Some("juicy"));
}

#[tokio::test]
async fn test_review_must_cover_every_line_once() {
    let d = delivered_order().await;
    let service = reviews(&d.shop);

    let missing = service
        .submit(BUYER, &d.order_id, &[entry(d.apples, "crisp")])
        .await;
    assert!(matches!(missing, Err(ReviewError::Coverage(_))));

    let twice = service
        .submit(
            BUYER,
            &d.order_id,
            &[
                entry(d.apples, "crisp"),
                entry(d.apples, "again"),
                entry(d.pears, "juicy"),
            ],
        )
        .await;
    assert!(matches!(twice, Err(ReviewError::Coverage(_))));

    let foreign = service
        .submit(
            BUYER,
            &d.order_id,
            &[
                entry(d.apples, "crisp"),
                entry(d.pears, "juicy"),
                entry(SkuId::new(99), "?"),
            ],
        )
        .await;
    assert!(matches!(foreign, Err(ReviewError::Coverage(_))));

    let blank = service
        .submit(
            BUYER,
            &d.order_id,
            &[entry(d.apples, "   "), entry(d.pears, "juicy")],
        )
        .await;
    assert!(matches!(blank, Err(ReviewError::InvalidComment(id)) if id == d.apples));

    let long = "x".repeat(MAX_COMMENT_CHARS + 1);
    let oversized = service
        .submit(
            BUYER,
            &d.order_id,
            &[entry(d.apples, "crisp"), entry(d.pears, &long)],
        )
        .await;
    assert!(matches!(oversized, Err(ReviewError::InvalidComment(id)) if id == d.pears));

    // No partial writes.
    let order = d.shop.store.find(&d.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingReview);
    let lines = OrderStore::lines(&d.shop.store, &d.order_id).await.unwrap();
    assert!(lines.iter().all(|l| l.comment.is_none()));
}

#[tokio::test]
async fn test_review_requires_awaiting_review_status() {
    let d = delivered_order().await;
    let service = reviews(&d.shop);
    let full = [entry(d.apples, "crisp"), entry(d.pears, "juicy")];

    d.shop.store.force_status(&d.order_id, OrderStatus::Unpaid);
    let err = service.submit(BUYER, &d.order_id, &full).await.unwrap_err();
    assert!(matches!(err, ReviewError::WrongStatus(OrderStatus::Unpaid)));

    d.shop
        .store
        .force_status(&d.order_id, OrderStatus::AwaitingReview);
    service.submit(BUYER, &d.order_id, &full).await.unwrap();

    let again = service.submit(BUYER, &d.order_id, &full).await.unwrap_err();
    assert!(matches!(again, ReviewError::WrongStatus(OrderStatus::Reviewed)));
}

#[tokio::test]
async fn test_review_of_someone_elses_order_is_not_found() {
    let d = delivered_order().await;

    let err = reviews(&d.shop)
        .submit(
            UserId::new(77),
            &d.order_id,
            &[entry(d.apples, "crisp"), entry(d.pears, "juicy")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReviewError::OrderNotFound));
}
