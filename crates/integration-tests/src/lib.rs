//! Shared fixtures for the Daily Fresh integration tests.
//!
//! The tests run the storefront services and router against the in-memory
//! backends, so no database or gateway is needed:
//!
//! ```bash
//! cargo test -p daily-fresh-integration-tests
//! ```

#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use secrecy::SecretString;
use url::Url;

use daily_fresh_core::{AddressId, GoodsId, OrderNumber, PayMethod, Price, SkuId, UserId};
use daily_fresh_storefront::config::{CheckoutConfig, PaymentConfig, StorefrontConfig};
use daily_fresh_storefront::models::{Address, Sku};
use daily_fresh_storefront::services::checkout::{CheckoutService, CommitForm, StockStrategy};
use daily_fresh_storefront::services::payment::{
    GatewayError, PaymentGateway, PaymentIntent, PaymentRequest, PollPolicy, TradeQuery,
};
use daily_fresh_storefront::store::{CartStore, MemoryStore};

/// The buyer used by most tests.
pub const BUYER: UserId = UserId::new(42);

/// The buyer's delivery address.
pub const BUYER_ADDRESS: AddressId = AddressId::new(7);

// =============================================================================
// Shop
// =============================================================================

/// An in-memory shop with one registered buyer.
#[derive(Clone)]
pub struct Shop {
    pub store: MemoryStore,
}

impl Default for Shop {
    fn default() -> Self {
        Self::new()
    }
}

impl Shop {
    /// A shop whose buyer has one default address.
    #[must_use]
    pub fn new() -> Self {
        let shop = Self {
            store: MemoryStore::new(),
        };
        shop.add_address(BUYER, BUYER_ADDRESS);
        shop
    }

    /// Register an address for `user`.
    pub fn add_address(&self, user: UserId, id: AddressId) {
        self.store.insert_address(Address {
            id,
            user_id: user,
            receiver: "Lin".to_string(),
            addr: "12 Market Street".to_string(),
            zip_code: Some("100000".to_string()),
            phone: "13800000000".to_string(),
            is_default: true,
        });
    }

    /// Add a SKU with a whole-unit price.
    pub fn add_sku(&self, id: i32, price: u32, stock: u32) -> SkuId {
        let sku_id = SkuId::new(id);
        self.store.insert_sku(Sku {
            id: sku_id,
            goods_id: GoodsId::new(1),
            name: format!("Produce #{id}"),
            unit: "kg".to_string(),
            price: Price::from_units(price),
            stock,
            sales: 0,
        });
        sku_id
    }

    /// Put `quantity` units of a SKU in a user's cart.
    pub async fn put_in_cart(&self, user: UserId, sku_id: SkuId, quantity: u32) {
        self.store
            .set_quantity(user, sku_id, quantity)
            .await
            .expect("in-memory cart write");
    }

    /// Committed stock and sales of a SKU.
    #[must_use]
    pub fn stock_and_sales(&self, sku_id: SkuId) -> (u32, u32) {
        let sku = self.store.sku_snapshot(sku_id).expect("sku exists");
        (sku.stock, sku.sales)
    }

    /// A checkout engine over this shop.
    #[must_use]
    pub fn checkout(&self, strategy: StockStrategy) -> CheckoutService {
        let store = Arc::new(self.store.clone());
        CheckoutService::new(store.clone(), store.clone(), store, strategy)
    }
}

/// A commit form for the buyer's address.
#[must_use]
pub fn commit_form(sku_ids: &[SkuId], pay_method: PayMethod) -> CommitForm {
    CommitForm {
        addr_id: Some(BUYER_ADDRESS.to_string()),
        pay_method: Some(pay_method.code().to_string()),
        sku_ids: Some(
            sku_ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// A fixed local time, for deterministic order numbers.
#[must_use]
pub fn fixed_time() -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2026, 3, 1, 9, 30, 0)
        .single()
        .expect("unambiguous local time")
}

// =============================================================================
// Gateway
// =============================================================================

/// A payment gateway that replays a script of answers.
///
/// Each query pops the next answer; once the script is exhausted the last
/// answer repeats.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<TradeQuery, String>>>,
    last: Mutex<Option<Result<TradeQuery, String>>>,
    queries: AtomicUsize,
    pay_url: String,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new(script: Vec<Result<TradeQuery, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            queries: AtomicUsize::new(0),
            pay_url: "https://gateway.test/pay/abc".to_string(),
        }
    }

    /// Number of trade queries received so far.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

/// A query answer meaning "paid".
#[must_use]
pub fn settled(trade_no: &str) -> TradeQuery {
    TradeQuery {
        code: "10000".to_string(),
        msg: None,
        trade_status: Some("TRADE_SUCCESS".to_string()),
        trade_no: Some(trade_no.to_string()),
    }
}

/// A query answer meaning "not paid yet".
#[must_use]
pub fn waiting() -> TradeQuery {
    TradeQuery {
        code: "10000".to_string(),
        msg: None,
        trade_status: Some("WAIT_BUYER_PAY".to_string()),
        trade_no: None,
    }
}

/// A query answer meaning "still processing".
#[must_use]
pub fn processing() -> TradeQuery {
    TradeQuery {
        code: "40004".to_string(),
        msg: Some("Business Failed".to_string()),
        trade_status: None,
        trade_no: None,
    }
}

/// A query answer meaning "closed without payment".
#[must_use]
pub fn closed() -> TradeQuery {
    TradeQuery {
        code: "10000".to_string(),
        msg: None,
        trade_status: Some("TRADE_CLOSED".to_string()),
        trade_no: None,
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment(
        &self,
        _request: &PaymentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        Ok(PaymentIntent {
            pay_url: self.pay_url.clone(),
        })
    }

    async fn query_payment(&self, _order_id: &OrderNumber) -> Result<TradeQuery, GatewayError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(answer) = next {
            *last = Some(answer);
        }
        match last.clone() {
            Some(Ok(query)) => Ok(query),
            Some(Err(message)) => Err(GatewayError::Api {
                status: 502,
                message,
            }),
            None => Ok(waiting()),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// A poll policy with short, round delays.
#[must_use]
pub const fn fast_poll() -> PollPolicy {
    PollPolicy {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(4),
        deadline: Duration::from_secs(30),
    }
}

/// Storefront configuration for in-memory runs.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: None,
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        checkout: CheckoutConfig::default(),
        payment: PaymentConfig {
            gateway_url: Url::parse("https://gateway.test/api/").expect("valid url"),
            app_id: "2021000000000001".to_string(),
            app_secret: SecretString::from("k3y-Xq9-p2Lm-77aZ"),
            return_url: None,
            notify_url: None,
            request_timeout: Duration::from_secs(5),
            poll: fast_poll(),
        },
        sentry_dsn: None,
        sentry_environment: None,
    }
}
