//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::StorefrontConfig;
use crate::db::{
    AddressRepository, CartRepository, CatalogRepository, OrderRepository, PgInventoryLedger,
};
use crate::services::payment::PaymentGateway;
use crate::services::{CartService, CheckoutService, PaymentService, ReviewService};
use crate::store::{
    AddressBook, CachedCatalog, CartStore, Catalog, InventoryLedger, MemoryStore, OrderStore,
};

/// Maximum number of SKUs kept in the catalog read cache.
const CATALOG_CACHE_CAPACITY: u64 = 10_000;

/// How long a cached SKU may be served.
const CATALOG_CACHE_TTL: Duration = Duration::from_secs(30);

/// The storage implementations behind the services.
#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn Catalog>,
    pub addresses: Arc<dyn AddressBook>,
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn InventoryLedger>,
}

impl Backends {
    /// Postgres repositories over one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            catalog: Arc::new(CatalogRepository::new(pool.clone())),
            addresses: Arc::new(AddressRepository::new(pool.clone())),
            carts: Arc::new(CartRepository::new(pool.clone())),
            orders: Arc::new(OrderRepository::new(pool.clone())),
            ledger: Arc::new(PgInventoryLedger::new(pool.clone())),
        }
    }

    /// Every backend served by one in-memory store.
    #[must_use]
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            catalog: Arc::new(store.clone()),
            addresses: Arc::new(store.clone()),
            carts: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
        }
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    catalog: Arc<CachedCatalog>,
    addresses: Arc<dyn AddressBook>,
    cart: CartService,
    checkout: CheckoutService,
    payment: PaymentService,
    reviews: ReviewService,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool, if running against a database
    /// * `backends` - Storage used by the services
    /// * `gateway` - Payment gateway client
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        pool: Option<PgPool>,
        backends: Backends,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let Backends {
            catalog,
            addresses,
            carts,
            orders,
            ledger,
        } = backends;

        // Cart views may read slightly stale SKUs; the commit path goes
        // straight to the ledger.
        let cached = Arc::new(CachedCatalog::new(
            catalog,
            CATALOG_CACHE_CAPACITY,
            CATALOG_CACHE_TTL,
        ));

        let cart = CartService::new(Arc::clone(&cached) as Arc<dyn Catalog>, Arc::clone(&carts));
        let checkout = CheckoutService::new(
            Arc::clone(&addresses),
            carts,
            ledger,
            config.checkout.stock_strategy,
        )
        .with_transit_price(config.checkout.transit_price);
        let payment = PaymentService::new(Arc::clone(&orders), gateway, config.payment.poll);
        let reviews = ReviewService::new(orders);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                catalog: cached,
                addresses,
                cart,
                checkout,
                payment,
                reviews,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool, if any.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    /// The cached SKU catalog used by views.
    #[must_use]
    pub fn catalog(&self) -> &CachedCatalog {
        &self.inner.catalog
    }

    /// The buyer's address book.
    #[must_use]
    pub fn addresses(&self) -> &Arc<dyn AddressBook> {
        &self.inner.addresses
    }

    #[must_use]
    pub fn cart(&self) -> &CartService {
        &self.inner.cart
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn payment(&self) -> &PaymentService {
        &self.inner.payment
    }

    #[must_use]
    pub fn reviews(&self) -> &ReviewService {
        &self.inner.reviews
    }

    /// Token cancelled when the server starts shutting down. Long-running
    /// payment checks watch it.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
