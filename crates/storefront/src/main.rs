//! Daily Fresh Storefront - cart, order commit and payment.
//!
//! This binary serves the storefront JSON endpoints on port 3000.
//!
//! # Architecture
//!
//! - Axum web framework
//! - `PostgreSQL` for catalog, carts, orders and sessions; without a database
//!   URL everything runs on in-memory backends
//! - Third-party payment gateway over HTTPS
//!
//! Login and registration live in the account service, which shares the
//! session cookie.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use sentry::integrations::tracing as sentry_tracing;
use tower_sessions::MemoryStore as MemorySessionStore;
use tower_sessions_sqlx_store::PostgresStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daily_fresh_storefront::config::StorefrontConfig;
use daily_fresh_storefront::db;
use daily_fresh_storefront::routes;
use daily_fresh_storefront::services::payment::HttpPaymentGateway;
use daily_fresh_storefront::state::{AppState, Backends};
use daily_fresh_storefront::store::MemoryStore;

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "daily_fresh_storefront=info,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let gateway =
        Arc::new(HttpPaymentGateway::new(&config.payment).expect("Failed to build payment client"));

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p daily-fresh-cli -- migrate
    let (app, state) = if let Some(database_url) = &config.database_url {
        let pool = db::create_pool(database_url)
            .await
            .expect("Failed to create database pool");
        tracing::info!("Database pool created");

        let backends = Backends::postgres(&pool);
        let sessions = PostgresStore::new(pool.clone());
        let state = AppState::new(config.clone(), Some(pool), backends, gateway);
        (routes::router(state.clone(), sessions), state)
    } else {
        tracing::warn!("No database configured, using in-memory storage");
        let backends = Backends::memory(&MemoryStore::new());
        let state = AppState::new(config.clone(), None, backends, gateway);
        (routes::router(state.clone(), MemorySessionStore::default()), state)
    };

    tracing::info!(
        strategy = %config.checkout.stock_strategy,
        transit_price = %config.checkout.transit_price,
        "checkout configured"
    );

    let addr = config.socket_addr();
    tracing::info!("storefront listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let shutdown = state.shutdown_token().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop in-flight payment checks so connections can drain.
            shutdown.cancel();
        })
        .await
        .expect("Server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
