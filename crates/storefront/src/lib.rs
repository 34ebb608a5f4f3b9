//! Daily Fresh Storefront library.
//!
//! Cart, order commit and payment reconciliation for the Daily Fresh grocery
//! store. The binary in `main.rs` serves it over HTTP; the library form lets
//! the integration tests drive the services and router directly.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
