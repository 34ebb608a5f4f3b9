//! Stock reservation strategies.
//!
//! A reservation takes `quantity` units of one SKU inside an open ledger
//! transaction. Two strategies exist:
//!
//! - [`Pessimistic`]: lock the row, check, write. Concurrent buyers of the same
//!   SKU queue on the lock.
//! - [`Optimistic`]: read unlocked, then write only if stock is unchanged;
//!   retry on a lost race up to a bounded number of attempts.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use daily_fresh_core::{Price, SkuId};

use super::error::LedgerError;
use crate::store::{LedgerTransaction, StockLevel};

/// Default attempt budget for [`Optimistic`].
pub const DEFAULT_OPTIMISTIC_ATTEMPTS: u32 = 3;

/// Result of a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub sku_id: SkuId,
    pub quantity: u32,
    /// Unit price read in the same transaction as the stock.
    pub unit_price: Price,
    pub stock_after: u32,
    pub sales_after: u32,
}

/// Takes stock for one SKU inside a ledger transaction.
#[async_trait]
pub trait StockReservation: Send + Sync {
    /// Reserve `quantity` units of `sku_id`.
    async fn reserve(
        &self,
        tx: &mut dyn LedgerTransaction,
        sku_id: SkuId,
        quantity: u32,
    ) -> Result<Reservation, LedgerError>;
}

fn take(level: StockLevel, quantity: u32) -> Result<Reservation, LedgerError> {
    if quantity > level.stock {
        return Err(LedgerError::InsufficientStock {
            sku_id: level.sku_id,
            requested: quantity,
            available: level.stock,
        });
    }
    Ok(Reservation {
        sku_id: level.sku_id,
        quantity,
        unit_price: level.price,
        stock_after: level.stock - quantity,
        sales_after: level.sales.saturating_add(quantity),
    })
}

/// Row-lock strategy (`SELECT ... FOR UPDATE`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Pessimistic;

#[async_trait]
impl StockReservation for Pessimistic {
    async fn reserve(
        &self,
        tx: &mut dyn LedgerTransaction,
        sku_id: SkuId,
        quantity: u32,
    ) -> Result<Reservation, LedgerError> {
        let level = tx
            .lock_sku(sku_id)
            .await?
            .ok_or(LedgerError::SkuNotFound(sku_id))?;
        let reservation = take(level, quantity)?;
        tx.write_stock(sku_id, reservation.stock_after, reservation.sales_after)
            .await?;
        Ok(reservation)
    }
}

/// Compare-and-set strategy with bounded retries.
#[derive(Debug, Clone, Copy)]
pub struct Optimistic {
    max_attempts: u32,
}

impl Optimistic {
    /// Create the strategy. At least one attempt is always made.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempt budget per SKU.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for Optimistic {
    fn default() -> Self {
        Self::new(DEFAULT_OPTIMISTIC_ATTEMPTS)
    }
}

#[async_trait]
impl StockReservation for Optimistic {
    async fn reserve(
        &self,
        tx: &mut dyn LedgerTransaction,
        sku_id: SkuId,
        quantity: u32,
    ) -> Result<Reservation, LedgerError> {
        for attempt in 1..=self.max_attempts {
            let level = tx
                .read_sku(sku_id)
                .await?
                .ok_or(LedgerError::SkuNotFound(sku_id))?;
            let reservation = take(level, quantity)?;

            if tx
                .write_stock_if(
                    sku_id,
                    level.stock,
                    reservation.stock_after,
                    reservation.sales_after,
                )
                .await?
            {
                return Ok(reservation);
            }
            debug!(%sku_id, attempt, "stock changed concurrently, retrying");
        }

        Err(LedgerError::Contention {
            sku_id,
            attempts: self.max_attempts,
        })
    }
}

/// Configured reservation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StockStrategy {
    #[default]
    Pessimistic,
    Optimistic { max_attempts: u32 },
}

impl StockStrategy {
    /// Build the strategy implementation.
    #[must_use]
    pub fn build(self) -> Arc<dyn StockReservation> {
        match self {
            Self::Pessimistic => Arc::new(Pessimistic),
            Self::Optimistic { max_attempts } => Arc::new(Optimistic::new(max_attempts)),
        }
    }
}

impl fmt::Display for StockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pessimistic => f.write_str("pessimistic"),
            Self::Optimistic { max_attempts } => write!(f, "optimistic({max_attempts})"),
        }
    }
}

impl FromStr for StockStrategy {
    type Err = String;

    /// Parse `pessimistic` or `optimistic`. The attempt budget is set
    /// separately.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pessimistic" => Ok(Self::Pessimistic),
            "optimistic" => Ok(Self::Optimistic {
                max_attempts: DEFAULT_OPTIMISTIC_ATTEMPTS,
            }),
            other => Err(format!(
                "unknown stock strategy '{other}' (expected 'pessimistic' or 'optimistic')"
            )),
        }
    }
}
