//! Order commit engine.
//!
//! Converts cart lines into a persisted order in a single ledger transaction:
//!
//! 1. Validate the request (session, fields, payment method, address).
//! 2. Insert the order header with zero totals.
//! 3. For each SKU, in ascending id order, reserve stock through the
//!    configured [`StockReservation`] and insert the line at the current price.
//! 4. Write the totals (items plus shipping) and commit.
//! 5. Remove the committed SKUs from the cart, best effort.
//!
//! Any failure in steps 2-4 rolls back every write. Sorting SKU ids keeps the
//! lock order identical across concurrent commits.

mod error;
mod strategy;

pub use error::{CommitError, LedgerError};
pub use strategy::{
    DEFAULT_OPTIMISTIC_ATTEMPTS, Optimistic, Pessimistic, Reservation, StockReservation,
    StockStrategy,
};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use daily_fresh_core::{AddressId, OrderNumber, PayMethod, Price, SkuId, UserId, line_total};

use crate::db::RepositoryError;
use crate::models::OrderLine;
use crate::store::{AddressBook, CartStore, InventoryLedger, LedgerTransaction, NewOrder};

/// Default flat shipping fee.
pub const DEFAULT_TRANSIT_PRICE: u32 = 10;

/// Raw commit form as submitted by the browser.
///
/// Fields stay as strings so each kind of bad input maps to its own result
/// code instead of a blanket deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitForm {
    pub addr_id: Option<String>,
    pub pay_method: Option<String>,
    /// SKU ids separated by commas or whitespace.
    pub sku_ids: Option<String>,
}

/// A commit request that passed field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub address_id: AddressId,
    pub pay_method: PayMethod,
    /// Deduplicated, ascending.
    pub sku_ids: Vec<SkuId>,
}

impl CommitForm {
    /// Check presence first, then formats, then the payment method.
    ///
    /// # Errors
    ///
    /// Returns `CommitError::InvalidInput` for missing or malformed fields and
    /// `CommitError::InvalidPaymentMethod` for an unknown payment method.
    pub fn validate(&self) -> Result<CommitRequest, CommitError> {
        let addr_id = non_blank(self.addr_id.as_deref());
        let pay_method = non_blank(self.pay_method.as_deref());
        let sku_ids = non_blank(self.sku_ids.as_deref());
        let (Some(addr_id), Some(pay_method), Some(sku_ids)) = (addr_id, pay_method, sku_ids)
        else {
            return Err(CommitError::InvalidInput("missing field"));
        };

        let address_id: AddressId = addr_id
            .parse()
            .map_err(|_| CommitError::InvalidInput("malformed address id"))?;
        let sku_ids = parse_sku_ids(sku_ids)?;
        let pay_method: PayMethod = pay_method
            .parse()
            .map_err(|_| CommitError::InvalidPaymentMethod)?;

        Ok(CommitRequest {
            address_id,
            pay_method,
            sku_ids,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a comma/whitespace separated id list into sorted, unique ids.
///
/// # Errors
///
/// Returns `CommitError::InvalidInput` if any id is malformed or the list is
/// empty.
pub fn parse_sku_ids(raw: &str) -> Result<Vec<SkuId>, CommitError> {
    let ids = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<SkuId>())
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(|_| CommitError::InvalidInput("malformed sku id"))?;
    if ids.is_empty() {
        return Err(CommitError::InvalidInput("no sku ids"));
    }
    Ok(ids.into_iter().collect())
}

/// A committed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: OrderNumber,
    pub total_count: u32,
    /// SKUs whose stock changed, ascending.
    pub sku_ids: Vec<SkuId>,
    /// Items plus shipping.
    pub total_price: Price,
    pub transit_price: Price,
}

type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// The order commit engine.
#[derive(Clone)]
pub struct CheckoutService {
    addresses: Arc<dyn AddressBook>,
    carts: Arc<dyn CartStore>,
    ledger: Arc<dyn InventoryLedger>,
    reservation: Arc<dyn StockReservation>,
    transit_price: Price,
    clock: Clock,
}

impl CheckoutService {
    /// Create the engine with the given reservation strategy.
    #[must_use]
    pub fn new(
        addresses: Arc<dyn AddressBook>,
        carts: Arc<dyn CartStore>,
        ledger: Arc<dyn InventoryLedger>,
        strategy: StockStrategy,
    ) -> Self {
        Self {
            addresses,
            carts,
            ledger,
            reservation: strategy.build(),
            transit_price: Price::from_units(DEFAULT_TRANSIT_PRICE),
            clock: Arc::new(Local::now),
        }
    }

    /// Set the flat shipping fee.
    #[must_use]
    pub const fn with_transit_price(mut self, transit_price: Price) -> Self {
        self.transit_price = transit_price;
        self
    }

    /// Replace the clock used for order numbers and timestamps.
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Local> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Flat shipping fee added to every order.
    #[must_use]
    pub const fn transit_price(&self) -> Price {
        self.transit_price
    }

    /// Commit the selected cart lines as a new order.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is written. Errors after
    /// the transaction opens roll it back; see [`CommitError`] for the kinds.
    #[instrument(skip(self, form), fields(user_id = ?user, order_id = tracing::field::Empty))]
    pub async fn commit(
        &self,
        user: Option<UserId>,
        form: &CommitForm,
    ) -> Result<OrderReceipt, CommitError> {
        let user = user.ok_or(CommitError::Unauthenticated)?;
        let request = form.validate()?;

        self.addresses
            .find_for_user(user, request.address_id)
            .await?
            .ok_or(CommitError::AddressNotFound)?;

        let mut lines = Vec::with_capacity(request.sku_ids.len());
        for &sku_id in &request.sku_ids {
            lines.push((sku_id, self.carts.quantity(user, sku_id).await?));
        }

        let now = (self.clock)();
        let order_id = OrderNumber::generate(now.naive_local(), user);
        tracing::Span::current().record("order_id", tracing::field::display(&order_id));

        let header = NewOrder {
            order_id,
            user_id: user,
            address_id: request.address_id,
            pay_method: request.pay_method,
            transit_price: self.transit_price,
            created_at: now.with_timezone(&Utc),
        };

        let mut tx = self.ledger.begin().await?;
        let receipt = match self.write_order(&mut *tx, &header, &lines).await {
            Ok(receipt) => receipt,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                if err.is_transaction_failure() {
                    warn!(error = %err, "order commit failed");
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        info!(
            total_count = receipt.total_count,
            total_price = %receipt.total_price,
            "order committed"
        );

        if let Err(e) = self.carts.remove(user, &request.sku_ids).await {
            warn!(error = %e, "failed to clear committed cart lines");
        }

        Ok(receipt)
    }

    async fn write_order(
        &self,
        tx: &mut dyn LedgerTransaction,
        header: &NewOrder,
        lines: &[(SkuId, Option<u32>)],
    ) -> Result<OrderReceipt, CommitError> {
        tx.insert_order(header).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => CommitError::DuplicateOrder(header.order_id.clone()),
            other => CommitError::Repository(other),
        })?;

        let mut total_count: u32 = 0;
        let mut items = Price::ZERO;
        for &(sku_id, quantity) in lines {
            let Some(quantity) = quantity else {
                // Selecting a SKU that is not in the cart is bad input (code 1),
                // not a transaction failure.
                return Err(if tx.read_sku(sku_id).await?.is_none() {
                    CommitError::SkuNotFound(sku_id)
                } else {
                    CommitError::InvalidInput("sku not in cart")
                });
            };

            let reservation = self.reservation.reserve(&mut *tx, sku_id, quantity).await?;
            tx.insert_line(&OrderLine {
                order_id: header.order_id.clone(),
                sku_id,
                quantity,
                unit_price: reservation.unit_price,
                comment: None,
            })
            .await?;

            total_count = total_count.saturating_add(quantity);
            items = items + line_total(reservation.unit_price, quantity);
        }

        let total_price = items + header.transit_price;
        tx.set_totals(&header.order_id, total_count, total_price)
            .await?;

        Ok(OrderReceipt {
            order_id: header.order_id.clone(),
            total_count,
            sku_ids: lines.iter().map(|&(sku_id, _)| sku_id).collect(),
            total_price,
            transit_price: header.transit_price,
        })
    }
}
