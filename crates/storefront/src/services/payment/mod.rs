//! Payment flow for gateway-paid orders.
//!
//! [`PaymentService::start`] asks the gateway for a payment page;
//! [`PaymentService::check`] runs the [`PaymentReconciler`] until the gateway
//! reports a terminal state.

mod gateway;
mod reconcile;

pub use gateway::{
    CODE_PROCESSING, CODE_SUCCESS, GatewayError, HttpPaymentGateway, PaymentGateway,
    PaymentIntent, PaymentRequest, TRADE_SUCCESS, TradeQuery, WAIT_BUYER_PAY,
};
pub use reconcile::{
    PaymentReconciler, PollPolicy, ReconcileError, ReconcileOutcome, TradeState, classify,
};

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use daily_fresh_core::{OrderNumber, OrderStatus, PayMethod, UserId};

use crate::db::RepositoryError;
use crate::models::Order;
use crate::store::OrderStore;

/// Errors from the payment endpoints.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The order does not exist or belongs to someone else.
    #[error("order not found")]
    OrderNotFound,

    /// The order is not a gateway order in a payable state.
    #[error("order {order_id} cannot be paid online (method {pay_method:?}, status {status})")]
    NotPayable {
        order_id: OrderNumber,
        pay_method: PayMethod,
        status: OrderStatus,
    },

    /// Creating the payment failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Reconciliation ended without a recorded payment.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Payment service over an order store and a gateway.
#[derive(Clone)]
pub struct PaymentService {
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    reconciler: PaymentReconciler,
}

impl PaymentService {
    /// Create a payment service.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        policy: PollPolicy,
    ) -> Self {
        let reconciler = PaymentReconciler::new(Arc::clone(&gateway), Arc::clone(&orders), policy);
        Self {
            orders,
            gateway,
            reconciler,
        }
    }

    /// Create a gateway payment for an unpaid order of `user`.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::OrderNotFound` or `PaymentError::NotPayable` if
    /// the order cannot be paid online, `PaymentError::Gateway` if the gateway
    /// call fails.
    #[instrument(skip(self), fields(user_id = %user, order_id = %order_id))]
    pub async fn start(
        &self,
        user: UserId,
        order_id: &OrderNumber,
    ) -> Result<PaymentIntent, PaymentError> {
        let order = self.gateway_order(user, order_id).await?;
        if order.status != OrderStatus::Unpaid {
            return Err(not_payable(&order));
        }

        let request = PaymentRequest {
            order_id: order.order_id.clone(),
            amount: order.total_price,
            subject: format!("Daily Fresh order {}", order.order_id),
        };
        Ok(self.gateway.create_payment(&request).await?)
    }

    /// Wait for the gateway to settle the payment of an order of `user`.
    ///
    /// Returns `ReconcileOutcome::AlreadySettled` without polling when the
    /// order is already paid.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::OrderNotFound` or `PaymentError::NotPayable` for
    /// orders that are not gateway orders of this user, and
    /// `PaymentError::Reconcile` when polling ends without a payment.
    #[instrument(skip(self, cancel), fields(user_id = %user, order_id = %order_id))]
    pub async fn check(
        &self,
        user: UserId,
        order_id: &OrderNumber,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let order = self.gateway_order(user, order_id).await?;
        Ok(self.reconciler.reconcile(&order, cancel).await?)
    }

    async fn gateway_order(
        &self,
        user: UserId,
        order_id: &OrderNumber,
    ) -> Result<Order, PaymentError> {
        let order = self
            .orders
            .find_for_user(user, order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound)?;
        if order.pay_method != PayMethod::Gateway {
            return Err(not_payable(&order));
        }
        Ok(order)
    }
}

fn not_payable(order: &Order) -> PaymentError {
    PaymentError::NotPayable {
        order_id: order.order_id.clone(),
        pay_method: order.pay_method,
        status: order.status,
    }
}
