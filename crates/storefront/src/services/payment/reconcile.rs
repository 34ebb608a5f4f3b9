//! Payment reconciliation loop.
//!
//! Polls the gateway for an unpaid order until it reaches a terminal state,
//! with exponential backoff between polls. The loop stops early when the
//! caller's [`CancellationToken`] fires or the deadline passes. It holds no
//! inventory locks.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use daily_fresh_core::{OrderNumber, OrderStatus};

use super::gateway::{
    CODE_PROCESSING, CODE_SUCCESS, GatewayError, PaymentGateway, TRADE_SUCCESS, TradeQuery,
    WAIT_BUYER_PAY,
};
use crate::db::RepositoryError;
use crate::models::Order;
use crate::store::OrderStore;

/// How a single gateway answer is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeState {
    /// Paid; carries the gateway's trade number.
    Settled { trade_no: String },
    /// Not final yet; poll again.
    Pending,
    /// Terminal failure.
    Failed { code: String, message: String },
}

/// Classify a trade query response.
#[must_use]
pub fn classify(query: &TradeQuery) -> TradeState {
    let status = query.trade_status.as_deref();
    match (query.code.as_str(), status) {
        (CODE_SUCCESS, Some(TRADE_SUCCESS)) => match query.trade_no.as_deref() {
            Some(trade_no) if !trade_no.is_empty() => TradeState::Settled {
                trade_no: trade_no.to_owned(),
            },
            _ => TradeState::Failed {
                code: query.code.clone(),
                message: "trade success without trade number".to_owned(),
            },
        },
        (CODE_PROCESSING, _) | (CODE_SUCCESS, Some(WAIT_BUYER_PAY)) => TradeState::Pending,
        _ => TradeState::Failed {
            code: query.code.clone(),
            message: query
                .msg
                .clone()
                .or_else(|| query.trade_status.clone())
                .unwrap_or_default(),
        },
    }
}

/// Backoff and deadline for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay after the first pending answer.
    pub initial: Duration,
    /// Upper bound for a single delay.
    pub max: Duration,
    /// Total time budget for one reconciliation.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            deadline: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    /// Un-jittered delay before poll number `attempt + 1` (doubling, capped).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay with equal jitter: half fixed, half random.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let half = base / 2;
        let spread = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=spread);
        half + Duration::from_millis(jitter)
    }
}

/// How a reconciliation ended successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This call observed the payment and recorded it.
    Settled { trade_no: String },
    /// The order was already paid; nothing was written.
    AlreadySettled,
}

/// Errors that end a reconciliation without a recorded payment.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The caller cancelled.
    #[error("payment check cancelled")]
    Cancelled,

    /// The deadline passed while the trade was still pending.
    #[error("payment still pending after {0:?}")]
    TimedOut(Duration),

    /// The gateway reported a terminal failure.
    #[error("payment failed: {code} - {message}")]
    Rejected { code: String, message: String },

    /// The gateway could not be reached or answered garbage.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Drives an order from `Unpaid` to `AwaitingReview` once the gateway
/// confirms payment.
#[derive(Clone)]
pub struct PaymentReconciler {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderStore>,
    policy: PollPolicy,
}

impl PaymentReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderStore>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            gateway,
            orders,
            policy,
        }
    }

    /// The polling policy in use.
    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll until the order's payment is settled, fails, is cancelled or the
    /// deadline passes.
    ///
    /// An order that is already paid returns immediately without polling.
    ///
    /// # Errors
    ///
    /// See [`ReconcileError`]. No error path mutates the order.
    #[instrument(skip(self, order, cancel), fields(order_id = %order.order_id))]
    pub async fn reconcile(
        &self,
        order: &Order,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if order.status.is_paid() {
            debug!(status = %order.status, "order already paid");
            return Ok(ReconcileOutcome::AlreadySettled);
        }

        let deadline = Instant::now() + self.policy.deadline;
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("payment check cancelled");
                Err(ReconcileError::Cancelled)
            }
            result = tokio::time::timeout_at(deadline, self.poll(&order.order_id)) => {
                result.unwrap_or_else(|_| {
                    warn!(deadline = ?self.policy.deadline, "payment check timed out");
                    Err(ReconcileError::TimedOut(self.policy.deadline))
                })
            }
        }
    }

    async fn poll(&self, order_id: &OrderNumber) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempt: u32 = 0;
        loop {
            let query = self.gateway.query_payment(order_id).await?;
            match classify(&query) {
                TradeState::Settled { trade_no } => {
                    return if self.orders.mark_paid(order_id, &trade_no).await? {
                        info!(%trade_no, status = %OrderStatus::AwaitingReview, "payment settled");
                        Ok(ReconcileOutcome::Settled { trade_no })
                    } else {
                        debug!("payment already recorded by another check");
                        Ok(ReconcileOutcome::AlreadySettled)
                    };
                }
                TradeState::Pending => {
                    let delay = self.policy.delay(attempt);
                    debug!(attempt, ?delay, code = %query.code, "payment pending");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                TradeState::Failed { code, message } => {
                    warn!(%code, %message, "payment failed");
                    return Err(ReconcileError::Rejected { code, message });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(code: &str, status: Option<&str>, trade_no: Option<&str>) -> TradeQuery {
        TradeQuery {
            code: code.to_owned(),
            msg: None,
            trade_status: status.map(str::to_owned),
            trade_no: trade_no.map(str::to_owned),
        }
    }

    #[test]
    fn test_classify_terminal_and_transient_states() {
        assert_eq!(
            classify(&query("10000", Some("TRADE_SUCCESS"), Some("T1"))),
            TradeState::Settled {
                trade_no: "T1".to_owned()
            }
        );
        assert_eq!(classify(&query("40004", None, None)), TradeState::Pending);
        assert_eq!(
            classify(&query("10000", Some("WAIT_BUYER_PAY"), None)),
            TradeState::Pending
        );
        assert!(matches!(
            classify(&query("10000", Some("TRADE_CLOSED"), None)),
            TradeState::Failed { .. }
        ));
        assert!(matches!(
            classify(&query("20000", None, None)),
            TradeState::Failed { .. }
        ));
    }

    #[test]
    fn test_success_without_trade_number_is_failure() {
        assert!(matches!(
            classify(&query("10000", Some("TRADE_SUCCESS"), Some(""))),
            TradeState::Failed { .. }
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = PollPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            deadline: Duration::from_secs(60),
        };
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay(3), Duration::from_secs(5));
        assert_eq!(policy.base_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = PollPolicy::default();
        for attempt in 0..6 {
            let base = policy.base_delay(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= base / 2 && delay <= base, "{delay:?} vs {base:?}");
        }
    }
}
