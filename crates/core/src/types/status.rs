//! Status enums for orders and payments.
//!
//! Both enums are persisted as `SMALLINT` codes. The numeric codes are part of
//! the wire format (clients submit `pay_method=3`) and must not be renumbered.

use serde::{Deserialize, Serialize};

/// How the buyer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum PayMethod {
    /// Pay the courier on delivery.
    CashOnDelivery = 1,
    /// Bank card settled offline.
    BankCard = 2,
    /// Third-party payment gateway; settlement is confirmed by polling.
    Gateway = 3,
}

impl PayMethod {
    /// All recognised payment methods.
    pub const ALL: [Self; 3] = [Self::CashOnDelivery, Self::BankCard, Self::Gateway];

    /// The persisted numeric code.
    #[must_use]
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Look up a payment method by its numeric code.
    #[must_use]
    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CashOnDelivery => "Cash on delivery",
            Self::BankCard => "Bank card",
            Self::Gateway => "Online payment",
        }
    }
}

impl std::str::FromStr for PayMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i16>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| format!("invalid pay method: {s}"))
    }
}

/// Order lifecycle status.
///
/// ```text
/// Unpaid(1) --trade success--> AwaitingReview(4) --review--> Reviewed(5)
/// ```
///
/// `UnshippedPaid` and `Shipped` are driven by fulfilment outside this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Unpaid = 1,
    UnshippedPaid = 2,
    Shipped = 3,
    AwaitingReview = 4,
    Reviewed = 5,
}

impl OrderStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Unpaid,
        Self::UnshippedPaid,
        Self::Shipped,
        Self::AwaitingReview,
        Self::Reviewed,
    ];

    /// The persisted numeric code.
    #[must_use]
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Look up a status by its numeric code.
    #[must_use]
    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Human-readable status name for order views.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unpaid => "Awaiting payment",
            Self::UnshippedPaid => "Awaiting shipment",
            Self::Shipped => "Awaiting delivery",
            Self::AwaitingReview => "Awaiting review",
            Self::Reviewed => "Completed",
        }
    }

    /// Whether the payment for this order has been confirmed.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        !matches!(self, Self::Unpaid)
    }

    /// Whether this system may move an order from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unpaid, Self::AwaitingReview) | (Self::AwaitingReview, Self::Reviewed)
        )
    }

    /// Codes of every status an order may move to `next` from.
    #[must_use]
    pub fn source_codes(next: Self) -> Vec<i16> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .map(Self::code)
            .collect()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pay_method_codes() {
        assert_eq!("1".parse::<PayMethod>(), Ok(PayMethod::CashOnDelivery));
        assert_eq!("3".parse::<PayMethod>(), Ok(PayMethod::Gateway));
        assert!("4".parse::<PayMethod>().is_err());
        assert!("alipay".parse::<PayMethod>().is_err());
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OrderStatus::from_code(0), None);
    }

    #[test]
    fn test_only_load_bearing_transitions_allowed() {
        assert!(OrderStatus::Unpaid.can_transition_to(OrderStatus::AwaitingReview));
        assert!(OrderStatus::AwaitingReview.can_transition_to(OrderStatus::Reviewed));
        assert!(!OrderStatus::AwaitingReview.can_transition_to(OrderStatus::Unpaid));
        assert!(!OrderStatus::Reviewed.can_transition_to(OrderStatus::AwaitingReview));
        assert!(!OrderStatus::Unpaid.can_transition_to(OrderStatus::Reviewed));
    }

    #[test]
    fn test_source_codes() {
        assert_eq!(OrderStatus::source_codes(OrderStatus::AwaitingReview), vec![1]);
        assert_eq!(OrderStatus::source_codes(OrderStatus::Reviewed), vec![4]);
        assert!(OrderStatus::source_codes(OrderStatus::Unpaid).is_empty());
    }

    #[test]
    fn test_paid_statuses() {
        assert!(!OrderStatus::Unpaid.is_paid());
        assert!(OrderStatus::AwaitingReview.is_paid());
    }
}
