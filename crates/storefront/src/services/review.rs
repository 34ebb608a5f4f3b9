//! Post-delivery order reviews.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use daily_fresh_core::{OrderNumber, OrderStatus, SkuId, UserId};

use crate::db::RepositoryError;
use crate::models::{Order, OrderLine};
use crate::store::OrderStore;

/// Longest accepted review text, in characters. Matches the width of
/// `order_line.comment`.
pub const MAX_COMMENT_CHARS: usize = 500;

/// Errors from review operations.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// The order does not exist or belongs to someone else.
    #[error("order not found")]
    OrderNotFound,

    /// The order is not awaiting review.
    #[error("order is {0}, not awaiting review")]
    WrongStatus(OrderStatus),

    /// The submitted entries do not cover each line exactly once.
    #[error("review must cover every line exactly once: {0}")]
    Coverage(String),

    /// A comment is empty or too long.
    #[error("invalid comment for sku {0}")]
    InvalidComment(SkuId),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// One submitted review entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ReviewEntry {
    pub sku_id: SkuId,
    pub content: String,
}

/// Review service over an order store.
#[derive(Clone)]
pub struct ReviewService {
    orders: Arc<dyn OrderStore>,
}

impl ReviewService {
    /// Create a review service.
    #[must_use]
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    /// An order of `user` together with its lines.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::OrderNotFound` if the order is missing or not the
    /// user's.
    pub async fn order_with_lines(
        &self,
        user: UserId,
        order_id: &OrderNumber,
    ) -> Result<(Order, Vec<OrderLine>), ReviewError> {
        let order = self
            .orders
            .find_for_user(user, order_id)
            .await?
            .ok_or(ReviewError::OrderNotFound)?;
        let lines = self.orders.lines(order_id).await?;
        Ok((order, lines))
    }

    /// Store one comment per line and complete the order.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::WrongStatus` unless the order is awaiting review,
    /// `ReviewError::Coverage` if the entries miss a line, name a SKU twice or
    /// name a SKU not on the order, and `ReviewError::InvalidComment` for
    /// blank or oversized comments. Nothing is written on error.
    #[instrument(skip(self, entries), fields(user_id = %user, order_id = %order_id))]
    pub async fn submit(
        &self,
        user: UserId,
        order_id: &OrderNumber,
        entries: &[ReviewEntry],
    ) -> Result<(), ReviewError> {
        let (order, lines) = self.order_with_lines(user, order_id).await?;
        if order.status != OrderStatus::AwaitingReview {
            return Err(ReviewError::WrongStatus(order.status));
        }

        let comments = check_coverage(&lines, entries)?;
        if !self.orders.record_review(order_id, &comments).await? {
            // Lost a race with another submission.
            return Err(ReviewError::WrongStatus(OrderStatus::Reviewed));
        }

        info!(lines = comments.len(), "order reviewed");
        Ok(())
    }
}

fn check_coverage(
    lines: &[OrderLine],
    entries: &[ReviewEntry],
) -> Result<Vec<(SkuId, String)>, ReviewError> {
    let expected: BTreeSet<SkuId> = lines.iter().map(|l| l.sku_id).collect();
    let mut seen = BTreeSet::new();
    let mut comments = Vec::with_capacity(entries.len());

    for entry in entries {
        if !expected.contains(&entry.sku_id) {
            return Err(ReviewError::Coverage(format!(
                "sku {} is not on this order",
                entry.sku_id
            )));
        }
        if !seen.insert(entry.sku_id) {
            return Err(ReviewError::Coverage(format!(
                "sku {} reviewed twice",
                entry.sku_id
            )));
        }
        let content = entry.content.trim();
        if content.is_empty() || content.chars().count() > MAX_COMMENT_CHARS {
            return Err(ReviewError::InvalidComment(entry.sku_id));
        }
        comments.push((entry.sku_id, content.to_owned()));
    }

    if let Some(missing) = expected.difference(&seen).next() {
        return Err(ReviewError::Coverage(format!("sku {missing} has no review")));
    }
    Ok(comments)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use daily_fresh_core::Price;

    fn line(sku: i32) -> OrderLine {
        OrderLine {
            order_id: OrderNumber::parse("202601011200001").unwrap(),
            sku_id: SkuId::new(sku),
            quantity: 1,
            unit_price: Price::from_units(3),
            comment: None,
        }
    }

    fn entry(sku: i32, content: &str) -> ReviewEntry {
        ReviewEntry {
            sku_id: SkuId::new(sku),
            content: content.to_owned(),
        }
    }

    #[test]
    fn test_full_coverage_is_accepted() {
        let comments =
            check_coverage(&[line(1), line(2)], &[entry(2, "fresh"), entry(1, " tasty ")]).unwrap();
        assert_eq!(
            comments,
            vec![
                (SkuId::new(2), "fresh".to_owned()),
                (SkuId::new(1), "tasty".to_owned())
            ]
        );
    }

    #[test]
    fn test_missing_duplicate_and_foreign_lines_are_rejected() {
        let lines = [line(1), line(2)];
        assert!(matches!(
            check_coverage(&lines, &[entry(1, "ok")]),
            Err(ReviewError::Coverage(_))
        ));
        assert!(matches!(
            check_coverage(&lines, &[entry(1, "ok"), entry(1, "again"), entry(2, "ok")]),
            Err(ReviewError::Coverage(_))
        ));
        assert!(matches!(
            check_coverage(&lines, &[entry(1, "ok"), entry(2, "ok"), entry(3, "ok")]),
            Err(ReviewError::Coverage(_))
        ));
    }

    #[test]
    fn test_blank_comment_is_rejected() {
        assert!(matches!(
            check_coverage(&[line(1)], &[entry(1, "   ")]),
            Err(ReviewError::InvalidComment(_))
        ));
    }

    #[test]
    fn test_comment_length_limit_counts_characters() {
        let at_limit = "\u{679c}".repeat(MAX_COMMENT_CHARS);
        let comments = check_coverage(&[line(1)], &[entry(1, &at_limit)]).unwrap();
        assert_eq!(comments[0].1.chars().count(), MAX_COMMENT_CHARS);

        let over = "a".repeat(MAX_COMMENT_CHARS + 1);
        assert!(matches!(
            check_coverage(&[line(1)], &[entry(1, &over)]),
            Err(ReviewError::InvalidComment(id)) if id == SkuId::new(1)
        ));
    }

    #[test]
    fn test_comment_limit_matches_schema() {
        let schema = include_str!("../../migrations/20260301000004_create_orders.sql");
        assert!(schema.contains(&format!("comment     VARCHAR({MAX_COMMENT_CHARS})")));
    }
}
