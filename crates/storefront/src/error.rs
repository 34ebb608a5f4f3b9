//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. Page-style handlers return `Result<T, AppError>`;
//! the JSON order endpoints answer with result codes instead (see
//! [`crate::routes::ApiResponse`]).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{CartError, ReviewError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::Repository(e) => Self::Database(e),
            CartError::SkuNotFound(id) => Self::NotFound(format!("sku {id}")),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<ReviewError> for AppError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::Repository(e) => Self::Database(e),
            ReviewError::OrderNotFound => Self::NotFound("order".to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl AppError {
    /// Server faults, as opposed to missing rows and bad requests.
    fn is_server_error(&self) -> bool {
        match self {
            Self::Database(e) => !matches!(e, RepositoryError::NotFound),
            Self::Internal(_) => true,
            _ => false,
        }
    }

    /// The text sent to the client.
    fn public_message(&self) -> String {
        match self {
            Self::Database(RepositoryError::NotFound) => "Not found".to_string(),
            // Don't expose internal error details to clients
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.public_message()).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Called by the auth extractors so errors are associated with the buyer.
pub fn set_sentry_user(user_id: &impl ToString, username: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            username: username.map(String::from),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("order", "Committed order", Some(&[("order_id", "20260101120000042")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;
    use daily_fresh_core::SkuId;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order 42".to_string());
        assert_eq!(err.to_string(), "Not found: order 42");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            let response = err.into_response();
            response.status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_row_is_a_quiet_not_found() {
        let err = AppError::Database(RepositoryError::NotFound);
        assert!(!err.is_server_error());
        assert_eq!(err.public_message(), "Not found");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = AppError::Database(RepositoryError::Conflict("dup".to_string()));
        assert!(err.is_server_error());
        assert_eq!(err.public_message(), "Internal server error");
        assert!(!AppError::NotFound("order".to_string()).is_server_error());
    }

    #[test]
    fn test_service_errors_map_to_client_errors() {
        assert!(matches!(
            AppError::from(CartError::SkuNotFound(SkuId::new(3))),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(CartError::InvalidCount),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            AppError::from(ReviewError::OrderNotFound),
            AppError::NotFound(_)
        ));
    }
}
