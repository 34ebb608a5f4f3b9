//! Authentication extractors.
//!
//! Login happens in the account service; it stores a [`CurrentUser`] in the
//! shared session under [`session_keys::CURRENT_USER`]. These extractors read
//! it back.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

use crate::error::set_sentry_user;
use crate::models::{CurrentUser, session_keys};

/// Login page of the account service.
pub const LOGIN_PATH: &str = "/user/login";

/// Extractor that requires a logged-in user.
///
/// Page requests are redirected to the login page; requests that ask for
/// JSON get a bare `401`.
///
/// # Example
///
/// ```rust,ignore
/// async fn cart_page(RequireAuth(user): RequireAuth) -> impl IntoResponse {
///     format!("Cart of {}", user.username)
/// }
/// ```
pub struct RequireAuth(pub CurrentUser);

/// Rejection when a user is required but the session has none.
pub enum AuthRejection {
    /// Redirect to login page (for HTML requests).
    RedirectToLogin,
    /// Unauthorized response (for API requests).
    Unauthorized,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::RedirectToLogin => Redirect::to(LOGIN_PATH).into_response(),
            Self::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or(AuthRejection::Unauthorized)?;

        let user = current_user(session).await.ok_or_else(|| {
            if wants_json(parts) {
                AuthRejection::Unauthorized
            } else {
                AuthRejection::RedirectToLogin
            }
        })?;

        Ok(Self(user))
    }
}

/// Extractor that optionally gets the current user.
///
/// The order and cart JSON endpoints use this: an anonymous caller gets
/// result code `0` rather than an HTTP error.
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = match parts.extensions.get::<Session>() {
            Some(session) => current_user(session).await,
            None => None,
        };

        Ok(Self(user))
    }
}

async fn current_user(session: &Session) -> Option<CurrentUser> {
    let user: CurrentUser = session
        .get(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten()?;
    set_sentry_user(&user.id, Some(&user.username));
    Some(user)
}

fn wants_json(parts: &Parts) -> bool {
    parts
        .headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// Store the current user in the session.
///
/// Used by the account service's login flow and by tests.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user: &CurrentUser,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CURRENT_USER, user).await
}
