//! Request extractors for guarded handlers.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::AccountError;
use crate::middleware::session::AuthSession;

/// Extractor for the session resolved by the auth guard
///
/// Requires `AuthGuardLayer` on the route; without it extraction fails as
/// an internal error.
///
/// ```rust,ignore
/// async fn handler(CurrentSession(session): CurrentSession) -> String {
///     session.user_id.to_string()
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession(pub AuthSession);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AccountError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthSession>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AccountError::Internal("session guard not installed".to_string()))
    }
}

/// JSON body whose rejections are reported as validation errors.
///
/// A body sent without a JSON content type is rejected with 415.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AccountError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection| match rejection {
                JsonRejection::MissingJsonContentType(missing) => {
                    AccountError::MediaType(missing.body_text())
                }
                other => AccountError::validation(other.body_text()),
            })
    }
}
