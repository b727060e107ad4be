//! Error taxonomy for the account service.
//!
//! Every fallible operation in the crate returns [`AccountError`]. Client
//! errors are surfaced verbatim; server-side failures are logged with a
//! reference id and answered with that id only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::model::Message;

/// Convenience alias used across the crate.
pub type AccountResult<T> = Result<T, AccountError>;

/// Why a request failed to authenticate.
///
/// `MissingSession` and `ExpiredOrUnknownSession` render identically on the
/// wire; the distinction only exists for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// No session cookie on the request.
    #[error("missing session")]
    MissingSession,
    /// The cookie names a session that is absent or past its expiry.
    #[error("expired or unknown session")]
    ExpiredOrUnknownSession,
    /// No account matches the supplied login and password digest.
    #[error("invalid login or password")]
    InvalidCredentials,
}

/// Errors produced by the account service.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Malformed input, empty required field or mismatched confirmation.
    #[error("{0}")]
    Validation(String),

    /// Unrecognized hash-state flag.
    #[error("incorrect hash status: {0}")]
    HashState(i32),

    /// Missing, unknown or expired session, or rejected credentials.
    #[error(transparent)]
    Auth(#[from] AuthFailure),

    /// Unset secret or other missing record.
    #[error("{0} not found")]
    NotFound(String),

    /// No account with this id.
    #[error("user with id={0} not found")]
    UnknownUser(i64),

    /// Request body without a JSON content type.
    #[error("{0}")]
    MediaType(String),

    /// A persistence call outlived its deadline.
    #[error("{operation} exceeded its deadline")]
    Timeout {
        /// Name of the abandoned operation.
        operation: &'static str,
    },

    /// A multi-statement persistence operation failed.
    #[error(
        "{operation} failed: {cause}{}",
        .rollback.as_ref().map(|r| format!("; rollback failed: {r}")).unwrap_or_default()
    )]
    Transaction {
        /// Name of the transactional operation.
        operation: &'static str,
        /// The failure that aborted the transaction.
        cause: String,
        /// The rollback failure, if the compensating rollback also failed.
        rollback: Option<String>,
    },

    /// Unrecognized mutation discriminant.
    #[error("unsupported direction={0}")]
    UnsupportedOperation(i64),

    /// Any other persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Failure inside the service itself (hashing, encoding).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccountError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for a missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// HTTP status this error is reported with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::HashState(_) | Self::UnsupportedOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) | Self::UnknownUser(_) => StatusCode::NOT_FOUND,
            Self::MediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Transaction { .. } | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the error detail may be shown to the client.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("record"),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status();

        let msg = if self.is_client_error() {
            tracing::warn!(error = %self, "request rejected");
            self.to_string()
        } else {
            let reference = uuid::Uuid::new_v4();
            tracing::error!(%reference, error = %self, "request failed");
            format!("internal error, reference {reference}")
        };

        (status, Json(Message::new(msg))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AccountError::validation("empty login").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AccountError::HashState(7).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AccountError::UnsupportedOperation(42).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AccountError::from(AuthFailure::ExpiredOrUnknownSession).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AccountError::not_found("user").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AccountError::UnknownUser(3).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AccountError::MediaType("missing content type".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            AccountError::Timeout { operation: "login" }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AccountError::Storage("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_transaction_reports_both_failures() {
        let err = AccountError::Transaction {
            operation: "delete user",
            cause: "info locked".into(),
            rollback: Some("connection reset".into()),
        };
        let text = err.to_string();
        assert!(text.contains("info locked"));
        assert!(text.contains("rollback failed: connection reset"));

        let err = AccountError::Transaction {
            operation: "delete user",
            cause: "info locked".into(),
            rollback: None,
        };
        assert_eq!(err.to_string(), "delete user failed: info locked");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = AccountError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AccountError::NotFound(_)));
    }

    #[test]
    fn test_server_errors_are_opaque() {
        let response = AccountError::Storage("password=hunter2".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
