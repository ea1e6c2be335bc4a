use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Errors surfaced by the token cache, the API clients and the proxy
#[derive(Debug, thiserror::Error)]
pub enum NxapiError {
    /// The session token is malformed, expired or was rejected upstream.
    /// The user has to log in again.
    #[error("invalid session token: {0}")]
    InvalidToken(String),

    /// The attestation service did not produce an `f` value
    #[error("attestation failed: {0}")]
    AttestationFailed(String),

    /// Network level failure talking to an upstream service
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] reqwest::Error),

    /// An upstream service answered with an error
    #[error("{service} returned an error ({status}): {message}")]
    Upstream {
        service: &'static str,
        status: i64,
        message: String,
    },

    /// The Coral web API credential has expired and must be renewed
    #[error("coral credential expired")]
    TokenExpired,

    /// The account does not have an active Nintendo Switch Online membership
    #[error("nintendo switch online membership required")]
    MembershipRequired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("denied by policy: {0}")]
    PolicyDenied(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type NxapiResult<T> = Result<T, NxapiError>;

impl NxapiError {
    /// Stable machine readable error code, used in proxy error bodies
    pub fn code(&self) -> &'static str {
        match self {
            NxapiError::InvalidToken(_) => "invalid_token",
            NxapiError::AttestationFailed(_) => "attestation_failed",
            NxapiError::UpstreamUnavailable(_) => "upstream_unavailable",
            NxapiError::Upstream { .. } => "upstream_error",
            NxapiError::TokenExpired => "token_expired",
            NxapiError::MembershipRequired => "membership_required",
            NxapiError::NotFound(_) => "not_found",
            NxapiError::PolicyDenied(_) => "policy_denied",
            NxapiError::Storage(_) => "storage_error",
            NxapiError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NxapiError::AttestationFailed(_)
                | NxapiError::UpstreamUnavailable(_)
                | NxapiError::Upstream { .. }
                | NxapiError::TokenExpired
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            NxapiError::InvalidToken(_)
            | NxapiError::PolicyDenied(_)
            | NxapiError::MembershipRequired => StatusCode::FORBIDDEN,
            NxapiError::NotFound(_) => StatusCode::NOT_FOUND,
            NxapiError::AttestationFailed(_)
            | NxapiError::UpstreamUnavailable(_)
            | NxapiError::Upstream { .. }
            | NxapiError::TokenExpired
            | NxapiError::Storage(_)
            | NxapiError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rebuild an error from a proxy error body
    pub fn from_error_body(body: ErrorBody) -> Self {
        match body.error.as_str() {
            "invalid_token" => NxapiError::InvalidToken(body.error_message),
            "attestation_failed" => NxapiError::AttestationFailed(body.error_message),
            "token_expired" => NxapiError::TokenExpired,
            "membership_required" => NxapiError::MembershipRequired,
            "not_found" => NxapiError::NotFound(body.error_message),
            "policy_denied" => NxapiError::PolicyDenied(body.error_message),
            _ => NxapiError::Upstream {
                service: "znc proxy",
                status: 0,
                message: format!("{}: {}", body.error, body.error_message),
            },
        }
    }
}

impl From<reqwest::Error> for NxapiError {
    /// A response that arrived but could not be used is an upstream error,
    /// not a network failure
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_status() {
            NxapiError::Upstream {
                service: "upstream",
                status: err.status().map_or(0, |status| status.as_u16() as i64),
                message: err.to_string(),
            }
        } else {
            NxapiError::UpstreamUnavailable(err)
        }
    }
}

/// JSON error body returned by the proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_message: String,
}

#[derive(Debug)]
pub struct ServerError(pub(crate) NxapiError);

pub type ServerResult<S> = Result<S, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self.0, "Request Error");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            error: self.0.code().to_string(),
            error_message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ServerError
where
    E: Into<NxapiError>,
{
    fn from(err: E) -> Self {
        ServerError(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_round_trips_distinct_variants() {
        let err = NxapiError::MembershipRequired;
        let body = ErrorBody {
            error: err.code().to_string(),
            error_message: err.to_string(),
        };

        assert!(matches!(
            NxapiError::from_error_body(body),
            NxapiError::MembershipRequired
        ));
    }

    #[test]
    fn test_unknown_error_code_becomes_upstream_error() {
        let body = ErrorBody {
            error: "something_new".to_string(),
            error_message: "?".to_string(),
        };

        let err = NxapiError::from_error_body(body);
        assert_eq!(err.code(), "upstream_error");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            NxapiError::PolicyDenied("friends".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            NxapiError::NotFound("friend".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert!(!NxapiError::InvalidToken("aud".into()).is_retryable());
    }

    #[test]
    fn test_token_and_upstream_failures_use_proxy_statuses() {
        assert_eq!(
            NxapiError::InvalidToken("revoked".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            NxapiError::MembershipRequired.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            NxapiError::AttestationFailed("timeout".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            NxapiError::TokenExpired.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            NxapiError::Upstream {
                service: "coral",
                status: 9500,
                message: "maintenance".into(),
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
