//! HTTP mapping for engine errors.
//!
//! The engine reports typed kinds; this is the single place where a kind
//! becomes a status code. Handlers return `ApiError` and axum renders the
//! JSON error envelope `{ "error": CODE, "message": ... }`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use vault::VaultError;

/// JSON error envelope.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Wrapper that renders a [`VaultError`] as an HTTP response.
pub struct ApiError(pub VaultError);

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        ApiError(e)
    }
}

fn status_for(e: &VaultError) -> StatusCode {
    match e {
        VaultError::InvalidRequest(_)
        | VaultError::CidMismatch { .. }
        | VaultError::InvalidSignature(_)
        | VaultError::ProofStale(_)
        | VaultError::ProofInFuture(_) => StatusCode::BAD_REQUEST,

        VaultError::Forbidden(_)
        | VaultError::ContentTypeRejected(_)
        | VaultError::GuildBlocked(_)
        | VaultError::GuildNotAllowed(_)
        | VaultError::FeedUnauthorized(_)
        | VaultError::BlobBanned(_) => StatusCode::FORBIDDEN,

        VaultError::BlobNotFound(_) | VaultError::FeedNotFound(_) => StatusCode::NOT_FOUND,

        VaultError::FeedExists(_) | VaultError::GcAlreadyRunning => StatusCode::CONFLICT,

        VaultError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,

        VaultError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,

        VaultError::NodeNotConfigured
        | VaultError::NodeNotRegistered
        | VaultError::RegistrationCheckFailed(_) => StatusCode::SERVICE_UNAVAILABLE,

        VaultError::StorageFull(_) | VaultError::CapacityExceeded(_) => {
            StatusCode::INSUFFICIENT_STORAGE
        }

        VaultError::MetadataTampered(_)
        | VaultError::ReplicationStateTampered(_)
        | VaultError::EnvironmentMismatch { .. }
        | VaultError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
