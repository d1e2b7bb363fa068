//! HTTP error mapping.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use enrich_core::Error;

/// Error returned by handlers. Rendered as `{"success": false, "error": …}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// Store or internal failure; details are logged, not returned.
    Internal(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(_) | Error::MissingCredentials(_) => {
                ApiError::BadRequest(err.public_message())
            }
            Error::NotFound(_) => ApiError::NotFound(err.public_message()),
            Error::ClaimLost(_) => ApiError::Conflict(err.public_message()),
            other => ApiError::Internal(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(err) => {
                error!(kind = err.kind(), error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.public_message())
            }
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_core::Service;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = ApiError::from(Error::Validation("services must not be empty".into()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_credentials_maps_to_bad_request() {
        let err = ApiError::from(Error::MissingCredentials(Service::Apollo));
        assert!(matches!(err, ApiError::BadRequest(ref m) if m.contains("apollo")));
    }

    #[test]
    fn test_internal_errors_are_500() {
        let err = ApiError::from(Error::Internal("lock poisoned".into()));
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_claim_lost_is_conflict() {
        let err = ApiError::from(Error::ClaimLost(uuid::Uuid::nil()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
