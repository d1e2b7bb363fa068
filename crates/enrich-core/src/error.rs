//! Error types for the enrichment queue.

use thiserror::Error;
use uuid::Uuid;

use crate::models::Service;

/// Result type alias using the enrichment queue's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for enrichment operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Store operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad input, rejected before anything is written
    #[error("Validation error: {0}")]
    Validation(String),

    /// No active API key for the provider
    #[error("Missing credentials for {0}")]
    MissingCredentials(Service),

    /// Provider call failed or returned an unusable response
    #[error("Provider error: {0}")]
    Provider(String),

    /// A processing claim outlived the staleness window
    #[error("Stale claim: {0}")]
    StaleClaim(String),

    /// The worker no longer holds the claim on this job
    #[error("Claim lost for job {0}")]
    ClaimLost(Uuid),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a job failing with this error may be scheduled again.
    ///
    /// Credentials, validation and missing-entity failures cannot succeed on a
    /// later attempt; everything that depends on the network or the store can.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider(_)
            | Error::Request(_)
            | Error::StaleClaim(_)
            | Error::Database(_)
            | Error::Internal(_) => true,
            Error::NotFound(_)
            | Error::Validation(_)
            | Error::MissingCredentials(_)
            | Error::ClaimLost(_)
            | Error::Serialization(_)
            | Error::Config(_) => false,
        }
    }

    /// Short kind label used in logs and stored error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Database(_) => "StoreError",
            Error::NotFound(_) => "NotFound",
            Error::Validation(_) => "ValidationError",
            Error::MissingCredentials(_) => "MissingCredentials",
            Error::Provider(_) | Error::Request(_) | Error::Serialization(_) => "ProviderError",
            Error::StaleClaim(_) => "StaleClaim",
            Error::ClaimLost(_) => "ClaimLost",
            Error::Config(_) => "ConfigError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Message safe to return to API callers.
    ///
    /// Store and provider internals (connection strings, upstream bodies) stay
    /// in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Database(_) => "storage unavailable".to_string(),
            Error::Provider(_) | Error::Request(_) | Error::Serialization(_) => {
                "enrichment provider request failed".to_string()
            }
            Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("company 42".to_string());
        assert_eq!(err.to_string(), "Not found: company 42");
    }

    #[test]
    fn test_error_display_missing_credentials() {
        let err = Error::MissingCredentials(Service::Apollo);
        assert_eq!(err.to_string(), "Missing credentials for apollo");
    }

    #[test]
    fn test_error_display_claim_lost() {
        let id = Uuid::nil();
        let err = Error::ClaimLost(id);
        assert_eq!(err.to_string(), format!("Claim lost for job {}", id));
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Provider("502".into()).is_retryable());
        assert!(Error::Request("timeout".into()).is_retryable());
        assert!(Error::StaleClaim("worker-1".into()).is_retryable());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        assert!(!Error::MissingCredentials(Service::Scrapin).is_retryable());
        assert!(!Error::Validation("no website".into()).is_retryable());
        assert!(!Error::NotFound("company".into()).is_retryable());
        assert!(!Error::Serialization("bad shape".into()).is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::Validation("x".into()).kind(), "ValidationError");
        assert_eq!(Error::Provider("x".into()).kind(), "ProviderError");
        assert_eq!(Error::StaleClaim("x".into()).kind(), "StaleClaim");
        assert_eq!(Error::Database(sqlx::Error::PoolClosed).kind(), "StoreError");
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = Error::Provider("401 body: {\"token\":\"sk-secret\"}".to_string());
        assert!(!err.public_message().contains("sk-secret"));

        let err = Error::Database(sqlx::Error::Protocol("password=hunter2".into()));
        assert_eq!(err.public_message(), "storage unavailable");

        let err = Error::Validation("services must not be empty".into());
        assert_eq!(
            err.public_message(),
            "Validation error: services must not be empty"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
