//! Shared HTTP plumbing for provider clients.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use enrich_core::{Error, Result, Service};

/// Build the client every provider uses.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Join a base URL and an endpoint path.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Send a request and decode a JSON body, classifying failures.
///
/// Throttling and server errors stay retryable; rejected keys and other
/// client errors do not.
pub async fn send_json(service: Service, request: RequestBuilder) -> Result<JsonValue> {
    let start = Instant::now();
    let response = request.send().await.map_err(|e| {
        warn!(
            subsystem = "providers",
            service = %service,
            error = %e,
            "Provider request failed"
        );
        Error::Request(format!("{service} request failed: {e}"))
    })?;

    let status = response.status();
    debug!(
        subsystem = "providers",
        service = %service,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Provider responded"
    );

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }

    response
        .json::<JsonValue>()
        .await
        .map_err(|e| Error::Serialization(format!("{service} returned invalid JSON: {e}")))
}

/// Map a non-success status onto the error taxonomy.
pub fn classify_status(service: Service, status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Validation(format!("{service} rejected the API key ({status})"))
        }
        StatusCode::NOT_FOUND => Error::NotFound(format!("{service} has no data ({status})")),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Error::Provider(format!("{service} throttled ({status}): {snippet}"))
        }
        s if s.is_server_error() => {
            Error::Provider(format!("{service} error ({status}): {snippet}"))
        }
        _ => Error::Validation(format!("{service} rejected the request ({status}): {snippet}")),
    }
}
