//! HTTP helpers shared by the provider implementations.

use marginalia_core::error::ProviderError;
use std::time::Duration;
use tracing::warn;

/// How long to wait for a TCP/TLS connection before giving up.
///
/// Only the connect phase is bounded here; streaming sessions enforce
/// their own end-to-end timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared HTTP client.
pub(crate) fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a non-success upstream status into a [`ProviderError`].
///
/// Successful responses are handed back untouched.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if (200..300).contains(&status) {
        return Ok(response);
    }

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the credentials (status {status})"
        )));
    }

    let error_body = response.text().await.unwrap_or_default();
    warn!(provider = %provider, status, body = %error_body, "Provider returned error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: error_body,
    })
}

/// Map a transport-level reqwest failure.
pub(crate) fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}
