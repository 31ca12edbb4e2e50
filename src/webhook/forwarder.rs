//! Single signed HTTP POST of a webhook payload.
//!
//! One call is one network request. Retrying is the processor's job so
//! that attempt accounting lives in one place.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::signing::{self, SignError};

/// Header carrying the signing timestamp.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// Header carrying `sha256=<hex>`.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Longest response body kept per attempt, in characters.
pub const MAX_RESPONSE_BODY_CHARS: usize = 4096;

/// Transport-level delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connect or read deadline exceeded.
    #[error("webhook request timed out: {0}")]
    Timeout(String),

    /// DNS, TCP or TLS handshake failure.
    #[error("webhook connection failed: {0}")]
    Connect(String),

    /// Any other request failure.
    #[error("webhook request failed: {0}")]
    Request(String),

    /// Payload could not be serialized.
    #[error("webhook payload serialization failed: {0}")]
    Serialization(String),

    /// Request could not be signed.
    #[error("webhook signing failed: {0}")]
    Signing(#[from] SignError),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// HTTP response received for an attempt. Any status counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Response status code.
    pub http_status: u16,
    /// Response body, truncated to [`MAX_RESPONSE_BODY_CHARS`].
    pub body: String,
}

impl DeliveryOutcome {
    /// Returns `true` for a 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.http_status >= 200 && self.http_status < 300
    }
}

/// Signs and POSTs webhook payloads with a shared, timeout-bounded client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    /// Builds a forwarder with the given connect and total request
    /// timeouts. Certificates are verified and redirects are not followed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the HTTP client cannot be
    /// built.
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("gradebridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Delivers `payload` to `endpoint_url` as one signed POST.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no HTTP response was received.
    pub async fn deliver(
        &self,
        endpoint_url: &str,
        secret: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryOutcome, TransportError> {
        let body =
            serde_json::to_vec(payload).map_err(|e| TransportError::Serialization(e.to_string()))?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let signature = signing::signature_header(secret, &timestamp, &body)?;

        let response = self
            .client
            .post(endpoint_url)
            .header(CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, &timestamp)
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let http_status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) => text.chars().take(MAX_RESPONSE_BODY_CHARS).collect(),
            Err(e) => format!("<unreadable response body: {e}>"),
        };
        Ok(DeliveryOutcome { http_status, body })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn forwarder() -> Forwarder {
        let Ok(f) = Forwarder::new(Duration::from_secs(2), Duration::from_secs(5)) else {
            panic!("client build failed");
        };
        f
    }

    /// A local port with nothing listening on it.
    fn closed_port_url() -> String {
        let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        drop(listener);
        format!("http://{addr}/api/v1/webhooks")
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let result = forwarder()
            .deliver(&closed_port_url(), "secret", &serde_json::json!({"x": 1}))
            .await;
        let Err(err) = result else {
            panic!("expected transport error");
        };
        assert!(matches!(
            err,
            TransportError::Connect(_) | TransportError::Request(_)
        ));
    }

    #[tokio::test]
    async fn empty_secret_fails_before_sending() {
        let result = forwarder()
            .deliver(&closed_port_url(), "", &serde_json::json!({}))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::Signing(SignError::EmptySecret))
        ));
    }

    #[test]
    fn success_range() {
        let outcome = |http_status| DeliveryOutcome {
            http_status,
            body: String::new(),
        };
        assert!(outcome(200).is_success());
        assert!(outcome(204).is_success());
        assert!(!outcome(302).is_success());
        assert!(!outcome(500).is_success());
    }
}
