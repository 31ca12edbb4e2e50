//! HMAC-SHA256 request signing.
//!
//! The signed message is `"{timestamp}.{body}"`, where `body` is exactly the
//! bytes sent on the wire. The `X-Signature` header carries
//! `sha256=<lower-case hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// No shared secret configured.
    #[error("shared secret is empty")]
    EmptySecret,

    /// The MAC rejected the key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Computes the hex-encoded HMAC-SHA256 of `"{timestamp}.{body}"`.
///
/// # Errors
///
/// Returns [`SignError::EmptySecret`] when `secret` is empty.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignError> {
    if secret.is_empty() {
        return Err(SignError::EmptySecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignError::InvalidKey(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the full `X-Signature` header value.
///
/// # Errors
///
/// Same as [`sign`].
pub fn signature_header(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignError> {
    sign(secret, timestamp, body).map(|hex| format!("{SIGNATURE_PREFIX}{hex}"))
}

/// Checks an `X-Signature` header value in constant time.
///
/// Returns `false` for a missing prefix or an empty secret.
#[must_use]
pub fn verify(secret: &str, timestamp: &str, body: &[u8], header_value: &str) -> bool {
    let Some(given) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    match sign(secret, timestamp, body) {
        Ok(expected) => expected.as_bytes().ct_eq(given.as_bytes()).into(),
        Err(_) => false,
    }
}
