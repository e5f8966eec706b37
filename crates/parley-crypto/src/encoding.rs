//! Transport-safe encoding of binary material.
//!
//! Standard base64 with padding, the same alphabet browsers produce with
//! `btoa`.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::CryptoError;

/// Encode bytes as standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64.
///
/// # Errors
///
/// - `CryptoError::Decode` if `encoded` is not valid base64
pub fn decode(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Decode { reason: format!("invalid base64: {e}") })
}
