//! Transport decoding: browser capture payloads to raw image bytes.
//!
//! Camera captures usually arrive as `data:image/jpeg;base64,...` URLs. This
//! module only strips that envelope; pixel decoding is [`crate::normalize`].

use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("image payload is empty")]
    MissingPayload,
    #[error("data URL is not base64-encoded (media type: {0:?})")]
    NotBase64(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// True when `bytes` look like a `data:` URL rather than an encoded image.
pub fn is_data_url(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..]
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(b"data:"))
}

/// Decode a `data:<mime>;base64,<payload>` URL, or a bare base64 payload.
pub fn decode_data_url(input: &str) -> Result<Vec<u8>, TransportError> {
    let input = input.trim();
    let payload = match input.get(..5) {
        Some(scheme) if scheme.eq_ignore_ascii_case("data:") => {
            let (meta, payload) = input[5..]
                .split_once(',')
                .ok_or(TransportError::MissingPayload)?;
            if !meta.to_ascii_lowercase().ends_with(";base64") {
                return Err(TransportError::NotBase64(meta.to_string()));
            }
            payload
        }
        _ => input,
    };

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(TransportError::MissingPayload);
    }
    Ok(general_purpose::STANDARD.decode(compact)?)
}
