use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::AppError;

/// Length in bytes of the random material behind a refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Opaque, URL-safe token read straight from the operating system's CSPRNG.
///
/// Fails with [`AppError::EntropyUnavailable`] rather than falling back to a weaker source.
pub fn generate_token(byte_len: usize) -> Result<String, AppError> {
    let mut bytes = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::EntropyUnavailable(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
