//! Decoding of compact session tokens.
//!
//! The backend issues JWT-style tokens (`header.payload.signature`). Only the
//! payload segment is read here; the signature is the server's business.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub username: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Decode the claims embedded in `token`.
pub fn decode(token: &str) -> Result<TokenClaims, DecodeError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| DecodeError::MalformedToken("missing payload segment".to_string()))?;

    let bytes = decode_segment(payload)?;

    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| DecodeError::MalformedToken(format!("invalid claims: {}", e)))?;

    let expires_at = DateTime::from_timestamp(raw.exp, 0)
        .ok_or_else(|| DecodeError::MalformedToken(format!("exp out of range: {}", raw.exp)))?;

    Ok(TokenClaims {
        expires_at,
        issued_at: raw.iat.and_then(|iat| DateTime::from_timestamp(iat, 0)),
        username: raw.username,
        roles: raw.roles,
    })
}

/// Base64-decode a token segment after restoring its `=` padding.
/// Tokens are base64url; the standard alphabet is tolerated.
fn decode_segment(segment: &str) -> Result<Vec<u8>, DecodeError> {
    let padded = restore_padding(segment);
    URL_SAFE
        .decode(&padded)
        .or_else(|_| STANDARD.decode(&padded))
        .map_err(|e| DecodeError::MalformedToken(format!("invalid base64 payload: {}", e)))
}

fn restore_padding(segment: &str) -> String {
    let mut padded = segment.to_string();
    let remainder = padded.len() % 4;
    if remainder != 0 {
        padded.extend(std::iter::repeat('=').take(4 - remainder));
    }
    padded
}
