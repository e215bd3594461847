//! `Authorization: Bearer <token>` handling.

use {
    secrecy::{ExposeSecret, Secret},
    subtle::ConstantTimeEq,
};

/// Why a bearer header was refused. The variants never carry the presented
/// value, so they are safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BearerError {
    #[error("missing authorization header")]
    Missing,
    #[error("authorization scheme must be Bearer")]
    WrongScheme,
    #[error("empty bearer token")]
    Empty,
    #[error("invalid bearer token")]
    Mismatch,
}

/// Extract the token from an `Authorization` header value. The scheme word
/// is matched case-insensitively.
pub fn bearer_token(header: Option<&str>) -> Result<&str, BearerError> {
    let header = header.ok_or(BearerError::Missing)?.trim();
    if header.is_empty() {
        return Err(BearerError::Missing);
    }
    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::WrongScheme);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(BearerError::Empty);
    }
    Ok(token)
}

/// Constant-time comparison against the live token.
#[must_use]
pub fn token_matches(presented: &str, expected: &Secret<String>) -> bool {
    presented
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into()
}

pub fn verify_bearer(header: Option<&str>, expected: &Secret<String>) -> Result<(), BearerError> {
    let token = bearer_token(header)?;
    if token_matches(token, expected) {
        Ok(())
    } else {
        Err(BearerError::Mismatch)
    }
}
