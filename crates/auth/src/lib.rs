//! Bearer-token authentication for the gateway's relay routes.
//!
//! Tokens are JWTs signed by an external identity provider; the public
//! signing keys are fetched from its published key set (JWKS) and cached.
//! The HTTP layer only sees the [`TokenValidator`] capability:
//! `validate(token) -> subject | AuthError`.

pub mod jwks;

pub use jwks::{JwksSettings, JwksValidator, NoKeySource};

use promptgate_types::AuthError;

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// # Errors
///
/// Returns [`AuthError::Malformed`] if the scheme is not `Bearer` or the
/// token is missing.
pub fn bearer_token(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts
        .next()
        .ok_or_else(|| AuthError::Malformed("empty authorization header".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Malformed(format!(
            "unsupported authorization scheme: {scheme}"
        )));
    }
    let token = parts
        .next()
        .ok_or_else(|| AuthError::Malformed("missing bearer token".into()))?;
    if parts.next().is_some() {
        return Err(AuthError::Malformed(
            "unexpected data after bearer token".into(),
        ));
    }
    Ok(token)
}
