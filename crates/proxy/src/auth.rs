//! Authenticated caller extractor.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use promptgate_auth::bearer_token;
use promptgate_types::AuthError;
use std::sync::Arc;

use crate::{AppState, error::ApiError};

/// The authenticated caller of a request.
///
/// Extracting it validates the `Authorization: Bearer` token when
/// `auth.required` is set; otherwise every caller is [`Principal::anonymous`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    anonymous: bool,
}

impl Principal {
    /// A caller identified by a validated token's `sub` claim.
    #[must_use]
    pub fn authenticated(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            anonymous: false,
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            anonymous: true,
        }
    }

    /// `true` only when auth is disabled, whatever the subject says.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let required = state.config.load().auth.required;
        if !required {
            return Ok(Self::anonymous());
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AuthError::Malformed("missing authorization header".into()))?
            .to_str()
            .map_err(|_| AuthError::Malformed("authorization header is not ASCII".into()))?;
        let token = bearer_token(header)?;

        match state.validator.validate(token).await {
            Ok(subject) => Ok(Self::authenticated(subject)),
            Err(e) => {
                if matches!(e, AuthError::KeySourceUnreachable(_)) {
                    tracing::warn!(error = %e, "cannot validate bearer token");
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_subject_named_anonymous_is_authenticated() {
        let p = Principal::authenticated("anonymous");
        assert!(!p.is_anonymous());
        assert_ne!(p, Principal::anonymous());
        assert!(Principal::anonymous().is_anonymous());
    }
}
