//! API error type that maps [`GatewayError`] variants to HTTP status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use promptgate_types::{AuthError, GatewayError};
use serde_json::json;

/// Wrapper around [`GatewayError`] that implements [`IntoResponse`].
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl ApiError {
    /// Returns `(status, error_type, error_code)` for the wrapped error.
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match &self.0 {
            GatewayError::Auth(e) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                auth_code(e),
            ),
            GatewayError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
            ),
            GatewayError::UpgradeFailed(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "upgrade_failed",
            ),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", "not_found"),
            GatewayError::UpstreamRejected { status, .. } => classify_upstream(*status),
            GatewayError::UpstreamUnreachable(_)
            | GatewayError::UpstreamDialFailed(_)
            | GatewayError::Transport(_) => {
                (StatusCode::BAD_GATEWAY, "server_error", "upstream_error")
            }
            GatewayError::Serialization(_) | GatewayError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        }
    }
}

fn auth_code(e: &AuthError) -> &'static str {
    match e {
        AuthError::Malformed(_) => "invalid_token",
        AuthError::KeyNotFound(_) => "unknown_signing_key",
        AuthError::Expired => "token_expired",
        AuthError::InvalidSignature(_) => "invalid_signature",
        AuthError::KeySourceUnreachable(_) => "key_source_unreachable",
    }
}

fn classify_upstream(status: u16) -> (StatusCode, &'static str, &'static str) {
    match status {
        429 => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_error",
            "rate_limit_exceeded",
        ),
        403 => (
            StatusCode::FORBIDDEN,
            "permission_error",
            "insufficient_quota",
        ),
        _ => (StatusCode::BAD_GATEWAY, "server_error", "upstream_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, error_code) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        let msg = self.0.to_string();
        (
            status,
            Json(json!({
                "error": {
                    "message": msg,
                    "type": error_type,
                    "code": error_code,
                }
            })),
        )
            .into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self(GatewayError::Auth(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt as _;

    async fn extract_error_body(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_auth_errors_are_unauthorized() {
        let cases = [
            (AuthError::Malformed("x".into()), "invalid_token"),
            (AuthError::KeyNotFound("k".into()), "unknown_signing_key"),
            (AuthError::Expired, "token_expired"),
            (AuthError::InvalidSignature("x".into()), "invalid_signature"),
            (
                AuthError::KeySourceUnreachable("down".into()),
                "key_source_unreachable",
            ),
        ];
        for (err, code) in cases {
            let (status, body) = extract_error_body(ApiError::from(err)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["type"], "authentication_error");
            assert_eq!(body["error"]["code"], code);
        }
    }

    #[tokio::test]
    async fn test_bad_request_error() {
        let (status, body) =
            extract_error_body(ApiError(GatewayError::BadRequest("prompt".into()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "bad request: prompt");
    }

    #[tokio::test]
    async fn test_upgrade_failed_error() {
        let (status, body) =
            extract_error_body(ApiError(GatewayError::UpgradeFailed("no key".into()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "upgrade_failed");
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let (status, body) =
            extract_error_body(ApiError(GatewayError::NotFound("/nope".into()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "not_found_error");
    }

    #[tokio::test]
    async fn test_upstream_429_error() {
        let (status, body) = extract_error_body(ApiError(GatewayError::UpstreamRejected {
            status: 429,
            body: "rate limited".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["type"], "rate_limit_error");
        assert_eq!(body["error"]["code"], "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn test_upstream_403_error() {
        let (status, body) = extract_error_body(ApiError(GatewayError::UpstreamRejected {
            status: 403,
            body: "forbidden".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["type"], "permission_error");
    }

    #[tokio::test]
    async fn test_upstream_401_is_bad_gateway() {
        // the provider refusing our key is not the caller's fault
        let (status, body) = extract_error_body(ApiError(GatewayError::UpstreamRejected {
            status: 401,
            body: "invalid api key".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "upstream_error");
    }

    #[tokio::test]
    async fn test_upstream_unreachable_error() {
        let (status, body) = extract_error_body(ApiError(GatewayError::UpstreamUnreachable(
            "connection refused".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["type"], "server_error");
    }

    #[tokio::test]
    async fn test_internal_error() {
        let (status, body) =
            extract_error_body(ApiError(GatewayError::Config("bad config".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "internal_error");
    }
}
