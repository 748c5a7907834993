//! HTTP layer: axum router, route handlers and error mapping.
//!
//! Exposes the streaming chat endpoint (`/v1/chat_bot`), the realtime
//! WebSocket endpoint (`/v1/realtime`), a token check (`/v1/whoami`) and an
//! unauthenticated health check.

mod auth;
mod chat;
mod error;
mod realtime;

pub use auth::Principal;
pub use chat::ChannelSink;
pub use error::ApiError;

use arc_swap::ArcSwap;
use axum::{
    Json, Router,
    extract::State,
    http::Uri,
    routing::get,
};
use promptgate_config::Config;
use promptgate_types::{GatewayError, TokenValidator, UpstreamDialer};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state passed to all route handlers.
pub struct AppState {
    /// Server configuration, atomically swappable for hot-reloading.
    /// Handlers take one snapshot per request.
    pub config: Arc<ArcSwap<Config>>,
    /// HTTP client for upstream completion requests.
    pub http: reqwest::Client,
    /// Bearer-token validator used by the [`Principal`] extractor.
    pub validator: Arc<dyn TokenValidator>,
    /// Opens upstream realtime sessions.
    pub dialer: Arc<dyn UpstreamDialer>,
}

impl AppState {
    /// Creates a new shared application state wrapped in an `Arc`.
    ///
    /// If the config specifies a `proxy_url`, the HTTP client is built with that proxy.
    pub fn new(
        config: Arc<ArcSwap<Config>>,
        validator: Arc<dyn TokenValidator>,
        dialer: Arc<dyn UpstreamDialer>,
    ) -> Arc<Self> {
        let http = build_http_client(config.load().proxy_url.as_deref());
        Arc::new(Self {
            config,
            http,
            validator,
            dialer,
        })
    }
}

/// Build an HTTP client, optionally configured with a proxy URL.
#[must_use]
pub fn build_http_client(proxy_url: Option<&str>) -> reqwest::Client {
    if let Some(url) = proxy_url {
        match reqwest::Proxy::all(url) {
            Ok(proxy) => {
                return reqwest::Client::builder()
                    .proxy(proxy)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new());
            }
            Err(e) => {
                tracing::warn!(url = url, error = %e, "invalid proxy_url, using direct connection");
            }
        }
    }
    reqwest::Client::new()
}

/// Build the full axum router.
///
/// Routes:
/// - GET /v1/healthcheck                 liveness, no auth
/// - GET /v1/chat_bot?prompt=...         SSE completion stream
/// - GET /v1/realtime                    WebSocket realtime session
/// - GET /v1/whoami                      authenticated subject
///
/// Anything else answers with a `not_found_error`.
pub fn make_router(state: Arc<AppState>) -> Router {
    let cors = state.config.load().cors_allow_any;
    let router = Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .route("/v1/chat_bot", get(chat::chat_bot))
        .route("/v1/realtime", get(realtime::realtime))
        .route("/v1/whoami", get(whoami))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn healthcheck(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.config.load();
    Json(json!({
        "status": "alive",
        "environment": config.environment,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn whoami(principal: Principal) -> Json<Value> {
    Json(json!({
        "subject": principal.subject,
        "anonymous": principal.is_anonymous(),
    }))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError(GatewayError::NotFound(uri.path().to_string()))
}
