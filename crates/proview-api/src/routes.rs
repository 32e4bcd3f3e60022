//! Router setup with all API routes and middleware.

use std::future::Future;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use proview_core::config::ProviewConfig;
use proview_core::error::{ProviewError, Result};

use crate::auth::{require_api_key, API_KEY_HEADER};
use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Request body limit: worst-case UTF-8 size of the largest allowed
/// document plus room for the JSON envelope.
fn body_limit(config: &ProviewConfig) -> usize {
    config
        .security
        .max_document_chars
        .saturating_mul(4)
        .saturating_add(64 * 1024)
}

fn cors_layer(config: &ProviewConfig) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in &config.security.allowed_origins {
        match origin.parse::<HeaderValue>() {
            Ok(value) => origins.push(value),
            Err(_) => tracing::warn!(origin = %origin, "Ignoring invalid CORS origin"),
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(API_KEY_HEADER),
        ])
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let config = state.config.as_ref();
    let cors = cors_layer(config);
    let limiter = RateLimiter::new(
        config.security.rate_limit_requests,
        Duration::from_secs(config.security.rate_limit_window_secs),
    );
    let body_limit = body_limit(config);

    // Routes that do NOT require authentication.
    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", delete(handlers::clear_session))
        .route("/sessions/{id}/documents", post(handlers::upload_document))
        .route("/sessions/{id}/chat", post(handlers::chat))
        .route("/sessions/{id}/stats", get(handlers::session_stats))
        .route("/admin/cleanup", post(handlers::run_cleanup))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(limiter))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the configured address until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.general.host, state.config.general.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ProviewError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
