// Module: http
// Signaling endpoints, health/stats and optional static asset serving

pub mod error;
pub mod health;
pub mod session_cookie;
pub mod signaling;

use axum::{
    http::{header, HeaderValue},
    Router,
};
use fanout_core::ServerConfig;
use fanout_sfu::SignalingOrchestrator;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower::ServiceBuilder;
use tower_http::set_header::{SetResponseHeader, SetResponseHeaderLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};
pub use session_cookie::SessionCookie;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SignalingOrchestrator>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SignalingOrchestrator>, server: ServerConfig) -> Self {
        Self {
            orchestrator,
            server: Arc::new(server),
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .merge(signaling::create_signaling_router())
        .merge(health::create_health_router());

    if let Some(dir) = &state.server.static_dir {
        tracing::info!(static_dir = %dir, "Serving static files under /static");
        router = router.nest_service("/static", static_service(dir));
    }

    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}

type NoCache<S> = SetResponseHeader<S, HeaderValue>;

/// Static files, never cached by the browser
fn static_service(dir: &str) -> NoCache<NoCache<NoCache<ServeDir>>> {
    ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .service(ServeDir::new(dir))
}
