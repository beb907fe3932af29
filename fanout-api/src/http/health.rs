//! Health check and stats endpoints

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use fanout_sfu::SessionSnapshot;
use futures::future::join_all;
use serde::Serialize;

use crate::http::AppState;

/// Registry snapshot returned by `/stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub publishers: usize,
    pub viewers: usize,
    pub sessions: Vec<SessionSnapshot>,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let registry = state.orchestrator.registry();
    let publishers = registry.publishers();
    let viewers = registry.viewers();

    let mut sessions = join_all(
        publishers
            .iter()
            .chain(viewers.iter())
            .map(|session| session.snapshot()),
    )
    .await;
    sessions.sort_by(|a, b| (a.role.as_str(), &a.id).cmp(&(b.role.as_str(), &b.id)));

    Json(StatsResponse {
        publishers: publishers.len(),
        viewers: viewers.len(),
        sessions,
    })
}
