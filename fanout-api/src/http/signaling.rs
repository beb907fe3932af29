//! Signaling endpoints
//!
//! Offers and candidates arrive as the JSON a browser produces for
//! `RTCSessionDescriptionInit` / `RTCIceCandidateInit`. Bodies are parsed
//! here, before any session is touched, so malformed input never reaches
//! the orchestrator.

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use fanout_sfu::{IceCandidate, SessionDescription, SessionRole};

use super::error::AppResult;
use super::session_cookie::SessionCookie;
use super::AppState;

/// Signaling routes
pub fn create_signaling_router() -> Router<AppState> {
    Router::new()
        .route("/publish", post(publish))
        .route("/view", post(view))
        .route("/ice-candidate-p", post(add_publisher_candidate))
        .route("/ice-candidate-v", post(add_viewer_candidate))
        .route("/ice-candidates-p", get(poll_publisher_candidates))
        .route("/ice-candidates-v", get(poll_viewer_candidates))
}

/// Parse an offer and hand it to the orchestrator for `role`
async fn answer_offer(
    state: &AppState,
    cookie: &SessionCookie,
    role: SessionRole,
    body: &Bytes,
) -> AppResult<Json<SessionDescription>> {
    let offer = SessionDescription::from_json(body)?;
    let answer = match role {
        SessionRole::Publisher => state.orchestrator.publish(&cookie.id, offer).await?,
        SessionRole::Viewer => state.orchestrator.view(&cookie.id, offer).await?,
    };
    Ok(Json(answer))
}

async fn publish(
    State(state): State<AppState>,
    cookie: SessionCookie,
    body: Bytes,
) -> (SessionCookie, AppResult<Json<SessionDescription>>) {
    let result = answer_offer(&state, &cookie, SessionRole::Publisher, &body).await;
    (cookie, result)
}

async fn view(
    State(state): State<AppState>,
    cookie: SessionCookie,
    body: Bytes,
) -> (SessionCookie, AppResult<Json<SessionDescription>>) {
    let result = answer_offer(&state, &cookie, SessionRole::Viewer, &body).await;
    (cookie, result)
}

async fn add_candidate(
    state: &AppState,
    cookie: &SessionCookie,
    role: SessionRole,
    body: &Bytes,
) -> AppResult<()> {
    let candidate = IceCandidate::from_json(body)?;
    state
        .orchestrator
        .add_candidate(&cookie.id, role, candidate)
        .await?;
    Ok(())
}

async fn add_publisher_candidate(
    State(state): State<AppState>,
    cookie: SessionCookie,
    body: Bytes,
) -> (SessionCookie, AppResult<()>) {
    let result = add_candidate(&state, &cookie, SessionRole::Publisher, &body).await;
    (cookie, result)
}

async fn add_viewer_candidate(
    State(state): State<AppState>,
    cookie: SessionCookie,
    body: Bytes,
) -> (SessionCookie, AppResult<()>) {
    let result = add_candidate(&state, &cookie, SessionRole::Viewer, &body).await;
    (cookie, result)
}

async fn poll_publisher_candidates(
    State(state): State<AppState>,
    cookie: SessionCookie,
) -> (SessionCookie, Json<Vec<IceCandidate>>) {
    let candidates = state
        .orchestrator
        .poll_candidates(&cookie.id, SessionRole::Publisher)
        .await;
    (cookie, Json(candidates))
}

async fn poll_viewer_candidates(
    State(state): State<AppState>,
    cookie: SessionCookie,
) -> (SessionCookie, Json<Vec<IceCandidate>>) {
    let candidates = state
        .orchestrator
        .poll_candidates(&cookie.id, SessionRole::Viewer)
        .await;
    (cookie, Json(candidates))
}
