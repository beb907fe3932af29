//! HTTP signaling surface driven through the router
//!
//! Run with: cargo test -p fanout-api --test http_api

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use fanout_api::{create_router, AppState};
use fanout_core::ServerConfig;
use fanout_sfu::testing::{wait_for_state, EngineCall, ScriptedEngine, ScriptedTrack};
use fanout_sfu::{
    ConnectionState, IceCandidate, InMemoryRegistry, MediaCodec, SelectionStrategy, SessionId,
    SessionRegistry, SessionRole, SessionState, SignalingOrchestrator, TrackKind, TransportEvent,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    engine: Arc<ScriptedEngine>,
    registry: Arc<InMemoryRegistry>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with_server(ServerConfig::default())
    }

    fn with_server(server: ServerConfig) -> Self {
        let engine = Arc::new(ScriptedEngine::new());
        let registry = Arc::new(InMemoryRegistry::new(SelectionStrategy::FirstMatch));
        let orchestrator = Arc::new(SignalingOrchestrator::new(
            registry.clone(),
            engine.clone(),
        ));
        let router = create_router(AppState::new(orchestrator, server));
        Self {
            engine,
            registry,
            router,
        }
    }

    async fn post(&self, path: &str, cookie: Option<&str>, body: &str) -> Response<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = cookie {
            request = request.header(header::COOKIE, format!("session-id={id}"));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().uri(path);
        if let Some(id) = cookie {
            request = request.header(header::COOKIE, format!("session-id={id}"));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn set_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string())
}

fn offer() -> String {
    json!({ "type": "offer", "sdp": "v=0\r\n" }).to_string()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"OK");
}

#[tokio::test]
async fn test_publish_returns_answer_and_mints_cookie() {
    let app = TestApp::new();
    let response = app.post("/publish", None, &offer()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response).expect("session cookie should be minted");
    assert!(cookie.starts_with("session-id="));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));

    let answer = body_json(response).await;
    assert_eq!(answer["type"], "answer");
    assert!(!answer["sdp"].as_str().unwrap().is_empty());

    let id = cookie
        .trim_start_matches("session-id=")
        .split(';')
        .next()
        .unwrap()
        .to_string();
    let session = app
        .registry
        .lookup(&SessionId::from(id), SessionRole::Publisher)
        .unwrap();
    assert_eq!(session.state().await, SessionState::Negotiating);
}

#[tokio::test]
async fn test_existing_cookie_is_reused() {
    let app = TestApp::new();
    let response = app.post("/publish", Some("client-1"), &offer()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).is_none());
    assert!(app
        .registry
        .lookup(&SessionId::from("client-1"), SessionRole::Publisher)
        .is_some());
}

#[tokio::test]
async fn test_malformed_offer_is_rejected() {
    let app = TestApp::new();

    let response = app.post("/publish", Some("client-1"), "{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["status"], 400);
    assert!(error["error"].is_string());

    let wrong_type = json!({ "type": "answer", "sdp": "v=0" }).to_string();
    let response = app.post("/publish", Some("client-1"), &wrong_type).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.registry.is_empty());
    assert_eq!(app.engine.transports_created(), 0);
}

#[tokio::test]
async fn test_view_without_publisher_is_unavailable() {
    let app = TestApp::new();
    let response = app.post("/view", Some("viewer-1"), &offer()).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], 503);
    assert_eq!(app.engine.transports_created(), 0);
    assert!(app
        .registry
        .lookup(&SessionId::from("viewer-1"), SessionRole::Viewer)
        .is_none());
}

#[tokio::test]
async fn test_view_binds_to_publisher_with_media() {
    let app = TestApp::new();
    app.post("/publish", Some("pub-1"), &offer()).await;

    // Connected alone is not enough; the publisher also needs a sink
    app.engine
        .transport_for(&SessionId::from("pub-1"), SessionRole::Publisher)
        .unwrap()
        .emit(TransportEvent::ConnectionStateChanged(ConnectionState::Connected));
    let publisher = app
        .registry
        .lookup(&SessionId::from("pub-1"), SessionRole::Publisher)
        .unwrap();
    wait_for_state(&publisher, SessionState::Connected).await;

    let response = app.post("/view", Some("viewer-1"), &offer()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    app.engine
        .transport_for(&SessionId::from("pub-1"), SessionRole::Publisher)
        .unwrap()
        .emit(TransportEvent::TrackArrived(Arc::new(ScriptedTrack::new(
            "video-1",
            MediaCodec::new(TrackKind::Video, "video/VP8", 90000),
        ))));
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while !publisher.is_selectable().await {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("publisher should become selectable");

    let response = app.post("/view", Some("viewer-1"), &offer()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["type"], "answer");
    let viewer = app
        .registry
        .lookup(&SessionId::from("viewer-1"), SessionRole::Viewer)
        .unwrap();
    assert_eq!(viewer.bound_publisher().await, Some(SessionId::from("pub-1")));
}

#[tokio::test]
async fn test_candidate_for_unknown_session_is_dropped() {
    let app = TestApp::new();
    let candidate = json!({ "candidate": "candidate:1", "sdpMid": "0" }).to_string();

    let response = app.post("/ice-candidate-p", Some("pub-1"), &candidate).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_candidates_posted_during_publish_applied_in_order() {
    let app = TestApp::new();
    let gate = app.engine.hold_remote_description();
    let id = SessionId::from("pub-1");
    let candidate = |name: &str| {
        json!({ "candidate": name, "sdpMid": "0", "sdpMLineIndex": 0 }).to_string()
    };

    let client = async {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if let Some(session) = app.registry.lookup(&id, SessionRole::Publisher) {
                    if session.state().await == SessionState::Negotiating {
                        break;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("publish should reach negotiation");

        for name in ["candidate:A", "candidate:B"] {
            let response = app
                .post("/ice-candidate-p", Some("pub-1"), &candidate(name))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(app.engine.added_candidates().is_empty());
        gate.notify_one();
    };

    let offer_body = offer();
    let (response, ()) = tokio::join!(app.post("/publish", Some("pub-1"), &offer_body), client);
    assert_eq!(response.status(), StatusCode::OK);

    let applied: Vec<EngineCall> = app
        .engine
        .calls()
        .into_iter()
        .skip_while(|call| *call != EngineCall::SetRemoteDescription)
        .take(4)
        .collect();
    assert_eq!(
        applied,
        vec![
            EngineCall::SetRemoteDescription,
            EngineCall::AddCandidate("candidate:A".to_string()),
            EngineCall::AddCandidate("candidate:B".to_string()),
            EngineCall::CreateAnswer,
        ]
    );
    assert_eq!(app.engine.added_candidates()[0].sdp_mline_index, Some(0));
}

#[tokio::test]
async fn test_end_of_candidates_post_is_accepted() {
    let app = TestApp::new();
    let response = app.post("/publish", Some("pub-1"), &offer()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let marker = r#"{"candidate":"","sdpMid":"0","sdpMLineIndex":0}"#;
    let response = app.post("/ice-candidate-p", Some("pub-1"), marker).await;
    assert_eq!(response.status(), StatusCode::OK);

    let added = app.engine.added_candidates();
    assert_eq!(added.len(), 1);
    assert!(added[0].candidate.is_empty());
    assert_eq!(added[0].sdp_mid.as_deref(), Some("0"));
    assert_eq!(app.engine.calls().last(), Some(&EngineCall::AddCandidate(String::new())));
}

#[tokio::test]
async fn test_unparsable_candidate_is_rejected() {
    let app = TestApp::new();

    let response = app.post("/ice-candidate-v", Some("viewer-1"), "[]").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], 400);

    let response = app.post("/ice-candidate-v", Some("viewer-1"), "{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_candidate_poll() {
    let app = TestApp::new();

    let response = app.get("/ice-candidates-v", Some("nobody")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));

    app.post("/publish", Some("pub-1"), &offer()).await;
    app.engine
        .transport_for(&SessionId::from("pub-1"), SessionRole::Publisher)
        .unwrap()
        .emit(TransportEvent::CandidateDiscovered(IceCandidate::new("candidate:local")));

    let mut polled = Vec::new();
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while polled.is_empty() {
            let response = app.get("/ice-candidates-p", Some("pub-1")).await;
            let body = body_json(response).await;
            polled.extend(body.as_array().unwrap().iter().cloned());
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("local candidate should be polled");

    assert_eq!(polled, vec![json!({ "candidate": "candidate:local" })]);
    let response = app.get("/ice-candidates-p", Some("pub-1")).await;
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_stats() {
    let app = TestApp::new();
    app.post("/publish", Some("pub-1"), &offer()).await;

    let response = app.get("/stats", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["publishers"], 1);
    assert_eq!(stats["viewers"], 0);
    assert_eq!(stats["sessions"][0]["id"], "pub-1");
    assert_eq!(stats["sessions"][0]["state"], "negotiating");
}

#[tokio::test]
async fn test_static_files_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
    let app = TestApp::with_server(ServerConfig {
        static_dir: Some(dir.path().to_str().unwrap().to_string()),
        ..ServerConfig::default()
    });

    let response = app.get("/static/index.html", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    assert_eq!(response.headers()[header::PRAGMA], "no-cache");
    assert_eq!(response.headers()[header::EXPIRES], "0");
    assert_eq!(body_bytes(response).await, b"<html></html>");

    let response = app.get("/static/missing.html", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
