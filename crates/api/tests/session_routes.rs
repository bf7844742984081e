//! Route-level tests over in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use api::middleware::AuthState;
use api::routes;
use api::state::AppState;
use services::test_utils::{
    InMemoryBufferRepository, InMemoryBus, InMemorySessionRepository, InMemoryWorkLog,
};
use services::{BufferService, RealtimeService, SessionService};

const SECRET: &str = "route-test-secret";

struct Harness {
    server: TestServer,
    buffers: Arc<BufferService>,
}

fn harness() -> Harness {
    let sessions = Arc::new(SessionService::new(Arc::new(
        InMemorySessionRepository::new(),
    )));
    let buffers = Arc::new(BufferService::new(
        Arc::new(InMemoryBufferRepository::new()),
        Duration::from_secs(3600),
    ));
    let realtime = Arc::new(RealtimeService::new(
        sessions.clone(),
        buffers.clone(),
        Arc::new(InMemoryWorkLog::new()),
        Arc::new(InMemoryBus::new()),
    ));

    let app = routes::app(
        AppState {
            sessions,
            buffers: buffers.clone(),
            realtime,
        },
        AuthState {
            jwt_secret: Some(SECRET.to_string()),
            issuer: None,
            audience: None,
        },
    );

    Harness {
        server: TestServer::new(app).unwrap(),
        buffers,
    }
}

fn token_for(user_id: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    encode(
        &Header::default(),
        &json!({ "sub": user_id, "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn start_session(harness: &Harness, user_id: &str) -> String {
    let response = harness
        .server
        .post("/session/start")
        .authorization_bearer(&token_for(user_id))
        .json(&json!({ "type": "interview", "language": "en" }))
        .await;
    assert_eq!(response.status_code(), 200);
    response.json::<serde_json::Value>()["session_id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let harness = harness();
    let response = harness.server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<serde_json::Value>()["status"], "ok");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let harness = harness();
    let response = harness.server.get("/openapi.json").await;
    assert_eq!(response.status_code(), 200);
    let doc = response.json::<serde_json::Value>();
    assert!(doc["paths"]["/session/start"].is_object());
}

#[tokio::test]
async fn session_routes_require_a_token() {
    let harness = harness();
    let response = harness
        .server
        .post("/session/start")
        .json(&json!({ "type": "interview", "language": "en" }))
        .await;
    assert_eq!(response.status_code(), 401);
    assert_eq!(
        response.json::<serde_json::Value>()["code"],
        "UNAUTHORIZED"
    );
}

#[tokio::test]
async fn start_and_get_session() {
    let harness = harness();
    let session_id = start_session(&harness, "user-1").await;

    let response = harness
        .server
        .get(&format!("/session/{session_id}"))
        .authorization_bearer(&token_for("user-1"))
        .await;
    assert_eq!(response.status_code(), 200);

    let session = response.json::<serde_json::Value>();
    assert_eq!(session["session_id"], session_id.as_str());
    assert_eq!(session["user_id"], "user-1");
    assert_eq!(session["status"], "active");
    assert_eq!(session["type"], "interview");
}

#[tokio::test]
async fn start_rejects_missing_language() {
    let harness = harness();
    let response = harness
        .server
        .post("/session/start")
        .authorization_bearer(&token_for("user-1"))
        .json(&json!({ "type": "interview", "language": "" }))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(
        response.json::<serde_json::Value>()["code"],
        "INVALID_ARGUMENT"
    );
}

#[tokio::test]
async fn foreign_session_is_forbidden() {
    let harness = harness();
    let session_id = start_session(&harness, "owner").await;

    let response = harness
        .server
        .get(&format!("/session/{session_id}"))
        .authorization_bearer(&token_for("intruder"))
        .await;
    assert_eq!(response.status_code(), 403);
    assert_eq!(response.json::<serde_json::Value>()["code"], "FORBIDDEN");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let harness = harness();
    let response = harness
        .server
        .get("/session/no-such-session")
        .authorization_bearer(&token_for("user-1"))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn end_session_is_idempotent() {
    let harness = harness();
    let session_id = start_session(&harness, "user-1").await;

    let first = harness
        .server
        .post(&format!("/session/{session_id}/end"))
        .authorization_bearer(&token_for("user-1"))
        .await;
    assert_eq!(first.status_code(), 200);
    assert_eq!(first.json::<serde_json::Value>()["status"], "ended");

    let second = harness
        .server
        .post(&format!("/session/{session_id}/end"))
        .authorization_bearer(&token_for("user-1"))
        .await;
    assert_eq!(second.status_code(), 200);

    let first_duration = first.json::<serde_json::Value>()["duration_seconds"]
        .as_i64()
        .unwrap();
    let second_duration = second.json::<serde_json::Value>()["duration_seconds"]
        .as_i64()
        .unwrap();
    assert!(second_duration >= first_duration);
}

#[tokio::test]
async fn chunk_listing_is_ordered_and_capped() {
    let harness = harness();
    let session_id = start_session(&harness, "user-1").await;

    for index in [2, 1, 3] {
        harness
            .buffers
            .insert_audio_chunk(&session_id, index, None, Some("AAAA".to_string()))
            .await
            .unwrap();
    }

    let response = harness
        .server
        .get(&format!("/session/{session_id}/chunks"))
        .authorization_bearer(&token_for("user-1"))
        .await;
    assert_eq!(response.status_code(), 200);
    let chunks = response.json::<Vec<serde_json::Value>>();
    let indexes: Vec<i64> = chunks
        .iter()
        .map(|c| c["chunk_index"].as_i64().unwrap())
        .collect();
    assert_eq!(indexes, vec![1, 2, 3]);

    let limited = harness
        .server
        .get(&format!("/session/{session_id}/chunks?limit=2"))
        .authorization_bearer(&token_for("user-1"))
        .await;
    assert_eq!(limited.json::<Vec<serde_json::Value>>().len(), 2);

    let foreign = harness
        .server
        .get(&format!("/session/{session_id}/chunks"))
        .authorization_bearer(&token_for("intruder"))
        .await;
    assert_eq!(foreign.status_code(), 403);
}
