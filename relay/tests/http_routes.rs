mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use rcommon::SessionId;
use relay::RelayConfig;
use rprovider::{ProviderError, Role};
use rstore::history_key;
use serde_json::{Value, json};
use tower::ServiceExt;

use support::{FakeProvider, Harness, harness};

fn app(harness: &Harness) -> axum::Router {
    relay::router(harness.state.clone(), &RelayConfig::default())
}

fn post_chat(body: Value) -> Request<Body> {
    post_json("/chat", body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}

#[tokio::test]
async fn health_and_banner_report_ok() {
    let harness = harness(FakeProvider::answering(&["hi"]));

    let response = app(&harness).oneshot(get("/health")).await.expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "ok");
    assert!(health["timestamp"].is_string());

    let response = app(&harness).oneshot(get("/")).await.expect("banner");
    let banner = body_json(response).await;
    assert_eq!(banner["message"], "Spur AI Chat API is running");
    assert_eq!(banner["version"], "1.0.0");
    assert_eq!(banner["endpoints"]["websocket"]["path"], "/chat/ws");
}

#[tokio::test]
async fn post_chat_streams_tokens_with_session_header_and_persists_turn() {
    let harness = harness(FakeProvider::answering(&[
        "Returns are accepted ",
        "within 30 days of delivery.",
    ]));

    let response = app(&harness)
        .oneshot(post_chat(json!({ "content": "What is the return window?" })))
        .await
        .expect("chat");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream; charset=utf-8"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    let session_id = response.headers()["x-session-id"]
        .to_str()
        .expect("header")
        .to_string();
    let session_id = SessionId::parse_uuid(&session_id).expect("uuid session id");

    let text = body_text(response).await;
    assert_eq!(text, "Returns are accepted within 30 days of delivery.");

    let messages = harness
        .repository
        .recent_messages(&session_id, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].content, "Returns are accepted within 30 days of delivery.");
    assert_eq!(messages[1].role, Role::User);
    assert!(
        harness
            .cache
            .get(&history_key(&session_id))
            .await
            .expect("cache get")
            .is_none()
    );

    let response = app(&harness)
        .oneshot(get(&format!("/chat/{session_id}")))
        .await
        .expect("transcript");
    assert_eq!(response.status(), StatusCode::OK);
    let transcript = body_json(response).await;
    assert_eq!(transcript["id"], session_id.as_str());
    assert_eq!(transcript["messages"][0]["content"], "What is the return window?");
    assert_eq!(transcript["messages"][1]["role"], "assistant");
}

#[tokio::test]
async fn follow_up_turn_reuses_the_session() {
    let harness = harness(FakeProvider::answering(&["Sure."]));

    let first = app(&harness)
        .oneshot(post_chat(json!({ "content": "Do you ship to Canada?" })))
        .await
        .expect("first");
    let session_id = first.headers()["x-session-id"]
        .to_str()
        .expect("header")
        .to_string();
    body_text(first).await;

    let second = app(&harness)
        .oneshot(post_chat(json!({ "sessionId": session_id, "content": "How much?" })))
        .await
        .expect("second");
    assert_eq!(second.headers()["x-session-id"], session_id.as_str());
    body_text(second).await;

    let messages = harness
        .repository
        .recent_messages(&SessionId::from(session_id), 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 4);
}

#[tokio::test]
async fn oversized_content_is_rejected_before_any_side_effect() {
    let harness = harness(FakeProvider::answering(&["unused"]));

    let response = app(&harness)
        .oneshot(post_chat(json!({ "content": "x".repeat(4001) })))
        .await
        .expect("chat");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["statusCode"], 400);
    assert!(error["message"].as_str().expect("message").contains("4000"));
    assert_eq!(harness.provider.stream_calls(), 0);
}

#[tokio::test]
async fn malformed_bodies_and_session_ids_are_bad_requests() {
    let harness = harness(FakeProvider::answering(&["unused"]));

    let missing_content = app(&harness)
        .oneshot(post_chat(json!({ "sessionId": null })))
        .await
        .expect("chat");
    assert_eq!(missing_content.status(), StatusCode::BAD_REQUEST);

    let blank = app(&harness)
        .oneshot(post_chat(json!({ "content": "   " })))
        .await
        .expect("chat");
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let bad_id = app(&harness)
        .oneshot(post_chat(json!({ "sessionId": "abc", "content": "hello" })))
        .await
        .expect("chat");
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.provider.stream_calls(), 0);
}

#[tokio::test]
async fn provider_rate_limit_appends_apology_and_closes_stream() {
    let harness = harness(FakeProvider::failing(
        ProviderError::rate_limited("Resource has been exhausted").with_status(429),
    ));

    let response = app(&harness)
        .oneshot(post_chat(json!({ "content": "What is the return window?" })))
        .await
        .expect("chat");
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = SessionId::from(
        response.headers()["x-session-id"]
            .to_str()
            .expect("header"),
    );

    let text = body_text(response).await;
    assert!(text.starts_with("\nSorry, we're receiving too many requests"));

    let messages = harness
        .repository
        .recent_messages(&session_id, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let harness = harness(FakeProvider::answering(&["unused"]));

    for uri in [
        format!("/chat/{}", SessionId::generate()),
        "/chat/not-a-uuid".to_string(),
    ] {
        let response = app(&harness).oneshot(get(&uri)).await.expect("transcript");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "statusCode": 404, "message": "Session not found" })
        );
    }
}

#[tokio::test]
async fn cors_preflight_honours_configured_origins() {
    let harness = harness(FakeProvider::answering(&["unused"]));
    let config = RelayConfig {
        cors_origins: vec!["https://chat.example.com".to_string()],
        ..RelayConfig::default()
    };
    let app = relay::router(harness.state.clone(), &config);

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/chat")
                .header(header::ORIGIN, "https://chat.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("preflight");

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://chat.example.com"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

#[tokio::test]
async fn non_streaming_turn_returns_the_persisted_assistant_message() {
    let harness = harness(FakeProvider::answering(&["We are open ", "9am to 5pm."]));

    let response = app(&harness)
        .oneshot(post_json("/chat/ws", json!({ "content": "What are your hours?" })))
        .await
        .expect("chat");
    assert_eq!(response.status(), StatusCode::OK);
    let message = body_json(response).await;
    assert_eq!(message["role"], "assistant");
    assert_eq!(message["content"], "We are open 9am to 5pm.");
    assert!(message["createdAt"].is_string());

    let session_id = SessionId::parse_uuid(message["sessionId"].as_str().expect("session id"))
        .expect("uuid session id");
    let session = harness
        .repository
        .find_session(&session_id)
        .await
        .expect("lookup")
        .expect("session exists");
    assert_eq!(session.source(), Some("api"));

    let response = app(&harness)
        .oneshot(post_json(
            "/chat/ws",
            json!({ "sessionId": session_id.as_str(), "content": "And on weekends?" }),
        ))
        .await
        .expect("follow-up");
    assert_eq!(body_json(response).await["sessionId"], session_id.as_str());
    let messages = harness
        .repository
        .recent_messages(&session_id, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 4);
}

#[tokio::test]
async fn non_streaming_turn_maps_failures_to_json_errors() {
    let harness = harness(FakeProvider::failing(
        ProviderError::rate_limited("Resource has been exhausted").with_status(429),
    ));

    let response = app(&harness)
        .oneshot(post_json("/chat/ws", json!({ "content": "Hello?" })))
        .await
        .expect("chat");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error = body_json(response).await;
    assert_eq!(error["statusCode"], 502);
    assert!(
        error["message"]
            .as_str()
            .expect("message")
            .starts_with("Sorry, we're receiving too many requests")
    );
    let calls = harness.provider.stream_calls();

    let response = app(&harness)
        .oneshot(post_json("/chat/ws", json!({ "content": "" })))
        .await
        .expect("chat");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&harness)
        .oneshot(post_json("/chat/ws", json!({ "sessionId": "abc", "content": "hi" })))
        .await
        .expect("chat");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.provider.stream_calls(), calls);
}
