mod support;

use rcommon::{MetadataMap, SessionId};
use relay::{Connection, GatewayFrame};
use rprovider::{ProviderError, Role};
use rstore::online_key;
use serde_json::json;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use support::{FakeProvider, Harness, frames_until, harness};

fn connection(harness: &Harness) -> (Connection, UnboundedReceiver<GatewayFrame>) {
    let (tx, rx) = unbounded_channel();
    (Connection::new(harness.state.clone(), tx), rx)
}

async fn online_count(harness: &Harness, session_id: &SessionId) -> Option<String> {
    harness
        .cache
        .get(&online_key(session_id))
        .await
        .expect("cache get")
}

#[tokio::test]
async fn connect_announces_presence_and_disconnect_clears_counter() {
    let harness = harness(FakeProvider::answering(&["hi"]));
    let session_id = SessionId::generate();
    let (alice, mut alice_rx) = connection(&harness);
    let (bob, mut bob_rx) = connection(&harness);

    alice.connect(&session_id).await;
    let frame = alice_rx.try_recv().expect("own userOnline");
    assert_eq!(frame.event, "userOnline");
    assert_eq!(frame.data, json!({ "sessionId": session_id.as_str() }));

    bob.connect(&session_id).await;
    assert_eq!(alice_rx.try_recv().expect("bob online").event, "userOnline");
    assert_eq!(bob_rx.try_recv().expect("own userOnline").event, "userOnline");
    assert_eq!(harness.state.membership.count(&session_id), 2);
    assert_eq!(online_count(&harness, &session_id).await.as_deref(), Some("2"));

    alice.disconnect().await;
    assert_eq!(harness.state.membership.count(&session_id), 1);
    assert_eq!(online_count(&harness, &session_id).await.as_deref(), Some("1"));

    bob.disconnect().await;
    assert_eq!(harness.state.membership.count(&session_id), 0);
    assert!(online_count(&harness, &session_id).await.is_none());
}

#[tokio::test]
async fn send_message_streams_chunks_then_one_completion_to_sender_only() {
    let harness = harness(FakeProvider::answering(&["Free shipping ", "over $50."]));
    let session = harness
        .repository
        .create_session(MetadataMap::new())
        .await
        .expect("session");
    let (alice, mut alice_rx) = connection(&harness);
    let (bob, mut bob_rx) = connection(&harness);
    alice.connect(&session.id).await;
    bob.connect(&session.id).await;
    while alice_rx.try_recv().is_ok() {}
    while bob_rx.try_recv().is_ok() {}

    alice
        .handle_text(
            &json!({
                "event": "sendMessage",
                "data": { "sessionId": session.id.as_str(), "content": "Do you ship free?" }
            })
            .to_string(),
        )
        .await;

    let (chunks, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    let chunks = chunks
        .iter()
        .map(|frame| {
            assert_eq!(frame.event, "streamChunk");
            frame.data.as_str().expect("chunk text").to_string()
        })
        .collect::<Vec<_>>();
    assert_eq!(chunks, vec!["Free shipping ", "over $50."]);
    assert_eq!(completion.data["role"], "assistant");
    assert_eq!(completion.data["content"], "Free shipping over $50.");
    assert_eq!(completion.data["sessionId"], session.id.as_str());
    assert!(completion.data.get("error").is_none());
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn send_message_without_session_creates_one_and_joins_its_room() {
    let harness = harness(FakeProvider::answering(&["Hello!"]));
    let (alice, mut alice_rx) = connection(&harness);

    alice.send_message(None, "Hi there".to_string()).await;

    let (_, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    let session_id = SessionId::from(completion.data["sessionId"].as_str().expect("session id"));
    assert!(session_id.is_uuid());
    assert_eq!(harness.state.membership.count(&session_id), 1);

    let session = harness
        .repository
        .find_session(&session_id)
        .await
        .expect("lookup")
        .expect("session exists");
    assert_eq!(session.source(), Some("websocket"));
}

#[tokio::test]
async fn provider_failure_emits_error_then_synthetic_completion() {
    let harness = harness(FakeProvider::failing(
        ProviderError::unavailable("model is overloaded").with_status(503),
    ));
    let session = harness
        .repository
        .create_session(MetadataMap::new())
        .await
        .expect("session");
    let (alice, mut alice_rx) = connection(&harness);

    alice
        .send_message(Some(session.id.to_string()), "Where is my order?".to_string())
        .await;

    let (before, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    let error = before
        .iter()
        .find(|frame| frame.event == "error")
        .expect("error frame");
    assert_eq!(error.data["message"], "Failed to process message");
    assert!(
        error.data["details"]
            .as_str()
            .expect("details")
            .contains("temporarily unavailable")
    );
    assert_eq!(completion.data["id"], "error");
    assert_eq!(completion.data["role"], "assistant");
    assert_eq!(completion.data["error"], true);
    assert_eq!(completion.data["sessionId"], session.id.as_str());
    assert_eq!(
        completion.data["content"],
        "Sorry, I encountered an error processing your message. Please try again."
    );
}

#[tokio::test]
async fn invalid_content_fails_before_any_session_is_created() {
    let harness = harness(FakeProvider::answering(&["unused"]));
    let (alice, mut alice_rx) = connection(&harness);

    alice.send_message(None, "   ".to_string()).await;

    let (before, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].event, "error");
    assert_eq!(completion.data["error"], true);
    assert!(completion.data["sessionId"].is_null());
    assert_eq!(harness.provider.stream_calls(), 0);
}

#[tokio::test]
async fn typing_is_broadcast_to_peers_but_not_the_sender() {
    let harness = harness(FakeProvider::answering(&["unused"]));
    let session_id = SessionId::generate();
    let (alice, mut alice_rx) = connection(&harness);
    let (bob, mut bob_rx) = connection(&harness);
    alice.connect(&session_id).await;
    bob.connect(&session_id).await;
    while alice_rx.try_recv().is_ok() {}
    while bob_rx.try_recv().is_ok() {}

    alice
        .handle_text(
            &json!({ "event": "typing", "data": { "sessionId": session_id.as_str(), "isTyping": true } })
                .to_string(),
        )
        .await;
    let frame = bob_rx.try_recv().expect("typing frame");
    assert_eq!(frame.event, "typing");
    assert_eq!(
        frame.data,
        json!({ "sessionId": session_id.as_str(), "isTyping": true })
    );
    assert!(alice_rx.try_recv().is_err());

    alice
        .handle_text(
            &json!({ "event": "stopTyping", "data": { "sessionId": session_id.as_str() } })
                .to_string(),
        )
        .await;
    let frame = bob_rx.try_recv().expect("stop typing frame");
    assert_eq!(frame.data["isTyping"], false);
}

#[tokio::test]
async fn malformed_and_unknown_frames_get_error_events() {
    let harness = harness(FakeProvider::answering(&["unused"]));
    let (alice, mut alice_rx) = connection(&harness);

    alice.handle_text("{not json").await;
    let frame = alice_rx.try_recv().expect("error frame");
    assert_eq!(frame.event, "error");
    assert_eq!(frame.data["message"], "Invalid frame");

    alice
        .handle_text(&json!({ "event": "joinRoom", "data": {} }).to_string())
        .await;
    let frame = alice_rx.try_recv().expect("error frame");
    assert_eq!(frame.event, "error");
    assert_eq!(frame.data["message"], "Unknown event");

    alice
        .handle_text(&json!({ "event": "typing", "data": { "isTyping": true } }).to_string())
        .await;
    assert_eq!(alice_rx.try_recv().expect("error frame").event, "error");
}

#[tokio::test]
async fn send_message_after_disconnect_does_not_rejoin_the_room() {
    let harness = harness(FakeProvider::answering(&["Hello!"]));
    let (alice, mut alice_rx) = connection(&harness);

    alice.disconnect().await;
    alice.send_message(None, "Hi there".to_string()).await;

    let (_, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    let session_id = SessionId::from(completion.data["sessionId"].as_str().expect("session id"));
    assert_eq!(harness.state.membership.count(&session_id), 0);
    assert!(online_count(&harness, &session_id).await.is_none());

    let messages = harness
        .repository
        .recent_messages(&session_id, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn disconnect_mid_turn_keeps_the_answer_and_empties_the_room() {
    let harness = harness(FakeProvider::gated(&["Orders ship ", "within 2 days."]));
    let session = harness
        .repository
        .create_session(MetadataMap::new())
        .await
        .expect("session");
    let (alice, mut alice_rx) = connection(&harness);
    alice.connect(&session.id).await;

    alice
        .handle_text(
            &json!({
                "event": "sendMessage",
                "data": { "sessionId": session.id.as_str(), "content": "When will it ship?" }
            })
            .to_string(),
        )
        .await;
    harness.provider.wait_for_stream_call().await;

    alice.disconnect().await;
    assert_eq!(harness.state.membership.count(&session.id), 0);
    assert!(online_count(&harness, &session.id).await.is_none());

    harness.provider.release();
    let (_, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    assert_eq!(completion.data["content"], "Orders ship within 2 days.");

    let messages = harness
        .repository
        .recent_messages(&session.id, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].content, "Orders ship within 2 days.");
    assert_eq!(harness.state.membership.count(&session.id), 0);
    assert!(online_count(&harness, &session.id).await.is_none());
}

#[tokio::test]
async fn disconnect_while_a_new_session_turn_runs_leaves_no_presence_behind() {
    let harness = harness(FakeProvider::gated(&["Hi!"]));
    let (alice, mut alice_rx) = connection(&harness);

    alice
        .handle_text(&json!({ "event": "sendMessage", "data": { "content": "Hello" } }).to_string())
        .await;
    harness.provider.wait_for_stream_call().await;

    alice.disconnect().await;
    harness.provider.release();

    let (_, completion) = frames_until(&mut alice_rx, "streamComplete").await;
    let session_id = SessionId::from(completion.data["sessionId"].as_str().expect("session id"));
    assert_eq!(harness.state.membership.count(&session_id), 0);
    assert!(online_count(&harness, &session_id).await.is_none());
    assert_eq!(
        harness
            .repository
            .recent_messages(&session_id, 10)
            .await
            .expect("messages")
            .len(),
        2
    );
}
