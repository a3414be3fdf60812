//! WebSocket transport at `/chat/ws`.
//!
//! Frames in both directions are JSON `{"event": name, "data": payload}`.
//! Inbound events: `sendMessage`, `typing`, `stopTyping`. Outbound events:
//! `streamChunk`, `streamComplete`, `typing`, `userOnline`, `error`.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use rchat::{CompletedMessage, FailureReport, ResolvedSession, TokenSink};
use rcommon::SessionId;
use rstore::online_key;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::sync::mpsc::unbounded_channel;
use uuid::Uuid;

use crate::AppState;
use crate::membership::{ClientId, Outbound};

pub const SESSION_SOURCE: &str = "websocket";
pub const PROCESS_FAILURE_MESSAGE: &str = "Failed to process message";
pub const APOLOGY_MESSAGE: &str =
    "Sorry, I encountered an error processing your message. Please try again.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl GatewayFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(
            "error",
            json!({ "message": message.into(), "details": details.into() }),
        )
    }

    fn typing(session_id: &SessionId, is_typing: bool) -> Self {
        Self::new(
            "typing",
            json!({ "sessionId": session_id, "isTyping": is_typing }),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    #[serde(default)]
    session_id: Option<String>,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    session_id: SessionId,
    #[serde(default)]
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopTypingPayload {
    session_id: SessionId,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/chat/ws", get(upgrade))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    let session_id = non_empty(query.session_id).map(SessionId::from);
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: Option<SessionId>) {
    let (outbound, mut outbound_rx) = unbounded_channel::<GatewayFrame>();
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(phase = "gateway", event = "encode_failed", error = %err);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let connection = Connection::new(state, outbound);
    tracing::debug!(
        phase = "gateway",
        event = "connected",
        client_id = %connection.client_id,
        session_id = session_id.as_ref().map(SessionId::as_str)
    );
    if let Some(session_id) = session_id {
        connection.connect(&session_id).await;
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => connection.handle_text(text.as_str()).await,
            Ok(Message::Binary(_)) => {
                connection.emit(GatewayFrame::error(
                    "Unsupported frame",
                    "binary frames are not supported",
                ));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(
                    phase = "gateway",
                    event = "receive_failed",
                    client_id = %connection.client_id,
                    error = %err
                );
                break;
            }
        }
    }

    connection.disconnect().await;
    drop(connection);
    // In-flight turns keep their own outbound handles; the writer ends once they finish.
    drop(writer);
}

/// One live WebSocket connection.
///
/// Clones share the connection's room state, so a `sendMessage` task that
/// outlives the socket cannot rejoin a room after [`Connection::disconnect`].
#[derive(Clone)]
pub struct Connection {
    client_id: ClientId,
    outbound: Outbound,
    state: AppState,
    closed: Arc<Mutex<bool>>,
}

impl Connection {
    pub fn new(state: AppState, outbound: Outbound) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            outbound,
            state,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn emit(&self, frame: GatewayFrame) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!(
                phase = "gateway",
                event = "client_gone",
                client_id = %self.client_id
            );
        }
    }

    /// Joins the session room and announces the client to everyone in it.
    pub async fn connect(&self, session_id: &SessionId) {
        self.join_room(session_id).await;
        self.state.membership.broadcast_except(
            session_id,
            None,
            &GatewayFrame::new("userOnline", json!({ "sessionId": session_id })),
        );
        tracing::info!(
            phase = "gateway",
            event = "joined",
            client_id = %self.client_id,
            session_id = %session_id
        );
    }

    async fn join_room(&self, session_id: &SessionId) {
        // Held until the counter is updated so a disconnect sees all of the join or none of it.
        let closed = self.closed.lock().await;
        if *closed {
            tracing::debug!(
                phase = "gateway",
                event = "join_skipped",
                client_id = %self.client_id,
                session_id = %session_id
            );
            return;
        }

        if !self
            .state
            .membership
            .join(session_id, self.client_id, self.outbound.clone())
        {
            return;
        }

        if let Err(err) = self.state.cache.increment(&online_key(session_id)).await {
            tracing::warn!(
                phase = "gateway",
                event = "online_increment_failed",
                session_id = %session_id,
                error = %err
            );
        }
    }

    /// Leaves every room; counters that reach zero are deleted.
    pub async fn disconnect(&self) {
        let mut closed = self.closed.lock().await;
        *closed = true;

        let cache = &self.state.cache;
        for session_id in self.state.membership.leave_all(self.client_id) {
            let key = online_key(&session_id);
            let remaining = match cache.decrement(&key).await {
                Ok(remaining) => remaining,
                Err(err) => {
                    tracing::warn!(
                        phase = "gateway",
                        event = "online_decrement_failed",
                        session_id = %session_id,
                        error = %err
                    );
                    continue;
                }
            };
            if remaining <= 0
                && let Err(err) = cache.delete(&key).await
            {
                tracing::warn!(
                    phase = "gateway",
                    event = "online_delete_failed",
                    session_id = %session_id,
                    error = %err
                );
            }
        }

        tracing::debug!(
            phase = "gateway",
            event = "disconnected",
            client_id = %self.client_id
        );
    }

    pub async fn handle_text(&self, text: &str) {
        let frame = match serde_json::from_str::<GatewayFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.emit(GatewayFrame::error("Invalid frame", err.to_string()));
                return;
            }
        };

        match frame.event.as_str() {
            "sendMessage" => match serde_json::from_value::<SendMessagePayload>(frame.data) {
                Ok(payload) => {
                    let connection = self.clone();
                    tokio::spawn(async move {
                        connection
                            .send_message(non_empty(payload.session_id), payload.content)
                            .await;
                    });
                }
                Err(err) => self.emit(GatewayFrame::error(
                    PROCESS_FAILURE_MESSAGE,
                    format!("invalid sendMessage payload: {err}"),
                )),
            },
            "typing" => match serde_json::from_value::<TypingPayload>(frame.data) {
                Ok(payload) => self.broadcast_typing(&payload.session_id, payload.is_typing),
                Err(err) => self.emit(GatewayFrame::error(
                    "Invalid frame",
                    format!("invalid typing payload: {err}"),
                )),
            },
            "stopTyping" => match serde_json::from_value::<StopTypingPayload>(frame.data) {
                Ok(payload) => self.broadcast_typing(&payload.session_id, false),
                Err(err) => self.emit(GatewayFrame::error(
                    "Invalid frame",
                    format!("invalid stopTyping payload: {err}"),
                )),
            },
            other => self.emit(GatewayFrame::error(
                "Unknown event",
                format!("unknown event '{other}'"),
            )),
        }
    }

    fn broadcast_typing(&self, session_id: &SessionId, is_typing: bool) {
        self.state.membership.broadcast_except(
            session_id,
            Some(self.client_id),
            &GatewayFrame::typing(session_id, is_typing),
        );
    }

    /// Runs one chat turn, streaming to this connection only.
    pub async fn send_message(&self, session_id: Option<String>, content: String) {
        let chat = &self.state.chat;
        let requested = session_id.map(SessionId::from);
        let started = Instant::now();

        if let Err(error) = chat.validate_content(&content) {
            let report = chat.report_failure(requested.as_ref(), &error, started.elapsed());
            self.emit_failure(requested.as_ref(), &report);
            return;
        }

        let resolved = match chat
            .resolve_session(requested.as_ref(), Some(SESSION_SOURCE))
            .await
        {
            Ok(resolved) => resolved,
            Err(error) => {
                let report = chat.report_failure(requested.as_ref(), &error, started.elapsed());
                self.emit_failure(requested.as_ref(), &report);
                return;
            }
        };

        if resolved.created {
            self.join_room(resolved.id()).await;
        }

        self.run_turn(&resolved, content).await;
    }

    async fn run_turn(&self, resolved: &ResolvedSession, content: String) {
        let sink = ConnectionSink {
            outbound: self.outbound.clone(),
        };

        if let Err(error) = self
            .state
            .chat
            .run_resolved_turn(resolved, content, &sink)
            .await
        {
            self.emit_failure(Some(resolved.id()), &FailureReport::from_error(&error));
        }
    }

    /// Error event followed by a synthetic completion so the client stops waiting.
    fn emit_failure(&self, session_id: Option<&SessionId>, report: &FailureReport) {
        self.emit(GatewayFrame::error(
            PROCESS_FAILURE_MESSAGE,
            report.user_message.clone(),
        ));

        let completion = match session_id {
            Some(session_id) => {
                match serde_json::to_value(CompletedMessage::failure(
                    session_id.clone(),
                    APOLOGY_MESSAGE,
                )) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(phase = "gateway", event = "encode_failed", error = %err);
                        return;
                    }
                }
            }
            None => json!({
                "id": "error",
                "role": "assistant",
                "content": APOLOGY_MESSAGE,
                "error": true,
                "sessionId": Value::Null,
            }),
        };
        self.emit(GatewayFrame::new("streamComplete", completion));
    }
}

struct ConnectionSink {
    outbound: Outbound,
}

impl TokenSink for ConnectionSink {
    fn on_token(&self, token: &str) {
        let _ = self
            .outbound
            .send(GatewayFrame::new("streamChunk", Value::String(token.to_string())));
    }

    fn on_done(&self, message: &CompletedMessage) {
        match serde_json::to_value(message) {
            Ok(value) => {
                let _ = self
                    .outbound
                    .send(GatewayFrame::new("streamComplete", value));
            }
            Err(err) => {
                tracing::warn!(phase = "gateway", event = "encode_failed", error = %err);
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
