//! HTTP transport: streaming and non-streaming chat turns, transcript reads,
//! banner and health.

use std::convert::Infallible;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use futures_util::stream;
use rchat::{
    ChatError, ChatErrorKind, ChatTurnRequest, CompletedMessage, FailureReport, NullTokenSink,
    TokenSink,
};
use rcommon::SessionId;
use rstore::SessionTranscript;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::AppState;

pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SERVICE_NAME: &str = "Spur AI Chat API";
pub const SERVICE_VERSION: &str = "1.0.0";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/chat", post(send_message))
        .route("/chat/ws", post(complete_message))
        .route("/chat/{session_id}", get(transcript))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[serde(default)]
    pub session_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
}

/// A JSON error response, `{"statusCode": .., "message": ..}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn session_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Session not found")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn from_report(report: &FailureReport) -> Self {
        match report.kind {
            ChatErrorKind::Validation => Self::bad_request(report.user_message.clone()),
            ChatErrorKind::SessionNotFound => Self::session_not_found(),
            kind if kind.is_provider() => {
                Self::new(StatusCode::BAD_GATEWAY, report.user_message.clone())
            }
            _ => Self::internal(report.user_message.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status_code: self.status.as_u16(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn banner() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": format!("{SERVICE_NAME} is running"),
        "version": SERVICE_VERSION,
        "endpoints": {
            "http": [
                "POST /chat - HTTP streaming endpoint",
                "POST /chat/ws - Complete a turn and return the assistant message",
                "GET /chat/:sessionId - Get chat history",
                "GET /health - Liveness probe",
            ],
            "websocket": {
                "path": "/chat/ws",
                "events": [
                    "sendMessage - Send a message",
                    "typing - Typing indicator",
                    "stopTyping - Stop typing indicator",
                    "streamChunk - Receive streaming chunks",
                    "streamComplete - Receive complete message",
                    "userOnline - User online notification",
                    "error - Failure notification",
                ],
            },
        },
        "timestamp": timestamp(),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": timestamp() }))
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `POST /chat`: validates, resolves the session, then streams raw tokens.
///
/// Headers go out before the first token. The turn runs in its own task and
/// finishes (and persists) even if the client disconnects.
async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let Json(body) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let requested = requested_session(body.session_id.as_deref())?;

    let chat = state.chat.clone();
    let fail = |error: ChatError| {
        let report = chat.report_failure(requested.as_ref(), &error, started.elapsed());
        ApiError::from_report(&report)
    };

    chat.validate_content(&body.content).map_err(fail)?;
    let resolved = chat
        .resolve_session(requested.as_ref(), None)
        .await
        .map_err(fail)?;

    let session_header = HeaderValue::from_str(resolved.id().as_str())
        .map_err(|err| ApiError::internal(err.to_string()))?;

    let (tx, rx) = unbounded_channel::<Bytes>();
    let sink = ByteSink { tx };
    let content = body.content;
    tokio::spawn(async move {
        if let Err(error) = chat.run_resolved_turn(&resolved, content, &sink).await {
            let report = FailureReport::from_error(&error);
            sink.write(format!("\n{}", report.user_message));
        }
    });

    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    }));

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream; charset=utf-8"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (HeaderName::from_static(SESSION_ID_HEADER), session_header),
        ],
        body,
    )
        .into_response())
}

/// `POST /chat/ws`: runs a whole turn, then answers with the persisted
/// assistant message as JSON.
async fn complete_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Json<CompletedMessage>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let mut request = ChatTurnRequest::new(body.content);
    if let Some(session_id) = requested_session(body.session_id.as_deref())? {
        request = request.with_session_id(session_id);
    }

    let result = state
        .chat
        .run_turn(request, &NullTokenSink)
        .await
        .map_err(|error| ApiError::from_report(&FailureReport::from_error(&error)))?;
    Ok(Json(result.assistant_message))
}

fn requested_session(raw: Option<&str>) -> Result<Option<SessionId>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => SessionId::parse_uuid(raw)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("sessionId must be a UUID")),
    }
}

/// `GET /chat/{session_id}`: the full transcript, oldest message first.
async fn transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionTranscript>, ApiError> {
    let session_id = SessionId::parse_uuid(&session_id).ok_or_else(ApiError::session_not_found)?;

    match state.chat.transcript(&session_id).await {
        Ok(transcript) => Ok(Json(transcript)),
        Err(error) if error.kind == ChatErrorKind::SessionNotFound => {
            Err(ApiError::session_not_found())
        }
        Err(error) => {
            let report = FailureReport::from_error(&error);
            tracing::error!(
                phase = "http",
                event = "transcript_failed",
                session_id = %session_id,
                diagnostic = %report.diagnostic
            );
            Err(ApiError::from_report(&report))
        }
    }
}

/// Writes tokens into the response body. The body closes when the sink drops.
struct ByteSink {
    tx: UnboundedSender<Bytes>,
}

impl ByteSink {
    fn write(&self, text: impl Into<String>) {
        let _ = self.tx.send(Bytes::from(text.into()));
    }
}

impl TokenSink for ByteSink {
    fn on_token(&self, token: &str) {
        self.write(token);
    }

    fn on_done(&self, _message: &CompletedMessage) {}
}
