//! Chat turn requests, results, and the completion payload sent to clients.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rcommon::SessionId;
use rprovider::{InvocationStrategy, ModelCandidate, Role};
use rstore::{ChatMessage, Session};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Spur's helpful support agent. Keep answers concise, actionable, and friendly.
Company policy:
- Return policy: 30 days from delivery, items must be unused and in original packaging.
- Shipping: Free for orders over $50 in the US; standard shipping is $6.99 otherwise.
- Support hours: 9am-6pm EST, Monday to Friday.
If you are unsure, ask a brief clarifying question instead of guessing.";

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 4000;
pub const DEFAULT_SESSION_SOURCE: &str = "api";

/// Turn-independent knobs the service reads on every turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPolicy {
    pub system_prompt: String,
    pub history_limit: usize,
    pub cache_ttl: Duration,
    pub max_content_chars: usize,
    pub session_source: String,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            session_source: DEFAULT_SESSION_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnRequest {
    pub session_id: Option<SessionId>,
    pub content: String,
    /// Origin tag recorded on a session this turn creates.
    pub source: Option<String>,
}

impl ChatTurnRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            session_id: None,
            content: content.into(),
            source: None,
        }
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub session: Session,
    pub created: bool,
}

impl ResolvedSession {
    pub fn id(&self) -> &SessionId {
        &self.session.id
    }
}

/// The assistant message as announced to the client once it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl CompletedMessage {
    /// Synthetic completion that lets a client leave its waiting state after a failure.
    pub fn failure(session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            id: "error".to_string(),
            role: Role::Assistant,
            content: content.into(),
            created_at: None,
            session_id,
            error: true,
        }
    }
}

impl From<&ChatMessage> for CompletedMessage {
    fn from(value: &ChatMessage) -> Self {
        Self {
            id: value.id.to_string(),
            role: value.role,
            content: value.content.clone(),
            created_at: Some(value.created_at),
            session_id: value.session_id.clone(),
            error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnResult {
    pub session_id: SessionId,
    pub created_session: bool,
    pub user_message: ChatMessage,
    pub assistant_message: CompletedMessage,
    pub candidate: ModelCandidate,
    pub strategy: InvocationStrategy,
    pub attempts: u32,
}
