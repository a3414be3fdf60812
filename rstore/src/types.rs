//! Persisted session and message records.
//!
//! All records serialize in camelCase so they can be returned to HTTP clients
//! and written to the cache without a separate view type.

use chrono::{DateTime, SubsecRound, Utc};
use rcommon::{MetadataMap, SessionId};
use rprovider::{Message, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl Session {
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            id: SessionId::generate(),
            created_at: now_micros(),
            metadata,
        }
    }

    /// The `source` metadata tag, when one was recorded at creation.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTranscript {
    #[serde(flatten)]
    pub session: Session,
    /// Oldest first.
    pub messages: Vec<ChatMessage>,
}

/// Current time truncated to the microsecond precision every backend stores.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Smallest timestamp at or after `candidate` that is strictly later than `previous`.
pub(crate) fn next_timestamp(
    previous: Option<DateTime<Utc>>,
    candidate: DateTime<Utc>,
) -> DateTime<Utc> {
    match previous {
        Some(previous) if candidate <= previous => previous + chrono::Duration::microseconds(1),
        _ => candidate,
    }
}

pub(crate) fn role_to_str(role: Role) -> &'static str {
    role.as_str()
}

pub(crate) fn role_from_str(value: &str) -> Option<Role> {
    match value {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}
