//! Chat repository trait and in-memory repository implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use rcommon::{BoxFuture, MetadataMap, SessionId};
use rprovider::Role;
use uuid::Uuid;

use crate::backends::postgres::PostgresChatRepository;
use crate::backends::sqlite::{SqliteChatRepository, default_sqlite_path};
use crate::error::StoreError;
use crate::types::{ChatMessage, Session, SessionTranscript, next_timestamp, now_micros};

/// Durable store for sessions and their messages.
///
/// Messages of one session are totally ordered by `created_at`; every backend
/// hands out strictly increasing timestamps within a session.
pub trait ChatRepository: Send + Sync {
    fn create_session<'a>(
        &'a self,
        metadata: MetadataMap,
    ) -> BoxFuture<'a, Result<Session, StoreError>>;

    fn find_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>>;

    fn create_message<'a>(
        &'a self,
        session_id: &'a SessionId,
        role: Role,
        content: String,
    ) -> BoxFuture<'a, Result<ChatMessage, StoreError>>;

    /// Newest first, at most `limit` rows.
    fn recent_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, StoreError>>;

    /// The session with every message, oldest first.
    fn session_with_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionTranscript>, StoreError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Sqlite { path: PathBuf },
    Postgres { url: String },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

pub async fn create_repository(
    config: StoreConfig,
) -> Result<Arc<dyn ChatRepository>, StoreError> {
    match config {
        StoreConfig::InMemory => Ok(Arc::new(InMemoryChatRepository::new())),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteChatRepository::new(path)?)),
        StoreConfig::Postgres { url } => Ok(Arc::new(PostgresChatRepository::connect(&url).await?)),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryChatRepository {
    state: Mutex<RepositoryState>,
}

#[derive(Debug, Default)]
struct RepositoryState {
    sessions: HashMap<SessionId, Session>,
    messages: HashMap<SessionId, Vec<ChatMessage>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, RepositoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::storage("in-memory repository lock poisoned"))
    }
}

impl ChatRepository for InMemoryChatRepository {
    fn create_session<'a>(
        &'a self,
        metadata: MetadataMap,
    ) -> BoxFuture<'a, Result<Session, StoreError>> {
        Box::pin(async move {
            let session = Session::new(metadata);
            self.state()?
                .sessions
                .insert(session.id.clone(), session.clone());
            Ok(session)
        })
    }

    fn find_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>> {
        Box::pin(async move { Ok(self.state()?.sessions.get(session_id).cloned()) })
    }

    fn create_message<'a>(
        &'a self,
        session_id: &'a SessionId,
        role: Role,
        content: String,
    ) -> BoxFuture<'a, Result<ChatMessage, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            if !state.sessions.contains_key(session_id) {
                return Err(StoreError::not_found(format!(
                    "session '{session_id}' not found"
                )));
            }

            let messages = state.messages.entry(session_id.clone()).or_default();
            let previous = messages.last().map(|message| message.created_at);
            let message = ChatMessage {
                id: Uuid::new_v4(),
                session_id: session_id.clone(),
                role,
                content,
                created_at: next_timestamp(previous, now_micros()),
            };
            messages.push(message.clone());
            Ok(message)
        })
    }

    fn recent_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            Ok(state
                .messages
                .get(session_id)
                .map(|messages| messages.iter().rev().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn session_with_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionTranscript>, StoreError>> {
        Box::pin(async move {
            let state = self.state()?;
            Ok(state.sessions.get(session_id).map(|session| SessionTranscript {
                session: session.clone(),
                messages: state.messages.get(session_id).cloned().unwrap_or_default(),
            }))
        })
    }
}
