//! Session resolution: reuse a known session or lazily create one.

use std::sync::Arc;

use rcommon::{MetadataMap, SessionId};
use rstore::{ChatRepository, Session};

use crate::{ChatError, ResolvedSession};

#[derive(Clone)]
pub struct SessionManager {
    repository: Arc<dyn ChatRepository>,
    default_source: String,
}

impl SessionManager {
    pub fn new(repository: Arc<dyn ChatRepository>, default_source: impl Into<String>) -> Self {
        Self {
            repository,
            default_source: default_source.into(),
        }
    }

    /// Returns the session named by `session_id` when it exists, otherwise
    /// creates exactly one new session tagged with the default source.
    pub async fn resolve(
        &self,
        session_id: Option<&SessionId>,
    ) -> Result<ResolvedSession, ChatError> {
        self.resolve_with_source(session_id, None).await
    }

    pub async fn resolve_with_source(
        &self,
        session_id: Option<&SessionId>,
        source: Option<&str>,
    ) -> Result<ResolvedSession, ChatError> {
        if let Some(session_id) = session_id
            && let Some(session) = self.repository.find_session(session_id).await?
        {
            return Ok(ResolvedSession {
                session,
                created: false,
            });
        }

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "source".to_string(),
            source.unwrap_or(&self.default_source).to_string(),
        );

        let session = self.repository.create_session(metadata).await?;
        tracing::info!(
            session_id = %session.id,
            requested = session_id.map(SessionId::as_str),
            source = session.source(),
            "created chat session"
        );

        Ok(ResolvedSession {
            session,
            created: true,
        })
    }

    /// Loads a session that must already exist.
    pub async fn require(&self, session_id: &SessionId) -> Result<Session, ChatError> {
        self.repository
            .find_session(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(format!("session '{session_id}' not found")))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("default_source", &self.default_source)
            .finish_non_exhaustive()
    }
}
