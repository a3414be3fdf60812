//! Cache-backed history reads.
//!
//! The cache is read first and populated on a miss; every cache fault is
//! logged and absorbed so the durable store stays the only hard dependency.

use std::sync::Arc;
use std::time::Duration;

use rcommon::SessionId;
use rstore::{
    ChatMessage, ChatRepository, SessionTranscript, VolatileCache, get_json, history_key,
    set_json, transcript_key,
};

use crate::ChatError;

#[derive(Clone)]
pub struct HistoryReader {
    repository: Arc<dyn ChatRepository>,
    cache: Arc<dyn VolatileCache>,
    ttl: Duration,
}

impl HistoryReader {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        cache: Arc<dyn VolatileCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            ttl,
        }
    }

    /// Up to `limit` most recent messages, oldest first.
    pub async fn recent_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let key = history_key(session_id);

        let mut newest_first = match get_json::<Vec<ChatMessage>>(self.cache.as_ref(), &key).await
        {
            Ok(Some(cached)) => {
                tracing::debug!(session_id = %session_id, count = cached.len(), "history cache hit");
                cached
            }
            Ok(None) => self.load_and_cache(session_id, &key, limit).await?,
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "history cache read failed");
                self.load_and_cache(session_id, &key, limit).await?
            }
        };

        newest_first.truncate(limit);
        newest_first.reverse();
        Ok(newest_first)
    }

    async fn load_and_cache(
        &self,
        session_id: &SessionId,
        key: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let messages = self.repository.recent_messages(session_id, limit).await?;
        if !messages.is_empty()
            && let Err(error) = set_json(self.cache.as_ref(), key, &messages, self.ttl).await
        {
            tracing::warn!(session_id = %session_id, error = %error, "history cache write failed");
        }
        Ok(messages)
    }

    /// Drops every cached view derived from the session's messages.
    pub async fn invalidate(&self, session_id: &SessionId) {
        for key in [history_key(session_id), transcript_key(session_id)] {
            if let Err(error) = self.cache.delete(&key).await {
                tracing::warn!(session_id = %session_id, key = %key, error = %error, "cache invalidation failed");
            }
        }
    }

    /// The full session with all messages, oldest first.
    pub async fn transcript(&self, session_id: &SessionId) -> Result<SessionTranscript, ChatError> {
        let key = transcript_key(session_id);

        match get_json::<SessionTranscript>(self.cache.as_ref(), &key).await {
            Ok(Some(cached)) => {
                tracing::debug!(session_id = %session_id, "transcript cache hit");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "transcript cache read failed");
            }
        }

        let transcript = self
            .repository
            .session_with_messages(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(format!("session '{session_id}' not found")))?;

        if let Err(error) = set_json(self.cache.as_ref(), &key, &transcript, self.ttl).await {
            tracing::warn!(session_id = %session_id, error = %error, "transcript cache write failed");
        }

        Ok(transcript)
    }
}

impl std::fmt::Debug for HistoryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryReader")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
