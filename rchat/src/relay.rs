//! Token relay from an open provider stream to a client sink.

use std::sync::Arc;

use futures_util::StreamExt;
use rcommon::SessionId;
use rprovider::{FallbackInvoker, Invocation, Role, StreamEvent};
use rstore::ChatRepository;

use crate::{ChatError, CompletedMessage, HistoryReader};

/// Receives tokens for one turn.
///
/// Calls are synchronous and fire-and-forget: a sink whose client has gone
/// away drops what it is handed and the turn carries on.
pub trait TokenSink: Send + Sync {
    fn on_token(&self, token: &str);

    fn on_done(&self, message: &CompletedMessage);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTokenSink;

impl TokenSink for NullTokenSink {
    fn on_token(&self, _token: &str) {}

    fn on_done(&self, _message: &CompletedMessage) {}
}

#[derive(Clone)]
pub struct StreamingRelay {
    invoker: Arc<FallbackInvoker>,
    repository: Arc<dyn ChatRepository>,
    history: HistoryReader,
}

impl StreamingRelay {
    pub fn new(
        invoker: Arc<FallbackInvoker>,
        repository: Arc<dyn ChatRepository>,
        history: HistoryReader,
    ) -> Self {
        Self {
            invoker,
            repository,
            history,
        }
    }

    /// Drains `invocation`, forwarding text to `sink`, then persists the answer.
    ///
    /// `sink.on_done` fires exactly once, and only after the assistant message
    /// is durable and the session's cached views are gone.
    pub async fn relay(
        &self,
        invocation: Invocation<'_>,
        session_id: &SessionId,
        sink: &dyn TokenSink,
    ) -> Result<CompletedMessage, ChatError> {
        let Invocation {
            mut stream,
            candidate,
            request,
            ..
        } = invocation;

        let mut accumulated = String::new();
        let mut summary_text = None::<String>;
        let mut chunks = 0_usize;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    chunks += 1;
                    accumulated.push_str(&delta);
                    sink.on_token(&delta);
                }
                StreamEvent::ResponseComplete(response) => {
                    if !response.text.is_empty() {
                        summary_text = Some(response.text);
                    }
                }
            }
        }
        drop(stream);

        if accumulated.is_empty()
            && let Some(text) = summary_text
        {
            sink.on_token(&text);
            accumulated = text;
        }

        if accumulated.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                candidate = %candidate,
                "stream produced no text, falling back to blocking completion"
            );
            let response = self.invoker.complete(&candidate, request).await?;
            if !response.text.is_empty() {
                sink.on_token(&response.text);
            }
            accumulated = response.text;
        }

        let stored = self
            .repository
            .create_message(session_id, Role::Assistant, accumulated.trim().to_string())
            .await?;
        self.history.invalidate(session_id).await;

        let completed = CompletedMessage::from(&stored);
        tracing::debug!(
            session_id = %session_id,
            candidate = %candidate,
            chunks,
            chars = completed.content.chars().count(),
            "assistant message persisted"
        );
        sink.on_done(&completed);
        Ok(completed)
    }
}

impl std::fmt::Debug for StreamingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingRelay").finish_non_exhaustive()
    }
}
