//! Chat turn orchestration.
//!
//! One turn runs strictly in order: resolve session, read history, persist the
//! user message, invalidate cached views, invoke the model plan, relay tokens,
//! persist the answer, invalidate again, notify the sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rcommon::SessionId;
use rprovider::{ConversationContext, FallbackInvoker, Role};
use rstore::{ChatRepository, DisabledCache, SessionTranscript, VolatileCache};

use crate::{
    ChatError, ChatPolicy, ChatTurnRequest, ChatTurnResult, FailureReport, HistoryReader,
    ResolvedSession, SessionManager, StreamingRelay, TokenSink,
};

/// Observation points for a chat turn. Every method defaults to a no-op.
pub trait TurnHooks: Send + Sync {
    fn on_turn_start(&self, _session_id: &SessionId, _created_session: bool) {}

    fn on_history_loaded(&self, _session_id: &SessionId, _messages: usize) {}

    fn on_turn_success(&self, _result: &ChatTurnResult, _elapsed: Duration) {}

    fn on_turn_failure(
        &self,
        _session_id: Option<&SessionId>,
        _report: &FailureReport,
        _elapsed: Duration,
    ) {
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTurnHooks;

impl TurnHooks for NoopTurnHooks {}

#[derive(Clone)]
pub struct ChatService {
    sessions: SessionManager,
    history: HistoryReader,
    repository: Arc<dyn ChatRepository>,
    invoker: Arc<FallbackInvoker>,
    relay: StreamingRelay,
    policy: ChatPolicy,
    hooks: Arc<dyn TurnHooks>,
}

impl ChatService {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        cache: Arc<dyn VolatileCache>,
        invoker: Arc<FallbackInvoker>,
        policy: ChatPolicy,
    ) -> Self {
        Self::builder(repository, invoker)
            .cache(cache)
            .policy(policy)
            .build()
    }

    pub fn builder(
        repository: Arc<dyn ChatRepository>,
        invoker: Arc<FallbackInvoker>,
    ) -> ChatServiceBuilder {
        ChatServiceBuilder::new(repository, invoker)
    }

    pub fn policy(&self) -> &ChatPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn history(&self) -> &HistoryReader {
        &self.history
    }

    /// Rejects content that is blank or longer than the policy allows.
    pub fn validate_content(&self, content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("content must not be empty"));
        }

        let max = self.policy.max_content_chars;
        if content.chars().count() > max {
            return Err(ChatError::validation(format!(
                "content must be at most {max} characters"
            )));
        }

        Ok(())
    }

    pub async fn resolve_session(
        &self,
        session_id: Option<&SessionId>,
        source: Option<&str>,
    ) -> Result<ResolvedSession, ChatError> {
        self.sessions.resolve_with_source(session_id, source).await
    }

    /// Validates, resolves, and runs a full turn.
    pub async fn run_turn(
        &self,
        request: ChatTurnRequest,
        sink: &dyn TokenSink,
    ) -> Result<ChatTurnResult, ChatError> {
        let started = Instant::now();
        let ChatTurnRequest {
            session_id,
            content,
            source,
        } = request;

        let resolved = match self.validate_content(&content) {
            Ok(()) => {
                self.resolve_session(session_id.as_ref(), source.as_deref())
                    .await
            }
            Err(error) => Err(error),
        };

        match resolved {
            Ok(resolved) => self.run_resolved_turn(&resolved, content, sink).await,
            Err(error) => {
                self.report_failure(session_id.as_ref(), &error, started.elapsed());
                Err(error)
            }
        }
    }

    /// Runs a turn for a session the caller already resolved.
    ///
    /// Transports use this to announce the session id before any token flows.
    pub async fn run_resolved_turn(
        &self,
        resolved: &ResolvedSession,
        content: String,
        sink: &dyn TokenSink,
    ) -> Result<ChatTurnResult, ChatError> {
        let started = Instant::now();
        self.hooks.on_turn_start(resolved.id(), resolved.created);

        match self.execute_turn(resolved, content, sink).await {
            Ok(result) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    phase = "turn",
                    event = "completed",
                    session_id = %result.session_id,
                    candidate = %result.candidate,
                    strategy = %result.strategy,
                    attempts = result.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "chat turn completed"
                );
                self.hooks.on_turn_success(&result, elapsed);
                Ok(result)
            }
            Err(error) => {
                self.report_failure(Some(resolved.id()), &error, started.elapsed());
                Err(error)
            }
        }
    }

    async fn execute_turn(
        &self,
        resolved: &ResolvedSession,
        content: String,
        sink: &dyn TokenSink,
    ) -> Result<ChatTurnResult, ChatError> {
        let session_id = resolved.id();

        let history = self
            .history
            .recent_history(session_id, self.policy.history_limit)
            .await?;
        self.hooks.on_history_loaded(session_id, history.len());

        let context = ConversationContext::new(self.policy.system_prompt.clone(), content.clone())
            .with_history(history.iter().map(|message| message.to_message()).collect());

        let user_message = self
            .repository
            .create_message(session_id, Role::User, content)
            .await?;
        self.history.invalidate(session_id).await;

        let invocation = self.invoker.invoke(&context).await?;
        let candidate = invocation.candidate.clone();
        let strategy = invocation.strategy;
        let attempts = invocation.attempts;

        let assistant_message = self.relay.relay(invocation, session_id, sink).await?;

        Ok(ChatTurnResult {
            session_id: session_id.clone(),
            created_session: resolved.created,
            user_message,
            assistant_message,
            candidate,
            strategy,
            attempts,
        })
    }

    pub async fn transcript(&self, session_id: &SessionId) -> Result<SessionTranscript, ChatError> {
        self.history.transcript(session_id).await
    }

    /// Logs the operator diagnostic and notifies hooks. Returns what the client should see.
    pub fn report_failure(
        &self,
        session_id: Option<&SessionId>,
        error: &ChatError,
        elapsed: Duration,
    ) -> FailureReport {
        let report = FailureReport::from_error(error);
        tracing::error!(
            phase = "turn",
            event = "failed",
            session_id = session_id.map(SessionId::as_str),
            kind = %report.kind,
            diagnostic = %report.diagnostic,
            "chat turn failed"
        );
        self.hooks.on_turn_failure(session_id, &report, elapsed);
        report
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("policy", &self.policy)
            .field("plan", self.invoker.plan())
            .finish_non_exhaustive()
    }
}

pub struct ChatServiceBuilder {
    repository: Arc<dyn ChatRepository>,
    invoker: Arc<FallbackInvoker>,
    cache: Arc<dyn VolatileCache>,
    policy: ChatPolicy,
    hooks: Arc<dyn TurnHooks>,
}

impl ChatServiceBuilder {
    pub fn new(repository: Arc<dyn ChatRepository>, invoker: Arc<FallbackInvoker>) -> Self {
        Self {
            repository,
            invoker,
            cache: Arc::new(DisabledCache),
            policy: ChatPolicy::default(),
            hooks: Arc::new(NoopTurnHooks),
        }
    }

    pub fn cache(mut self, cache: Arc<dyn VolatileCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn policy(mut self, policy: ChatPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn TurnHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> ChatService {
        let history = HistoryReader::new(
            self.repository.clone(),
            self.cache,
            self.policy.cache_ttl,
        );
        let sessions = SessionManager::new(self.repository.clone(), self.policy.session_source.clone());
        let relay = StreamingRelay::new(self.invoker.clone(), self.repository.clone(), history.clone());

        ChatService {
            sessions,
            history,
            repository: self.repository,
            invoker: self.invoker,
            relay,
            policy: self.policy,
            hooks: self.hooks,
        }
    }
}
