#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rchat::{ChatPolicy, ChatService, CompletedMessage, TokenSink};
use rcommon::{BoxFuture, GenerationOptions, MetadataMap, SessionId};
use rprovider::{
    BoxedEventStream, FallbackInvoker, FallbackPlan, ModelCandidate, ModelProvider, ModelRequest,
    ModelResponse, ProviderError, ProviderFuture, ProviderId, ProviderRegistry, Role, StopReason,
    StreamEvent, TokenUsage, VecEventStream,
};
use rstore::{
    ChatMessage, ChatRepository, InMemoryChatRepository, Session, SessionTranscript, StoreError,
    VolatileCache,
};

#[derive(Debug, Clone)]
pub enum Script {
    Deltas(Vec<String>),
    SummaryOnly(String),
    Empty,
    BreaksMidway(String),
    Fail(ProviderError),
}

/// Fake provider driven by a script, optionally failing specific models.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Script,
    failing_models: HashSet<String>,
    failure: ProviderError,
    blocking_text: String,
    pub stream_requests: Mutex<Vec<ModelRequest>>,
    pub complete_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            failing_models: HashSet::new(),
            failure: ProviderError::not_found("model is not found"),
            blocking_text: "blocking answer".to_string(),
            stream_requests: Mutex::new(Vec::new()),
            complete_calls: AtomicUsize::new(0),
        }
    }

    pub fn deltas(deltas: &[&str]) -> Self {
        Self::new(Script::Deltas(
            deltas.iter().map(|delta| delta.to_string()).collect(),
        ))
    }

    pub fn failing_models(mut self, models: &[&str], error: ProviderError) -> Self {
        self.failing_models = models.iter().map(|model| model.to_string()).collect();
        self.failure = error;
        self
    }

    pub fn stream_requests(&self) -> Vec<ModelRequest> {
        self.stream_requests
            .lock()
            .expect("stream requests lock")
            .clone()
    }
}

fn response(model: String, text: String) -> ModelResponse {
    ModelResponse {
        provider: ProviderId::Gemini,
        model,
        text,
        stop_reason: StopReason::EndTurn,
        usage: TokenUsage::default(),
    }
}

impl ModelProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn complete<'a>(
        &'a self,
        request: ModelRequest,
    ) -> ProviderFuture<'a, Result<ModelResponse, ProviderError>> {
        Box::pin(async move {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(response(request.model, self.blocking_text.clone()))
        })
    }

    fn stream<'a>(
        &'a self,
        request: ModelRequest,
    ) -> ProviderFuture<'a, Result<BoxedEventStream<'a>, ProviderError>> {
        Box::pin(async move {
            self.stream_requests
                .lock()
                .expect("stream requests lock")
                .push(request.clone());

            if self.failing_models.contains(&request.model) {
                return Err(self.failure.clone());
            }

            let events = match &self.script {
                Script::Deltas(deltas) => {
                    let mut events = deltas
                        .iter()
                        .map(|delta| Ok(StreamEvent::TextDelta(delta.clone())))
                        .collect::<Vec<_>>();
                    events.push(Ok(StreamEvent::ResponseComplete(response(
                        request.model.clone(),
                        deltas.concat(),
                    ))));
                    events
                }
                Script::SummaryOnly(text) => vec![Ok(StreamEvent::ResponseComplete(response(
                    request.model.clone(),
                    text.clone(),
                )))],
                Script::Empty => Vec::new(),
                Script::BreaksMidway(partial) => vec![
                    Ok(StreamEvent::TextDelta(partial.clone())),
                    Err(ProviderError::transport("connection reset by peer")),
                ],
                Script::Fail(error) => return Err(error.clone()),
            };

            Ok(Box::pin(VecEventStream::new(events)) as BoxedEventStream<'a>)
        })
    }
}

/// In-memory repository that counts writes and can be told to fail.
#[derive(Debug, Default)]
pub struct CountingRepository {
    inner: InMemoryChatRepository,
    pub session_creates: AtomicUsize,
    pub message_creates: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl CountingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_creates(&self) -> usize {
        self.session_creates.load(Ordering::SeqCst)
    }

    pub fn message_creates(&self) -> usize {
        self.message_creates.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::storage("database is unreachable"));
        }
        Ok(())
    }
}

impl ChatRepository for CountingRepository {
    fn create_session<'a>(
        &'a self,
        metadata: MetadataMap,
    ) -> BoxFuture<'a, Result<Session, StoreError>> {
        Box::pin(async move {
            self.check(&self.fail_writes)?;
            self.session_creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create_session(metadata).await
        })
    }

    fn find_session<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>> {
        Box::pin(async move {
            self.check(&self.fail_reads)?;
            self.inner.find_session(session_id).await
        })
    }

    fn create_message<'a>(
        &'a self,
        session_id: &'a SessionId,
        role: Role,
        content: String,
    ) -> BoxFuture<'a, Result<ChatMessage, StoreError>> {
        Box::pin(async move {
            self.check(&self.fail_writes)?;
            self.message_creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create_message(session_id, role, content).await
        })
    }

    fn recent_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, StoreError>> {
        Box::pin(async move {
            self.check(&self.fail_reads)?;
            self.inner.recent_messages(session_id, limit).await
        })
    }

    fn session_with_messages<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<SessionTranscript>, StoreError>> {
        Box::pin(async move {
            self.check(&self.fail_reads)?;
            self.inner.session_with_messages(session_id).await
        })
    }
}

/// A cache whose backend is down: every call errors.
#[derive(Debug, Default)]
pub struct UnavailableCache {
    pub calls: AtomicUsize,
}

impl UnavailableCache {
    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::cache("cache connection refused"))
    }
}

impl VolatileCache for UnavailableCache {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move { self.fail() })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _value: String,
        _ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { self.fail() })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move { self.fail() })
    }

    fn increment<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move { self.fail() })
    }

    fn decrement<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move { self.fail() })
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub tokens: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<CompletedMessage>>,
}

impl RecordingSink {
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().expect("tokens lock").clone()
    }

    pub fn completed(&self) -> Vec<CompletedMessage> {
        self.completed.lock().expect("completed lock").clone()
    }
}

impl TokenSink for RecordingSink {
    fn on_token(&self, token: &str) {
        self.tokens
            .lock()
            .expect("tokens lock")
            .push(token.to_string());
    }

    fn on_done(&self, message: &CompletedMessage) {
        self.completed
            .lock()
            .expect("completed lock")
            .push(message.clone());
    }
}

pub fn gemini(model: &str) -> ModelCandidate {
    ModelCandidate::new(ProviderId::Gemini, model)
}

pub fn single_model_plan() -> FallbackPlan {
    FallbackPlan::new(gemini("gemini-1.5-flash"), [])
}

pub fn invoker(provider: Arc<ScriptedProvider>, plan: FallbackPlan) -> Arc<FallbackInvoker> {
    let mut registry = ProviderRegistry::new();
    registry.register_shared(provider);
    Arc::new(
        FallbackInvoker::new(registry, plan).with_options(
            GenerationOptions::default()
                .with_temperature(0.2)
                .with_max_tokens(300),
        ),
    )
}

pub fn service(
    provider: Arc<ScriptedProvider>,
    plan: FallbackPlan,
    repository: Arc<dyn ChatRepository>,
    cache: Arc<dyn VolatileCache>,
) -> ChatService {
    ChatService::builder(repository, invoker(provider, plan))
        .cache(cache)
        .policy(ChatPolicy::default())
        .build()
}
