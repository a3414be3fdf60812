#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rchat::{ChatPolicy, ChatService};
use relay::{AppState, GatewayFrame};
use rprovider::{
    BoxedEventStream, FallbackInvoker, FallbackPlan, ModelCandidate, ModelProvider, ModelRequest,
    ModelResponse, ProviderError, ProviderFuture, ProviderId, ProviderRegistry, StopReason,
    StreamEvent, TokenUsage, VecEventStream,
};
use rstore::{ChatRepository, InMemoryCache, InMemoryChatRepository, VolatileCache};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;

/// Streams a fixed list of deltas, or fails every call with one error.
///
/// A gated provider holds every `stream` call open until [`FakeProvider::release`].
pub struct FakeProvider {
    deltas: Vec<String>,
    failure: Option<ProviderError>,
    gate: Option<Notify>,
    pub stream_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn answering(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|delta| delta.to_string()).collect(),
            failure: None,
            gate: None,
            stream_calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(deltas: &[&str]) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::answering(deltas)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Yields until `stream` has been entered at least once.
    pub async fn wait_for_stream_call(&self) {
        while self.stream_calls() == 0 {
            tokio::task::yield_now().await;
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            deltas: Vec::new(),
            failure: Some(error),
            gate: None,
            stream_calls: AtomicUsize::new(0),
        }
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

impl ModelProvider for FakeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn complete<'a>(
        &'a self,
        request: ModelRequest,
    ) -> ProviderFuture<'a, Result<ModelResponse, ProviderError>> {
        Box::pin(async move {
            Ok(ModelResponse {
                provider: ProviderId::Gemini,
                model: request.model,
                text: self.deltas.concat(),
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage::default(),
            })
        })
    }

    fn stream<'a>(
        &'a self,
        _request: ModelRequest,
    ) -> ProviderFuture<'a, Result<BoxedEventStream<'a>, ProviderError>> {
        Box::pin(async move {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }

            let events = self
                .deltas
                .iter()
                .map(|delta| Ok(StreamEvent::TextDelta(delta.clone())))
                .collect::<Vec<_>>();
            Ok(Box::pin(VecEventStream::new(events)) as BoxedEventStream<'a>)
        })
    }
}

pub struct Harness {
    pub state: AppState,
    pub provider: Arc<FakeProvider>,
    pub repository: Arc<dyn ChatRepository>,
    pub cache: Arc<dyn VolatileCache>,
}

pub fn harness(provider: FakeProvider) -> Harness {
    let provider = Arc::new(provider);
    let mut registry = ProviderRegistry::new();
    registry.register_shared(provider.clone());

    let plan = FallbackPlan::new(
        ModelCandidate::new(ProviderId::Gemini, "gemini-1.5-flash"),
        Vec::new(),
    );
    let invoker = Arc::new(FallbackInvoker::new(registry, plan));
    let repository: Arc<dyn ChatRepository> = Arc::new(InMemoryChatRepository::new());
    let cache: Arc<dyn VolatileCache> = Arc::new(InMemoryCache::new());
    let chat = ChatService::new(
        repository.clone(),
        cache.clone(),
        invoker,
        ChatPolicy::default(),
    );

    Harness {
        state: AppState::new(chat, cache.clone()),
        provider,
        repository,
        cache,
    }
}

/// Receives frames until one named `event` arrives, returning it with everything before it.
pub async fn frames_until(
    rx: &mut UnboundedReceiver<GatewayFrame>,
    event: &str,
) -> (Vec<GatewayFrame>, GatewayFrame) {
    let mut seen = Vec::new();
    while let Some(frame) = rx.recv().await {
        if frame.event == event {
            return (seen, frame);
        }
        seen.push(frame);
    }
    panic!("channel closed before a '{event}' frame arrived; saw {seen:?}");
}
