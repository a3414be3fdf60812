//! Model fallback matrix and the invoker that walks it.
//!
//! The matrix is data: an ordered, de-duplicated candidate list crossed with an
//! ordered strategy list. [`FallbackInvoker::invoke`] folds over it left to right
//! and stops at the first `(candidate, strategy)` whose stream opens.
//!
//! ```rust
//! use rprovider::{FallbackPlan, InvocationStrategy, ModelCandidate, ProviderId};
//!
//! let plan = FallbackPlan::new(
//!     ModelCandidate::new(ProviderId::Gemini, "gemini-1.5-flash"),
//!     vec![
//!         ModelCandidate::new(ProviderId::Gemini, "gemini-1.5-pro"),
//!         ModelCandidate::new(ProviderId::Gemini, "gemini-1.5-flash"),
//!     ],
//! );
//!
//! assert_eq!(plan.candidates().len(), 2);
//! assert_eq!(plan.attempt_count(), 4);
//! assert_eq!(plan.strategies()[0], InvocationStrategy::Stateless);
//! ```

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use rcommon::GenerationOptions;

use crate::{
    BoxedEventStream, ConversationContext, InvocationStrategy, ModelRequest, ModelResponse,
    ProviderError, ProviderId, ProviderRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelCandidate {
    pub provider: ProviderId,
    pub model: String,
}

impl ModelCandidate {
    pub fn new(provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Parses `provider:model` or a bare model name.
    ///
    /// Bare names starting with `gpt-` or `o1`/`o3`/`o4` go to OpenAI; everything
    /// else goes to Gemini.
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ProviderError::invalid_request(
                "model candidate must not be empty",
            ));
        }

        if let Some((provider, model)) = value.split_once(':') {
            let model = model.trim();
            if model.is_empty() {
                return Err(ProviderError::invalid_request(format!(
                    "model candidate '{value}' has no model name"
                )));
            }
            return Ok(Self::new(provider.parse()?, model));
        }

        let provider = if value.starts_with("gpt-")
            || value.starts_with("o1")
            || value.starts_with("o3")
            || value.starts_with("o4")
        {
            ProviderId::OpenAi
        } else {
            ProviderId::Gemini
        };

        Ok(Self::new(provider, value))
    }
}

impl Display for ModelCandidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPlan {
    candidates: Vec<ModelCandidate>,
    strategies: Vec<InvocationStrategy>,
}

impl FallbackPlan {
    pub fn new(
        default: ModelCandidate,
        fallbacks: impl IntoIterator<Item = ModelCandidate>,
    ) -> Self {
        let mut candidates: Vec<ModelCandidate> = Vec::new();
        for candidate in std::iter::once(default).chain(fallbacks) {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }

        Self {
            candidates,
            strategies: vec![InvocationStrategy::Stateless, InvocationStrategy::Stateful],
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<InvocationStrategy>) -> Self {
        let mut unique = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            if !unique.contains(&strategy) {
                unique.push(strategy);
            }
        }
        self.strategies = unique;
        self
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.candidates
    }

    pub fn strategies(&self) -> &[InvocationStrategy] {
        &self.strategies
    }

    /// Every `(candidate, strategy)` pair in attempt order.
    pub fn attempts(&self) -> impl Iterator<Item = (&ModelCandidate, InvocationStrategy)> {
        self.candidates.iter().flat_map(move |candidate| {
            self.strategies
                .iter()
                .map(move |strategy| (candidate, *strategy))
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.candidates.len() * self.strategies.len()
    }
}

pub trait FallbackHooks: Send + Sync {
    fn on_attempt_start(
        &self,
        _candidate: &ModelCandidate,
        _strategy: InvocationStrategy,
        _attempt: u32,
    ) {
    }

    fn on_attempt_failure(
        &self,
        _candidate: &ModelCandidate,
        _strategy: InvocationStrategy,
        _attempt: u32,
        _error: &ProviderError,
    ) {
    }

    fn on_success(&self, _candidate: &ModelCandidate, _strategy: InvocationStrategy, _attempts: u32) {
    }

    fn on_exhausted(&self, _attempts: u32, _error: &ProviderError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFallbackHooks;

impl FallbackHooks for NoopFallbackHooks {}

/// A stream that opened, plus the coordinates that produced it.
pub struct Invocation<'a> {
    pub stream: BoxedEventStream<'a>,
    pub candidate: ModelCandidate,
    pub strategy: InvocationStrategy,
    /// The exact request that opened `stream`; reused for the non-streaming fallback.
    pub request: ModelRequest,
    pub attempts: u32,
}

impl std::fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("candidate", &self.candidate)
            .field("strategy", &self.strategy)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

pub struct FallbackInvoker {
    registry: ProviderRegistry,
    plan: FallbackPlan,
    options: GenerationOptions,
    hooks: Arc<dyn FallbackHooks>,
}

impl FallbackInvoker {
    pub fn new(registry: ProviderRegistry, plan: FallbackPlan) -> Self {
        Self {
            registry,
            plan,
            options: GenerationOptions::default(),
            hooks: Arc::new(NoopFallbackHooks),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn FallbackHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn plan(&self) -> &FallbackPlan {
        &self.plan
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn invoke(
        &self,
        context: &ConversationContext,
    ) -> Result<Invocation<'_>, ProviderError> {
        let mut attempt = 0_u32;
        let mut last_error =
            ProviderError::invalid_request("fallback plan has no model candidates");

        for (candidate, strategy) in self.plan.attempts() {
            attempt += 1;
            self.hooks.on_attempt_start(candidate, strategy, attempt);

            let request = context.to_request(strategy, candidate.model.clone(), self.options);
            match self.open_stream(candidate, request.clone()).await {
                Ok(stream) => {
                    self.hooks.on_success(candidate, strategy, attempt);
                    tracing::debug!(
                        candidate = %candidate,
                        strategy = %strategy,
                        attempts = attempt,
                        "provider stream opened"
                    );
                    return Ok(Invocation {
                        stream,
                        candidate: candidate.clone(),
                        strategy,
                        request,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        candidate = %candidate,
                        strategy = %strategy,
                        attempt,
                        error = %error,
                        "provider attempt failed"
                    );
                    self.hooks
                        .on_attempt_failure(candidate, strategy, attempt, &error);
                    last_error = error;
                }
            }
        }

        self.hooks.on_exhausted(attempt, &last_error);
        Err(last_error)
    }

    /// Non-streaming call against a specific candidate.
    pub async fn complete(
        &self,
        candidate: &ModelCandidate,
        request: ModelRequest,
    ) -> Result<ModelResponse, ProviderError> {
        let provider = self.registry.get_ref(candidate.provider).ok_or_else(|| {
            ProviderError::invalid_request(format!(
                "provider '{}' is not registered",
                candidate.provider
            ))
        })?;

        request.validate()?;
        provider.complete(request).await
    }

    async fn open_stream(
        &self,
        candidate: &ModelCandidate,
        request: ModelRequest,
    ) -> Result<BoxedEventStream<'_>, ProviderError> {
        let provider = self.registry.get_ref(candidate.provider).ok_or_else(|| {
            ProviderError::invalid_request(format!(
                "provider '{}' is not registered",
                candidate.provider
            ))
        })?;

        request.validate()?;
        provider.stream(request).await
    }
}
