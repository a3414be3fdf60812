use std::time::Duration;

use rchat::{ChatTurnResult, FailureReport, TurnHooks};
use rcommon::SessionId;
use rprovider::{FallbackHooks, InvocationStrategy, ModelCandidate, ProviderError};

use crate::{MetricsObservabilityHooks, TracingObservabilityHooks};

/// Tracing and metrics hooks driven together, optionally without metrics.
#[derive(Debug, Clone, Copy)]
pub struct CombinedObservabilityHooks {
    tracing: TracingObservabilityHooks,
    metrics: Option<MetricsObservabilityHooks>,
}

impl CombinedObservabilityHooks {
    pub fn new(metrics_enabled: bool) -> Self {
        Self {
            tracing: TracingObservabilityHooks,
            metrics: metrics_enabled.then_some(MetricsObservabilityHooks),
        }
    }
}

impl Default for CombinedObservabilityHooks {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FallbackHooks for CombinedObservabilityHooks {
    fn on_attempt_start(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempt: u32) {
        self.tracing.on_attempt_start(candidate, strategy, attempt);
        if let Some(metrics) = &self.metrics {
            metrics.on_attempt_start(candidate, strategy, attempt);
        }
    }

    fn on_attempt_failure(
        &self,
        candidate: &ModelCandidate,
        strategy: InvocationStrategy,
        attempt: u32,
        error: &ProviderError,
    ) {
        self.tracing
            .on_attempt_failure(candidate, strategy, attempt, error);
        if let Some(metrics) = &self.metrics {
            metrics.on_attempt_failure(candidate, strategy, attempt, error);
        }
    }

    fn on_success(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempts: u32) {
        self.tracing.on_success(candidate, strategy, attempts);
        if let Some(metrics) = &self.metrics {
            metrics.on_success(candidate, strategy, attempts);
        }
    }

    fn on_exhausted(&self, attempts: u32, error: &ProviderError) {
        self.tracing.on_exhausted(attempts, error);
        if let Some(metrics) = &self.metrics {
            metrics.on_exhausted(attempts, error);
        }
    }
}

impl TurnHooks for CombinedObservabilityHooks {
    fn on_turn_start(&self, session_id: &SessionId, created_session: bool) {
        self.tracing.on_turn_start(session_id, created_session);
        if let Some(metrics) = &self.metrics {
            metrics.on_turn_start(session_id, created_session);
        }
    }

    fn on_history_loaded(&self, session_id: &SessionId, messages: usize) {
        self.tracing.on_history_loaded(session_id, messages);
        if let Some(metrics) = &self.metrics {
            metrics.on_history_loaded(session_id, messages);
        }
    }

    fn on_turn_success(&self, result: &ChatTurnResult, elapsed: Duration) {
        self.tracing.on_turn_success(result, elapsed);
        if let Some(metrics) = &self.metrics {
            metrics.on_turn_success(result, elapsed);
        }
    }

    fn on_turn_failure(
        &self,
        session_id: Option<&SessionId>,
        report: &FailureReport,
        elapsed: Duration,
    ) {
        self.tracing.on_turn_failure(session_id, report, elapsed);
        if let Some(metrics) = &self.metrics {
            metrics.on_turn_failure(session_id, report, elapsed);
        }
    }
}
