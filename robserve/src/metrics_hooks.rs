//! Metrics-based observability hooks for fallback attempts and chat turns.
//!
//! ```rust
//! use robserve::MetricsObservabilityHooks;
//! use rprovider::FallbackHooks;
//!
//! fn accepts_fallback_hooks(_hooks: &dyn FallbackHooks) {}
//!
//! let hooks = MetricsObservabilityHooks;
//! accepts_fallback_hooks(&hooks);
//! ```

use std::time::Duration;

use rchat::{ChatTurnResult, FailureReport, TurnHooks};
use rcommon::SessionId;
use rprovider::{FallbackHooks, InvocationStrategy, ModelCandidate, ProviderError};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObservabilityHooks;

impl FallbackHooks for MetricsObservabilityHooks {
    fn on_attempt_start(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, _attempt: u32) {
        metrics::counter!(
            "relay_model_attempt_start_total",
            "provider" => candidate.provider.to_string(),
            "model" => candidate.model.clone(),
            "strategy" => strategy.to_string()
        )
        .increment(1);
    }

    fn on_attempt_failure(
        &self,
        candidate: &ModelCandidate,
        strategy: InvocationStrategy,
        _attempt: u32,
        error: &ProviderError,
    ) {
        metrics::counter!(
            "relay_model_attempt_failure_total",
            "provider" => candidate.provider.to_string(),
            "model" => candidate.model.clone(),
            "strategy" => strategy.to_string(),
            "error_kind" => format!("{:?}", error.kind)
        )
        .increment(1);
    }

    fn on_success(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempts: u32) {
        metrics::counter!(
            "relay_model_success_total",
            "provider" => candidate.provider.to_string(),
            "model" => candidate.model.clone(),
            "strategy" => strategy.to_string()
        )
        .increment(1);
        metrics::histogram!("relay_model_attempts_per_success").record(attempts as f64);
    }

    fn on_exhausted(&self, attempts: u32, error: &ProviderError) {
        metrics::counter!(
            "relay_model_exhausted_total",
            "error_kind" => format!("{:?}", error.kind)
        )
        .increment(1);
        metrics::histogram!("relay_model_attempts_per_exhaustion").record(attempts as f64);
    }
}

impl TurnHooks for MetricsObservabilityHooks {
    fn on_turn_start(&self, _session_id: &SessionId, created_session: bool) {
        metrics::counter!("relay_turn_start_total").increment(1);
        if created_session {
            metrics::counter!("relay_session_created_total").increment(1);
        }
    }

    fn on_history_loaded(&self, _session_id: &SessionId, messages: usize) {
        metrics::histogram!("relay_turn_history_messages").record(messages as f64);
    }

    fn on_turn_success(&self, result: &ChatTurnResult, elapsed: Duration) {
        metrics::counter!(
            "relay_turn_success_total",
            "model" => result.candidate.model.clone()
        )
        .increment(1);
        metrics::histogram!(
            "relay_turn_duration_seconds",
            "status" => "success"
        )
        .record(elapsed.as_secs_f64());
    }

    fn on_turn_failure(
        &self,
        _session_id: Option<&SessionId>,
        report: &FailureReport,
        elapsed: Duration,
    ) {
        metrics::counter!(
            "relay_turn_failure_total",
            "error_kind" => report.kind.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "relay_turn_duration_seconds",
            "status" => "failure"
        )
        .record(elapsed.as_secs_f64());
    }
}
