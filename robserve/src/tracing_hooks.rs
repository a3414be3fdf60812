//! Tracing-based observability hooks for fallback attempts and chat turns.
//!
//! ```rust
//! use robserve::TracingObservabilityHooks;
//! use rchat::TurnHooks;
//!
//! fn accepts_turn_hooks(_hooks: &dyn TurnHooks) {}
//!
//! let hooks = TracingObservabilityHooks;
//! accepts_turn_hooks(&hooks);
//! ```

use std::time::Duration;

use rchat::{ChatTurnResult, FailureReport, TurnHooks};
use rcommon::SessionId;
use rprovider::{FallbackHooks, InvocationStrategy, ModelCandidate, ProviderError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObservabilityHooks;

impl FallbackHooks for TracingObservabilityHooks {
    fn on_attempt_start(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempt: u32) {
        tracing::info!(
            phase = "provider",
            event = "attempt_start",
            provider = %candidate.provider,
            model = candidate.model,
            strategy = %strategy,
            attempt
        );
    }

    fn on_attempt_failure(
        &self,
        candidate: &ModelCandidate,
        strategy: InvocationStrategy,
        attempt: u32,
        error: &ProviderError,
    ) {
        tracing::warn!(
            phase = "provider",
            event = "attempt_failure",
            provider = %candidate.provider,
            model = candidate.model,
            strategy = %strategy,
            attempt,
            status = error.status,
            error_kind = ?error.kind,
            retryable = error.retryable
        );
    }

    fn on_success(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempts: u32) {
        tracing::info!(
            phase = "provider",
            event = "success",
            provider = %candidate.provider,
            model = candidate.model,
            strategy = %strategy,
            attempts
        );
    }

    fn on_exhausted(&self, attempts: u32, error: &ProviderError) {
        tracing::error!(
            phase = "provider",
            event = "exhausted",
            attempts,
            status = error.status,
            error_kind = ?error.kind
        );
    }
}

impl TurnHooks for TracingObservabilityHooks {
    fn on_turn_start(&self, session_id: &SessionId, created_session: bool) {
        tracing::info!(
            phase = "turn",
            event = "start",
            session_id = %session_id,
            created_session
        );
    }

    fn on_history_loaded(&self, session_id: &SessionId, messages: usize) {
        tracing::debug!(
            phase = "turn",
            event = "history_loaded",
            session_id = %session_id,
            messages
        );
    }

    fn on_turn_success(&self, result: &ChatTurnResult, elapsed: Duration) {
        tracing::info!(
            phase = "turn",
            event = "success",
            session_id = %result.session_id,
            candidate = %result.candidate,
            strategy = %result.strategy,
            attempts = result.attempts,
            answer_chars = result.assistant_message.content.chars().count(),
            elapsed_ms = elapsed.as_millis() as u64
        );
    }

    fn on_turn_failure(
        &self,
        session_id: Option<&SessionId>,
        report: &FailureReport,
        elapsed: Duration,
    ) {
        tracing::error!(
            phase = "turn",
            event = "failure",
            session_id = session_id.map(SessionId::as_str),
            error_kind = %report.kind,
            diagnostic = %report.diagnostic,
            elapsed_ms = elapsed.as_millis() as u64
        );
    }
}
