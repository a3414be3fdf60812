use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use rchat::{ChatTurnResult, FailureReport, TurnHooks};
use rcommon::SessionId;
use rprovider::{FallbackHooks, InvocationStrategy, ModelCandidate, ProviderError};

pub struct SafeFallbackHooks<H> {
    inner: H,
}

impl<H> SafeFallbackHooks<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> FallbackHooks for SafeFallbackHooks<H>
where
    H: FallbackHooks,
{
    fn on_attempt_start(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempt: u32) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_attempt_start(candidate, strategy, attempt)
        }));
    }

    fn on_attempt_failure(
        &self,
        candidate: &ModelCandidate,
        strategy: InvocationStrategy,
        attempt: u32,
        error: &ProviderError,
    ) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner
                .on_attempt_failure(candidate, strategy, attempt, error)
        }));
    }

    fn on_success(&self, candidate: &ModelCandidate, strategy: InvocationStrategy, attempts: u32) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_success(candidate, strategy, attempts)
        }));
    }

    fn on_exhausted(&self, attempts: u32, error: &ProviderError) {
        let _ = catch_unwind(AssertUnwindSafe(|| self.inner.on_exhausted(attempts, error)));
    }
}

pub struct SafeTurnHooks<H> {
    inner: H,
}

impl<H> SafeTurnHooks<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> TurnHooks for SafeTurnHooks<H>
where
    H: TurnHooks,
{
    fn on_turn_start(&self, session_id: &SessionId, created_session: bool) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_turn_start(session_id, created_session)
        }));
    }

    fn on_history_loaded(&self, session_id: &SessionId, messages: usize) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_history_loaded(session_id, messages)
        }));
    }

    fn on_turn_success(&self, result: &ChatTurnResult, elapsed: Duration) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_turn_success(result, elapsed)
        }));
    }

    fn on_turn_failure(
        &self,
        session_id: Option<&SessionId>,
        report: &FailureReport,
        elapsed: Duration,
    ) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            self.inner.on_turn_failure(session_id, report, elapsed)
        }));
    }
}
