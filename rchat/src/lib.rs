//! Streaming chat-turn orchestration over a durable store, a volatile cache,
//! and a model fallback plan.
//!
//! ```rust
//! use rchat::{ChatError, ChatErrorKind, FailureReport};
//!
//! let report = FailureReport::from_error(&ChatError::storage("connection refused"));
//! assert_eq!(report.kind, ChatErrorKind::Storage);
//! assert!(report.user_message.starts_with("Sorry"));
//! ```

mod classify;
mod error;
mod history;
mod relay;
mod service;
mod session;
mod types;

pub mod prelude {
    pub use crate::{
        ChatError, ChatErrorKind, ChatPolicy, ChatService, ChatServiceBuilder, ChatTurnRequest,
        ChatTurnResult, CompletedMessage, FailureReport, HistoryReader, NoopTurnHooks,
        NullTokenSink, ResolvedSession, SessionManager, StreamingRelay, TokenSink, TurnHooks,
    };
    pub use rcommon::SessionId;
}

pub use classify::{
    FailureReport, GENERIC_FAILURE_MESSAGE, classify_provider_error, redact_secrets,
};
pub use error::{ChatError, ChatErrorKind};
pub use history::HistoryReader;
pub use relay::{NullTokenSink, StreamingRelay, TokenSink};
pub use service::{ChatService, ChatServiceBuilder, NoopTurnHooks, TurnHooks};
pub use session::SessionManager;
pub use types::{
    ChatPolicy, ChatTurnRequest, ChatTurnResult, CompletedMessage, DEFAULT_CACHE_TTL,
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_CONTENT_CHARS, DEFAULT_SESSION_SOURCE,
    DEFAULT_SYSTEM_PROMPT, ResolvedSession,
};
pub use rcommon::SessionId;
