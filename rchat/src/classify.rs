//! Failure classification and user-safe rendering.
//!
//! ```rust
//! use rchat::{ChatErrorKind, classify_provider_error};
//! use rprovider::ProviderError;
//!
//! let error = ProviderError::other("Resource exhausted: quota exceeded");
//! assert_eq!(classify_provider_error(&error), ChatErrorKind::ProviderRateLimited);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use rprovider::{ProviderError, ProviderErrorKind};

use crate::{ChatError, ChatErrorKind};

pub const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, I ran into an issue completing that request. Please try again in a moment.";

const SESSION_NOT_FOUND_MESSAGE: &str = "Session not found";
const PROVIDER_AUTH_MESSAGE: &str =
    "Sorry, the assistant is not configured correctly right now. Please check the service configuration.";
const PROVIDER_NOT_FOUND_MESSAGE: &str =
    "Sorry, the configured model is not available. Please try again with a supported model.";
const PROVIDER_RATE_LIMITED_MESSAGE: &str =
    "Sorry, we're receiving too many requests right now. Please wait a moment and try again.";
const PROVIDER_UNAVAILABLE_MESSAGE: &str =
    "Sorry, the assistant is temporarily unavailable. Please try again in a moment.";
const PROVIDER_UNKNOWN_PREFIX: &str = "Sorry, I ran into an issue completing that request";

const MAX_PASSTHROUGH_CHARS: usize = 200;

const AUTH_MARKERS: &[&str] = &["api key", "api_key", "permission", "unauthorized"];
const NOT_FOUND_MARKERS: &[&str] = &["not found", "is not supported"];
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "quota",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
];
const UNAVAILABLE_MARKERS: &[&str] = &["service unavailable", "overloaded", "timeout", "timed out"];

/// Maps a provider failure onto the chat taxonomy.
///
/// Evidence is consulted strongest first: HTTP status, then the provider's
/// own error kind, then well-known phrases in the message.
pub fn classify_provider_error(error: &ProviderError) -> ChatErrorKind {
    if let Some(kind) = error.status.and_then(classify_status) {
        return kind;
    }

    match error.kind {
        ProviderErrorKind::Authentication => return ChatErrorKind::ProviderAuth,
        ProviderErrorKind::NotFound => return ChatErrorKind::ProviderNotFound,
        ProviderErrorKind::RateLimited => return ChatErrorKind::ProviderRateLimited,
        ProviderErrorKind::Timeout
        | ProviderErrorKind::Transport
        | ProviderErrorKind::Unavailable => return ChatErrorKind::ProviderUnavailable,
        ProviderErrorKind::InvalidRequest | ProviderErrorKind::Other => {}
    }

    classify_message(&error.message)
}

fn classify_status(status: u16) -> Option<ChatErrorKind> {
    match status {
        401 | 403 => Some(ChatErrorKind::ProviderAuth),
        404 => Some(ChatErrorKind::ProviderNotFound),
        429 => Some(ChatErrorKind::ProviderRateLimited),
        500 | 502 | 503 | 504 => Some(ChatErrorKind::ProviderUnavailable),
        _ => None,
    }
}

fn classify_message(message: &str) -> ChatErrorKind {
    let lowered = message.to_ascii_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

    if contains_any(AUTH_MARKERS) {
        ChatErrorKind::ProviderAuth
    } else if contains_any(NOT_FOUND_MARKERS) {
        ChatErrorKind::ProviderNotFound
    } else if contains_any(RATE_LIMIT_MARKERS) {
        ChatErrorKind::ProviderRateLimited
    } else if contains_any(UNAVAILABLE_MARKERS) {
        ChatErrorKind::ProviderUnavailable
    } else {
        ChatErrorKind::ProviderUnknown
    }
}

/// Removes API keys and `key=` query parameters from free text.
pub fn redact_secrets(input: &str) -> String {
    static KEY_PARAM: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)\b((?:api_?)?key=)[^&\s"']+"#).expect("invalid key parameter regex")
    });
    static KEY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"AIza[0-9A-Za-z_\-]{20,}|sk-[A-Za-z0-9_\-]{16,}")
            .expect("invalid api key token regex")
    });

    let without_params = KEY_PARAM.replace_all(input, "${1}[REDACTED]");
    KEY_TOKEN
        .replace_all(&without_params, "[REDACTED]")
        .into_owned()
}

/// What the operator logs and what the client is shown for one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub kind: ChatErrorKind,
    pub diagnostic: String,
    pub user_message: String,
}

impl FailureReport {
    pub fn from_error(error: &ChatError) -> Self {
        Self {
            kind: error.kind,
            diagnostic: redact_secrets(&error.to_string()),
            user_message: user_message(error),
        }
    }
}

impl From<&ChatError> for FailureReport {
    fn from(value: &ChatError) -> Self {
        Self::from_error(value)
    }
}

fn user_message(error: &ChatError) -> String {
    match error.kind {
        ChatErrorKind::Validation => error.message.clone(),
        ChatErrorKind::SessionNotFound => SESSION_NOT_FOUND_MESSAGE.to_string(),
        ChatErrorKind::Storage | ChatErrorKind::Cache => GENERIC_FAILURE_MESSAGE.to_string(),
        ChatErrorKind::ProviderAuth => PROVIDER_AUTH_MESSAGE.to_string(),
        ChatErrorKind::ProviderNotFound => PROVIDER_NOT_FOUND_MESSAGE.to_string(),
        ChatErrorKind::ProviderRateLimited => PROVIDER_RATE_LIMITED_MESSAGE.to_string(),
        ChatErrorKind::ProviderUnavailable => PROVIDER_UNAVAILABLE_MESSAGE.to_string(),
        ChatErrorKind::ProviderUnknown => {
            let detail = redact_secrets(error.message.trim());
            if detail.is_empty() {
                return GENERIC_FAILURE_MESSAGE.to_string();
            }
            let detail = truncate_chars(&detail, MAX_PASSTHROUGH_CHARS);
            format!("{PROVIDER_UNKNOWN_PREFIX}: {detail}")
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
