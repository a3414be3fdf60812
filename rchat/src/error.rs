//! Chat-layer errors.
//!
//! [`ChatErrorKind`] is the closed failure taxonomy every transport renders.
//! Provider errors are classified on conversion, and store errors keep their
//! origin so that cache faults can be absorbed and never surfaced.

use std::error::Error;
use std::fmt::{Display, Formatter};

use rprovider::ProviderError;
use rstore::{StoreError, StoreErrorKind};

use crate::classify::{classify_provider_error, redact_secrets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatErrorKind {
    Validation,
    SessionNotFound,
    Storage,
    Cache,
    ProviderAuth,
    ProviderNotFound,
    ProviderRateLimited,
    ProviderUnavailable,
    ProviderUnknown,
}

impl ChatErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::SessionNotFound => "session_not_found",
            Self::Storage => "storage",
            Self::Cache => "cache",
            Self::ProviderAuth => "provider_auth",
            Self::ProviderNotFound => "provider_not_found",
            Self::ProviderRateLimited => "provider_rate_limited",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderUnknown => "provider_unknown",
        }
    }

    pub fn is_provider(self) -> bool {
        matches!(
            self,
            Self::ProviderAuth
                | Self::ProviderNotFound
                | Self::ProviderRateLimited
                | Self::ProviderUnavailable
                | Self::ProviderUnknown
        )
    }
}

impl Display for ChatErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub kind: ChatErrorKind,
    /// Operator-facing detail with secrets already redacted.
    pub message: String,
    /// HTTP status reported by the provider, when there was one.
    pub status: Option<u16>,
}

impl ChatError {
    pub fn new(kind: ChatErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: redact_secrets(&message.into()),
            status: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Validation, message)
    }

    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::SessionNotFound, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Storage, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Cache, message)
    }

    pub fn provider(error: &ProviderError) -> Self {
        Self {
            kind: classify_provider_error(error),
            message: redact_secrets(&error.message),
            status: error.status,
        }
    }
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl Error for ChatError {}

impl From<ProviderError> for ChatError {
    fn from(value: ProviderError) -> Self {
        Self::provider(&value)
    }
}

impl From<StoreError> for ChatError {
    fn from(value: StoreError) -> Self {
        match value.kind {
            StoreErrorKind::NotFound => Self::session_not_found(value.message),
            StoreErrorKind::Cache => Self::cache(value.message),
            StoreErrorKind::InvalidRequest => Self::validation(value.message),
            StoreErrorKind::Storage | StoreErrorKind::Other => Self::storage(value.message),
        }
    }
}
