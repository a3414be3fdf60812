//! Gemini credential helpers and auth resolution policy.

use crate::{ProviderError, ProviderId, SecretString, SecureCredentialManager};

use super::types::GeminiAuth;

/// Placeholder shipped in sample env files; treated as "no key".
const PLACEHOLDER_KEY: &str = "your-gemini-api-key-here";

impl SecureCredentialManager {
    pub fn set_gemini_api_key(&self, api_key: impl Into<String>) -> Result<(), ProviderError> {
        let api_key = api_key.into();
        if api_key.trim() == PLACEHOLDER_KEY {
            return Err(ProviderError::authentication(
                "GEMINI_API_KEY still holds the sample placeholder value",
            ));
        }

        self.set_api_key(ProviderId::Gemini, api_key.trim())
    }
}

pub(crate) fn resolve_gemini_auth(
    credentials: &SecureCredentialManager,
) -> Result<GeminiAuth, ProviderError> {
    credentials
        .with_api_key(ProviderId::Gemini, |key| {
            GeminiAuth::ApiKey(SecretString::new(key))
        })?
        .ok_or_else(|| ProviderError::authentication("no Gemini API key configured"))
}
