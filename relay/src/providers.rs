//! Provider registry and fallback plan construction from [`RelayConfig`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use rprovider::{
    FallbackHooks, FallbackInvoker, FallbackPlan, ModelCandidate, ModelProvider, ProviderError,
    ProviderRegistry, SecureCredentialManager,
};

use crate::config::RelayConfig;

/// Registers a provider for every API key present in `config`.
///
/// A provider without a key is left out; plan candidates naming it fail over
/// to the next candidate at invocation time.
pub fn build_registry(config: &RelayConfig) -> Result<ProviderRegistry, ProviderError> {
    let credentials = Arc::new(SecureCredentialManager::new());
    let http = http_client(config.provider_timeout)?;
    let mut registry = ProviderRegistry::new();

    if let Some(api_key) = config.gemini_api_key.as_deref() {
        registry.register_shared(build_gemini_provider(
            credentials.clone(),
            api_key,
            http.clone(),
        )?);
    }

    if let Some(api_key) = config.openai_api_key.as_deref() {
        registry.register_shared(build_openai_provider(credentials, api_key, http)?);
    }

    if registry.is_empty() {
        tracing::warn!(
            phase = "startup",
            event = "no_providers",
            "no provider API key configured; every chat turn will fail"
        );
    }

    Ok(registry)
}

/// The configured default model first, then the fallback list.
pub fn build_plan(config: &RelayConfig) -> Result<FallbackPlan, ProviderError> {
    let default = ModelCandidate::parse(&config.default_model)?;
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|model| ModelCandidate::parse(model))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FallbackPlan::new(default, fallbacks))
}

pub fn build_invoker(
    config: &RelayConfig,
    registry: ProviderRegistry,
    hooks: Arc<dyn FallbackHooks>,
) -> Result<FallbackInvoker, ProviderError> {
    let plan = build_plan(config)?;
    for candidate in plan.candidates() {
        if !registry.contains(candidate.provider) {
            tracing::debug!(
                phase = "startup",
                event = "candidate_without_provider",
                candidate = %candidate
            );
        }
    }

    Ok(FallbackInvoker::new(registry, plan)
        .with_options(config.generation)
        .with_hooks(hooks))
}

fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ProviderError::transport(err.to_string()))
}

#[cfg(feature = "provider-gemini")]
fn build_gemini_provider(
    credentials: Arc<SecureCredentialManager>,
    api_key: &str,
    http: Client,
) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    credentials.set_gemini_api_key(api_key)?;
    let transport = Arc::new(rprovider::adapters::gemini::GeminiHttpTransport::new(http));
    Ok(Arc::new(rprovider::adapters::gemini::GeminiProvider::new(
        credentials,
        transport,
    )))
}

#[cfg(not(feature = "provider-gemini"))]
fn build_gemini_provider(
    _credentials: Arc<SecureCredentialManager>,
    _api_key: &str,
    _http: Client,
) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    Err(ProviderError::invalid_request(format!(
        "provider-gemini feature is not enabled on relay ({})",
        rprovider::ProviderId::Gemini
    )))
}

#[cfg(feature = "provider-openai")]
fn build_openai_provider(
    credentials: Arc<SecureCredentialManager>,
    api_key: &str,
    http: Client,
) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    credentials.set_openai_api_key(api_key)?;
    let transport = Arc::new(rprovider::adapters::openai::OpenAiHttpTransport::new(http));
    Ok(Arc::new(rprovider::adapters::openai::OpenAiProvider::new(
        credentials,
        transport,
    )))
}

#[cfg(not(feature = "provider-openai"))]
fn build_openai_provider(
    _credentials: Arc<SecureCredentialManager>,
    _api_key: &str,
    _http: Client,
) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    Err(ProviderError::invalid_request(format!(
        "provider-openai feature is not enabled on relay ({})",
        rprovider::ProviderId::OpenAi
    )))
}
