//! Gemini provider implementation over transport and shared models.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::StreamExt;

use crate::{
    BoxedEventStream, ModelProvider, ModelRequest, ModelResponse, ProviderError, ProviderFuture,
    ProviderId, SecureCredentialManager, StreamEvent,
};

use super::auth::resolve_gemini_auth;
use super::transport::GeminiTransport;
use super::types::{GeminiContent, GeminiRequest};

#[derive(Clone)]
pub struct GeminiProvider {
    credentials: Arc<SecureCredentialManager>,
    transport: Arc<dyn GeminiTransport>,
}

impl GeminiProvider {
    pub fn new(
        credentials: Arc<SecureCredentialManager>,
        transport: Arc<dyn GeminiTransport>,
    ) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    pub(crate) fn build_gemini_request(&self, request: ModelRequest) -> GeminiRequest {
        GeminiRequest {
            model: request.model,
            contents: request
                .messages
                .into_iter()
                .map(GeminiContent::from)
                .collect(),
            system_instruction: request.system_instruction,
            temperature: request.options.temperature,
            max_output_tokens: request.options.max_tokens,
        }
    }
}

impl ModelProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn complete<'a>(
        &'a self,
        request: ModelRequest,
    ) -> ProviderFuture<'a, Result<ModelResponse, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            let auth = resolve_gemini_auth(&self.credentials)?;
            let gemini_request = self.build_gemini_request(request);
            let response = self.transport.complete(gemini_request, auth).await?;
            Ok(response.into_model_response())
        })
    }

    fn stream<'a>(
        &'a self,
        request: ModelRequest,
    ) -> ProviderFuture<'a, Result<BoxedEventStream<'a>, ProviderError>> {
        Box::pin(async move {
            request.validate()?;
            let auth = resolve_gemini_auth(&self.credentials)?;
            let gemini_request = self.build_gemini_request(request);
            let mut chunks = self.transport.stream(gemini_request, auth).await?;

            let stream = try_stream! {
                while let Some(chunk) = chunks.next().await {
                    yield StreamEvent::from(chunk?);
                }
            };

            Ok(Box::pin(stream) as BoxedEventStream<'a>)
        })
    }
}
