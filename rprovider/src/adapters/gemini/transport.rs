//! Gemini transport trait and reqwest-based HTTP implementation.

use std::pin::Pin;

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Client;

use crate::adapters::sse::{SseData, SseLineBuffer, map_send_error, status_error};
use crate::{ProviderError, ProviderFuture};

use super::serde_api::{
    GeminiApiResponse, build_api_request, extract_error_message, into_response,
    parse_finish_reason,
};
use super::types::{
    GeminiAuth, GeminiFinishReason, GeminiRequest, GeminiResponse, GeminiStreamChunk, GeminiUsage,
};

pub type GeminiChunkStream<'a> =
    Pin<Box<dyn Stream<Item = Result<GeminiStreamChunk, ProviderError>> + Send + 'a>>;

pub trait GeminiTransport: Send + Sync + std::fmt::Debug {
    fn complete<'a>(
        &'a self,
        request: GeminiRequest,
        auth: GeminiAuth,
    ) -> ProviderFuture<'a, Result<GeminiResponse, ProviderError>>;

    fn stream<'a>(
        &'a self,
        request: GeminiRequest,
        auth: GeminiAuth,
    ) -> ProviderFuture<'a, Result<GeminiChunkStream<'a>, ProviderError>>;
}

#[derive(Debug, Clone)]
pub struct GeminiHttpTransport {
    client: Client,
    base_url: String,
}

impl GeminiHttpTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(crate) fn endpoint(&self, model: &str, method: &str) -> String {
        let model = model.trim().trim_start_matches("models/");
        format!(
            "{}/models/{model}:{method}",
            self.base_url.trim_end_matches('/')
        )
    }

    fn apply_auth(
        &self,
        builder: reqwest::RequestBuilder,
        auth: &GeminiAuth,
    ) -> reqwest::RequestBuilder {
        match auth {
            GeminiAuth::ApiKey(key) => builder.header("x-goog-api-key", key.expose()),
        }
    }
}

impl GeminiTransport for GeminiHttpTransport {
    fn complete<'a>(
        &'a self,
        request: GeminiRequest,
        auth: GeminiAuth,
    ) -> ProviderFuture<'a, Result<GeminiResponse, ProviderError>> {
        Box::pin(async move {
            let model = request.model.clone();
            let api_request = build_api_request(request)?;
            let builder = self
                .client
                .post(self.endpoint(&model, "generateContent"))
                .json(&api_request);
            let response = self
                .apply_auth(builder, &auth)
                .send()
                .await
                .map_err(map_send_error)?;

            if !response.status().is_success() {
                return Err(status_error("Gemini", response, extract_error_message).await);
            }

            let parsed: GeminiApiResponse = response
                .json()
                .await
                .map_err(|err| ProviderError::transport(err.to_string()))?;

            Ok(into_response(parsed, model))
        })
    }

    fn stream<'a>(
        &'a self,
        request: GeminiRequest,
        auth: GeminiAuth,
    ) -> ProviderFuture<'a, Result<GeminiChunkStream<'a>, ProviderError>> {
        Box::pin(async move {
            let requested_model = request.model.clone();
            let api_request = build_api_request(request)?;
            let builder = self
                .client
                .post(self.endpoint(&requested_model, "streamGenerateContent"))
                .query(&[("alt", "sse")])
                .json(&api_request);
            let response = self
                .apply_auth(builder, &auth)
                .send()
                .await
                .map_err(map_send_error)?;

            if !response.status().is_success() {
                return Err(status_error("Gemini", response, extract_error_message).await);
            }

            let stream = try_stream! {
                let mut chunks = response.bytes_stream();
                let mut lines = SseLineBuffer::default();
                let mut text = String::new();
                let mut model = None::<String>;
                let mut finish_reason = GeminiFinishReason::Other;
                let mut usage = GeminiUsage::default();
                let mut ended = false;

                while !ended {
                    let frames = match chunks.next().await {
                        Some(item) => {
                            let bytes = item.map_err(|err| ProviderError::transport(err.to_string()))?;
                            lines.push(&bytes)?
                        }
                        None => {
                            ended = true;
                            lines.finish()?.into_iter().collect::<Vec<_>>()
                        }
                    };

                    for data in frames {
                        let SseData::Payload(payload) = data else {
                            continue;
                        };

                        let parsed: GeminiApiResponse = serde_json::from_str(&payload)
                            .map_err(|err| ProviderError::transport(err.to_string()))?;

                        if model.is_none() {
                            model = parsed.model_version.clone();
                        }
                        if let Some(reason) = parsed.finish_reason() {
                            finish_reason = parse_finish_reason(Some(reason));
                        }

                        let delta = parsed.text();
                        if let Some(reported) = parsed.usage_metadata {
                            usage = reported.into();
                        }

                        if !delta.is_empty() {
                            text.push_str(&delta);
                            yield GeminiStreamChunk::TextDelta(delta);
                        }
                    }
                }

                yield GeminiStreamChunk::ResponseComplete(GeminiResponse {
                    model: model.unwrap_or(requested_model),
                    text,
                    finish_reason,
                    usage,
                });
            };

            Ok(Box::pin(stream) as GeminiChunkStream<'a>)
        })
    }
}
