//! Gemini `generateContent` payload serde models.

use serde::{Deserialize, Serialize};

use crate::ProviderError;

use super::types::{GeminiFinishReason, GeminiRequest, GeminiResponse, GeminiUsage};

pub(crate) fn build_api_request(request: GeminiRequest) -> Result<GeminiApiRequest, ProviderError> {
    if request.contents.is_empty() {
        return Err(ProviderError::invalid_request(
            "Gemini request requires at least one content entry",
        ));
    }

    let contents = request
        .contents
        .into_iter()
        .map(|content| GeminiApiContent {
            role: Some(content.role.as_str().to_string()),
            parts: vec![GeminiApiPart {
                text: Some(content.text),
            }],
        })
        .collect();

    let system_instruction = request
        .system_instruction
        .filter(|instruction| !instruction.trim().is_empty())
        .map(|instruction| GeminiApiContent {
            role: None,
            parts: vec![GeminiApiPart {
                text: Some(instruction),
            }],
        });

    let generation_config =
        if request.temperature.is_none() && request.max_output_tokens.is_none() {
            None
        } else {
            Some(GeminiApiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            })
        };

    Ok(GeminiApiRequest {
        contents,
        system_instruction,
        generation_config,
    })
}

pub(crate) fn parse_finish_reason(value: Option<&str>) -> GeminiFinishReason {
    match value {
        Some("STOP") => GeminiFinishReason::Stop,
        Some("MAX_TOKENS") => GeminiFinishReason::MaxTokens,
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            GeminiFinishReason::Safety
        }
        _ => GeminiFinishReason::Other,
    }
}

/// Reads `{"error":{"code":..,"message":..,"status":..}}`, keeping the status tag.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<GeminiApiErrorEnvelope>(body).ok()?;
    Some(match parsed.error.status {
        Some(status) if !status.is_empty() => format!("{} ({status})", parsed.error.message),
        _ => parsed.error.message,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiApiErrorEnvelope {
    pub error: GeminiApiError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiApiError {
    pub message: String,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiApiRequest {
    pub contents: Vec<GeminiApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiApiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GeminiApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GeminiApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// One `generateContent` body, or one SSE frame of `streamGenerateContent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiApiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiApiCandidate>,
    pub usage_metadata: Option<GeminiApiUsage>,
    pub model_version: Option<String>,
}

impl GeminiApiResponse {
    pub(crate) fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    pub(crate) fn finish_reason(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiApiCandidate {
    pub content: Option<GeminiApiContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiApiUsage {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl From<GeminiApiUsage> for GeminiUsage {
    fn from(value: GeminiApiUsage) -> Self {
        Self {
            prompt_tokens: value.prompt_token_count,
            candidates_tokens: value.candidates_token_count,
            total_tokens: value.total_token_count,
        }
    }
}

pub(crate) fn into_response(value: GeminiApiResponse, requested_model: String) -> GeminiResponse {
    let text = value.text();
    let finish_reason = parse_finish_reason(value.finish_reason());

    GeminiResponse {
        model: value.model_version.unwrap_or(requested_model),
        text,
        finish_reason,
        usage: value.usage_metadata.map(GeminiUsage::from).unwrap_or_default(),
    }
}
