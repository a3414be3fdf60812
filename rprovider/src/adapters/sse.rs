//! Server-sent event line buffering shared by the HTTP transports.

use reqwest::Response;

use crate::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseData {
    Payload(String),
    Done,
}

/// Accumulates raw body bytes and yields complete `data:` payloads.
///
/// Bytes are split on `\n` before UTF-8 decoding so multi-byte characters
/// straddling a chunk boundary stay intact.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseData>, ProviderError> {
        self.pending.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(newline_index) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline_index).collect::<Vec<u8>>();
            if let Some(data) = parse_line(&line)? {
                out.push(data);
            }
        }

        Ok(out)
    }

    /// Flushes a trailing line that arrived without a final newline.
    pub(crate) fn finish(&mut self) -> Result<Option<SseData>, ProviderError> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let line = std::mem::take(&mut self.pending);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Result<Option<SseData>, ProviderError> {
    let line = std::str::from_utf8(line).map_err(|err| ProviderError::transport(err.to_string()))?;
    let line = line.trim();

    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };

    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    if payload == "[DONE]" {
        return Ok(Some(SseData::Done));
    }

    Ok(Some(SseData::Payload(payload.to_string())))
}

pub(crate) fn map_send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else {
        ProviderError::transport(err.to_string())
    }
}

/// Builds a status-carrying error from a non-success response.
pub(crate) async fn status_error(
    provider: &str,
    response: Response,
    extract: fn(&str) -> Option<String>,
) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract(&body)
        .unwrap_or_else(|| format!("{provider} request failed with status {status}"));

    ProviderError::from_status(status.as_u16(), message)
}
